//! Side effects fired by the timer: sound, notifications, vibration and
//! screen wake-lock.
//!
//! Every effect is best effort. A missing capability disables the effect
//! and is logged; nothing here returns an error to the caller.

use crate::audio::{AudioPlayer, RetryPolicy, Tone};
use crate::models::{AlarmSound, StudyPreferences};
use crate::notifications::Notifier;
use log::{debug, info};

/// Pattern played when a phase ends, in milliseconds (on, off, on...).
pub const COMPLETION_VIBRATION: &[u64] = &[200, 100, 200];
/// Pattern played when a scheduled goal starts.
pub const GOAL_START_VIBRATION: &[u64] = &[300, 100, 300, 100, 300];

/// Port through which the engine reaches the outside world.
pub trait Effects: Send {
    /// Plays the configured alarm tone.
    fn play_alarm(&mut self);
    /// Plays the five-minute warning tone.
    fn play_warning(&mut self);
    fn notify(&mut self, title: &str, body: &str);
    fn request_notification_permission(&mut self);
    fn vibrate(&mut self, pattern: &[u64]);
    fn acquire_wake_lock(&mut self);
    fn release_wake_lock(&mut self);
    /// Applies updated preferences (volume, sound choice, toggles).
    fn configure(&mut self, _prefs: &StudyPreferences) {}
}

/// Screen wake-lock bookkeeping.
///
/// No portable screen-inhibit API exists on the desktop targets, so the lock
/// is tracked and logged without holding anything at the OS level.
#[derive(Debug, Default)]
pub struct WakeLock {
    held: bool,
}

impl WakeLock {
    pub fn acquire(&mut self) {
        if !self.held {
            self.held = true;
            debug!("Screen wake-lock requested (not supported on this platform)");
        }
    }

    pub fn release(&mut self) {
        if self.held {
            self.held = false;
            debug!("Screen wake-lock released");
        }
    }

    pub fn is_held(&self) -> bool {
        self.held
    }
}

/// Effects backed by the local audio device and notification daemon.
#[derive(Debug)]
pub struct SystemEffects {
    audio: AudioPlayer,
    notifier: Notifier,
    wake_lock: WakeLock,
    sound_enabled: bool,
    volume: f32,
    alarm: AlarmSound,
}

impl SystemEffects {
    pub fn new(prefs: &StudyPreferences, retry: RetryPolicy) -> Self {
        Self {
            audio: AudioPlayer::new(retry),
            notifier: Notifier::new(prefs.notifications_enabled),
            wake_lock: WakeLock::default(),
            sound_enabled: prefs.sound_enabled,
            volume: prefs.timer.sound_volume,
            alarm: prefs.alarm_sound,
        }
    }
}

impl Effects for SystemEffects {
    fn play_alarm(&mut self) {
        if self.sound_enabled {
            self.audio.play(Tone::Alarm(self.alarm), self.volume);
        }
    }

    fn play_warning(&mut self) {
        if self.sound_enabled {
            self.audio.play(Tone::Warning, self.volume);
        }
    }

    fn notify(&mut self, title: &str, body: &str) {
        self.notifier.notify(title, body);
    }

    fn request_notification_permission(&mut self) {
        self.notifier.request_permission();
    }

    fn vibrate(&mut self, pattern: &[u64]) {
        debug!("Vibration {:?} skipped: no vibration hardware", pattern);
    }

    fn acquire_wake_lock(&mut self) {
        self.wake_lock.acquire();
    }

    fn release_wake_lock(&mut self) {
        self.wake_lock.release();
    }

    fn configure(&mut self, prefs: &StudyPreferences) {
        self.sound_enabled = prefs.sound_enabled;
        self.volume = prefs.timer.sound_volume;
        self.alarm = prefs.alarm_sound;
        self.notifier.set_enabled(prefs.notifications_enabled);
        info!(
            "Effects configured: sound={} volume={:.2} alarm={:?} notifications={}",
            self.sound_enabled, self.volume, self.alarm, prefs.notifications_enabled
        );
    }
}
