//! Audio playback for alarms and warnings.
//!
//! Playback happens on a short-lived thread that opens its own output
//! stream, so callers never wait on the audio device. Failed attempts are
//! retried with exponential backoff and then dropped.

use crate::models::AlarmSound;
use log::{debug, warn};
use rodio::source::{SineWave, Source};
use rodio::{OutputStream, Sink};
use std::thread;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Failed to initialize audio output: {0}")]
    Stream(#[from] rodio::StreamError),
    #[error("Failed to play audio: {0}")]
    Play(#[from] rodio::PlayError),
}

/// A sound the timer can make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Alarm(AlarmSound),
    Warning,
}

/// One note of a tone; a frequency of zero is a rest.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Note {
    pub freq_hz: f32,
    pub millis: u64,
}

const fn note(freq_hz: f32, millis: u64) -> Note {
    Note { freq_hz, millis }
}

const CHIME: &[Note] = &[note(880.0, 150), note(0.0, 50), note(1046.5, 200)];
const BELL: &[Note] = &[
    note(659.3, 400),
    note(0.0, 80),
    note(659.3, 400),
    note(0.0, 80),
    note(523.3, 600),
];
const DIGITAL: &[Note] = &[
    note(1760.0, 90),
    note(0.0, 60),
    note(1760.0, 90),
    note(0.0, 60),
    note(1760.0, 90),
    note(0.0, 60),
    note(1760.0, 90),
];
const WARNING: &[Note] = &[note(523.3, 120), note(0.0, 60), note(523.3, 120)];

impl Tone {
    /// The notes that make up this tone.
    pub fn notes(&self) -> &'static [Note] {
        match self {
            Tone::Alarm(AlarmSound::Chime) => CHIME,
            Tone::Alarm(AlarmSound::Bell) => BELL,
            Tone::Alarm(AlarmSound::Digital) => DIGITAL,
            Tone::Warning => WARNING,
        }
    }
}

/// How often and how patiently playback is retried.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (zero-based): base, 2x base, 4x base...
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Fire-and-forget tone player.
#[derive(Debug, Clone, Default)]
pub struct AudioPlayer {
    retry: RetryPolicy,
}

impl AudioPlayer {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Plays `tone` at `volume` in the background.
    pub fn play(&self, tone: Tone, volume: f32) {
        let retry = self.retry;
        let spawned = thread::Builder::new()
            .name("audio".into())
            .spawn(move || play_with_retry(tone, volume, retry));
        if let Err(e) = spawned {
            warn!("Failed to spawn audio thread: {}", e);
        }
    }
}

fn play_with_retry(tone: Tone, volume: f32, retry: RetryPolicy) {
    for attempt in 0..retry.attempts {
        match play_blocking(tone, volume) {
            Ok(()) => return,
            Err(e) => {
                debug!("Audio attempt {} failed: {}", attempt + 1, e);
                if attempt + 1 < retry.attempts {
                    thread::sleep(retry.backoff(attempt));
                }
            }
        }
    }
    warn!("Giving up on {:?} after {} attempts", tone, retry.attempts);
}

fn play_blocking(tone: Tone, volume: f32) -> Result<(), AudioError> {
    let (_stream, handle) = OutputStream::try_default()?;
    let sink = Sink::try_new(&handle)?;
    sink.set_volume(volume.clamp(0.0, 1.0));

    for n in tone.notes() {
        let duration = Duration::from_millis(n.millis);
        if n.freq_hz > 0.0 {
            sink.append(SineWave::new(n.freq_hz).take_duration(duration).amplify(0.3));
        } else {
            sink.append(rodio::source::Zero::<f32>::new(1, 44100).take_duration(duration));
        }
    }
    sink.sleep_until_end();
    Ok(())
}
