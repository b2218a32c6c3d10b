//! Background timer worker and the channel that talks to it.
//!
//! The worker runs on its own thread, tracks the same deadline as the
//! foreground and reports completion even if the foreground tick loop is
//! stalled. It shares no memory with the state machine: everything crosses
//! the boundary as a message.

use crate::countdown::Clock;
use crate::models::TimerPhase;
use crate::notifications;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// How often the worker checks its deadline when nothing else happens.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum BackgroundError {
    #[error("Failed to spawn background worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Messages sent to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerCommand {
    StartTimer(StartTimerData),
    StopTimer,
    CheckTimer,
    SetNotifications(NotificationSettingsData),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTimerData {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub end_time: DateTime<Utc>,
    pub session_type: TimerPhase,
    pub goal: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSettingsData {
    pub enabled: bool,
}

/// Messages the worker sends back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerEvent {
    TimerComplete(TimerCompleteData),
    TimerUpdate(TimerUpdateData),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerCompleteData {
    pub session_type: TimerPhase,
    pub goal: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerUpdateData {
    /// Milliseconds until the deadline.
    pub remaining: i64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub end_time: DateTime<Utc>,
}

/// A message tagged with the deadline generation it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    pub generation: u64,
    pub message: T,
}

/// A signal coming back from the worker.
pub type BackgroundSignal = Envelope<WorkerEvent>;

/// Worker behaviour knobs.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub poll_interval: Duration,
    /// Show a native notification when the deadline passes.
    pub native_notifications: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            native_notifications: true,
        }
    }
}

/// Foreground handle to the background worker.
///
/// A disconnected channel is the degraded mode: every call becomes a no-op
/// and the foreground deadline alone keeps time.
#[derive(Debug, Default)]
pub struct BackgroundChannel {
    commands: Option<Sender<Envelope<WorkerCommand>>>,
}

impl BackgroundChannel {
    /// A channel with no worker behind it.
    pub fn disabled() -> Self {
        Self { commands: None }
    }

    /// Wraps an existing command sender.
    pub fn from_sender(commands: Sender<Envelope<WorkerCommand>>) -> Self {
        Self {
            commands: Some(commands),
        }
    }

    /// Spawns the worker thread.
    pub fn spawn(
        clock: Arc<dyn Clock>,
        options: WorkerOptions,
    ) -> Result<(Self, Receiver<BackgroundSignal>), BackgroundError> {
        let (command_tx, command_rx) = mpsc::channel();
        let (signal_tx, signal_rx) = mpsc::channel();

        let worker = Worker {
            clock,
            signals: signal_tx,
            active: None,
            native_notifications: options.native_notifications,
            notify: notifications::show,
        };
        let poll_interval = options.poll_interval;
        thread::Builder::new()
            .name("timer-worker".into())
            .spawn(move || worker.run(command_rx, poll_interval))?;

        info!("Background timer worker started");
        Ok((Self::from_sender(command_tx), signal_rx))
    }

    /// Spawns the worker, falling back to a disabled channel on failure.
    pub fn connect(
        clock: Arc<dyn Clock>,
        options: WorkerOptions,
    ) -> (Self, Option<Receiver<BackgroundSignal>>) {
        match Self::spawn(clock, options) {
            Ok((channel, signals)) => (channel, Some(signals)),
            Err(e) => {
                warn!("{}; continuing with foreground-only timing", e);
                (Self::disabled(), None)
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.commands.is_some()
    }

    /// Hands a new deadline to the worker.
    pub fn start(&mut self, generation: u64, end_time: DateTime<Utc>, phase: TimerPhase, goal: &str) {
        self.send(Envelope {
            generation,
            message: WorkerCommand::StartTimer(StartTimerData {
                end_time,
                session_type: phase,
                goal: goal.to_string(),
            }),
        });
    }

    /// Tells the worker to forget its deadline.
    pub fn stop(&mut self, generation: u64) {
        self.send(Envelope {
            generation,
            message: WorkerCommand::StopTimer,
        });
    }

    /// Asks the worker to check its deadline right away.
    pub fn check(&mut self, generation: u64) {
        self.send(Envelope {
            generation,
            message: WorkerCommand::CheckTimer,
        });
    }

    /// Turns the worker's own completion notification on or off.
    pub fn set_notifications(&mut self, generation: u64, enabled: bool) {
        self.send(Envelope {
            generation,
            message: WorkerCommand::SetNotifications(NotificationSettingsData { enabled }),
        });
    }

    fn send(&mut self, envelope: Envelope<WorkerCommand>) {
        if let Some(commands) = &self.commands {
            if commands.send(envelope).is_err() {
                warn!("Background worker is gone; continuing with foreground-only timing");
                self.commands = None;
            }
        }
    }
}

struct ActiveDeadline {
    generation: u64,
    data: StartTimerData,
}

struct Worker {
    clock: Arc<dyn Clock>,
    signals: Sender<BackgroundSignal>,
    active: Option<ActiveDeadline>,
    native_notifications: bool,
    notify: fn(&str, &str),
}

impl Worker {
    fn run(mut self, commands: Receiver<Envelope<WorkerCommand>>, poll_interval: Duration) {
        let mut next_poll = Instant::now() + poll_interval;
        loop {
            let wait = next_poll.saturating_duration_since(Instant::now());
            let check_now = match commands.recv_timeout(wait) {
                Ok(envelope) => self.handle(envelope),
                Err(RecvTimeoutError::Timeout) => {
                    next_poll = Instant::now() + poll_interval;
                    true
                }
                Err(RecvTimeoutError::Disconnected) => break,
            };

            if check_now && !self.check() {
                break;
            }
        }
        debug!("Background timer worker stopped");
    }

    /// Applies a command. Returns true if the deadline should be checked now.
    fn handle(&mut self, envelope: Envelope<WorkerCommand>) -> bool {
        match envelope.message {
            WorkerCommand::StartTimer(data) => {
                debug!(
                    "Worker tracking {} deadline {} (generation {})",
                    data.session_type.label(),
                    data.end_time,
                    envelope.generation
                );
                self.active = Some(ActiveDeadline {
                    generation: envelope.generation,
                    data,
                });
                false
            }
            WorkerCommand::StopTimer => {
                self.active = None;
                false
            }
            WorkerCommand::CheckTimer => true,
            WorkerCommand::SetNotifications(settings) => {
                debug!("Worker notifications enabled: {}", settings.enabled);
                self.native_notifications = settings.enabled;
                false
            }
        }
    }

    /// Emits a completion or progress signal. Returns false once the
    /// foreground has hung up.
    fn check(&mut self) -> bool {
        let Some(active) = &self.active else {
            return true;
        };

        let now = self.clock.now();
        let remaining = (active.data.end_time - now).num_milliseconds();
        let generation = active.generation;

        let message = if remaining <= 0 {
            let data = TimerCompleteData {
                session_type: active.data.session_type,
                goal: active.data.goal.clone(),
            };
            if self.native_notifications {
                let (title, body) = notifications::phase_complete_message(data.session_type, &data.goal);
                (self.notify)(&title, &body);
            }
            self.active = None;
            WorkerEvent::TimerComplete(data)
        } else {
            WorkerEvent::TimerUpdate(TimerUpdateData {
                remaining,
                end_time: active.data.end_time,
            })
        };

        self.signals
            .send(Envelope {
                generation,
                message,
            })
            .is_ok()
    }
}
