//! Studytimer - a study timer with background-resilient countdowns,
//! session statistics and scheduled study goals.

pub mod app;
pub mod audio;
pub mod background;
pub mod countdown;
pub mod effects;
pub mod event;
pub mod goals;
pub mod machine;
pub mod models;
pub mod notifications;
pub mod persistence;
pub mod recorder;
pub mod timer;

pub use app::{App, AppError, EngineConfig};
pub use background::{BackgroundChannel, BackgroundSignal, WorkerOptions};
pub use countdown::{Clock, Countdown, SystemClock};
pub use effects::{Effects, SystemEffects};
pub use event::{EventResult, Intent, TimerEvent};
pub use machine::TimerStateMachine;
pub use persistence::Database;
