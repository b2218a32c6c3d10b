//! Loops that drive the app: the foreground tick, background signals and
//! the scheduled-goal scan.

use crate::app::App;
use crate::background::BackgroundSignal;
use crate::models::{DisplayState, TimerPhase};
use log::{debug, error};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Ticks the app every `interval` until `running` is cleared.
pub fn run_tick_loop(app: Arc<Mutex<App>>, interval: Duration, running: Arc<AtomicBool>) {
    while running.load(Ordering::Relaxed) {
        thread::sleep(interval);

        let Ok(mut app) = app.lock() else {
            error!("App state lock poisoned; stopping tick loop");
            return;
        };
        app.tick();
    }
}

/// Feeds background worker signals into the app until the worker hangs up.
pub fn run_signal_loop(app: Arc<Mutex<App>>, signals: Receiver<BackgroundSignal>) {
    for signal in signals {
        debug!("Background signal for generation {}", signal.generation);
        let Ok(mut app) = app.lock() else {
            error!("App state lock poisoned; stopping signal loop");
            return;
        };
        app.handle_background_signal(signal);
    }
    debug!("Background signal channel closed");
}

/// Scans scheduled goals every `interval` until `running` is cleared.
pub fn run_goal_loop(app: Arc<Mutex<App>>, interval: Duration, running: Arc<AtomicBool>) {
    while running.load(Ordering::Relaxed) {
        {
            let Ok(mut app) = app.lock() else {
                error!("App state lock poisoned; stopping goal loop");
                return;
            };
            app.poll_goals();
        }
        thread::sleep(interval);
    }
}

/// Formats a one-line title for the current display state.
pub fn format_title(display: &DisplayState) -> String {
    let icon = match display.phase {
        TimerPhase::Work => "📚",
        TimerPhase::Break => "☕",
    };
    let time = format_time(display.minutes * 60 + display.seconds);
    let dots = "●".repeat(display.sessions_completed_in_cycle as usize);
    let title = if display.is_running {
        format!("{} {}", icon, time)
    } else {
        format!("⏸ {} {}", icon, time)
    };
    if dots.is_empty() {
        title
    } else {
        format!("{} {}", title, dots)
    }
}

/// Formats time in MM:SS format.
pub fn format_time(secs: u32) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
