//! Studytimer - a terminal study timer.
//!
//! Reads commands from stdin and prints timer events as they happen.

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::thread;

use log::{error, info};
use studytimer::event::{self, EventResult};
use studytimer::goals::{GoalAlert, ScheduledGoalWatcher};
use studytimer::models::TimerPhase;
use studytimer::{
    timer, App, BackgroundChannel, Clock, Database, EngineConfig, SystemClock, SystemEffects,
    TimerEvent, WorkerOptions,
};

/// Prints events for the user. Display updates are only shown when the
/// phase or run state changes.
fn run_printer(events: Receiver<TimerEvent>) {
    let mut last = None;
    for event in events {
        match event {
            TimerEvent::StateChanged(display) => {
                let key = (display.phase, display.is_running);
                if last != Some(key) {
                    last = Some(key);
                    println!("{}", timer::format_title(&display));
                }
            }
            TimerEvent::SessionComplete {
                duration_minutes,
                phase,
            } => match phase {
                TimerPhase::Work => println!("Study session complete: {} min", duration_minutes),
                TimerPhase::Break => println!("Break over"),
            },
            TimerEvent::Warning => println!("5 minutes left"),
            TimerEvent::ReflectionRequested { .. } => {
                println!("How did it go? reflect <1-5> [notes], or skip-reflection")
            }
            TimerEvent::GoalAlert(GoalAlert::StartingSoon {
                title,
                minutes_until,
                ..
            }) => println!("'{}' starts in {} min", title, minutes_until),
            TimerEvent::GoalAlert(GoalAlert::StartNow { goal_id, title }) => {
                println!("Time to study '{}'. Type: begin {}", title, goal_id)
            }
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Reads RUST_LOG, defaulting to info
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("Studytimer starting up...");

    let config = EngineConfig::default();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let db = Database::new()?;
    let prefs = db.load_preferences()?;

    let (background, signals) = BackgroundChannel::connect(
        Arc::clone(&clock),
        WorkerOptions {
            poll_interval: config.background_poll_interval,
            native_notifications: prefs.notifications_enabled,
        },
    );
    let effects = SystemEffects::new(&prefs, config.audio_retry);

    let mut app = App::new(
        db,
        background,
        Box::new(effects),
        Arc::clone(&clock),
        ScheduledGoalWatcher::new(config.watcher),
    )?;
    let events = app.subscribe();
    let app = Arc::new(Mutex::new(app));
    let running = Arc::new(AtomicBool::new(true));

    thread::spawn(move || run_printer(events));

    let app_clone = Arc::clone(&app);
    let running_clone = Arc::clone(&running);
    let tick_interval = config.tick_interval;
    thread::spawn(move || timer::run_tick_loop(app_clone, tick_interval, running_clone));

    let app_clone = Arc::clone(&app);
    let running_clone = Arc::clone(&running);
    let goal_interval = config.goal_poll_interval;
    thread::spawn(move || timer::run_goal_loop(app_clone, goal_interval, running_clone));

    if let Some(signals) = signals {
        let app_clone = Arc::clone(&app);
        thread::spawn(move || timer::run_signal_loop(app_clone, signals));
    }

    {
        let Ok(mut app) = app.lock() else {
            return Err("app state lock poisoned".into());
        };
        app.reconcile();
    }
    println!("Type 'help' for commands.");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let result = match event::parse_intent(&line) {
            Ok(intent) => {
                let Ok(mut app) = app.lock() else {
                    error!("App state lock poisoned");
                    break;
                };
                event::handle_intent(&mut app, intent)
            }
            Err(e) => EventResult::Message(e.to_string()),
        };

        match result {
            EventResult::Quit => break,
            EventResult::Message(text) => println!("{}", text),
            EventResult::Continue => {}
        }
        io::stdout().flush()?;
    }

    running.store(false, Ordering::Relaxed);
    info!("Studytimer shutting down");
    Ok(())
}
