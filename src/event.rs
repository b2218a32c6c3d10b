//! Front-end events and command handling.

use crate::app::App;
use crate::goals::{GoalAlert, NewGoal};
use crate::models::{AlarmSound, DisplayState, GoalStatus, Reflection, TimerConfigPatch, TimerPhase};
use crate::timer::format_title;
use chrono::{NaiveDate, NaiveTime};
use std::sync::mpsc::{self, Receiver, Sender};
use thiserror::Error;

/// Events pushed to the front end.
#[derive(Debug, Clone, PartialEq)]
pub enum TimerEvent {
    /// Display state after a change or a tick.
    StateChanged(DisplayState),
    /// A phase finished.
    SessionComplete {
        duration_minutes: u32,
        phase: TimerPhase,
    },
    /// Five minutes left in a work phase.
    Warning,
    /// A work session is waiting for its reflection.
    ReflectionRequested { session_id: String },
    GoalAlert(GoalAlert),
}

/// Fan-out of [`TimerEvent`]s to any number of listeners.
#[derive(Debug, Default)]
pub struct EventBus {
    listeners: Vec<Sender<TimerEvent>>,
}

impl EventBus {
    pub fn subscribe(&mut self) -> Receiver<TimerEvent> {
        let (tx, rx) = mpsc::channel();
        self.listeners.push(tx);
        rx
    }

    /// Sends `event` to every listener, dropping those that hung up.
    pub fn dispatch(&mut self, event: TimerEvent) {
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// A preference changed with `set`.
#[derive(Debug, Clone, PartialEq)]
pub enum Setting {
    Timer(TimerConfigPatch),
    Sound(bool),
    Notifications(bool),
    Alarm(AlarmSound),
    AutoStartDelay(u64),
}

/// A parsed front-end command.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Start,
    Pause,
    Reset,
    Skip,
    Sync,
    Status,
    Goal(String),
    Set(Setting),
    Reflect { productivity: u8, notes: String },
    SkipReflection,
    Schedule(NewGoal),
    Goals,
    Begin(String),
    Delete(String),
    Stats,
    Help,
    Quit,
}

#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("Unknown command '{0}'; type 'help' for a list")]
    Unknown(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
    #[error("Invalid value '{value}' for {field}")]
    InvalidValue { field: String, value: String },
}

pub const HELP: &str = "\
start | pause | reset | skip | sync | status
goal <text>
set <work|break|long-break|cycle|volume|auto-breaks|auto-work|warnings|sound|notifications|alarm|auto-delay> <value>
reflect <1-5> [notes] | skip-reflection
schedule <YYYY-MM-DD> <HH:MM> <minutes> <title>
goals | begin <goal-id> | delete <goal-id>
stats | help | quit";

fn invalid(field: &str, value: &str) -> ParseError {
    ParseError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ParseError> {
    match value {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        _ => Err(invalid(field, value)),
    }
}

fn parse_num<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, ParseError> {
    value.parse().map_err(|_| invalid(field, value))
}

fn parse_setting(field: &str, value: &str) -> Result<Setting, ParseError> {
    let mut patch = TimerConfigPatch::default();
    match field {
        "work" => patch.work_minutes = Some(parse_num(field, value)?),
        "break" => patch.break_minutes = Some(parse_num(field, value)?),
        "long-break" => patch.long_break_minutes = Some(parse_num(field, value)?),
        "cycle" => patch.sessions_until_long_break = Some(parse_num(field, value)?),
        "volume" => patch.sound_volume = Some(parse_num(field, value)?),
        "auto-breaks" => patch.auto_start_breaks = Some(parse_bool(field, value)?),
        "auto-work" => patch.auto_start_work = Some(parse_bool(field, value)?),
        "warnings" => patch.warning_alerts_enabled = Some(parse_bool(field, value)?),
        "sound" => return Ok(Setting::Sound(parse_bool(field, value)?)),
        "notifications" => return Ok(Setting::Notifications(parse_bool(field, value)?)),
        "alarm" => {
            return value
                .parse()
                .map(Setting::Alarm)
                .map_err(|_| invalid(field, value))
        }
        "auto-delay" => return Ok(Setting::AutoStartDelay(parse_num(field, value)?)),
        _ => return Err(invalid("setting", field)),
    }
    Ok(Setting::Timer(patch))
}

/// Parses one command line.
pub fn parse_intent(line: &str) -> Result<Intent, ParseError> {
    let line = line.trim();
    let (command, rest) = line
        .split_once(char::is_whitespace)
        .map(|(c, r)| (c, r.trim()))
        .unwrap_or((line, ""));

    let intent = match command {
        "start" => Intent::Start,
        "pause" => Intent::Pause,
        "reset" => Intent::Reset,
        "skip" => Intent::Skip,
        "sync" => Intent::Sync,
        "status" | "" => Intent::Status,
        "goal" => Intent::Goal(rest.to_string()),
        "set" => {
            let (field, value) = rest
                .split_once(char::is_whitespace)
                .ok_or(ParseError::Usage("set <field> <value>"))?;
            Intent::Set(parse_setting(field, value.trim())?)
        }
        "reflect" => {
            let (rating, notes) = rest
                .split_once(char::is_whitespace)
                .unwrap_or((rest, ""));
            if rating.is_empty() {
                return Err(ParseError::Usage("reflect <1-5> [notes]"));
            }
            let productivity: u8 = parse_num("productivity", rating)?;
            if !(1..=5).contains(&productivity) {
                return Err(invalid("productivity", rating));
            }
            Intent::Reflect {
                productivity,
                notes: notes.trim().to_string(),
            }
        }
        "skip-reflection" => Intent::SkipReflection,
        "schedule" => {
            const USAGE: &str = "schedule <YYYY-MM-DD> <HH:MM> <minutes> <title>";
            let mut parts = rest.splitn(4, char::is_whitespace);
            let (Some(date), Some(time), Some(minutes), Some(title)) =
                (parts.next(), parts.next(), parts.next(), parts.next())
            else {
                return Err(ParseError::Usage(USAGE));
            };
            let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| invalid("date", date))?;
            let start_time =
                NaiveTime::parse_from_str(time, "%H:%M").map_err(|_| invalid("time", time))?;
            let (title, description) = title
                .split_once(" - ")
                .map(|(t, d)| (t.trim(), d.trim()))
                .unwrap_or((title.trim(), ""));
            Intent::Schedule(NewGoal {
                title: title.to_string(),
                description: description.to_string(),
                date,
                start_time,
                duration: parse_num("minutes", minutes)?,
            })
        }
        "goals" => Intent::Goals,
        "begin" | "delete" if rest.is_empty() => {
            return Err(ParseError::Usage("begin|delete <goal-id>"));
        }
        "begin" => Intent::Begin(rest.to_string()),
        "delete" => Intent::Delete(rest.to_string()),
        "stats" => Intent::Stats,
        "help" => Intent::Help,
        "quit" | "exit" => Intent::Quit,
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(intent)
}

/// Result of handling a command.
#[derive(Debug, Clone, PartialEq)]
pub enum EventResult {
    /// Handled, nothing to report.
    Continue,
    /// User requested quit.
    Quit,
    /// Text for the user.
    Message(String),
}

/// Applies a command to the app.
pub fn handle_intent(app: &mut App, intent: Intent) -> EventResult {
    match intent {
        Intent::Start => {
            app.start_timer();
            EventResult::Continue
        }
        Intent::Pause => {
            app.pause_timer();
            EventResult::Continue
        }
        Intent::Reset => {
            app.reset_timer();
            EventResult::Continue
        }
        Intent::Skip => {
            app.skip_phase();
            EventResult::Continue
        }
        Intent::Sync => {
            app.reconcile();
            EventResult::Message(format_title(&app.display()))
        }
        Intent::Status => EventResult::Message(format_title(&app.display())),
        Intent::Goal(text) => {
            app.set_goal(&text);
            EventResult::Continue
        }
        Intent::Set(setting) => {
            match setting {
                Setting::Timer(patch) => app.set_config(patch),
                Setting::Sound(on) => app.update_preferences(|p| p.sound_enabled = on),
                Setting::Notifications(on) => app.update_preferences(|p| p.notifications_enabled = on),
                Setting::Alarm(sound) => app.update_preferences(|p| p.alarm_sound = sound),
                Setting::AutoStartDelay(secs) => app.update_preferences(|p| p.auto_start_delay_secs = secs),
            }
            EventResult::Message("Preferences saved".to_string())
        }
        Intent::Reflect {
            productivity,
            notes,
        } => {
            let reflection = Reflection {
                productivity,
                notes,
                ..Reflection::default()
            };
            match app.submit_reflection(reflection) {
                Ok(true) => EventResult::Message("Reflection saved".to_string()),
                Ok(false) => EventResult::Message("No session is waiting for a reflection".to_string()),
                Err(e) => EventResult::Message(e.to_string()),
            }
        }
        Intent::SkipReflection => match app.skip_reflection() {
            Ok(true) => EventResult::Message("Reflection skipped".to_string()),
            Ok(false) => EventResult::Message("No session is waiting for a reflection".to_string()),
            Err(e) => EventResult::Message(e.to_string()),
        },
        Intent::Schedule(new_goal) => match app.schedule_goal(new_goal) {
            Ok(goal) => EventResult::Message(format!(
                "Scheduled '{}' at {} ({})",
                goal.title,
                goal.starts_at().format("%Y-%m-%d %H:%M"),
                goal.id
            )),
            Err(e) => EventResult::Message(e.to_string()),
        },
        Intent::Goals => match app.list_goals() {
            Ok(goals) if goals.is_empty() => EventResult::Message("No goals scheduled".to_string()),
            Ok(goals) => EventResult::Message(
                goals
                    .iter()
                    .map(|g| {
                        let status = match g.status {
                            GoalStatus::Scheduled => "scheduled",
                            GoalStatus::Active => "active",
                        };
                        format!(
                            "{}  {}  {} min  [{}]  {}",
                            g.id,
                            g.starts_at().format("%Y-%m-%d %H:%M"),
                            g.duration,
                            status,
                            g.timer_label()
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            Err(e) => EventResult::Message(e.to_string()),
        },
        Intent::Begin(id) => match app.begin_goal(&id) {
            Ok(goal) if app.machine().goal() == goal.timer_label() => {
                EventResult::Message(format!("Starting '{}'", goal.title))
            }
            Ok(goal) => EventResult::Message(format!(
                "'{}' starts with the next work session",
                goal.title
            )),
            Err(e) => EventResult::Message(e.to_string()),
        },
        Intent::Delete(id) => match app.delete_goal(&id) {
            Ok(()) => EventResult::Message("Goal deleted".to_string()),
            Err(e) => EventResult::Message(e.to_string()),
        },
        Intent::Stats => match (app.today_stats(), app.stats()) {
            (Ok(today), Ok(stats)) => EventResult::Message(format!(
                "Today: {} sessions, {} min focused\nAll time: {} sessions, {} min, streak {} (best {})",
                today.completed_sessions,
                today.total_focus_minutes,
                stats.total_sessions,
                stats.total_minutes,
                stats.streak,
                stats.best_streak
            )),
            (Err(e), _) | (_, Err(e)) => EventResult::Message(e.to_string()),
        },
        Intent::Help => EventResult::Message(HELP.to_string()),
        Intent::Quit => EventResult::Quit,
    }
}
