//! Data models for the study timer.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// One timer segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimerPhase {
    #[default]
    Work,
    Break,
}

impl TimerPhase {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::Break => "break",
        }
    }
}

/// Run state of the current phase.
///
/// A paused phase keeps its remaining time; a running phase only knows its
/// deadline and derives everything else from the clock.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RunState {
    /// Not started; the full phase duration is displayed.
    #[default]
    Idle,
    /// Counting down towards `deadline`.
    Running { deadline: DateTime<Utc> },
    /// Stopped by the user with `remaining_ms` left on the clock.
    Paused { remaining_ms: i64 },
}

impl RunState {
    /// Returns true if no phase has been started.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true if the timer is counting down.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    /// Returns true if the timer is paused.
    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused { .. })
    }

    /// Returns the active deadline, if any.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Running { deadline } => Some(*deadline),
            _ => None,
        }
    }
}

/// Timer durations and behaviour flags, editable at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimerConfig {
    /// Duration of a work phase in minutes.
    pub work_minutes: u32,
    /// Duration of a short break in minutes.
    pub break_minutes: u32,
    /// Duration of a long break in minutes.
    pub long_break_minutes: u32,
    /// Number of work phases before a long break.
    pub sessions_until_long_break: u32,
    pub auto_start_breaks: bool,
    pub auto_start_work: bool,
    /// Alarm volume in [0, 1].
    pub sound_volume: f32,
    /// Whether the five-minute warning fires during work phases.
    pub warning_alerts_enabled: bool,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            work_minutes: 25,
            break_minutes: 5,
            long_break_minutes: 15,
            sessions_until_long_break: 4,
            auto_start_breaks: false,
            auto_start_work: false,
            sound_volume: 0.7,
            warning_alerts_enabled: true,
        }
    }
}

impl TimerConfig {
    /// Applies a partial update and clamps the result into a usable range.
    pub fn apply(&mut self, patch: &TimerConfigPatch) {
        if let Some(v) = patch.work_minutes {
            self.work_minutes = v;
        }
        if let Some(v) = patch.break_minutes {
            self.break_minutes = v;
        }
        if let Some(v) = patch.long_break_minutes {
            self.long_break_minutes = v;
        }
        if let Some(v) = patch.sessions_until_long_break {
            self.sessions_until_long_break = v;
        }
        if let Some(v) = patch.auto_start_breaks {
            self.auto_start_breaks = v;
        }
        if let Some(v) = patch.auto_start_work {
            self.auto_start_work = v;
        }
        if let Some(v) = patch.sound_volume {
            self.sound_volume = v;
        }
        if let Some(v) = patch.warning_alerts_enabled {
            self.warning_alerts_enabled = v;
        }
        self.normalize();
    }

    /// Clamps durations to at least one minute and volume into [0, 1].
    pub fn normalize(&mut self) {
        self.work_minutes = self.work_minutes.max(1);
        self.break_minutes = self.break_minutes.max(1);
        self.long_break_minutes = self.long_break_minutes.max(1);
        self.sessions_until_long_break = self.sessions_until_long_break.max(1);
        self.sound_volume = if self.sound_volume.is_nan() {
            0.0
        } else {
            self.sound_volume.clamp(0.0, 1.0)
        };
    }

    /// Returns the break length in minutes for the given completed-work count.
    pub fn break_minutes_after(&self, sessions_completed_in_cycle: u32) -> (u32, bool) {
        let is_long = sessions_completed_in_cycle > 0
            && sessions_completed_in_cycle % self.sessions_until_long_break == 0;
        if is_long {
            (self.long_break_minutes, true)
        } else {
            (self.break_minutes, false)
        }
    }
}

/// Partial update for [`TimerConfig`]; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimerConfigPatch {
    pub work_minutes: Option<u32>,
    pub break_minutes: Option<u32>,
    pub long_break_minutes: Option<u32>,
    pub sessions_until_long_break: Option<u32>,
    pub auto_start_breaks: Option<bool>,
    pub auto_start_work: Option<bool>,
    pub sound_volume: Option<f32>,
    pub warning_alerts_enabled: Option<bool>,
}

impl From<&TimerConfig> for TimerConfigPatch {
    fn from(config: &TimerConfig) -> Self {
        Self {
            work_minutes: Some(config.work_minutes),
            break_minutes: Some(config.break_minutes),
            long_break_minutes: Some(config.long_break_minutes),
            sessions_until_long_break: Some(config.sessions_until_long_break),
            auto_start_breaks: Some(config.auto_start_breaks),
            auto_start_work: Some(config.auto_start_work),
            sound_volume: Some(config.sound_volume),
            warning_alerts_enabled: Some(config.warning_alerts_enabled),
        }
    }
}

impl TimerConfigPatch {
    /// Returns true if the patch changes any duration.
    pub fn touches_durations(&self) -> bool {
        self.work_minutes.is_some()
            || self.break_minutes.is_some()
            || self.long_break_minutes.is_some()
            || self.sessions_until_long_break.is_some()
    }
}

/// Built-in alarm tone patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlarmSound {
    #[default]
    Chime,
    Bell,
    Digital,
}

impl std::str::FromStr for AlarmSound {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chime" => Ok(Self::Chime),
            "bell" => Ok(Self::Bell),
            "digital" => Ok(Self::Digital),
            other => Err(format!("unknown alarm sound '{}'", other)),
        }
    }
}

/// User preferences persisted under `studyPreferences`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StudyPreferences {
    #[serde(flatten)]
    pub timer: TimerConfig,
    /// Whether to play sounds on alerts.
    pub sound_enabled: bool,
    /// Whether to show system notifications.
    pub notifications_enabled: bool,
    pub alarm_sound: AlarmSound,
    /// Grace period before an auto-started phase begins.
    pub auto_start_delay_secs: u64,
}

impl Default for StudyPreferences {
    fn default() -> Self {
        Self {
            timer: TimerConfig::default(),
            sound_enabled: true,
            notifications_enabled: true,
            alarm_sound: AlarmSound::Chime,
            auto_start_delay_secs: 1,
        }
    }
}

/// A completed phase, persisted in `studySessions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudySession {
    pub id: String,
    pub date: DateTime<Utc>,
    /// Duration in minutes.
    pub duration: u32,
    #[serde(rename = "type")]
    pub session_type: TimerPhase,
    pub goal: String,
    pub completed: bool,
    pub productivity: Option<u8>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub achievements: Vec<String>,
    #[serde(default)]
    pub challenges: String,
}

impl StudySession {
    /// Patches the reflection fields in place.
    pub fn apply_reflection(&mut self, reflection: &Reflection) {
        self.productivity = Some(reflection.productivity);
        self.notes = reflection.notes.clone();
        self.achievements = reflection.achievements.clone();
        self.challenges = reflection.challenges.clone();
    }

    /// Local calendar date the session was recorded on.
    pub fn local_date(&self) -> NaiveDate {
        self.date.with_timezone(&Local).date_naive()
    }
}

/// Post-session reflection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reflection {
    /// Rating from 1 to 5.
    pub productivity: u8,
    pub notes: String,
    pub achievements: Vec<String>,
    pub challenges: String,
}

impl Reflection {
    /// Reflection recorded when the user skips the prompt.
    pub fn skipped() -> Self {
        Self {
            productivity: 3,
            ..Self::default()
        }
    }
}

/// Lifetime statistics, persisted in `sessionStats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionStats {
    pub total_sessions: u32,
    pub total_minutes: u32,
    pub streak: u32,
    pub best_streak: u32,
    #[serde(rename = "lastSessionDateISO")]
    pub last_session_date: Option<NaiveDate>,
}

impl SessionStats {
    /// Records a completed work session on `today`.
    ///
    /// The streak continues when the previous session was today or
    /// yesterday, and restarts at one otherwise.
    pub fn record_work_session(&mut self, duration_mins: u32, today: NaiveDate) {
        self.total_sessions += 1;
        self.total_minutes += duration_mins;

        let continues = self
            .last_session_date
            .map(|last| last == today || today.pred_opt() == Some(last))
            .unwrap_or(false);
        self.streak = if continues { self.streak + 1 } else { 1 };
        self.best_streak = self.best_streak.max(self.streak);
        self.last_session_date = Some(today);
    }
}

/// Per-day totals derived from the session list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub completed_sessions: u32,
    pub total_focus_minutes: u32,
}

impl DailyStats {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            completed_sessions: 0,
            total_focus_minutes: 0,
        }
    }

    /// Sums the completed work sessions recorded on `date`.
    pub fn from_sessions(date: NaiveDate, sessions: &[StudySession]) -> Self {
        sessions
            .iter()
            .filter(|s| s.session_type == TimerPhase::Work && s.completed)
            .filter(|s| s.local_date() == date)
            .fold(Self::new(date), |mut acc, s| {
                acc.completed_sessions += 1;
                acc.total_focus_minutes += s.duration;
                acc
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    #[default]
    Scheduled,
    Active,
}

/// A future study session with its own alerts, persisted in `scheduledGoals`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledGoal {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    /// Planned duration in minutes.
    pub duration: u32,
    pub status: GoalStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub warning_shown: bool,
    #[serde(default)]
    pub start_alert_shown: bool,
}

impl ScheduledGoal {
    /// Local wall-clock instant the goal starts at.
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start_time)
    }

    /// Label handed to the timer when the goal starts.
    pub fn timer_label(&self) -> String {
        if self.description.trim().is_empty() {
            self.title.clone()
        } else {
            format!("{}: {}", self.title, self.description)
        }
    }
}

/// Everything the front end needs to render the timer.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayState {
    pub minutes: u32,
    pub seconds: u32,
    pub progress_percent: f32,
    pub phase: TimerPhase,
    pub is_running: bool,
    pub sessions_completed_in_cycle: u32,
}
