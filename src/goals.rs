//! Scheduled study goals and the watcher that raises their alerts.
//!
//! Goal times are local wall-clock times. Each goal fires its "starting
//! soon" and "start now" alerts at most once; the flags recording that are
//! persisted with the goal and never cleared.

use crate::models::{GoalStatus, ScheduledGoal};
use crate::persistence::{Database, DatabaseError, SCHEDULED_GOALS};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use log::{debug, info};
use thiserror::Error;
use uuid::Uuid;

/// Rejections of user goal actions. The messages are shown to the user.
#[derive(Error, Debug)]
pub enum GoalError {
    #[error("Please give the goal a title")]
    EmptyTitle,
    #[error("Goal duration must be at least one minute")]
    ZeroDuration,
    #[error("Cannot schedule a goal in the past ({0})")]
    InPast(NaiveDateTime),
    #[error("No goal with id {0}")]
    NotFound(String),
    #[error("Goal {0} has already started and cannot be deleted")]
    NotDeletable(String),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// User input for a new goal.
#[derive(Debug, Clone, PartialEq)]
pub struct NewGoal {
    pub title: String,
    pub description: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration: u32,
}

impl NewGoal {
    /// Checks the input against `now` (local time) and builds the goal.
    pub fn validate(
        self,
        now: NaiveDateTime,
        created_at: DateTime<Utc>,
    ) -> Result<ScheduledGoal, GoalError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(GoalError::EmptyTitle);
        }
        if self.duration == 0 {
            return Err(GoalError::ZeroDuration);
        }
        let starts_at = self.date.and_time(self.start_time);
        if starts_at <= now {
            return Err(GoalError::InPast(starts_at));
        }

        Ok(ScheduledGoal {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            description: self.description.trim().to_string(),
            date: self.date,
            start_time: self.start_time,
            duration: self.duration,
            status: GoalStatus::Scheduled,
            created_at,
            warning_shown: false,
            start_alert_shown: false,
        })
    }
}

/// An alert raised by the watcher.
#[derive(Debug, Clone, PartialEq)]
pub enum GoalAlert {
    StartingSoon {
        goal_id: String,
        title: String,
        minutes_until: i64,
    },
    StartNow {
        goal_id: String,
        title: String,
    },
}

/// Alert windows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatcherConfig {
    /// The warning fires when the start is between these two leads away.
    pub warning_lead_min: Duration,
    pub warning_lead_max: Duration,
    /// How late after the start time the start alert may still fire.
    pub start_grace: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            warning_lead_min: Duration::minutes(4),
            warning_lead_max: Duration::minutes(6),
            start_grace: Duration::minutes(2),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScheduledGoalWatcher {
    config: WatcherConfig,
}

impl ScheduledGoalWatcher {
    pub fn new(config: WatcherConfig) -> Self {
        Self { config }
    }

    /// Scans scheduled goals, latching the alert flags of those that fire.
    pub fn poll(&self, goals: &mut [ScheduledGoal], now: NaiveDateTime) -> Vec<GoalAlert> {
        let mut alerts = Vec::new();

        for goal in goals.iter_mut().filter(|g| g.status == GoalStatus::Scheduled) {
            let until = goal.starts_at() - now;

            if !goal.warning_shown
                && until >= self.config.warning_lead_min
                && until <= self.config.warning_lead_max
            {
                goal.warning_shown = true;
                let minutes_until = (until.num_seconds() + 59) / 60;
                debug!("Goal {} starts in {} min", goal.id, minutes_until);
                alerts.push(GoalAlert::StartingSoon {
                    goal_id: goal.id.clone(),
                    title: goal.title.clone(),
                    minutes_until,
                });
            }

            let late = -until;
            if !goal.start_alert_shown && late >= Duration::zero() && late <= self.config.start_grace {
                goal.start_alert_shown = true;
                info!("Goal '{}' is due to start", goal.title);
                alerts.push(GoalAlert::StartNow {
                    goal_id: goal.id.clone(),
                    title: goal.title.clone(),
                });
            }
        }
        alerts
    }

    /// Polls the stored goals and persists any latched flags.
    pub fn poll_store(
        &self,
        db: &Database,
        now: NaiveDateTime,
    ) -> Result<Vec<GoalAlert>, DatabaseError> {
        db.modify(SCHEDULED_GOALS, |goals: &mut Vec<ScheduledGoal>| {
            self.poll(goals, now)
        })
    }
}

/// Validates and stores a new goal.
pub fn schedule_goal(
    db: &Database,
    new_goal: NewGoal,
    now: NaiveDateTime,
    created_at: DateTime<Utc>,
) -> Result<ScheduledGoal, GoalError> {
    let goal = new_goal.validate(now, created_at)?;
    db.modify(SCHEDULED_GOALS, |goals: &mut Vec<ScheduledGoal>| {
        goals.push(goal.clone())
    })?;
    info!("Scheduled goal '{}' for {}", goal.title, goal.starts_at());
    Ok(goal)
}

/// Deletes a goal that has not been started.
pub fn delete_goal(db: &Database, id: &str) -> Result<(), GoalError> {
    db.modify(SCHEDULED_GOALS, |goals: &mut Vec<ScheduledGoal>| {
        let index = goals
            .iter()
            .position(|g| g.id == id)
            .ok_or_else(|| GoalError::NotFound(id.to_string()))?;
        if goals[index].status != GoalStatus::Scheduled {
            return Err(GoalError::NotDeletable(id.to_string()));
        }
        goals.remove(index);
        Ok(())
    })?
}

/// Marks a scheduled goal active and returns it.
pub fn activate_goal(db: &Database, id: &str) -> Result<ScheduledGoal, GoalError> {
    let goal = db.modify(SCHEDULED_GOALS, |goals: &mut Vec<ScheduledGoal>| {
        goals.iter_mut().find(|g| g.id == id).map(|goal| {
            goal.status = GoalStatus::Active;
            goal.clone()
        })
    })?;
    goal.ok_or_else(|| GoalError::NotFound(id.to_string()))
}
