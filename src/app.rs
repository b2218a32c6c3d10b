//! Main application state and logic.
//!
//! `App` owns the state machine, the recorder and the store. Every front-end
//! intent and every background signal goes through one of its methods, so
//! callers on other threads only need a single lock around it.

use crate::audio::RetryPolicy;
use crate::background::{BackgroundChannel, BackgroundSignal, DEFAULT_POLL_INTERVAL};
use crate::countdown::Clock;
use crate::effects::{Effects, GOAL_START_VIBRATION};
use crate::event::{EventBus, TimerEvent};
use crate::goals::{
    self, GoalAlert, GoalError, NewGoal, ScheduledGoalWatcher, WatcherConfig,
};
use crate::machine::{MachineEvent, TimerStateMachine};
use crate::models::{
    DailyStats, DisplayState, Reflection, ScheduledGoal, SessionStats, StudyPreferences,
    TimerConfigPatch, TimerPhase,
};
use crate::notifications;
use crate::persistence::{Database, DatabaseError};
use crate::recorder::SessionRecorder;
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use log::{error, info, warn};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("{0}")]
    Goal(#[from] GoalError),
}

/// Timing knobs for the loops around the app.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Foreground tick cadence.
    pub tick_interval: Duration,
    /// Background worker poll cadence.
    pub background_poll_interval: Duration,
    /// How often scheduled goals are scanned.
    pub goal_poll_interval: Duration,
    pub audio_retry: RetryPolicy,
    pub watcher: WatcherConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            background_poll_interval: DEFAULT_POLL_INTERVAL,
            goal_poll_interval: Duration::from_secs(30),
            audio_retry: RetryPolicy::default(),
            watcher: WatcherConfig::default(),
        }
    }
}

/// Longest accepted auto-start grace period.
const MAX_AUTO_START_DELAY_SECS: u64 = 60 * 60;

fn auto_start_delay(prefs: &StudyPreferences) -> chrono::Duration {
    chrono::Duration::seconds(prefs.auto_start_delay_secs.min(MAX_AUTO_START_DELAY_SECS) as i64)
}

pub struct App {
    machine: TimerStateMachine,
    recorder: SessionRecorder,
    watcher: ScheduledGoalWatcher,
    prefs: StudyPreferences,
    db: Database,
    bus: EventBus,
    clock: Arc<dyn Clock>,
}

impl App {
    /// Builds the app from stored preferences and restores a timer that was
    /// running when the process last exited.
    pub fn new(
        db: Database,
        background: BackgroundChannel,
        mut effects: Box<dyn Effects>,
        clock: Arc<dyn Clock>,
        watcher: ScheduledGoalWatcher,
    ) -> Result<Self, AppError> {
        let prefs = db.load_preferences()?;
        effects.configure(&prefs);

        let mut machine = TimerStateMachine::new(
            prefs.timer.clone(),
            auto_start_delay(&prefs),
            background,
            effects,
        );
        machine.set_background_notifications(prefs.notifications_enabled);
        match db.load_timer_state() {
            Ok(Some(snapshot)) => machine.restore(snapshot, clock.now()),
            Ok(None) => {}
            Err(e) => warn!("Ignoring unreadable timer state: {}", e),
        }

        Ok(Self {
            machine,
            recorder: SessionRecorder::new(),
            watcher,
            prefs,
            db,
            bus: EventBus::default(),
            clock,
        })
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn local_now(&self) -> NaiveDateTime {
        self.now().with_timezone(&Local).naive_local()
    }

    pub fn subscribe(&mut self) -> Receiver<TimerEvent> {
        self.bus.subscribe()
    }

    pub fn preferences(&self) -> &StudyPreferences {
        &self.prefs
    }

    pub fn machine(&self) -> &TimerStateMachine {
        &self.machine
    }

    pub fn display(&self) -> DisplayState {
        self.machine.display(self.now())
    }

    pub fn pending_reflection(&self) -> Option<&str> {
        self.recorder.pending_reflection()
    }

    pub fn start_timer(&mut self) {
        let generation = self.machine.generation();
        self.machine.start(self.now());
        self.settle(generation, Vec::new());
    }

    pub fn pause_timer(&mut self) {
        let generation = self.machine.generation();
        self.machine.pause(self.now());
        self.settle(generation, Vec::new());
    }

    pub fn reset_timer(&mut self) {
        let generation = self.machine.generation();
        self.machine.reset();
        self.settle(generation, Vec::new());
    }

    /// Completes the current phase immediately, recording it like a natural
    /// completion.
    pub fn skip_phase(&mut self) {
        let generation = self.machine.generation();
        let events = self
            .machine
            .skip(self.now())
            .map(MachineEvent::Completed)
            .into_iter()
            .collect();
        self.settle(generation, events);
    }

    /// Foreground tick. Returns true if the display changed.
    pub fn tick(&mut self) -> bool {
        let generation = self.machine.generation();
        let events = self.machine.tick(self.now());
        self.settle(generation, events)
    }

    /// Recomputes the display from the deadline right away and scans goals,
    /// as after the user returns to the app.
    pub fn reconcile(&mut self) {
        let generation = self.machine.generation();
        let events = self.machine.tick(self.now());
        self.settle(generation, events);
        self.publish();
        self.poll_goals();
    }

    pub fn handle_background_signal(&mut self, signal: BackgroundSignal) {
        let generation = self.machine.generation();
        let events = self.machine.handle_background(signal, self.now());
        self.settle(generation, events);
    }

    /// Applies a partial timer configuration and saves it.
    pub fn set_config(&mut self, patch: TimerConfigPatch) {
        self.update_preferences(|prefs| prefs.timer.apply(&patch));
    }

    /// Updates preferences, pushes them into the timer and the effects, and
    /// saves them.
    pub fn update_preferences<F>(&mut self, updater: F)
    where
        F: FnOnce(&mut StudyPreferences),
    {
        updater(&mut self.prefs);
        self.prefs.timer.normalize();

        self.machine
            .set_config(&TimerConfigPatch::from(&self.prefs.timer));
        self.machine.set_auto_start_delay(auto_start_delay(&self.prefs));
        self.machine.effects_mut().configure(&self.prefs);
        self.machine
            .set_background_notifications(self.prefs.notifications_enabled);

        if let Err(e) = self.db.save_preferences(&self.prefs) {
            error!("Failed to save preferences: {}", e);
        }
        self.persist_timer();
        self.publish();
    }

    pub fn set_goal(&mut self, goal: &str) {
        self.machine.set_goal(goal);
        self.persist_timer();
        self.publish();
    }

    pub fn submit_reflection(&mut self, reflection: Reflection) -> Result<bool, AppError> {
        Ok(self.recorder.submit_reflection(&self.db, reflection)?)
    }

    pub fn skip_reflection(&mut self) -> Result<bool, AppError> {
        Ok(self.recorder.skip_reflection(&self.db)?)
    }

    pub fn schedule_goal(&mut self, new_goal: NewGoal) -> Result<ScheduledGoal, AppError> {
        Ok(goals::schedule_goal(
            &self.db,
            new_goal,
            self.local_now(),
            self.now(),
        )?)
    }

    pub fn delete_goal(&mut self, id: &str) -> Result<(), AppError> {
        Ok(goals::delete_goal(&self.db, id)?)
    }

    pub fn list_goals(&self) -> Result<Vec<ScheduledGoal>, AppError> {
        Ok(self.db.load_goals()?)
    }

    /// Accepts a scheduled goal: marks it active, hands its label and
    /// duration to the timer and starts the work phase if nothing is running.
    /// A paused work phase is replaced by the goal's session; a running one
    /// finishes first.
    pub fn begin_goal(&mut self, id: &str) -> Result<ScheduledGoal, AppError> {
        let goal = goals::activate_goal(&self.db, id)?;
        self.machine.apply_goal(&goal.timer_label(), goal.duration);
        info!("Beginning goal '{}' for {} min", goal.title, goal.duration);

        if self.machine.phase() == TimerPhase::Work && !self.machine.run_state().is_running() {
            self.start_timer();
        } else {
            self.persist_timer();
            self.publish();
        }
        Ok(goal)
    }

    /// Scans scheduled goals and fires their alerts.
    pub fn poll_goals(&mut self) -> Vec<GoalAlert> {
        let alerts = match self.watcher.poll_store(&self.db, self.local_now()) {
            Ok(alerts) => alerts,
            Err(e) => {
                error!("Failed to scan scheduled goals: {}", e);
                return Vec::new();
            }
        };

        for alert in &alerts {
            let effects = self.machine.effects_mut();
            effects.request_notification_permission();
            match alert {
                GoalAlert::StartingSoon {
                    title,
                    minutes_until,
                    ..
                } => {
                    let (summary, body) = notifications::goal_soon_message(title, *minutes_until);
                    effects.notify(&summary, &body);
                }
                GoalAlert::StartNow { title, .. } => {
                    let (summary, body) = notifications::goal_start_message(title);
                    effects.notify(&summary, &body);
                    effects.play_alarm();
                    effects.vibrate(GOAL_START_VIBRATION);
                }
            }
            self.bus.dispatch(TimerEvent::GoalAlert(alert.clone()));
        }
        alerts
    }

    pub fn today_stats(&self) -> Result<DailyStats, AppError> {
        let today = self.now().with_timezone(&Local).date_naive();
        Ok(SessionRecorder::today_summary(&self.db, today)?)
    }

    pub fn stats(&self) -> Result<SessionStats, AppError> {
        Ok(self.db.load_stats()?)
    }

    /// Handles machine events, saves the timer if it moved and publishes
    /// the display. Returns true if anything visible changed.
    fn settle(&mut self, generation_before: u64, events: Vec<MachineEvent>) -> bool {
        let transitioned = self.machine.generation() != generation_before;
        let had_events = !events.is_empty();

        for event in events {
            match event {
                MachineEvent::Completed(completion) => {
                    let today = completion.completed_at.with_timezone(&Local).date_naive();
                    let session = self.recorder.record(&self.db, &completion, today);
                    self.bus.dispatch(TimerEvent::SessionComplete {
                        duration_minutes: completion.duration_minutes,
                        phase: completion.phase,
                    });
                    if session.session_type == TimerPhase::Work {
                        self.bus.dispatch(TimerEvent::ReflectionRequested {
                            session_id: session.id,
                        });
                    }
                }
                MachineEvent::Warning => self.bus.dispatch(TimerEvent::Warning),
            }
        }

        if transitioned {
            self.persist_timer();
        }
        let changed = transitioned || had_events || self.machine.run_state().is_running();
        if changed {
            self.publish();
        }
        changed
    }

    fn persist_timer(&self) {
        if let Err(e) = self.db.save_timer_state(&self.machine.snapshot()) {
            error!("Failed to save timer state: {}", e);
        }
    }

    fn publish(&mut self) {
        let display = self.display();
        self.bus.dispatch(TimerEvent::StateChanged(display));
    }
}
