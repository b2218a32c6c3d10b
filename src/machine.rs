//! The work/break state machine.
//!
//! All timer state lives here and only changes through the transition
//! methods. Completion can be reported by the foreground tick, by the
//! background worker or by the user skipping; each report carries the
//! generation it was issued under and only the first matching one takes
//! effect.

use crate::background::{BackgroundChannel, BackgroundSignal, WorkerEvent};
use crate::countdown::{minutes_to_ms, Countdown};
use crate::effects::{Effects, COMPLETION_VIBRATION};
use crate::models::{DisplayState, RunState, TimerConfig, TimerConfigPatch, TimerPhase};
use crate::notifications;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Remaining time at which the work-phase warning fires.
pub const WARNING_THRESHOLD_MS: i64 = 5 * 60 * 1000;

/// Where a completion report came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Tick,
    Background,
    Skip,
}

/// A finished phase, handed to the session recorder.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseCompletion {
    pub phase: TimerPhase,
    pub duration_minutes: u32,
    pub goal: String,
    pub completed_at: DateTime<Utc>,
    pub next_phase: TimerPhase,
    pub next_duration_minutes: u32,
    /// True when the next phase is a long break.
    pub is_long_break: bool,
    pub sessions_completed_in_cycle: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MachineEvent {
    Completed(PhaseCompletion),
    Warning,
}

/// Persistable view of the machine, used to survive restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub phase: TimerPhase,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub target_end_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub paused_remaining_ms: Option<i64>,
    pub initial_duration_ms: i64,
    pub sessions_completed_in_cycle: u32,
    #[serde(default)]
    pub warning_alert_fired: bool,
    #[serde(default)]
    pub is_long_break: bool,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub work_minutes_override: Option<u32>,
    /// True when the current work phase was sized from the override.
    #[serde(default)]
    pub override_in_use: bool,
    /// Goal label waiting for the next work phase.
    #[serde(default)]
    pub pending_goal: Option<String>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub auto_start_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingStart {
    due: DateTime<Utc>,
    generation: u64,
}

pub struct TimerStateMachine {
    config: TimerConfig,
    phase: TimerPhase,
    run: RunState,
    /// Length of the current phase, for progress display.
    initial_duration_ms: i64,
    is_long_break: bool,
    sessions_completed_in_cycle: u32,
    warning_alert_fired: bool,
    last_remaining_ms: Option<i64>,
    /// Bumped by every transition; stale reports carry an older value.
    generation: u64,
    goal: String,
    /// Work length requested by a scheduled goal, used for one work phase.
    work_minutes_override: Option<u32>,
    override_in_use: bool,
    pending_goal: Option<String>,
    pending_auto_start: Option<PendingStart>,
    auto_start_delay: Duration,
    background: BackgroundChannel,
    effects: Box<dyn Effects>,
}

impl TimerStateMachine {
    pub fn new(
        mut config: TimerConfig,
        auto_start_delay: Duration,
        background: BackgroundChannel,
        effects: Box<dyn Effects>,
    ) -> Self {
        config.normalize();
        let initial_duration_ms = minutes_to_ms(config.work_minutes);
        Self {
            config,
            phase: TimerPhase::Work,
            run: RunState::Idle,
            initial_duration_ms,
            is_long_break: false,
            sessions_completed_in_cycle: 0,
            warning_alert_fired: false,
            last_remaining_ms: None,
            generation: 0,
            goal: String::new(),
            work_minutes_override: None,
            override_in_use: false,
            pending_goal: None,
            pending_auto_start: None,
            auto_start_delay,
            background,
            effects,
        }
    }

    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    pub fn phase(&self) -> TimerPhase {
        self.phase
    }

    pub fn run_state(&self) -> RunState {
        self.run
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn sessions_completed_in_cycle(&self) -> u32 {
        self.sessions_completed_in_cycle
    }

    pub fn warning_alert_fired(&self) -> bool {
        self.warning_alert_fired
    }

    pub fn is_long_break(&self) -> bool {
        self.is_long_break
    }

    pub fn has_pending_auto_start(&self) -> bool {
        self.pending_auto_start
            .is_some_and(|p| p.generation == self.generation)
    }

    pub fn effects_mut(&mut self) -> &mut dyn Effects {
        self.effects.as_mut()
    }

    pub fn set_auto_start_delay(&mut self, delay: Duration) {
        self.auto_start_delay = delay;
    }

    fn work_minutes(&self) -> u32 {
        self.work_minutes_override.unwrap_or(self.config.work_minutes)
    }

    /// Sizes an unstarted work phase, adopting a goal queued for it.
    fn prepare_work_phase(&mut self) {
        if let Some(label) = self.pending_goal.take() {
            self.goal = label;
        }
        self.override_in_use = self.work_minutes_override.is_some();
        self.initial_duration_ms = minutes_to_ms(self.work_minutes());
    }

    fn current_phase_minutes(&self) -> u32 {
        match self.phase {
            TimerPhase::Work => self.work_minutes(),
            TimerPhase::Break if self.is_long_break => self.config.long_break_minutes,
            TimerPhase::Break => self.config.break_minutes,
        }
    }

    /// Milliseconds left in the current phase as of `now`.
    pub fn remaining_ms(&self, now: DateTime<Utc>) -> i64 {
        match self.run {
            RunState::Idle => self.initial_duration_ms,
            RunState::Paused { remaining_ms } => remaining_ms,
            RunState::Running { deadline } => (deadline - now).num_milliseconds().max(0),
        }
    }

    pub fn countdown(&self, now: DateTime<Utc>) -> Countdown {
        Countdown::from_remaining(self.remaining_ms(now), self.initial_duration_ms)
    }

    pub fn display(&self, now: DateTime<Utc>) -> DisplayState {
        let countdown = self.countdown(now);
        DisplayState {
            minutes: countdown.minutes,
            seconds: countdown.seconds,
            progress_percent: countdown.progress_percent,
            phase: self.phase,
            is_running: self.run.is_running(),
            sessions_completed_in_cycle: self.sessions_completed_in_cycle,
        }
    }

    /// Starts or resumes the current phase. Returns false if already running.
    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        let remaining = match self.run {
            RunState::Running { .. } => return false,
            RunState::Paused { remaining_ms } => remaining_ms,
            RunState::Idle => self.initial_duration_ms,
        };

        self.generation += 1;
        self.pending_auto_start = None;
        let deadline = now + Duration::milliseconds(remaining);
        self.run = RunState::Running { deadline };
        self.last_remaining_ms = Some(remaining);

        self.background
            .start(self.generation, deadline, self.phase, &self.goal);
        self.effects.request_notification_permission();
        if self.phase == TimerPhase::Work {
            self.effects.acquire_wake_lock();
        } else {
            self.effects.release_wake_lock();
        }

        info!(
            "Started {} phase, {}s remaining (generation {})",
            self.phase.label(),
            remaining / 1000,
            self.generation
        );
        true
    }

    /// Pauses a running phase, keeping its remaining time. Returns false if
    /// nothing was running.
    pub fn pause(&mut self, now: DateTime<Utc>) -> bool {
        let RunState::Running { deadline } = self.run else {
            return false;
        };

        let remaining_ms = (deadline - now).num_milliseconds().max(0);
        self.generation += 1;
        self.run = RunState::Paused { remaining_ms };
        self.background.stop(self.generation);
        self.effects.release_wake_lock();

        info!(
            "Paused {} phase with {}s remaining",
            self.phase.label(),
            remaining_ms / 1000
        );
        true
    }

    /// Returns to an idle work phase at the start of a fresh cycle.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.run = RunState::Idle;
        self.phase = TimerPhase::Work;
        self.is_long_break = false;
        self.sessions_completed_in_cycle = 0;
        self.warning_alert_fired = false;
        self.last_remaining_ms = None;
        self.pending_auto_start = None;
        self.prepare_work_phase();
        self.background.stop(self.generation);
        self.effects.release_wake_lock();
        info!("Timer reset");
    }

    /// Reconciles with the clock: fires pending auto-starts, the warning
    /// and completion. Safe to call at any cadence.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<MachineEvent> {
        let mut events = Vec::new();

        if let Some(pending) = self.pending_auto_start {
            if pending.generation != self.generation {
                self.pending_auto_start = None;
            } else if now >= pending.due {
                self.start(now);
            }
        }

        let RunState::Running { deadline } = self.run else {
            return events;
        };

        let remaining = (deadline - now).num_milliseconds().max(0);
        if remaining == 0 {
            if let Some(completion) = self.complete(self.generation, now, Trigger::Tick) {
                events.push(MachineEvent::Completed(completion));
            }
        } else if self.check_warning(remaining) {
            events.push(MachineEvent::Warning);
        }
        events
    }

    /// Applies a signal from the background worker.
    pub fn handle_background(
        &mut self,
        signal: BackgroundSignal,
        now: DateTime<Utc>,
    ) -> Vec<MachineEvent> {
        match signal.message {
            WorkerEvent::TimerComplete(_) => self
                .complete(signal.generation, now, Trigger::Background)
                .map(MachineEvent::Completed)
                .into_iter()
                .collect(),
            WorkerEvent::TimerUpdate(_) if signal.generation == self.generation => self.tick(now),
            WorkerEvent::TimerUpdate(_) => {
                debug!(
                    "Ignoring progress for generation {} (current {})",
                    signal.generation, self.generation
                );
                Vec::new()
            }
        }
    }

    /// Ends a running or paused phase now, as if its deadline had passed.
    pub fn skip(&mut self, now: DateTime<Utc>) -> Option<PhaseCompletion> {
        if self.run.is_paused() {
            self.run = RunState::Running { deadline: now };
        }
        self.complete(self.generation, now, Trigger::Skip)
    }

    /// Completes the running phase if `generation` is still current.
    ///
    /// The transition to the next phase happens before any side effect is
    /// dispatched.
    pub fn complete(
        &mut self,
        generation: u64,
        now: DateTime<Utc>,
        trigger: Trigger,
    ) -> Option<PhaseCompletion> {
        if generation != self.generation || !self.run.is_running() {
            debug!(
                "Discarding stale {:?} completion (generation {}, current {})",
                trigger, generation, self.generation
            );
            return None;
        }

        let finished = self.phase;
        let duration_minutes = (self.initial_duration_ms / 60_000) as u32;
        self.generation += 1;

        match finished {
            TimerPhase::Work => {
                self.sessions_completed_in_cycle += 1;
                let (minutes, is_long) = self
                    .config
                    .break_minutes_after(self.sessions_completed_in_cycle);
                if self.override_in_use {
                    self.work_minutes_override = None;
                    self.override_in_use = false;
                }
                self.phase = TimerPhase::Break;
                self.is_long_break = is_long;
                self.initial_duration_ms = minutes_to_ms(minutes);
            }
            TimerPhase::Break => {
                if self.is_long_break {
                    self.sessions_completed_in_cycle = 0;
                }
                self.phase = TimerPhase::Work;
                self.is_long_break = false;
                self.prepare_work_phase();
            }
        }
        self.warning_alert_fired = false;
        self.last_remaining_ms = None;
        self.run = RunState::Idle;

        let auto_start = match self.phase {
            TimerPhase::Break => self.config.auto_start_breaks,
            TimerPhase::Work => self.config.auto_start_work,
        };
        if auto_start {
            self.pending_auto_start = Some(PendingStart {
                due: now + self.auto_start_delay,
                generation: self.generation,
            });
        }
        if trigger != Trigger::Background {
            self.background.stop(self.generation);
        }

        let completion = PhaseCompletion {
            phase: finished,
            duration_minutes,
            goal: self.goal.clone(),
            completed_at: now,
            next_phase: self.phase,
            next_duration_minutes: self.current_phase_minutes(),
            is_long_break: self.is_long_break,
            sessions_completed_in_cycle: self.sessions_completed_in_cycle,
        };

        self.effects.release_wake_lock();
        self.effects.play_alarm();
        let (title, body) = notifications::phase_complete_message(finished, &self.goal);
        self.effects.notify(&title, &body);
        self.effects.vibrate(COMPLETION_VIBRATION);

        info!(
            "{} phase complete via {:?}; next {} for {} min",
            finished.label(),
            trigger,
            self.phase.label(),
            completion.next_duration_minutes
        );
        Some(completion)
    }

    /// Fires the five-minute warning the first time a work phase crosses it.
    fn check_warning(&mut self, remaining_ms: i64) -> bool {
        let previous = self.last_remaining_ms.replace(remaining_ms);
        if self.phase != TimerPhase::Work
            || self.warning_alert_fired
            || !self.config.warning_alerts_enabled
        {
            return false;
        }

        let crossed = previous.is_some_and(|p| p > WARNING_THRESHOLD_MS)
            && remaining_ms <= WARNING_THRESHOLD_MS;
        if !crossed {
            return false;
        }

        self.warning_alert_fired = true;
        self.effects.play_warning();
        let (title, body) = notifications::warning_message();
        self.effects.notify(&title, &body);
        info!("Five-minute warning fired");
        true
    }

    /// Updates the configuration. Durations only reshape the current phase
    /// while it has not been started.
    pub fn set_config(&mut self, patch: &TimerConfigPatch) {
        self.config.apply(patch);
        if self.run.is_idle() && patch.touches_durations() {
            self.initial_duration_ms = minutes_to_ms(self.current_phase_minutes());
        }
    }

    pub fn set_goal(&mut self, goal: &str) {
        self.goal = goal.trim().to_string();
    }

    /// Adopts a scheduled goal's label and duration for the upcoming work
    /// phase.
    ///
    /// An unstarted or paused work phase becomes the goal's session; a
    /// paused remainder is discarded. A running work phase finishes as it
    /// is and the goal takes the next one. During a break the goal takes
    /// the work phase that follows.
    pub fn apply_goal(&mut self, label: &str, duration_minutes: u32) {
        let label = label.trim().to_string();
        self.work_minutes_override = Some(duration_minutes.max(1));

        match (self.phase, self.run) {
            (TimerPhase::Work, RunState::Running { .. }) => {
                self.override_in_use = false;
                self.pending_goal = Some(label);
                info!("Goal queued for the next work phase");
            }
            (TimerPhase::Work, RunState::Paused { .. }) => {
                self.generation += 1;
                self.run = RunState::Idle;
                self.warning_alert_fired = false;
                self.last_remaining_ms = None;
                self.pending_auto_start = None;
                self.pending_goal = None;
                self.goal = label;
                self.prepare_work_phase();
                info!("Paused work phase replaced by goal session");
            }
            (TimerPhase::Work, RunState::Idle) => {
                self.pending_goal = None;
                self.goal = label;
                self.prepare_work_phase();
            }
            (TimerPhase::Break, _) => {
                self.override_in_use = false;
                self.pending_goal = Some(label);
            }
        }
    }

    /// Forwards the notification preference to the background worker.
    pub fn set_background_notifications(&mut self, enabled: bool) {
        self.background.set_notifications(self.generation, enabled);
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            phase: self.phase,
            target_end_timestamp: self.run.deadline(),
            paused_remaining_ms: match self.run {
                RunState::Paused { remaining_ms } => Some(remaining_ms),
                _ => None,
            },
            initial_duration_ms: self.initial_duration_ms,
            sessions_completed_in_cycle: self.sessions_completed_in_cycle,
            warning_alert_fired: self.warning_alert_fired,
            is_long_break: self.is_long_break,
            goal: self.goal.clone(),
            work_minutes_override: self.work_minutes_override,
            override_in_use: self.override_in_use,
            pending_goal: self.pending_goal.clone(),
            auto_start_at: self
                .pending_auto_start
                .filter(|p| p.generation == self.generation)
                .map(|p| p.due),
        }
    }

    /// Rebuilds state from a snapshot. A restored deadline resumes running;
    /// if it has already passed, the next tick completes it.
    pub fn restore(&mut self, snapshot: TimerSnapshot, now: DateTime<Utc>) {
        self.generation += 1;
        self.phase = snapshot.phase;
        self.initial_duration_ms = snapshot.initial_duration_ms.max(0);
        self.sessions_completed_in_cycle = snapshot.sessions_completed_in_cycle;
        self.warning_alert_fired = snapshot.warning_alert_fired;
        self.is_long_break = snapshot.is_long_break;
        self.goal = snapshot.goal;
        self.work_minutes_override = snapshot.work_minutes_override;
        self.override_in_use = snapshot.override_in_use;
        self.pending_goal = snapshot.pending_goal;
        self.run = match (snapshot.target_end_timestamp, snapshot.paused_remaining_ms) {
            (Some(deadline), _) => RunState::Running { deadline },
            (None, Some(remaining_ms)) => RunState::Paused { remaining_ms },
            (None, None) => RunState::Idle,
        };
        self.pending_auto_start = match (self.run, snapshot.auto_start_at) {
            (RunState::Idle, Some(due)) => Some(PendingStart {
                due,
                generation: self.generation,
            }),
            _ => None,
        };

        self.last_remaining_ms = None;
        if let RunState::Running { deadline } = self.run {
            self.last_remaining_ms = Some(self.remaining_ms(now));
            self.background
                .start(self.generation, deadline, self.phase, &self.goal);
            if self.phase == TimerPhase::Work {
                self.effects.acquire_wake_lock();
            }
            info!(
                "Restored running {} phase ending at {}",
                self.phase.label(),
                deadline
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::{Envelope, TimerCompleteData, TimerUpdateData, WorkerCommand};
    use crate::effects::testing::{Effect, RecordingEffects};
    use chrono::TimeZone;
    use std::sync::mpsc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn machine_with(config: TimerConfig) -> (TimerStateMachine, RecordingEffects) {
        let effects = RecordingEffects::new();
        let machine = TimerStateMachine::new(
            config,
            Duration::seconds(1),
            BackgroundChannel::disabled(),
            Box::new(effects.clone()),
        );
        (machine, effects)
    }

    fn new_machine() -> (TimerStateMachine, RecordingEffects) {
        machine_with(TimerConfig::default())
    }

    fn complete_signal(generation: u64, phase: TimerPhase) -> BackgroundSignal {
        Envelope {
            generation,
            message: WorkerEvent::TimerComplete(TimerCompleteData {
                session_type: phase,
                goal: String::new(),
            }),
        }
    }

    /// Runs the current phase to its deadline and returns the completion.
    fn finish_phase(machine: &mut TimerStateMachine, now: &mut DateTime<Utc>) -> PhaseCompletion {
        machine.start(*now);
        *now += Duration::milliseconds(machine.remaining_ms(*now));
        let events = machine.tick(*now);
        match events.as_slice() {
            [MachineEvent::Completed(c)] => c.clone(),
            other => panic!("expected a completion, got {:?}", other),
        }
    }

    #[test]
    fn test_initial_state() {
        let (machine, _) = new_machine();
        let display = machine.display(t0());
        assert_eq!(display.minutes, 25);
        assert_eq!(display.seconds, 0);
        assert_eq!(display.phase, TimerPhase::Work);
        assert!(!display.is_running);
        assert_eq!(display.progress_percent, 0.0);
        assert!(machine.run_state().is_idle());
    }

    #[test]
    fn test_start_sets_deadline() {
        let (mut machine, effects) = new_machine();
        assert!(machine.start(t0()));
        assert_eq!(
            machine.run_state().deadline(),
            Some(t0() + Duration::minutes(25))
        );
        assert!(machine.display(t0()).is_running);
        assert_eq!(
            effects.take(),
            vec![Effect::PermissionRequested, Effect::WakeLockAcquired]
        );

        // Starting twice is a no-op.
        let generation = machine.generation();
        assert!(!machine.start(t0() + Duration::seconds(3)));
        assert_eq!(machine.generation(), generation);
    }

    #[test]
    fn test_pause_freezes_display() {
        let (mut machine, effects) = new_machine();
        machine.start(t0());
        let paused_at = t0() + Duration::seconds(90);
        assert!(machine.pause(paused_at));
        assert!(machine.run_state().is_paused());
        assert!(effects.take().contains(&Effect::WakeLockReleased));

        let later = paused_at + Duration::hours(2);
        let display = machine.display(later);
        assert_eq!((display.minutes, display.seconds), (23, 30));
        assert!(!display.is_running);
        assert!(machine.tick(later).is_empty());
    }

    #[test]
    fn test_pause_resume_preserves_remaining() {
        let (mut machine, _) = new_machine();
        machine.start(t0());

        let paused_at = t0() + Duration::milliseconds(7 * 60_000 + 12_345);
        machine.pause(paused_at);
        let remaining = machine.remaining_ms(paused_at);
        assert_eq!(remaining, 25 * 60_000 - (7 * 60_000 + 12_345));

        // Resuming much later continues from the same remaining time.
        let resumed_at = paused_at + Duration::minutes(45);
        machine.start(resumed_at);
        assert_eq!(
            machine.run_state().deadline(),
            Some(resumed_at + Duration::milliseconds(remaining))
        );
        assert_eq!(machine.remaining_ms(resumed_at), remaining);
    }

    #[test]
    fn test_pause_when_idle_is_noop() {
        let (mut machine, _) = new_machine();
        assert!(!machine.pause(t0()));
        assert!(machine.run_state().is_idle());
    }

    #[test]
    fn test_completion_after_clock_jump() {
        let (mut machine, effects) = new_machine();
        machine.start(t0());
        effects.take();

        // No ticks at all while "suspended", then one far past the deadline.
        let events = machine.tick(t0() + Duration::hours(3));
        let [MachineEvent::Completed(completion)] = events.as_slice() else {
            panic!("expected completion, got {:?}", events);
        };
        assert_eq!(completion.phase, TimerPhase::Work);
        assert_eq!(completion.duration_minutes, 25);
        assert_eq!(completion.next_phase, TimerPhase::Break);
        assert_eq!(completion.next_duration_minutes, 5);
        assert!(!completion.is_long_break);

        assert_eq!(machine.phase(), TimerPhase::Break);
        assert!(machine.run_state().is_idle());
        assert_eq!(machine.sessions_completed_in_cycle(), 1);
        assert_eq!(machine.display(t0()).minutes, 5);

        let fired = effects.take();
        assert_eq!(fired[0], Effect::WakeLockReleased);
        assert!(fired.contains(&Effect::Alarm));
        assert!(fired.contains(&Effect::Notify("Study session complete! 📚".into())));
        assert!(fired.contains(&Effect::Vibrate(COMPLETION_VIBRATION.to_vec())));
    }

    #[test]
    fn test_not_complete_just_before_deadline() {
        let (mut machine, _) = new_machine();
        machine.start(t0());
        let just_before = t0() + Duration::minutes(25) - Duration::milliseconds(1);
        assert!(machine.tick(just_before).is_empty());
        assert!(machine.run_state().is_running());
        assert!(machine.remaining_ms(just_before) > 0);
    }

    #[test]
    fn test_completion_is_exactly_once() {
        let (mut machine, effects) = new_machine();
        machine.start(t0());
        let generation = machine.generation();
        let after = t0() + Duration::minutes(26);

        let first = machine.tick(after);
        assert_eq!(first.len(), 1);
        let second = machine.handle_background(complete_signal(generation, TimerPhase::Work), after);
        assert!(second.is_empty());
        assert!(machine.tick(after).is_empty());

        assert_eq!(effects.count(&Effect::Alarm), 1);
        assert_eq!(machine.sessions_completed_in_cycle(), 1);
    }

    #[test]
    fn test_background_completion_first_then_tick() {
        let (mut machine, effects) = new_machine();
        machine.start(t0());
        let generation = machine.generation();
        let after = t0() + Duration::minutes(25);

        let events = machine.handle_background(complete_signal(generation, TimerPhase::Work), after);
        assert_eq!(events.len(), 1);
        assert!(machine.tick(after + Duration::seconds(1)).is_empty());
        assert_eq!(effects.count(&Effect::Alarm), 1);
    }

    #[test]
    fn test_stale_signal_after_reset_is_discarded() {
        let (mut machine, effects) = new_machine();
        machine.start(t0());
        let stale = machine.generation();
        machine.reset();
        effects.take();

        let events =
            machine.handle_background(complete_signal(stale, TimerPhase::Work), t0() + Duration::hours(1));
        assert!(events.is_empty());
        assert_eq!(machine.sessions_completed_in_cycle(), 0);
        assert!(effects.take().is_empty());
    }

    #[test]
    fn test_stale_signal_does_not_complete_newer_phase() {
        let (mut machine, _) = new_machine();
        machine.start(t0());
        let stale = machine.generation();
        machine.reset();
        machine.start(t0() + Duration::seconds(5));

        let events = machine.handle_background(
            complete_signal(stale, TimerPhase::Work),
            t0() + Duration::minutes(25) + Duration::seconds(1),
        );
        assert!(events.is_empty());
        assert!(machine.run_state().is_running());
    }

    #[test]
    fn test_stale_signal_after_pause_is_discarded() {
        let (mut machine, _) = new_machine();
        machine.start(t0());
        let stale = machine.generation();
        machine.pause(t0() + Duration::minutes(10));

        let events =
            machine.handle_background(complete_signal(stale, TimerPhase::Work), t0() + Duration::minutes(30));
        assert!(events.is_empty());
        assert!(machine.run_state().is_paused());
    }

    #[test]
    fn test_long_break_cadence() {
        let (mut machine, _) = new_machine();
        let mut now = t0();
        for n in 1..=12 {
            let work = finish_phase(&mut machine, &mut now);
            assert_eq!(work.phase, TimerPhase::Work);
            if n % 4 == 0 {
                assert!(work.is_long_break, "work session {} should earn a long break", n);
                assert_eq!(work.next_duration_minutes, 15);
            } else {
                assert!(!work.is_long_break, "work session {} should earn a short break", n);
                assert_eq!(work.next_duration_minutes, 5);
            }
            let rest = finish_phase(&mut machine, &mut now);
            assert_eq!(rest.phase, TimerPhase::Break);
            assert_eq!(rest.duration_minutes, work.next_duration_minutes);
        }
        assert_eq!(machine.sessions_completed_in_cycle(), 0);
    }

    #[test]
    fn test_warning_fires_once_per_work_phase() {
        let (mut machine, effects) = new_machine();
        machine.start(t0());

        let mut warnings = 0;
        for second in 1..=(25 * 60) {
            let events = machine.tick(t0() + Duration::seconds(second));
            warnings += events
                .iter()
                .filter(|e| **e == MachineEvent::Warning)
                .count();
        }
        assert_eq!(warnings, 1);
        assert_eq!(effects.count(&Effect::Warning), 1);
        assert_eq!(machine.phase(), TimerPhase::Break);
        assert!(!machine.warning_alert_fired());
    }

    #[test]
    fn test_warning_fires_at_threshold() {
        let (mut machine, _) = new_machine();
        machine.start(t0());
        assert!(machine.tick(t0() + Duration::seconds(20 * 60 - 1)).is_empty());
        assert_eq!(
            machine.tick(t0() + Duration::seconds(20 * 60)),
            vec![MachineEvent::Warning]
        );
        assert!(machine.warning_alert_fired());
    }

    #[test]
    fn test_warning_latched_across_pause() {
        let (mut machine, _) = new_machine();
        machine.start(t0());
        machine.tick(t0() + Duration::seconds(20 * 60 + 30));
        assert!(machine.warning_alert_fired());

        machine.pause(t0() + Duration::seconds(21 * 60));
        machine.start(t0() + Duration::seconds(22 * 60));
        let events = machine.tick(t0() + Duration::seconds(23 * 60));
        assert!(events.is_empty());
    }

    #[test]
    fn test_warning_not_fired_when_disabled() {
        let (mut machine, effects) = machine_with(TimerConfig {
            warning_alerts_enabled: false,
            ..TimerConfig::default()
        });
        machine.start(t0());
        for minute in 1..25 {
            assert!(machine.tick(t0() + Duration::minutes(minute)).is_empty());
        }
        assert_eq!(effects.count(&Effect::Warning), 0);
    }

    #[test]
    fn test_warning_not_fired_during_break() {
        let (mut machine, _) = machine_with(TimerConfig {
            break_minutes: 10,
            ..TimerConfig::default()
        });
        let mut now = t0();
        finish_phase(&mut machine, &mut now);
        machine.start(now);
        for minute in 1..10 {
            assert!(machine.tick(now + Duration::minutes(minute)).is_empty());
        }
    }

    #[test]
    fn test_warning_not_fired_when_phase_shorter_than_threshold() {
        let (mut machine, _) = machine_with(TimerConfig {
            work_minutes: 3,
            ..TimerConfig::default()
        });
        machine.start(t0());
        for second in (10..180).step_by(10) {
            assert!(machine.tick(t0() + Duration::seconds(second)).is_empty());
        }
    }

    #[test]
    fn test_auto_start_break_after_grace_period() {
        let (mut machine, _) = machine_with(TimerConfig {
            auto_start_breaks: true,
            ..TimerConfig::default()
        });
        machine.start(t0());
        let done = t0() + Duration::minutes(25);
        machine.tick(done);
        assert!(machine.has_pending_auto_start());
        assert!(machine.run_state().is_idle());

        machine.tick(done + Duration::milliseconds(500));
        assert!(machine.run_state().is_idle());

        machine.tick(done + Duration::seconds(1));
        assert!(machine.run_state().is_running());
        assert_eq!(machine.phase(), TimerPhase::Break);
        assert_eq!(
            machine.run_state().deadline(),
            Some(done + Duration::seconds(1) + Duration::minutes(5))
        );
    }

    #[test]
    fn test_pending_auto_start_survives_restart() {
        let (mut machine, _) = machine_with(TimerConfig {
            auto_start_breaks: true,
            ..TimerConfig::default()
        });
        machine.start(t0());
        let done = t0() + Duration::minutes(25);
        machine.tick(done);
        let snapshot = machine.snapshot();
        assert_eq!(snapshot.auto_start_at, Some(done + Duration::seconds(1)));

        let (mut restored, _) = new_machine();
        restored.restore(snapshot, done);
        assert!(restored.has_pending_auto_start());
        restored.tick(done + Duration::seconds(2));
        assert!(restored.run_state().is_running());
        assert_eq!(restored.phase(), TimerPhase::Break);
    }

    #[test]
    fn test_auto_start_cancelled_by_reset() {
        let (mut machine, _) = machine_with(TimerConfig {
            auto_start_breaks: true,
            ..TimerConfig::default()
        });
        machine.start(t0());
        machine.tick(t0() + Duration::minutes(25));
        machine.reset();
        machine.tick(t0() + Duration::minutes(30));
        assert!(machine.run_state().is_idle());
        assert!(!machine.has_pending_auto_start());
    }

    #[test]
    fn test_no_auto_start_work_by_default() {
        let (mut machine, _) = machine_with(TimerConfig {
            auto_start_breaks: true,
            ..TimerConfig::default()
        });
        let mut now = t0();
        finish_phase(&mut machine, &mut now);
        now += Duration::seconds(1);
        machine.tick(now);
        assert!(machine.run_state().is_running());

        now += Duration::minutes(5);
        let events = machine.tick(now);
        assert_eq!(events.len(), 1);
        machine.tick(now + Duration::seconds(5));
        assert_eq!(machine.phase(), TimerPhase::Work);
        assert!(machine.run_state().is_idle());
    }

    #[test]
    fn test_reset_clears_cycle() {
        let (mut machine, _) = new_machine();
        let mut now = t0();
        finish_phase(&mut machine, &mut now);
        finish_phase(&mut machine, &mut now);
        finish_phase(&mut machine, &mut now);
        assert_eq!(machine.phase(), TimerPhase::Break);
        assert_eq!(machine.sessions_completed_in_cycle(), 2);

        machine.reset();
        assert_eq!(machine.phase(), TimerPhase::Work);
        assert_eq!(machine.sessions_completed_in_cycle(), 0);
        assert!(machine.run_state().is_idle());
        assert_eq!(machine.display(now).minutes, 25);
    }

    #[test]
    fn test_config_change_applies_to_idle_phase() {
        let (mut machine, _) = new_machine();
        machine.set_config(&TimerConfigPatch {
            work_minutes: Some(50),
            ..TimerConfigPatch::default()
        });
        assert_eq!(machine.display(t0()).minutes, 50);
    }

    #[test]
    fn test_config_change_waits_for_next_phase_when_running() {
        let (mut machine, _) = new_machine();
        machine.start(t0());
        machine.set_config(&TimerConfigPatch {
            work_minutes: Some(50),
            break_minutes: Some(10),
            ..TimerConfigPatch::default()
        });
        assert_eq!(
            machine.run_state().deadline(),
            Some(t0() + Duration::minutes(25))
        );
        let events = machine.tick(t0() + Duration::minutes(25));
        let [MachineEvent::Completed(c)] = events.as_slice() else {
            panic!("expected completion");
        };
        assert_eq!(c.duration_minutes, 25);
        assert_eq!(c.next_duration_minutes, 10);
    }

    #[test]
    fn test_goal_duration_used_for_one_work_phase() {
        let (mut machine, _) = new_machine();
        machine.apply_goal("Linear algebra", 45);
        assert_eq!(machine.goal(), "Linear algebra");
        assert_eq!(machine.display(t0()).minutes, 45);

        let mut now = t0();
        let work = finish_phase(&mut machine, &mut now);
        assert_eq!(work.duration_minutes, 45);
        assert_eq!(work.goal, "Linear algebra");
        finish_phase(&mut machine, &mut now);
        assert_eq!(machine.display(now).minutes, 25);
    }

    #[test]
    fn test_goal_begun_during_running_work_takes_next_work_phase() {
        let (mut machine, _) = new_machine();
        machine.set_goal("Reading");
        machine.start(t0());
        machine.apply_goal("Thesis", 50);
        assert_eq!(machine.goal(), "Reading");

        let mut now = t0() + Duration::minutes(25);
        let work = match machine.tick(now).as_slice() {
            [MachineEvent::Completed(c)] => c.clone(),
            other => panic!("expected a completion, got {:?}", other),
        };
        assert_eq!(work.duration_minutes, 25);
        assert_eq!(work.goal, "Reading");
        assert_eq!(work.next_phase, TimerPhase::Break);

        finish_phase(&mut machine, &mut now);
        assert_eq!(machine.phase(), TimerPhase::Work);
        assert_eq!(machine.goal(), "Thesis");
        assert_eq!(machine.display(now).minutes, 50);

        let goal_session = finish_phase(&mut machine, &mut now);
        assert_eq!(goal_session.duration_minutes, 50);
        assert_eq!(goal_session.goal, "Thesis");
        finish_phase(&mut machine, &mut now);
        assert_eq!(machine.display(now).minutes, 25);
    }

    #[test]
    fn test_goal_begun_while_paused_replaces_remainder() {
        let (mut machine, _) = new_machine();
        machine.start(t0());
        machine.pause(t0() + Duration::minutes(10));
        let paused_generation = machine.generation();

        machine.apply_goal("Thesis", 50);
        assert!(machine.run_state().is_idle());
        assert!(machine.generation() > paused_generation);
        assert_eq!(machine.display(t0()).minutes, 50);

        let mut now = t0() + Duration::minutes(11);
        let work = finish_phase(&mut machine, &mut now);
        assert_eq!(work.duration_minutes, 50);
        assert_eq!(work.goal, "Thesis");
    }

    #[test]
    fn test_goal_begun_during_break_sizes_next_work_phase() {
        let (mut machine, _) = new_machine();
        let mut now = t0();
        finish_phase(&mut machine, &mut now);
        machine.start(now);
        machine.apply_goal("Thesis", 40);

        now += Duration::minutes(5);
        machine.tick(now);
        assert_eq!(machine.phase(), TimerPhase::Work);
        assert_eq!(machine.goal(), "Thesis");
        assert_eq!(machine.display(now).minutes, 40);
    }

    #[test]
    fn test_queued_goal_survives_restart() {
        let (mut machine, _) = new_machine();
        machine.start(t0());
        machine.apply_goal("Thesis", 50);
        let json = serde_json::to_string(&machine.snapshot()).unwrap();

        let (mut restored, _) = new_machine();
        restored.restore(serde_json::from_str(&json).unwrap(), t0());
        let mut now = t0() + Duration::minutes(25);
        restored.tick(now);
        finish_phase(&mut restored, &mut now);
        assert_eq!(restored.goal(), "Thesis");
        assert_eq!(restored.display(now).minutes, 50);
    }

    #[test]
    fn test_skip_completes_running_phase() {
        let (mut machine, _) = new_machine();
        assert!(machine.skip(t0()).is_none());
        machine.start(t0());
        let completion = machine.skip(t0() + Duration::minutes(3)).unwrap();
        assert_eq!(completion.phase, TimerPhase::Work);
        assert_eq!(machine.phase(), TimerPhase::Break);
    }

    #[test]
    fn test_skip_paused_phase() {
        let (mut machine, _) = new_machine();
        machine.start(t0());
        machine.pause(t0() + Duration::minutes(1));
        let completion = machine.skip(t0() + Duration::minutes(2)).unwrap();
        assert_eq!(completion.phase, TimerPhase::Work);
        assert!(machine.run_state().is_idle());
        assert!(machine.skip(t0() + Duration::minutes(3)).is_none());
    }

    #[test]
    fn test_background_update_reconciles() {
        let (mut machine, _) = new_machine();
        machine.start(t0());
        let update = Envelope {
            generation: machine.generation(),
            message: WorkerEvent::TimerUpdate(TimerUpdateData {
                remaining: 0,
                end_time: t0() + Duration::minutes(25),
            }),
        };
        let events = machine.handle_background(update, t0() + Duration::minutes(25));
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_commands_reach_background_worker() {
        let (tx, rx) = mpsc::channel();
        let mut machine = TimerStateMachine::new(
            TimerConfig::default(),
            Duration::seconds(1),
            BackgroundChannel::from_sender(tx),
            Box::new(RecordingEffects::new()),
        );
        machine.set_goal("  Thesis  ");
        machine.start(t0());
        let start = rx.try_recv().unwrap();
        assert_eq!(start.generation, machine.generation());
        assert_eq!(
            start.message,
            WorkerCommand::StartTimer(crate::background::StartTimerData {
                end_time: t0() + Duration::minutes(25),
                session_type: TimerPhase::Work,
                goal: "Thesis".into(),
            })
        );

        machine.pause(t0() + Duration::minutes(1));
        assert_eq!(rx.try_recv().unwrap().message, WorkerCommand::StopTimer);
        machine.reset();
        assert_eq!(rx.try_recv().unwrap().message, WorkerCommand::StopTimer);

        machine.set_background_notifications(false);
        assert_eq!(
            rx.try_recv().unwrap().message,
            WorkerCommand::SetNotifications(crate::background::NotificationSettingsData {
                enabled: false
            })
        );
    }

    #[test]
    fn test_snapshot_restore_running() {
        let (mut machine, _) = new_machine();
        machine.set_goal("Biology");
        machine.start(t0());
        let snapshot = machine.snapshot();
        assert_eq!(
            snapshot.target_end_timestamp,
            Some(t0() + Duration::minutes(25))
        );

        let (mut restored, _) = new_machine();
        restored.restore(snapshot, t0() + Duration::minutes(10));
        assert!(restored.run_state().is_running());
        assert_eq!(restored.goal(), "Biology");
        assert_eq!(
            restored.remaining_ms(t0() + Duration::minutes(10)),
            15 * 60_000
        );
    }

    #[test]
    fn test_restore_elapsed_deadline_completes_once() {
        let (mut machine, _) = new_machine();
        machine.start(t0());
        let snapshot = machine.snapshot();

        let (mut restored, effects) = new_machine();
        let later = t0() + Duration::hours(5);
        restored.restore(snapshot, later);
        assert_eq!(restored.tick(later).len(), 1);
        assert!(restored.tick(later).is_empty());
        assert_eq!(effects.count(&Effect::Alarm), 1);
    }

    #[test]
    fn test_snapshot_restore_paused() {
        let (mut machine, _) = new_machine();
        machine.start(t0());
        machine.pause(t0() + Duration::minutes(5));
        let json = serde_json::to_string(&machine.snapshot()).unwrap();

        let (mut restored, _) = new_machine();
        restored.restore(serde_json::from_str(&json).unwrap(), t0() + Duration::days(1));
        assert!(restored.run_state().is_paused());
        assert_eq!(restored.display(t0()).minutes, 20);
    }
}
