//! Turns finished phases into stored study sessions and keeps the
//! lifetime statistics and post-session reflections up to date.

use crate::machine::PhaseCompletion;
use crate::models::{DailyStats, Reflection, SessionStats, StudySession, TimerPhase};
use crate::persistence::{Database, DatabaseError, SESSION_STATS, STUDY_SESSIONS};
use chrono::NaiveDate;
use log::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct SessionRecorder {
    /// Work session waiting for the user's reflection.
    pending_reflection: Option<String>,
}

impl SessionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_reflection(&self) -> Option<&str> {
        self.pending_reflection.as_deref()
    }

    /// Stores a completed phase. Work phases also update the statistics and
    /// open a reflection prompt.
    ///
    /// Each step is attempted even if an earlier one fails; failures are
    /// logged and the session is returned either way.
    pub fn record(
        &mut self,
        db: &Database,
        completion: &PhaseCompletion,
        today: NaiveDate,
    ) -> StudySession {
        let session = StudySession {
            id: Uuid::new_v4().to_string(),
            date: completion.completed_at,
            duration: completion.duration_minutes,
            session_type: completion.phase,
            goal: completion.goal.clone(),
            completed: true,
            productivity: None,
            notes: String::new(),
            achievements: Vec::new(),
            challenges: String::new(),
        };

        if let Err(e) = db.modify(STUDY_SESSIONS, |sessions: &mut Vec<StudySession>| {
            sessions.push(session.clone())
        }) {
            error!("Failed to store session {}: {}", session.id, e);
        }

        if session.session_type != TimerPhase::Work {
            info!("Recorded {} min break", session.duration);
            return session;
        }

        match db.modify(SESSION_STATS, |stats: &mut SessionStats| {
            stats.record_work_session(session.duration, today);
            stats.streak
        }) {
            Ok(streak) => info!(
                "Recorded {} min work session (streak {})",
                session.duration, streak
            ),
            Err(e) => error!("Failed to update session stats: {}", e),
        }
        self.pending_reflection = Some(session.id.clone());
        session
    }

    /// Attaches the user's reflection to the pending session. Returns false
    /// if no reflection was pending.
    pub fn submit_reflection(
        &mut self,
        db: &Database,
        mut reflection: Reflection,
    ) -> Result<bool, DatabaseError> {
        let Some(id) = self.pending_reflection.take() else {
            return Ok(false);
        };
        reflection.productivity = reflection.productivity.clamp(1, 5);
        Self::apply_reflection(db, &id, &reflection)
    }

    /// Closes the prompt with a neutral rating.
    pub fn skip_reflection(&mut self, db: &Database) -> Result<bool, DatabaseError> {
        self.submit_reflection(db, Reflection::skipped())
    }

    /// Patches the session with `id` in the latest stored list.
    pub fn apply_reflection(
        db: &Database,
        id: &str,
        reflection: &Reflection,
    ) -> Result<bool, DatabaseError> {
        let found = db.modify(STUDY_SESSIONS, |sessions: &mut Vec<StudySession>| {
            match sessions.iter_mut().find(|s| s.id == id) {
                Some(session) => {
                    session.apply_reflection(reflection);
                    true
                }
                None => false,
            }
        })?;
        if !found {
            warn!("Session {} no longer exists; reflection dropped", id);
        }
        Ok(found)
    }

    /// Totals for the completed work sessions of `today`.
    pub fn today_summary(db: &Database, today: NaiveDate) -> Result<DailyStats, DatabaseError> {
        Ok(DailyStats::from_sessions(today, &db.load_sessions()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Local, TimeZone, Utc};

    fn completion(phase: TimerPhase, minutes: u32, at: DateTime<Utc>) -> PhaseCompletion {
        PhaseCompletion {
            phase,
            duration_minutes: minutes,
            goal: "Statistics".into(),
            completed_at: at,
            next_phase: match phase {
                TimerPhase::Work => TimerPhase::Break,
                TimerPhase::Break => TimerPhase::Work,
            },
            next_duration_minutes: 5,
            is_long_break: false,
            sessions_completed_in_cycle: 1,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn at(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, d, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_work_session_updates_stats() {
        let db = Database::new_in_memory().unwrap();
        let mut recorder = SessionRecorder::new();

        let session = recorder.record(&db, &completion(TimerPhase::Work, 25, at(1)), day(1));
        assert!(session.completed);
        assert_eq!(session.goal, "Statistics");
        assert_eq!(session.productivity, None);
        assert_eq!(recorder.pending_reflection(), Some(session.id.as_str()));

        let stats = db.load_stats().unwrap();
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.total_minutes, 25);
        assert_eq!(stats.streak, 1);
        assert_eq!(stats.last_session_date, Some(day(1)));
        assert_eq!(db.load_sessions().unwrap(), vec![session]);
    }

    #[test]
    fn test_stats_updated_when_session_list_unreadable() {
        let db = Database::new_in_memory().unwrap();
        db.put(STUDY_SESSIONS, "not a session list").unwrap();
        let mut recorder = SessionRecorder::new();

        let session = recorder.record(&db, &completion(TimerPhase::Work, 25, at(1)), day(1));

        let stats = db.load_stats().unwrap();
        assert_eq!(stats.total_sessions, 1);
        assert_eq!(stats.total_minutes, 25);
        assert_eq!(recorder.pending_reflection(), Some(session.id.as_str()));
        assert!(db.load_sessions().is_err());
    }

    #[test]
    fn test_session_stored_when_stats_unreadable() {
        let db = Database::new_in_memory().unwrap();
        db.put(SESSION_STATS, "not stats").unwrap();
        let mut recorder = SessionRecorder::new();

        let session = recorder.record(&db, &completion(TimerPhase::Work, 25, at(1)), day(1));

        assert_eq!(db.load_sessions().unwrap(), vec![session.clone()]);
        assert_eq!(recorder.pending_reflection(), Some(session.id.as_str()));
    }

    #[test]
    fn test_break_session_leaves_stats() {
        let db = Database::new_in_memory().unwrap();
        let mut recorder = SessionRecorder::new();

        recorder
            .record(&db, &completion(TimerPhase::Break, 5, at(1)), day(1));
        assert_eq!(db.load_sessions().unwrap().len(), 1);
        assert_eq!(db.load_stats().unwrap(), SessionStats::default());
        assert!(recorder.pending_reflection().is_none());
    }

    #[test]
    fn test_streak_across_days() {
        let db = Database::new_in_memory().unwrap();
        let mut recorder = SessionRecorder::new();
        for d in [1, 2, 2, 3] {
            recorder
                .record(&db, &completion(TimerPhase::Work, 25, at(d)), day(d));
        }
        assert_eq!(db.load_stats().unwrap().streak, 4);

        recorder
            .record(&db, &completion(TimerPhase::Work, 25, at(6)), day(6));
        let stats = db.load_stats().unwrap();
        assert_eq!(stats.streak, 1);
        assert_eq!(stats.best_streak, 4);
        assert_eq!(stats.total_minutes, 125);
    }

    #[test]
    fn test_reflection_patches_by_id() {
        let db = Database::new_in_memory().unwrap();
        let mut recorder = SessionRecorder::new();

        let work = recorder.record(&db, &completion(TimerPhase::Work, 25, at(1)), day(1));
        // A break lands in the list before the user answers.
        recorder
            .record(&db, &completion(TimerPhase::Break, 5, at(1)), day(1));

        let submitted = recorder
            .submit_reflection(
                &db,
                Reflection {
                    productivity: 5,
                    notes: "Finished the problem set".into(),
                    achievements: vec!["Q1-Q8".into()],
                    challenges: String::new(),
                },
            )
            .unwrap();
        assert!(submitted);
        assert!(recorder.pending_reflection().is_none());

        let sessions = db.load_sessions().unwrap();
        assert_eq!(sessions.len(), 2);
        let patched = sessions.iter().find(|s| s.id == work.id).unwrap();
        assert_eq!(patched.productivity, Some(5));
        assert_eq!(patched.notes, "Finished the problem set");
        assert_eq!(sessions[1].productivity, None);
    }

    #[test]
    fn test_skip_reflection_is_neutral() {
        let db = Database::new_in_memory().unwrap();
        let mut recorder = SessionRecorder::new();
        recorder
            .record(&db, &completion(TimerPhase::Work, 25, at(1)), day(1));

        assert!(recorder.skip_reflection(&db).unwrap());
        assert_eq!(db.load_sessions().unwrap()[0].productivity, Some(3));
        assert!(!recorder.skip_reflection(&db).unwrap());
    }

    #[test]
    fn test_productivity_clamped() {
        let db = Database::new_in_memory().unwrap();
        let mut recorder = SessionRecorder::new();
        recorder
            .record(&db, &completion(TimerPhase::Work, 25, at(1)), day(1));
        recorder
            .submit_reflection(
                &db,
                Reflection {
                    productivity: 9,
                    ..Reflection::default()
                },
            )
            .unwrap();
        assert_eq!(db.load_sessions().unwrap()[0].productivity, Some(5));
    }

    #[test]
    fn test_reflection_for_missing_session() {
        let db = Database::new_in_memory().unwrap();
        assert!(!SessionRecorder::apply_reflection(&db, "gone", &Reflection::skipped()).unwrap());
    }

    #[test]
    fn test_today_summary() {
        let db = Database::new_in_memory().unwrap();
        let mut recorder = SessionRecorder::new();
        let now = Utc::now();
        let today = now.with_timezone(&Local).date_naive();

        recorder
            .record(&db, &completion(TimerPhase::Work, 25, now), today);
        recorder
            .record(&db, &completion(TimerPhase::Break, 5, now), today);
        recorder
            .record(&db, &completion(TimerPhase::Work, 40, now), today);

        let summary = SessionRecorder::today_summary(&db, today).unwrap();
        assert_eq!(summary.completed_sessions, 2);
        assert_eq!(summary.total_focus_minutes, 65);
    }
}
