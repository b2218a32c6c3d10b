//! SQLite persistence for preferences, sessions, statistics and goals.
//!
//! Each record is a JSON document stored under a fixed key in a single
//! key-value table.

use crate::machine::TimerSnapshot;
use crate::models::{ScheduledGoal, SessionStats, StudyPreferences, StudySession};
use directories::ProjectDirs;
use log::info;
use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Current layout version, kept in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 1;

/// Environment variable overriding the database location.
pub const DB_PATH_ENV: &str = "STUDYTIMER_DB";

pub const STUDY_SESSIONS: &str = "studySessions";
pub const SESSION_STATS: &str = "sessionStats";
pub const SCHEDULED_GOALS: &str = "scheduledGoals";
pub const STUDY_PREFERENCES: &str = "studyPreferences";
pub const TIMER_STATE: &str = "timerState";

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to create database directory")]
    DirectoryCreation,
    #[error("Database schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: i32, supported: i32 },
}

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens the database at the platform data directory, or at
    /// `STUDYTIMER_DB` when set.
    pub fn new() -> Result<Self, DatabaseError> {
        Self::open(&Self::db_path())
    }

    /// Opens (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|_| DatabaseError::DirectoryCreation)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::migrate(&conn)?;
        info!("Opened database at {}", path.display());
        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing).
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        Self::migrate(&conn)?;
        Ok(Self { conn })
    }

    fn migrate(conn: &Connection) -> Result<(), DatabaseError> {
        let found: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if found > SCHEMA_VERSION {
            return Err(DatabaseError::UnsupportedSchema {
                found,
                supported: SCHEMA_VERSION,
            });
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
        "#,
        )?;

        if found < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            info!("Upgraded database schema from {} to {}", found, SCHEMA_VERSION);
        }
        Ok(())
    }

    fn db_path() -> PathBuf {
        if let Some(path) = std::env::var_os(DB_PATH_ENV) {
            return PathBuf::from(path);
        }
        ProjectDirs::from("com", "studytimer", "StudyTimer")
            .map(|dirs| dirs.data_dir().join("studytimer.db"))
            .unwrap_or_else(|| PathBuf::from("studytimer.db"))
    }

    /// Reads and decodes the document stored under `key`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, DatabaseError> {
        let json: Option<String> = self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?", [key], |row| row.get(0))
            .optional()?;

        match json {
            Some(j) => Ok(Some(serde_json::from_str(&j)?)),
            None => Ok(None),
        }
    }

    /// Encodes and stores `value` under `key`, replacing any previous value.
    pub fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), DatabaseError> {
        let json = serde_json::to_string(value)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?, ?)",
            [key, json.as_str()],
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub fn remove(&self, key: &str) -> Result<(), DatabaseError> {
        self.conn.execute("DELETE FROM kv WHERE key = ?", [key])?;
        Ok(())
    }

    /// Reads the document under `key`, lets `f` change it and writes it
    /// back, all inside one transaction.
    pub fn modify<T, R, F>(&self, key: &str, f: F) -> Result<R, DatabaseError>
    where
        T: DeserializeOwned + Serialize + Default,
        F: FnOnce(&mut T) -> R,
    {
        let tx = self.conn.unchecked_transaction()?;
        let mut value: T = self.get(key)?.unwrap_or_default();
        let result = f(&mut value);
        self.put(key, &value)?;
        tx.commit()?;
        Ok(result)
    }

    /// Loads preferences, returning defaults if none were saved.
    pub fn load_preferences(&self) -> Result<StudyPreferences, DatabaseError> {
        Ok(self.get(STUDY_PREFERENCES)?.unwrap_or_default())
    }

    pub fn save_preferences(&self, prefs: &StudyPreferences) -> Result<(), DatabaseError> {
        self.put(STUDY_PREFERENCES, prefs)
    }

    pub fn load_sessions(&self) -> Result<Vec<StudySession>, DatabaseError> {
        Ok(self.get(STUDY_SESSIONS)?.unwrap_or_default())
    }

    pub fn load_stats(&self) -> Result<SessionStats, DatabaseError> {
        Ok(self.get(SESSION_STATS)?.unwrap_or_default())
    }

    pub fn load_goals(&self) -> Result<Vec<ScheduledGoal>, DatabaseError> {
        Ok(self.get(SCHEDULED_GOALS)?.unwrap_or_default())
    }

    pub fn load_timer_state(&self) -> Result<Option<TimerSnapshot>, DatabaseError> {
        self.get(TIMER_STATE)
    }

    pub fn save_timer_state(&self, snapshot: &TimerSnapshot) -> Result<(), DatabaseError> {
        self.put(TIMER_STATE, snapshot)
    }
}
