//! Bridge attempt history
//!
//! Every nudge delivery attempt is recorded so processing statistics can show
//! what actually happened. `SqliteBridgeHistory` persists across restarts;
//! `MemoryBridgeHistory` keeps the newest attempts per child in memory.

use crate::error::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BridgeAttempt {
    pub request_id: String,
    pub child_id: String,
    pub target_topic: String,
    pub urgency: String,
    pub success: bool,
    pub attempt_number: u32,
    pub processing_ms: f64,
    pub failure_reason: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

pub trait BridgeHistory: Send + Sync {
    fn record_attempt(&self, attempt: &BridgeAttempt) -> Result<()>;

    /// Most recent attempts for a child, newest first
    fn recent_attempts(&self, child_id: &str, limit: usize) -> Result<Vec<BridgeAttempt>>;

    fn clear_child(&self, child_id: &str) -> Result<()>;
}

// ============ In-Memory History ============

/// Attempts kept per child by the in-memory store
pub const MEMORY_ATTEMPTS_PER_CHILD: usize = 50;

/// Newest attempts per child, oldest evicted first
pub struct MemoryBridgeHistory {
    per_child: usize,
    attempts: Mutex<HashMap<String, VecDeque<BridgeAttempt>>>,
}

impl Default for MemoryBridgeHistory {
    fn default() -> Self {
        Self::with_capacity_per_child(MEMORY_ATTEMPTS_PER_CHILD)
    }
}

impl MemoryBridgeHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity_per_child(per_child: usize) -> Self {
        Self {
            per_child: per_child.max(1),
            attempts: Mutex::new(HashMap::new()),
        }
    }
}

impl BridgeHistory for MemoryBridgeHistory {
    fn record_attempt(&self, attempt: &BridgeAttempt) -> Result<()> {
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        let log = attempts.entry(attempt.child_id.clone()).or_default();
        log.push_back(attempt.clone());
        while log.len() > self.per_child {
            log.pop_front();
        }
        Ok(())
    }

    fn recent_attempts(&self, child_id: &str, limit: usize) -> Result<Vec<BridgeAttempt>> {
        let attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(attempts
            .get(child_id)
            .map(|log| log.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn clear_child(&self, child_id: &str) -> Result<()> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(child_id);
        Ok(())
    }
}

// ============ SQLite History ============

pub struct SqliteBridgeHistory {
    conn: Mutex<Connection>,
}

impl SqliteBridgeHistory {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            -- One row per nudge delivery attempt
            CREATE TABLE IF NOT EXISTS bridge_attempts (
                id INTEGER PRIMARY KEY,
                request_id TEXT NOT NULL,
                child_id TEXT NOT NULL,
                target_topic TEXT NOT NULL,
                urgency TEXT NOT NULL,
                success INTEGER NOT NULL,
                attempt_number INTEGER NOT NULL,
                processing_ms REAL NOT NULL,
                failure_reason TEXT,
                attempted_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_bridge_attempts_child
                ON bridge_attempts(child_id, attempted_at);
            ",
        )?;

        Ok(Self { conn: Mutex::new(conn) })
    }

    fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&conn)?)
    }
}

impl BridgeHistory for SqliteBridgeHistory {
    fn record_attempt(&self, attempt: &BridgeAttempt) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO bridge_attempts
                 (request_id, child_id, target_topic, urgency, success, attempt_number, processing_ms, failure_reason, attempted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    attempt.request_id,
                    attempt.child_id,
                    attempt.target_topic,
                    attempt.urgency,
                    attempt.success,
                    attempt.attempt_number,
                    attempt.processing_ms,
                    attempt.failure_reason,
                    attempt.attempted_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                ],
            )?;
            Ok(())
        })
    }

    fn recent_attempts(&self, child_id: &str, limit: usize) -> Result<Vec<BridgeAttempt>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT request_id, child_id, target_topic, urgency, success, attempt_number,
                        processing_ms, failure_reason, attempted_at
                 FROM bridge_attempts WHERE child_id = ?1
                 ORDER BY attempted_at DESC, id DESC LIMIT ?2",
            )?;

            let attempts = stmt.query_map(params![child_id, limit as i64], |row| {
                let attempted_at: String = row.get(8)?;
                let attempted_at = DateTime::parse_from_rfc3339(&attempted_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
                    })?;
                Ok(BridgeAttempt {
                    request_id: row.get(0)?,
                    child_id: row.get(1)?,
                    target_topic: row.get(2)?,
                    urgency: row.get(3)?,
                    success: row.get(4)?,
                    attempt_number: row.get(5)?,
                    processing_ms: row.get(6)?,
                    failure_reason: row.get(7)?,
                    attempted_at,
                })
            })?;

            attempts.collect()
        })
    }

    fn clear_child(&self, child_id: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM bridge_attempts WHERE child_id = ?1", params![child_id])?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(child_id: &str, request_id: &str, success: bool, minutes_ago: i64) -> BridgeAttempt {
        BridgeAttempt {
            request_id: request_id.to_string(),
            child_id: child_id.to_string(),
            target_topic: "school".to_string(),
            urgency: "medium".to_string(),
            success,
            attempt_number: 1,
            processing_ms: 12.5,
            failure_reason: if success { None } else { Some("declined".to_string()) },
            attempted_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
        }
    }

    fn exercise(history: &dyn BridgeHistory) {
        history.record_attempt(&attempt("a", "r1", true, 10)).unwrap();
        history.record_attempt(&attempt("a", "r2", false, 5)).unwrap();
        history.record_attempt(&attempt("b", "r3", true, 1)).unwrap();

        let recent = history.recent_attempts("a", 10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].request_id, "r2");
        assert_eq!(recent[0].failure_reason.as_deref(), Some("declined"));

        assert_eq!(history.recent_attempts("a", 1).unwrap().len(), 1);

        history.clear_child("a").unwrap();
        assert!(history.recent_attempts("a", 10).unwrap().is_empty());
        assert_eq!(history.recent_attempts("b", 10).unwrap().len(), 1);
    }

    #[test]
    fn memory_history_roundtrip() {
        exercise(&MemoryBridgeHistory::new());
    }

    #[test]
    fn memory_history_evicts_oldest_per_child() {
        let history = MemoryBridgeHistory::with_capacity_per_child(3);
        for i in 0..5 {
            history.record_attempt(&attempt("a", &format!("r{}", i), true, 10 - i)).unwrap();
        }
        history.record_attempt(&attempt("b", "other", true, 0)).unwrap();

        let recent = history.recent_attempts("a", 10).unwrap();
        let ids: Vec<&str> = recent.iter().map(|a| a.request_id.as_str()).collect();
        assert_eq!(ids, vec!["r4", "r3", "r2"]);
        assert_eq!(history.recent_attempts("b", 10).unwrap().len(), 1);
    }

    #[test]
    fn sqlite_history_roundtrip() {
        exercise(&SqliteBridgeHistory::open_in_memory().unwrap());
    }

    #[test]
    fn sqlite_history_persists_to_file() {
        let path = std::env::temp_dir().join(format!("tandem-history-{}.db", uuid::Uuid::new_v4()));
        {
            let history = SqliteBridgeHistory::open(&path).unwrap();
            history.record_attempt(&attempt("a", "r1", true, 0)).unwrap();
        }
        let reopened = SqliteBridgeHistory::open(&path).unwrap();
        assert_eq!(reopened.recent_attempts("a", 5).unwrap().len(), 1);
        let _ = std::fs::remove_file(&path);
    }
}
