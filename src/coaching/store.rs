//! # Interview Session Store
//!
//! Append-only persistence for completed interview sessions, keyed by user.
//! Backed by a single JSON file, which mirrors the durability level of the
//! product this backend replaced; persistence durability is explicitly not a
//! goal.

use crate::coaching::feedback::InterviewFeedback;
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// One archived interview session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSession {
    pub id: Uuid,
    pub user_id: String,
    pub date: DateTime<Utc>,
    /// Interview field the session ran in, e.g. "Software Engineering"
    pub field: String,
    #[serde(flatten)]
    pub feedback: InterviewFeedback,
}

/// Collaborator seam for session persistence.
pub trait SessionStore: Send + Sync {
    /// Append one completed session for `user_id`.
    fn save_session(
        &self,
        user_id: &str,
        field: &str,
        feedback: InterviewFeedback,
    ) -> AppResult<StoredSession>;

    /// All sessions recorded for `user_id`, oldest first.
    fn get_history(&self, user_id: &str) -> AppResult<Vec<StoredSession>>;
}

/// JSON-file backed store.
///
/// The whole record list is kept in memory behind a lock and rewritten on
/// every append. Loading tolerates a missing file (fresh store) but surfaces
/// corrupt content as a configuration error.
pub struct JsonFileStore {
    path: PathBuf,
    records: RwLock<Vec<StoredSession>>,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        let records = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                AppError::ConfigError(format!(
                    "corrupt session store at {}: {}",
                    path.display(),
                    e
                ))
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                return Err(AppError::Internal(format!(
                    "cannot read session store {}: {}",
                    path.display(),
                    err
                )))
            }
        };

        info!(path = %path.display(), "Session store opened");
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    fn persist(&self, records: &[StoredSession]) -> AppResult<()> {
        let contents = serde_json::to_string_pretty(records)
            .map_err(|e| AppError::Internal(format!("cannot serialize session store: {}", e)))?;
        std::fs::write(&self.path, contents).map_err(|e| {
            AppError::Internal(format!(
                "cannot write session store {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

impl SessionStore for JsonFileStore {
    fn save_session(
        &self,
        user_id: &str,
        field: &str,
        feedback: InterviewFeedback,
    ) -> AppResult<StoredSession> {
        let record = StoredSession {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            date: Utc::now(),
            field: field.to_string(),
            feedback,
        };

        let mut records = self.records.write().unwrap();
        records.push(record.clone());

        if let Err(err) = self.persist(&records) {
            // Keep the in-memory record; history still serves it this run
            warn!("Session persisted in memory only: {}", err);
        }

        info!(user_id, session_id = %record.id, "Interview session saved");
        Ok(record)
    }

    fn get_history(&self, user_id: &str) -> AppResult<Vec<StoredSession>> {
        let records = self.records.read().unwrap();
        Ok(records
            .iter()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (JsonFileStore, PathBuf) {
        let path = std::env::temp_dir().join(format!("sessions-{}.json", Uuid::new_v4()));
        (JsonFileStore::open(&path).unwrap(), path)
    }

    fn feedback(score: u32) -> InterviewFeedback {
        InterviewFeedback {
            score,
            clarity: 80,
            relevance: 75,
            suggestions: vec!["Practice system design questions.".to_string()],
        }
    }

    #[test]
    fn test_append_and_filter_by_user() {
        let (store, path) = temp_store();

        store.save_session("alice", "Data Science", feedback(70)).unwrap();
        store.save_session("bob", "AI & ML", feedback(90)).unwrap();
        store.save_session("alice", "Data Science", feedback(85)).unwrap();

        let history = store.get_history("alice").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].feedback.score, 70);
        assert_eq!(history[1].feedback.score, 85);
        assert!(store.get_history("carol").unwrap().is_empty());

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_records_survive_reopen() {
        let (store, path) = temp_store();
        store
            .save_session("alice", "Cloud & DevOps", feedback(88))
            .unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).unwrap();
        let history = reopened.get_history("alice").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].field, "Cloud & DevOps");
        assert_eq!(history[0].feedback.score, 88);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_corrupt_store_is_rejected() {
        let path = std::env::temp_dir().join(format!("sessions-{}.json", Uuid::new_v4()));
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            JsonFileStore::open(&path),
            Err(AppError::ConfigError(_))
        ));
        let _ = std::fs::remove_file(path);
    }
}
