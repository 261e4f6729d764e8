//! # Session Manager
//!
//! Registry of active live sessions. Each simulation owns its controller;
//! the manager only tracks handles, enforces the concurrency cap, and routes
//! stop/status requests from the HTTP layer to the right session.

use crate::error::{AppError, AppResult};
use crate::session::controller::SessionHandle;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    max_concurrent: usize,
}

impl SessionManager {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_concurrent,
        }
    }

    /// Cheap pre-flight used before any device or transport resource is
    /// acquired, so an obviously full registry rejects without touching
    /// hardware. [`Self::register`] re-checks under the write lock and is
    /// the authoritative enforcement.
    pub fn ensure_capacity(&self) -> AppResult<()> {
        let active = self.active_count();
        if active >= self.max_concurrent {
            return Err(AppError::BadRequest(format!(
                "session limit reached ({} active, max {})",
                active, self.max_concurrent
            )));
        }
        Ok(())
    }

    /// Register a freshly started session, enforcing the concurrency cap
    /// atomically under the write lock. Two racing starts with one slot
    /// free resolve here: exactly one registers, the other gets its handle
    /// back in `Err` so the caller can stop the session it started.
    pub fn register(&self, handle: SessionHandle) -> Result<Arc<SessionHandle>, SessionHandle> {
        let mut sessions = self.sessions.write().unwrap();

        // Sessions the agent closed remotely linger here until someone
        // touches the map again; sweep them out on every insert
        let before = sessions.len();
        sessions.retain(|_, existing| !existing.is_closed());
        if sessions.len() < before {
            debug!(swept = before - sessions.len(), "Swept remotely closed sessions");
        }

        if sessions.len() >= self.max_concurrent {
            warn!(
                session_id = %handle.session_id,
                active = sessions.len(),
                max = self.max_concurrent,
                "Session limit reached, rejecting registration"
            );
            return Err(handle);
        }

        let handle = Arc::new(handle);
        sessions.insert(handle.session_id.clone(), handle.clone());
        info!(
            session_id = %handle.session_id,
            active = sessions.len(),
            "Session registered"
        );
        Ok(handle)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.read().unwrap().get(session_id).cloned()
    }

    /// Remove a session from the registry, returning its handle so the caller
    /// can drive the actual stop outside the lock.
    pub fn remove(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        let removed = self.sessions.write().unwrap().remove(session_id);
        if removed.is_some() {
            info!(session_id, "Session deregistered");
        }
        removed
    }

    /// Number of sessions that are registered and not yet closed.
    pub fn active_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap()
            .values()
            .filter(|handle| !handle.is_closed())
            .count()
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.sessions
            .read()
            .unwrap()
            .values()
            .filter(|handle| !handle.is_closed())
            .map(|handle| handle.session_id.clone())
            .collect()
    }

    /// Drain every registered session for graceful shutdown.
    pub fn drain(&self) -> Vec<Arc<SessionHandle>> {
        let mut sessions = self.sessions.write().unwrap();
        sessions.drain().map(|(_, handle)| handle).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_enforces_cap_under_one_lock() {
        let manager = SessionManager::new(1);

        // Two starts race for the last slot: both pre-flights pass because
        // neither session is registered yet
        assert!(manager.ensure_capacity().is_ok());
        assert!(manager.ensure_capacity().is_ok());

        let (first, _first_events) = SessionHandle::detached("s1");
        let (second, _second_events) = SessionHandle::detached("s2");

        assert!(manager.register(first).is_ok());
        // The loser gets its handle back instead of a slot
        let rejected = manager.register(second).expect_err("cap breached");
        assert_eq!(rejected.session_id, "s2");
        assert_eq!(manager.active_count(), 1);
        assert!(manager.get("s2").is_none());
    }

    #[test]
    fn test_closed_sessions_free_their_slot() {
        let manager = SessionManager::new(1);

        let (first, first_events) = SessionHandle::detached("s1");
        assert!(manager.register(first).is_ok());
        assert!(manager.ensure_capacity().is_err());

        // Worker gone: the next registration sweeps the dead entry
        drop(first_events);
        let (second, _second_events) = SessionHandle::detached("s2");
        assert!(manager.register(second).is_ok());
        assert_eq!(manager.active_count(), 1);
        assert!(manager.get("s1").is_none());
    }

    #[test]
    fn test_remove_returns_handle_once() {
        let manager = SessionManager::new(2);
        let (handle, _events) = SessionHandle::detached("s1");
        manager.register(handle).unwrap();

        assert!(manager.remove("s1").is_some());
        assert!(manager.remove("s1").is_none());
        assert_eq!(manager.active_count(), 0);
    }
}
