//! # Live Session Core
//!
//! The real-time mock-interview session: controller state machine plus the
//! registry that tracks concurrently running sessions.

pub mod controller;
pub mod manager;

pub use controller::{start_session, SessionDeps, SessionHandle, SessionSnapshot, SessionState};
pub use manager::SessionManager;
