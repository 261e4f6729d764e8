//! # Coaching Collaborators
//!
//! External collaborators consumed by the live session core: post-session
//! transcript analysis, append-only session history, and the behavioral
//! analyzer mock polled by the UI.

pub mod behavioral;
pub mod feedback;
pub mod store;

pub use behavioral::BehavioralAnalyzer;
pub use feedback::{FeedbackService, InterviewFeedback, PLACEHOLDER_TRANSCRIPT};
pub use store::{SessionStore, StoredSession};
