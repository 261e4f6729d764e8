pub mod config;
pub mod interview;

pub use config::{get_config, update_config};
pub use interview::{
    interview_fields, interview_history, realtime_confidence, session_status, start_interview,
    stop_interview,
};
