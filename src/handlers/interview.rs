//! # Interview Session Handlers
//!
//! HTTP surface for the mock-interview simulator: start and stop live
//! sessions, query their status, read a user's interview history with
//! aggregate statistics, and poll the real-time confidence mock.

use crate::audio::capture::Microphone;
use crate::audio::output::DeviceSink;
use crate::audio::playback::PlaybackScheduler;
use crate::coaching::StoredSession;
use crate::error::AppError;
use crate::session::{start_session, SessionDeps};
use crate::state::AppState;
use crate::transport::AgentTransport;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Interview fields the simulator supports.
pub const INTERVIEW_FIELDS: &[&str] = &[
    "Software Engineering",
    "Data Science",
    "Product Management",
    "AI & ML",
    "Cloud & DevOps",
];

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub user_id: String,
    pub field: String,
}

#[derive(Serialize)]
struct StartSessionResponse {
    session_id: String,
    state: &'static str,
    started_at: String,
}

/// POST /interview/session: start a live mock interview.
///
/// Acquires the output device, microphone, and agent transport in order; a
/// failure at any step releases what was already acquired and returns the
/// error, leaving no session behind.
pub async fn start_interview(
    state: web::Data<AppState>,
    body: web::Json<StartSessionRequest>,
) -> Result<HttpResponse, AppError> {
    let request = body.into_inner();
    if request.user_id.trim().is_empty() {
        return Err(AppError::ValidationError("user_id cannot be empty".to_string()));
    }
    if !INTERVIEW_FIELDS.contains(&request.field.as_str()) {
        return Err(AppError::ValidationError(format!(
            "unknown interview field '{}', expected one of: {}",
            request.field,
            INTERVIEW_FIELDS.join(", ")
        )));
    }

    state.sessions.ensure_capacity()?;
    let config = state.get_config();

    let (ended_tx, ended_rx) = mpsc::unbounded_channel();
    let sink = DeviceSink::spawn(config.audio.playback_sample_rate, ended_tx)?;
    let scheduler = PlaybackScheduler::new(Box::new(sink), config.audio.playback_sample_rate);

    let deps = SessionDeps {
        capture: Box::new(Microphone::new(
            config.audio.capture_sample_rate,
            config.audio.capture_block_size,
        )),
        transport: Box::new(AgentTransport::new(config.upstream.clone())),
        scheduler,
        playback_ended: ended_rx,
        feedback: state.feedback.clone(),
        store: state.store.clone(),
        analyzer: state.analyzer.clone(),
    };

    let session_id = Uuid::new_v4().to_string();
    let handle = start_session(session_id, request.user_id, request.field, deps).await?;
    let handle = match state.sessions.register(handle) {
        Ok(handle) => handle,
        Err(rejected) => {
            // Lost a race for the last slot; undo the start we just did
            rejected.stop().await;
            return Err(AppError::BadRequest(format!(
                "session limit reached (max {})",
                config.performance.max_concurrent_sessions
            )));
        }
    };

    Ok(HttpResponse::Created().json(StartSessionResponse {
        session_id: handle.session_id.clone(),
        state: "streaming",
        started_at: handle.created_at.to_rfc3339(),
    }))
}

/// DELETE /interview/session/{id}: stop a session and return its feedback.
pub async fn stop_interview(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    let handle = state
        .sessions
        .remove(&session_id)
        .ok_or_else(|| AppError::NotFound(format!("no session with id {}", session_id)))?;

    // None when the agent already closed the session remotely; stop is
    // still safe and the response just carries no feedback
    let feedback = handle.stop().await;

    Ok(HttpResponse::Ok().json(json!({
        "session_id": session_id,
        "state": "closed",
        "feedback": feedback,
    })))
}

/// GET /interview/session/{id}: live status of one session.
pub async fn session_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session_id = path.into_inner();
    let handle = state
        .sessions
        .get(&session_id)
        .ok_or_else(|| AppError::NotFound(format!("no session with id {}", session_id)))?;

    Ok(HttpResponse::Ok().json(handle.snapshot().await))
}

#[derive(Serialize)]
struct HistoryResponse {
    user_id: String,
    session_count: usize,
    average_score: f64,
    peak_score: u32,
    fields_practiced: usize,
    sessions: Vec<StoredSession>,
}

/// GET /interview/history/{user_id}: archived sessions plus aggregates.
pub async fn interview_history(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    let sessions = state.store.get_history(&user_id)?;
    let (average_score, peak_score, fields_practiced) = history_aggregates(&sessions);

    Ok(HttpResponse::Ok().json(HistoryResponse {
        user_id,
        session_count: sessions.len(),
        average_score,
        peak_score,
        fields_practiced,
        sessions,
    }))
}

/// GET /interview/confidence: real-time speech-confidence poll.
pub async fn realtime_confidence(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "confidence": state.analyzer.get_realtime_confidence(),
        "analyzing": state.analyzer.is_analyzing(),
    }))
}

/// GET /interview/fields: the supported interview fields.
pub async fn interview_fields() -> HttpResponse {
    HttpResponse::Ok().json(INTERVIEW_FIELDS)
}

/// Average score, peak score, and count of distinct fields practiced.
fn history_aggregates(sessions: &[StoredSession]) -> (f64, u32, usize) {
    if sessions.is_empty() {
        return (0.0, 0, 0);
    }

    let total: u64 = sessions.iter().map(|s| s.feedback.score as u64).sum();
    let average = total as f64 / sessions.len() as f64;
    let peak = sessions.iter().map(|s| s.feedback.score).max().unwrap_or(0);

    let mut fields: Vec<&str> = sessions.iter().map(|s| s.field.as_str()).collect();
    fields.sort_unstable();
    fields.dedup();

    (average, peak, fields.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coaching::InterviewFeedback;
    use chrono::Utc;

    fn session(field: &str, score: u32) -> StoredSession {
        StoredSession {
            id: Uuid::new_v4(),
            user_id: "alice".to_string(),
            date: Utc::now(),
            field: field.to_string(),
            feedback: InterviewFeedback {
                score,
                clarity: 80,
                relevance: 75,
                suggestions: vec![],
            },
        }
    }

    #[test]
    fn test_history_aggregates() {
        let sessions = vec![
            session("Data Science", 60),
            session("Data Science", 90),
            session("AI & ML", 75),
        ];
        let (average, peak, fields) = history_aggregates(&sessions);
        assert_eq!(average, 75.0);
        assert_eq!(peak, 90);
        assert_eq!(fields, 2);
    }

    #[test]
    fn test_empty_history_aggregates() {
        assert_eq!(history_aggregates(&[]), (0.0, 0, 0));
    }

    #[test]
    fn test_field_list_covers_known_fields() {
        assert!(INTERVIEW_FIELDS.contains(&"Software Engineering"));
        assert_eq!(INTERVIEW_FIELDS.len(), 5);
    }
}
