//! # Post-Session Feedback Service
//!
//! Analyzes an interview transcript with a generative model and returns a
//! structured performance review. Called exactly once per session, on
//! explicit stop.
//!
//! Real transcript capture is out of scope; the session controller passes a
//! fixed placeholder transcript, matching the product behavior this backend
//! replaced.

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

/// Transcript handed to the analyzer until real transcript capture lands.
pub const PLACEHOLDER_TRANSCRIPT: &str =
    "Detailed session transcript from the Live interaction.";

/// Structured interview performance review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewFeedback {
    /// Global score, 0-100
    pub score: u32,
    /// Confidence/clarity score, 0-100
    pub clarity: u32,
    /// Technical depth/relevance score, 0-100
    pub relevance: u32,
    /// Concrete improvement suggestions
    pub suggestions: Vec<String>,
}

/// Collaborator seam for transcript analysis.
#[async_trait]
pub trait FeedbackService: Send + Sync {
    async fn analyze_transcript(&self, transcript: &str) -> AppResult<InterviewFeedback>;
}

/// Generative-API backed analyzer.
///
/// Sends the transcript with a JSON response schema so the model answers in
/// the exact [`InterviewFeedback`] shape.
pub struct GenerativeFeedbackClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl GenerativeFeedbackClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        )
    }
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Option<Vec<CandidatePart>>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    fn first_text(self) -> Option<String> {
        self.candidates?
            .into_iter()
            .next()?
            .content?
            .parts?
            .into_iter()
            .find_map(|part| part.text)
    }
}

#[async_trait]
impl FeedbackService for GenerativeFeedbackClient {
    async fn analyze_transcript(&self, transcript: &str) -> AppResult<InterviewFeedback> {
        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [{
                    "text": format!("Analyze this interview transcript:\n\n{}", transcript)
                }]
            }],
            "generationConfig": {
                "maxOutputTokens": 4096,
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "score": {"type": "NUMBER"},
                        "clarity": {"type": "NUMBER"},
                        "relevance": {"type": "NUMBER"},
                        "suggestions": {"type": "ARRAY", "items": {"type": "STRING"}}
                    },
                    "required": ["score", "clarity", "relevance", "suggestions"]
                }
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| AppError::Internal(format!("feedback API error: {}", e)))?
            .json::<GenerateContentResponse>()
            .await?;

        let text = response
            .first_text()
            .ok_or_else(|| AppError::Internal("feedback API returned no content".to_string()))?;

        let feedback: InterviewFeedback = serde_json::from_str(&text)
            .map_err(|e| AppError::Internal(format!("unparseable feedback payload: {}", e)))?;

        info!(score = feedback.score, "Transcript analysis complete");
        Ok(feedback)
    }
}

/// Offline analyzer used when no API key is configured. Returns a fixed
/// review so the rest of the pipeline (persistence, history aggregates)
/// still works in development.
pub struct CannedFeedback;

#[async_trait]
impl FeedbackService for CannedFeedback {
    async fn analyze_transcript(&self, _transcript: &str) -> AppResult<InterviewFeedback> {
        Ok(InterviewFeedback {
            score: 78,
            clarity: 82,
            relevance: 74,
            suggestions: vec![
                "Quantify the impact of past projects with concrete metrics.".to_string(),
                "Pause briefly before answering high-stakes follow-ups.".to_string(),
                "Close each answer by tying it back to the role.".to_string(),
            ],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_deserializes_from_model_output() {
        let text = r#"{"score": 85, "clarity": 90, "relevance": 80, "suggestions": ["Be concise"]}"#;
        let feedback: InterviewFeedback = serde_json::from_str(text).unwrap();
        assert_eq!(feedback.score, 85);
        assert_eq!(feedback.suggestions, vec!["Be concise".to_string()]);
    }

    #[test]
    fn test_response_first_text_navigates_nesting() {
        let json = r#"{
            "candidates": [{"content": {"parts": [{"text": "{\"score\":1}"}]}}]
        }"#;
        let response: GenerateContentResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.first_text().unwrap(), "{\"score\":1}");

        let empty: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.first_text().is_none());
    }

    #[tokio::test]
    async fn test_canned_feedback_is_stable() {
        let first = CannedFeedback.analyze_transcript("x").await.unwrap();
        let second = CannedFeedback.analyze_transcript("y").await.unwrap();
        assert_eq!(first, second);
        assert!(!first.suggestions.is_empty());
    }
}
