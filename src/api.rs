//! HTTP registration inlet: pending question sets come in here.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::channels::{ChatTransport, FormatOptions, send_with_timeout};
use crate::conversation::{
    ConversationState, ConversationStore, OriginatingEmail, format_numbered_questions,
};
use crate::error::ConversationError;

/// Shared state for the registration routes.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<ConversationStore>,
    pub transport: Arc<dyn ChatTransport>,
    /// Bound on the outbound question message.
    pub send_timeout: Duration,
}

/// Body of `POST /api/conversations`.
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub session_id: String,
    pub questions: Vec<String>,
    #[serde(default)]
    pub email: OriginatingEmail,
}

impl RegisterRequest {
    /// Trim questions, drop blanks, and reject empty registrations.
    fn validate(self) -> Result<(String, Vec<String>, OriginatingEmail), ConversationError> {
        let session_id = self.session_id.trim().to_string();
        if session_id.is_empty() {
            return Err(ConversationError::MissingSession);
        }
        let questions: Vec<String> = self
            .questions
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();
        if questions.is_empty() {
            return Err(ConversationError::NoQuestions);
        }
        Ok((session_id, questions, self.email))
    }
}

/// Chat message announcing a new email and its questions.
pub fn question_message(email: &OriginatingEmail, questions: &[String]) -> String {
    let (email, _) = email.sanitized();
    format!(
        "📧 New email from {}\nSubject: {}\n\nPlease answer by number:\n{}",
        email.sender,
        email.subject,
        format_numbered_questions(questions)
    )
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "reply-relay"
    }))
}

/// POST /api/conversations
///
/// Stores the question set for the session (replacing any previous one)
/// and sends the numbered questions to the chat.
async fn register(
    State(state): State<ApiState>,
    Json(req): Json<RegisterRequest>,
) -> impl IntoResponse {
    let (session_id, questions, email) = match req.validate() {
        Ok(v) => v,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    let text = question_message(&email, &questions);
    let count = questions.len();
    state
        .store
        .store(&session_id, ConversationState::new(&session_id, email, questions))
        .await;

    let notified = match send_with_timeout(
        &*state.transport,
        &session_id,
        &text,
        FormatOptions::Plain,
        state.send_timeout,
    )
    .await
    {
        Ok(()) => true,
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "Failed to send questions to chat");
            false
        }
    };

    info!(session_id = %session_id, questions = count, notified, "Registered conversation");

    (
        StatusCode::CREATED,
        Json(serde_json::json!({
            "session_id": session_id,
            "questions": count,
            "notified": notified,
        })),
    )
        .into_response()
}

/// GET /api/conversations
async fn list(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.store.list().await)
}

/// DELETE /api/conversations/{session_id}
async fn clear(State(state): State<ApiState>, Path(session_id): Path<String>) -> impl IntoResponse {
    state.store.clear(&session_id).await;
    StatusCode::NO_CONTENT
}

/// Build the registration REST routes.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/conversations", get(list).post(register))
        .route("/api/conversations/{session_id}", delete(clear))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_message_numbers_questions() {
        let email = OriginatingEmail::new("bob@example.com", "Lunch", "", "");
        let text = question_message(&email, &["When?".into(), "Where?".into()]);
        assert!(text.contains("from bob@example.com"));
        assert!(text.contains("Subject: Lunch"));
        assert!(text.ends_with("1. When?\n2. Where?\n"));
    }

    #[test]
    fn validate_rejects_blank_questions() {
        let req = RegisterRequest {
            session_id: "1".into(),
            questions: vec!["  ".into()],
            email: OriginatingEmail::default(),
        };
        assert!(matches!(req.validate(), Err(ConversationError::NoQuestions)));
    }

    #[test]
    fn validate_rejects_blank_session() {
        let req = RegisterRequest {
            session_id: " ".into(),
            questions: vec!["Q".into()],
            email: OriginatingEmail::default(),
        };
        assert!(matches!(req.validate(), Err(ConversationError::MissingSession)));
    }
}
