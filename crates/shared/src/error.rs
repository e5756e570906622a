use serde::{Deserialize, Serialize};

/// Message shown when the service answers with something that cannot be read.
pub const GENERIC_SERVER_ERROR: &str = "the service returned an unreadable response";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    SessionExpired,
    NotFound,
    Validation,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

/// The shapes the collation service uses for structured error bodies.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ServerErrorPayload {
    Api(ApiError),
    ErrorMsg { error_msg: String },
    Error { error: String },
}

impl ServerErrorPayload {
    pub fn message(&self) -> &str {
        match self {
            ServerErrorPayload::Api(err) => &err.message,
            ServerErrorPayload::ErrorMsg { error_msg } => error_msg,
            ServerErrorPayload::Error { error } => error,
        }
    }

    /// True when the body is a structured error with the `session_expired` code.
    pub fn signals_session_expired(body: &str) -> bool {
        matches!(
            serde_json::from_str::<ServerErrorPayload>(body),
            Ok(ServerErrorPayload::Api(ApiError {
                code: ErrorCode::SessionExpired,
                ..
            }))
        )
    }

    /// Best-effort message for an error body: a structured payload if one
    /// parses, otherwise the trimmed text, otherwise `None`.
    pub fn message_from_body(body: &str) -> Option<String> {
        if let Ok(payload) = serde_json::from_str::<ServerErrorPayload>(body) {
            let message = payload.message().trim();
            if !message.is_empty() {
                return Some(message.to_string());
            }
        }
        let trimmed = body.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }
}
