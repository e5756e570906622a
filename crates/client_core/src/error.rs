use shared::domain::TextId;
use thiserror::Error;

pub type ClientResult<T> = std::result::Result<T, ClientError>;

pub const SIGLA_NOT_UNIQUE: &str =
    "The sigla provided are not unique. Please correct and try again.";

/// A workflow step that can be locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    FileRegistration,
    Collation,
    ResultDisplay,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Step::FileRegistration => "file registration",
            Step::Collation => "collation",
            Step::ResultDisplay => "result display",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("{0}")]
    Validation(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("session expired")]
    SessionExpired,
    #[error("server error: {0}")]
    Server(String),
    #[error("{0} step is locked")]
    StepLocked(Step),
    #[error("a collation request is already in flight")]
    CollationInFlight,
    #[error("unknown text {0}")]
    UnknownText(TextId),
}

impl ClientError {
    pub fn is_session_expired(&self) -> bool {
        matches!(self, ClientError::SessionExpired)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(value: reqwest::Error) -> Self {
        ClientError::Network(value.to_string())
    }
}
