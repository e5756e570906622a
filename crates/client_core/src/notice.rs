//! Transient error notices and the single-slot console that displays them.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::error::ClientError;

pub const DEFAULT_DISMISS_AFTER: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeOrigin {
    NetworkError,
    SessionExpired,
    ServerError,
    Validation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorNotice {
    pub message: String,
    pub origin: NoticeOrigin,
    pub raised_at: DateTime<Utc>,
}

impl ErrorNotice {
    pub fn new(origin: NoticeOrigin, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            origin,
            raised_at: Utc::now(),
        }
    }

    /// The notice a failed operation should raise. Session expiry never
    /// produces one: it is handled by reloading instead.
    pub fn from_error(err: &ClientError) -> Option<Self> {
        let (origin, message) = match err {
            ClientError::Validation(message) => (NoticeOrigin::Validation, message.clone()),
            ClientError::Network(message) => (NoticeOrigin::NetworkError, message.clone()),
            ClientError::Server(message) => (NoticeOrigin::ServerError, message.clone()),
            ClientError::SessionExpired
            | ClientError::StepLocked(_)
            | ClientError::CollationInFlight
            | ClientError::UnknownText(_) => return None,
        };
        Some(Self::new(origin, message))
    }

    pub fn banner_text(&self) -> String {
        match self.origin {
            NoticeOrigin::Validation => self.message.clone(),
            _ => format!("Uhoh, the service returned an error... {}", self.message),
        }
    }
}

/// Shows at most one notice at a time; a new notice replaces the old one.
#[derive(Debug, Clone)]
pub struct ErrorConsole {
    current: Option<(ErrorNotice, Instant)>,
    dismiss_after: Duration,
}

impl Default for ErrorConsole {
    fn default() -> Self {
        Self::new(DEFAULT_DISMISS_AFTER)
    }
}

impl ErrorConsole {
    pub fn new(dismiss_after: Duration) -> Self {
        Self {
            current: None,
            dismiss_after,
        }
    }

    pub fn dismiss_after(&self) -> Duration {
        self.dismiss_after
    }

    pub fn show(&mut self, notice: ErrorNotice, now: Instant) {
        self.current = Some((notice, now));
    }

    pub fn visible_at(&self, now: Instant) -> Option<&ErrorNotice> {
        let (notice, shown_at) = self.current.as_ref()?;
        if now.saturating_duration_since(*shown_at) < self.dismiss_after {
            Some(notice)
        } else {
            None
        }
    }

    pub fn visible(&self) -> Option<&ErrorNotice> {
        self.visible_at(Instant::now())
    }

    pub fn dismiss(&mut self) {
        self.current = None;
    }
}
