use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::TransportError;

/// Stable failure classification shared by every platform.
///
/// Callers branch on this, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    UserNotFound,
    AuthRequired,
    Timeout,
    NetworkError,
    ParseError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UserNotFound => "USER_NOT_FOUND",
            ErrorKind::AuthRequired => "AUTH_REQUIRED",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::NetworkError => "NETWORK_ERROR",
            ErrorKind::ParseError => "PARSE_ERROR",
        }
    }

    /// The one place low-level failures are mapped onto the taxonomy.
    pub fn classify(context: &FailureContext<'_>) -> ErrorKind {
        match context {
            FailureContext::HttpStatus(404) => ErrorKind::UserNotFound,
            FailureContext::HttpStatus(401 | 403) => ErrorKind::AuthRequired,
            FailureContext::HttpStatus(_) => ErrorKind::NetworkError,
            FailureContext::Transport(TransportError::Timeout(_)) => ErrorKind::Timeout,
            FailureContext::Transport(_) => ErrorKind::NetworkError,
            FailureContext::LoginWall => ErrorKind::AuthRequired,
            FailureContext::PatternsExhausted => ErrorKind::ParseError,
            FailureContext::EmptyHandle | FailureContext::AccountMissing => ErrorKind::UserNotFound,
            FailureContext::TaskAborted | FailureContext::NoExtractor => ErrorKind::NetworkError,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What went wrong, before classification.
#[derive(Debug)]
pub enum FailureContext<'a> {
    /// A response arrived with a status the cascade cannot work with.
    HttpStatus(u16),
    /// The transport never produced a response.
    Transport(&'a TransportError),
    /// The page is a login form rather than the requested profile.
    LoginWall,
    /// A 2xx response where no attempt recognized a count.
    PatternsExhausted,
    /// Nothing left of the handle after normalization.
    EmptyHandle,
    /// The platform answered but says the account is gone or banned.
    AccountMissing,
    /// The extraction task panicked or was cancelled.
    TaskAborted,
    NoExtractor,
}

/// A classified failure for one platform. Nothing platform specific leaks past this.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ExtractionFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl ExtractionFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn from_context(context: FailureContext<'_>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::classify(&context), message)
    }

    pub fn status(status: u16, url: &str) -> Self {
        Self::from_context(
            FailureContext::HttpStatus(status),
            format!("HTTP {status} from {url}"),
        )
    }

    pub fn transport(err: &TransportError) -> Self {
        Self::from_context(FailureContext::Transport(err), err.to_string())
    }

    pub fn exhausted(message: impl Into<String>) -> Self {
        Self::from_context(FailureContext::PatternsExhausted, message)
    }

    pub fn empty_handle(platform: &str) -> Self {
        Self::from_context(FailureContext::EmptyHandle, format!("empty {platform} handle"))
    }
}

/// Raised when a platform name does not match any supported platform.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown platform: {0}")]
pub struct UnknownPlatform(pub String);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}
