//! Error types for rho-ai

use thiserror::Error;

/// Result type alias using rho-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to a chat-completions endpoint
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or unusable configuration (credential, parameters)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Credential file could not be read
    #[error("Failed to read credential file {path}: {source}")]
    CredentialFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// HTTP request failed for a reason other than a timeout or connect error
    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),

    /// Could not reach the endpoint
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The transport deadline elapsed
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Non-success HTTP status without a structured error body
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// Structured error reported by the provider, in-band or with an error status
    #[error("API error: {code} - {message}")]
    Api {
        code: String,
        message: String,
        status: Option<u16>,
    },

    /// The response did not follow the expected framing or schema
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The caller cancelled the request
    #[error("Request cancelled")]
    Cancelled,
}

/// Coarse classification used by callers to decide how to react to a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fatal before any network call
    Configuration,
    /// Connection or HTTP level failure for the current turn
    Transport,
    /// Transport deadline exceeded
    Timeout,
    /// Structured provider error
    Api,
    /// Malformed response
    Protocol,
    /// Cancelled by the caller
    Cancelled,
}

impl Error {
    /// Create an API error from code and message
    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            code: code.into(),
            message: message.into(),
            status: None,
        }
    }

    /// Create a protocol error
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol(reason.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidConfig(_) | Error::CredentialFile { .. } => ErrorKind::Configuration,
            Error::Http(_) | Error::Connection(_) | Error::HttpStatus { .. } => {
                ErrorKind::Transport
            }
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Api { .. } => ErrorKind::Api,
            Error::Protocol(_) | Error::Json(_) => ErrorKind::Protocol,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the error is fatal for the whole process rather than a single turn
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }

    /// Check if this error is transient. Informational only; nothing retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout(_) | Error::Connection(_) => true,
            Error::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            Error::Api { code, status, .. } => {
                matches!(status, Some(s) if *s == 429 || *s >= 500)
                    || code.to_lowercase().contains("rate_limit")
                    || code.to_lowercase().contains("overloaded")
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(err.to_string())
        } else if err.is_connect() {
            Error::Connection(err.to_string())
        } else {
            Error::Http(err)
        }
    }
}
