//! Core types for chat-completion interactions

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default model identifier
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
/// Default token limit per response
pub const DEFAULT_MAX_TOKENS: u32 = 500;
/// Default sampling temperature
pub const DEFAULT_TEMPERATURE: f32 = 0.8;
/// Default nucleus-sampling cutoff
pub const DEFAULT_TOP_P: f32 = 0.9;

/// Message roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Reserved; never produced by the chat core
    System,
    User,
    Assistant,
}

impl Role {
    /// Get the role as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One turn in the dialogue
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    role: Role,
    content: String,
    /// Creation time in milliseconds since the epoch; local only, never sent
    timestamp: i64,
}

impl Message {
    /// Create a message with the given role
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Whether the message carries no text
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Generation parameters for one call
#[derive(Debug, Clone, PartialEq)]
pub struct RequestParameters {
    /// Model identifier
    pub model: String,
    /// Maximum tokens to generate
    pub max_tokens: u32,
    /// Sampling temperature (0.0 - 2.0)
    pub temperature: f32,
    /// Nucleus-sampling cutoff (0.0 - 1.0)
    pub top_p: f32,
    /// Request an incremental event stream instead of a single document
    pub stream: bool,
}

impl Default for RequestParameters {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            stream: true,
        }
    }
}

impl RequestParameters {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = top_p;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Reject values the endpoint would refuse
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(Error::InvalidConfig("model must not be empty".to_string()));
        }
        if self.max_tokens == 0 {
            return Err(Error::InvalidConfig(
                "max_tokens must be a positive integer".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::InvalidConfig(format!(
                "temperature must be within 0.0..=2.0, got {}",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(Error::InvalidConfig(format!(
                "top_p must be within 0.0..=1.0, got {}",
                self.top_p
            )));
        }
        Ok(())
    }
}

/// One incremental piece of assistant text, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFragment {
    /// 0-based arrival position
    pub index: usize,
    pub text: String,
}

/// Terminal result of a parse
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The sentinel was reached
    Completed {
        accumulated_text: String,
        /// Last finish reason reported by the provider, if any
        finish_reason: Option<String>,
    },
    /// The provider reported an error in-band
    ApiError { code: String, message: String },
    /// The stream could not be interpreted
    ProtocolError { reason: String },
}

impl StreamOutcome {
    /// Whether this outcome is the success path
    pub fn is_completed(&self) -> bool {
        matches!(self, StreamOutcome::Completed { .. })
    }

    /// Get the accumulated text if the stream completed
    pub fn text(&self) -> Option<&str> {
        match self {
            StreamOutcome::Completed {
                accumulated_text, ..
            } => Some(accumulated_text),
            _ => None,
        }
    }

    /// Convert failure outcomes into the matching error
    pub fn into_result(self) -> Result<(String, Option<String>)> {
        match self {
            StreamOutcome::Completed {
                accumulated_text,
                finish_reason,
            } => Ok((accumulated_text, finish_reason)),
            StreamOutcome::ApiError { code, message } => Err(Error::api(code, message)),
            StreamOutcome::ProtocolError { reason } => Err(Error::Protocol(reason)),
        }
    }
}

/// In-band error object shared by streaming chunks and complete responses
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<ErrorCode>,
    #[serde(default, rename = "type")]
    pub error_type: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ApiErrorBody {
    /// Best available code: `code`, then `type`, then "unknown"
    pub fn code(&self) -> String {
        self.code
            .as_ref()
            .map(|c| c.to_string())
            .or_else(|| self.error_type.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn message(&self) -> String {
        self.message.clone().unwrap_or_default()
    }
}

/// Providers send error codes as strings or numbers
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Text(String),
    Number(i64),
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::Text(s) => f.write_str(s),
            ErrorCode::Number(n) => write!(f, "{}", n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_parameters() {
        let params = RequestParameters::default();
        assert_eq!(params.model, "gpt-3.5-turbo");
        assert_eq!(params.max_tokens, 500);
        assert_eq!(params.temperature, 0.8);
        assert_eq!(params.top_p, 0.9);
        assert!(params.stream);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        assert!(RequestParameters::default().with_max_tokens(0).validate().is_err());
        assert!(RequestParameters::default().with_temperature(2.5).validate().is_err());
        assert!(RequestParameters::default().with_temperature(-0.1).validate().is_err());
        assert!(RequestParameters::default().with_top_p(1.1).validate().is_err());
        assert!(RequestParameters::default().with_model("  ").validate().is_err());
    }

    #[test]
    fn test_validate_accepts_bounds() {
        let params = RequestParameters::default()
            .with_temperature(2.0)
            .with_top_p(0.0);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_message_constructors() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role(), Role::User);
        assert_eq!(msg.content(), "Hello");
        assert!(msg.timestamp() > 0);
        assert!(Message::assistant("").is_empty());
    }

    #[test]
    fn test_error_body_code_fallbacks() {
        let body: ApiErrorBody =
            serde_json::from_str(r#"{"code":"rate_limit","message":"slow down"}"#).unwrap();
        assert_eq!(body.code(), "rate_limit");
        assert_eq!(body.message(), "slow down");

        let body: ApiErrorBody =
            serde_json::from_str(r#"{"code":null,"type":"server_error","message":"x"}"#).unwrap();
        assert_eq!(body.code(), "server_error");

        let body: ApiErrorBody = serde_json::from_str(r#"{"code":429}"#).unwrap();
        assert_eq!(body.code(), "429");
        assert_eq!(body.message(), "");

        let body: ApiErrorBody = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(body.code(), "unknown");
    }

    #[test]
    fn test_outcome_into_result() {
        let ok = StreamOutcome::Completed {
            accumulated_text: "Hi".into(),
            finish_reason: Some("stop".into()),
        };
        assert_eq!(ok.text(), Some("Hi"));
        assert_eq!(ok.into_result().unwrap().0, "Hi");

        let err = StreamOutcome::ApiError {
            code: "rate_limit".into(),
            message: "slow down".into(),
        };
        assert!(!err.is_completed());
        assert!(matches!(err.into_result(), Err(Error::Api { .. })));
    }
}
