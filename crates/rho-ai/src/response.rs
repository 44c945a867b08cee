//! Decoding of complete (non-streamed) chat-completion responses

use serde::Deserialize;

use crate::{
    error::{Error, Result},
    types::{ApiErrorBody, Message, Role},
};

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    message: Option<CompletionMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// A decoded complete response
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub message: Message,
    pub finish_reason: Option<String>,
}

/// Decode one complete response body into the assistant message it carries.
///
/// An `error` object wins over any choices. The returned message may be
/// empty; callers decide whether an empty reply is worth recording.
pub fn parse_completion(body: &[u8]) -> Result<Completion> {
    let response: CompletionResponse = serde_json::from_slice(body)
        .map_err(|e| Error::protocol(format!("malformed response: {}", e)))?;

    if let Some(error) = response.error {
        return Err(Error::api(error.code(), error.message()));
    }

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::protocol("response contained no choices"))?;

    let message = choice
        .message
        .ok_or_else(|| Error::protocol("first choice has no message"))?;

    match message.role.as_deref() {
        None | Some("assistant") => {}
        Some(other) => {
            return Err(Error::protocol(format!(
                "expected an assistant message, got role '{}'",
                other
            )));
        }
    }

    let content = message.content.unwrap_or_default();
    tracing::debug!(
        chars = content.chars().count(),
        finish_reason = ?choice.finish_reason,
        "decoded complete response"
    );

    Ok(Completion {
        message: Message::new(Role::Assistant, content),
        finish_reason: choice.finish_reason,
    })
}
