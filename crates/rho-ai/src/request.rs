//! Projection of conversation history and parameters into a wire payload

use serde::Serialize;

use crate::{
    error::Result,
    types::{Message, RequestParameters, Role},
};

/// Request body for `POST /chat/completions`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub stream: bool,
}

/// Role and content only; local metadata stays out of the payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for WireMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role(),
            content: msg.content().to_string(),
        }
    }
}

/// Build the payload for one turn.
///
/// The new user turn is appended to a copy of `history`; the caller's
/// conversation is left untouched so a failed call cannot leave an
/// orphaned user message behind.
pub fn build_request(
    history: &[Message],
    new_user_text: &str,
    params: &RequestParameters,
) -> Result<ChatRequest> {
    params.validate()?;

    let mut messages: Vec<WireMessage> = history.iter().map(WireMessage::from).collect();
    messages.push(WireMessage {
        role: Role::User,
        content: new_user_text.to_string(),
    });

    tracing::debug!(
        model = %params.model,
        messages = messages.len(),
        stream = params.stream,
        "built chat request"
    );

    Ok(ChatRequest {
        model: params.model.clone(),
        messages,
        max_tokens: params.max_tokens,
        temperature: params.temperature,
        top_p: params.top_p,
        stream: params.stream,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_build_appends_user_turn_to_copy() {
        let history = vec![Message::user("Hello"), Message::assistant("Hi there")];
        let request =
            build_request(&history, "How are you?", &RequestParameters::default()).unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[2].role, Role::User);
        assert_eq!(request.messages[2].content, "How are you?");
        assert_eq!(request.messages[1].role, Role::Assistant);
    }

    #[test]
    fn test_payload_shape() {
        let params = RequestParameters::default()
            .with_model("gpt-4o-mini")
            .with_max_tokens(64)
            .with_temperature(0.5)
            .with_top_p(1.0)
            .with_stream(false);
        let history = vec![Message::user("Hello"), Message::assistant("Hi")];
        let request = build_request(&history, "Bye", &params).unwrap();

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "gpt-4o-mini",
                "messages": [
                    {"role": "user", "content": "Hello"},
                    {"role": "assistant", "content": "Hi"},
                    {"role": "user", "content": "Bye"}
                ],
                "max_tokens": 64,
                "temperature": 0.5,
                "top_p": 1.0,
                "stream": false
            })
        );
    }

    #[test]
    fn test_no_timestamp_on_the_wire() {
        let history = vec![Message::user("Hello")];
        let request = build_request(&history, "again", &RequestParameters::default()).unwrap();
        let body = serde_json::to_string(&request).unwrap();
        assert!(!body.contains("timestamp"));
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let params = RequestParameters::default().with_max_tokens(0);
        let err = build_request(&[], "Hello", &params).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
