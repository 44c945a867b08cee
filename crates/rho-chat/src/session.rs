//! One conversation, driven a turn at a time

use std::sync::Arc;

use rho_ai::{
    Message, RequestParameters, StreamFragment, Transport, TransportResponse, build_request,
    parse_completion, stream,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    conversation::ConversationState,
    error::{Error, Result},
};

/// When the user's side of a turn enters history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserTurnPolicy {
    /// Only once the assistant reply has been received in full
    #[default]
    OnCompletion,
    /// As soon as the endpoint accepts the request, even if the reply later
    /// fails
    OnDispatch,
}

/// Summary of a finished turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    /// Complete assistant text; may be empty
    pub text: String,
    /// Number of fragments delivered to the caller
    pub fragments: usize,
    pub finish_reason: Option<String>,
}

/// Owns the history of one run and drives each turn through the transport
pub struct ChatSession {
    transport: Arc<dyn Transport>,
    params: RequestParameters,
    policy: UserTurnPolicy,
    conversation: ConversationState,
}

impl ChatSession {
    pub fn new(transport: Arc<dyn Transport>, params: RequestParameters) -> Self {
        Self {
            transport,
            params,
            policy: UserTurnPolicy::default(),
            conversation: ConversationState::new(),
        }
    }

    pub fn with_policy(mut self, policy: UserTurnPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn params(&self) -> &RequestParameters {
        &self.params
    }

    /// Replace the generation parameters used from the next turn on
    pub fn set_params(&mut self, params: RequestParameters) -> Result<()> {
        params.validate()?;
        self.params = params;
        Ok(())
    }

    pub fn policy(&self) -> UserTurnPolicy {
        self.policy
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    /// Drop all history
    pub fn clear(&mut self) {
        self.conversation.clear();
    }

    /// Run one turn.
    ///
    /// `on_fragment` sees assistant text as it arrives; a non-streamed reply
    /// is delivered as a single fragment. History is only touched once the
    /// policy says so, and the assistant reply only on success.
    pub async fn send_turn<F>(
        &mut self,
        input: &str,
        mut on_fragment: F,
        cancel: &CancellationToken,
    ) -> Result<TurnReport>
    where
        F: FnMut(&StreamFragment),
    {
        if input.trim().is_empty() {
            return Err(Error::EmptyInput);
        }

        let request = build_request(self.conversation.snapshot(), input, &self.params)?;
        tracing::info!(
            model = %request.model,
            history = self.conversation.len(),
            "starting turn"
        );

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(rho_ai::Error::Cancelled.into()),
            response = self.transport.send(&request) => response?,
        };

        if self.policy == UserTurnPolicy::OnDispatch {
            self.conversation.append(Message::user(input));
        }

        let mut fragments = 0;
        let (text, finish_reason) = match response {
            TransportResponse::Streaming(source) => {
                let outcome = stream::consume(
                    source,
                    |fragment| {
                        fragments += 1;
                        on_fragment(fragment);
                    },
                    cancel,
                )
                .await?;
                outcome.into_result()?
            }
            TransportResponse::Buffered(body) => {
                let completion = parse_completion(&body)?;
                let text = completion.message.content().to_string();
                if !text.is_empty() {
                    on_fragment(&StreamFragment {
                        index: 0,
                        text: text.clone(),
                    });
                    fragments = 1;
                }
                (text, completion.finish_reason)
            }
        };

        if self.policy == UserTurnPolicy::OnCompletion {
            self.conversation.append(Message::user(input));
        }
        self.conversation.append(Message::assistant(text.clone()));

        tracing::info!(
            fragments,
            chars = text.chars().count(),
            history = self.conversation.len(),
            "turn completed"
        );

        Ok(TurnReport {
            text,
            fragments,
            finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use rho_ai::{ChatRequest, ErrorKind, Role};

    /// What the mock transport does for one call
    enum Scripted {
        Stream(Vec<String>),
        Body(&'static str),
        Fail(rho_ai::Error),
    }

    struct MockTransport {
        script: Mutex<Vec<Scripted>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl MockTransport {
        fn new(script: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, request: &ChatRequest) -> rho_ai::Result<TransportResponse> {
            self.requests.lock().push(request.clone());
            let next = {
                let mut script = self.script.lock();
                if script.is_empty() {
                    Scripted::Stream(vec!["data: [DONE]\n".to_string()])
                } else {
                    script.remove(0)
                }
            };
            match next {
                Scripted::Stream(lines) => {
                    let body = futures::stream::iter(
                        lines.into_iter().map(|l| Ok::<_, rho_ai::Error>(Bytes::from(l))),
                    );
                    Ok(TransportResponse::Streaming(Box::pin(body)))
                }
                Scripted::Body(body) => Ok(TransportResponse::Buffered(Bytes::from(body))),
                Scripted::Fail(e) => Err(e),
            }
        }
    }

    fn lines(lines: &[&str]) -> Scripted {
        Scripted::Stream(lines.iter().map(|l| l.to_string()).collect())
    }

    fn reply(text: &str) -> Scripted {
        Scripted::Stream(vec![
            format!("data: {{\"choices\":[{{\"delta\":{{\"content\":\"{}\"}}}}]}}\n", text),
            "data: [DONE]\n".to_string(),
        ])
    }

    fn api_error_stream() -> Scripted {
        lines(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n",
            "data: {\"error\":{\"code\":\"rate_limit\",\"message\":\"slow down\"}}\n",
        ])
    }

    fn session(transport: Arc<MockTransport>) -> ChatSession {
        ChatSession::new(transport, RequestParameters::default())
    }

    fn history(session: &ChatSession) -> Vec<(Role, String)> {
        session
            .conversation()
            .snapshot()
            .iter()
            .map(|m| (m.role(), m.content().to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_hello_turn() {
        let transport = MockTransport::new(vec![lines(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n",
            "data: [DONE]\n",
        ])]);
        let mut session = session(transport.clone());

        let mut shown = String::new();
        let report = session
            .send_turn("Hello", |f| shown.push_str(&f.text), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(shown, "Hi there");
        assert_eq!(report.text, "Hi there");
        assert_eq!(report.fragments, 2);
        assert_eq!(
            history(&session),
            vec![
                (Role::User, "Hello".to_string()),
                (Role::Assistant, "Hi there".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_history_grows_two_per_turn() {
        let transport = MockTransport::new(vec![reply("one"), reply("two"), reply("three")]);
        let mut session = session(transport.clone());
        let cancel = CancellationToken::new();

        for (i, input) in ["a", "b", "c"].iter().enumerate() {
            session.send_turn(input, |_| {}, &cancel).await.unwrap();
            assert_eq!(session.conversation().len(), 2 * (i + 1));
        }

        // Each request carries prior history plus the new user turn
        let requests = transport.requests.lock();
        let sizes: Vec<usize> = requests.iter().map(|r| r.messages.len()).collect();
        assert_eq!(sizes, vec![1, 3, 5]);
        assert_eq!(requests[2].messages[1].content, "one");
        assert_eq!(requests[2].messages[4].content, "c");
    }

    #[tokio::test]
    async fn test_transport_failure_records_nothing() {
        for policy in [UserTurnPolicy::OnCompletion, UserTurnPolicy::OnDispatch] {
            let transport = MockTransport::new(vec![
                reply("first"),
                Scripted::Fail(rho_ai::Error::Connection("refused".into())),
            ]);
            let mut session = session(transport).with_policy(policy);
            let cancel = CancellationToken::new();

            session.send_turn("Hello", |_| {}, &cancel).await.unwrap();
            let err = session.send_turn("Again", |_| {}, &cancel).await.unwrap_err();

            assert_eq!(err.kind(), Some(ErrorKind::Transport));
            assert!(!err.is_fatal());
            assert_eq!(session.conversation().len(), 2, "policy {:?}", policy);
        }
    }

    #[tokio::test]
    async fn test_invalid_parameters_never_dispatch() {
        let transport = MockTransport::new(vec![]);
        let params = RequestParameters::default().with_max_tokens(0);
        let mut session = ChatSession::new(transport.clone(), params);

        let err = session
            .send_turn("Hello", |_| {}, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(transport.calls(), 0);
        assert!(session.conversation().is_empty());
    }

    #[tokio::test]
    async fn test_api_error_on_completion_policy() {
        let transport = MockTransport::new(vec![api_error_stream()]);
        let mut session = session(transport);

        let err = session
            .send_turn("Hello", |_| {}, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), Some(ErrorKind::Api));
        assert_eq!(err.to_string(), "API error: rate_limit - slow down");
        assert!(session.conversation().is_empty());
    }

    #[tokio::test]
    async fn test_api_error_on_dispatch_policy() {
        let transport = MockTransport::new(vec![api_error_stream(), reply("ok")]);
        let mut session = session(transport.clone()).with_policy(UserTurnPolicy::OnDispatch);
        let cancel = CancellationToken::new();

        assert!(session.send_turn("Hello", |_| {}, &cancel).await.is_err());
        assert_eq!(history(&session), vec![(Role::User, "Hello".to_string())]);

        // The orphaned user turn is sent as context on the next call
        session.send_turn("Again", |_| {}, &cancel).await.unwrap();
        assert_eq!(transport.requests.lock()[1].messages.len(), 2);
        assert_eq!(session.conversation().len(), 3);
    }

    #[tokio::test]
    async fn test_protocol_error_is_reported() {
        let transport = MockTransport::new(vec![lines(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n",
        ])]);
        let mut session = session(transport);

        let err = session
            .send_turn("Hello", |_| {}, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Protocol));
        assert!(session.conversation().is_empty());
    }

    #[tokio::test]
    async fn test_empty_completion_keeps_user_turn_only() {
        let transport = MockTransport::new(vec![lines(&["data: [DONE]\n"])]);
        let mut session = session(transport);

        let report = session
            .send_turn("Hello", |_| {}, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.text, "");
        assert_eq!(report.fragments, 0);
        assert_eq!(history(&session), vec![(Role::User, "Hello".to_string())]);
    }

    #[tokio::test]
    async fn test_buffered_reply() {
        let transport = MockTransport::new(vec![Scripted::Body(
            r#"{"choices":[{"message":{"role":"assistant","content":"Hi there"},"finish_reason":"stop"}]}"#,
        )]);
        let mut session = ChatSession::new(
            transport,
            RequestParameters::default().with_stream(false),
        );

        let mut shown = Vec::new();
        let report = session
            .send_turn("Hello", |f| shown.push(f.text.clone()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(shown, vec!["Hi there"]);
        assert_eq!(report.fragments, 1);
        assert_eq!(report.finish_reason.as_deref(), Some("stop"));
        assert_eq!(session.conversation().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_input_is_rejected() {
        let transport = MockTransport::new(vec![]);
        let mut session = session(transport.clone());

        let err = session
            .send_turn("   ", |_| {}, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::EmptyInput));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_turn_records_nothing() {
        let transport = MockTransport::new(vec![reply("never")]);
        let mut session = session(transport.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = session.send_turn("Hello", |_| {}, &cancel).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(transport.calls(), 0);
        assert!(session.conversation().is_empty());
    }

    #[tokio::test]
    async fn test_set_params() {
        let mut session = session(MockTransport::new(vec![reply("ok")]));
        assert!(
            session
                .set_params(RequestParameters::default().with_temperature(5.0))
                .is_err()
        );
        assert_eq!(session.params().temperature, 0.8);

        session
            .set_params(RequestParameters::default().with_model("gpt-4o-mini"))
            .unwrap();
        assert_eq!(session.params().model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_clear() {
        let mut session = session(MockTransport::new(vec![reply("ok")]));
        session
            .send_turn("Hello", |_| {}, &CancellationToken::new())
            .await
            .unwrap();
        session.clear();
        assert!(session.conversation().is_empty());
    }
}
