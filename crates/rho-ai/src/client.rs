//! HTTP transport for the chat-completions endpoint

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;

use crate::{
    credential::Credential,
    error::{Error, Result},
    request::ChatRequest,
    stream::ByteStream,
    types::ApiErrorBody,
};

/// Default endpoint root
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// Path appended to the base URL
pub const COMPLETIONS_PATH: &str = "/chat/completions";
/// Default deadline for one exchange
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection settings, built once and handed to the transport
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Deadline for the whole exchange, body included
    pub timeout: Duration,
    pub credential: Credential,
}

impl ClientConfig {
    pub fn new(credential: Credential) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            credential,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Full URL of the completions endpoint
    pub fn endpoint(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), COMPLETIONS_PATH)
    }
}

/// Response body as handed back by a transport
pub enum TransportResponse {
    /// The complete body of a non-streamed response
    Buffered(Bytes),
    /// The body of a streamed response, as it arrives
    Streaming(ByteStream),
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportResponse::Buffered(bytes) => {
                f.debug_tuple("Buffered").field(&bytes.len()).finish()
            }
            TransportResponse::Streaming(_) => f.write_str("Streaming(..)"),
        }
    }
}

/// Sends one request and returns the response body.
///
/// Implementations decide nothing about the body's contents; a non-success
/// status is the only thing they interpret.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ChatRequest) -> Result<TransportResponse>;
}

/// reqwest-backed transport
pub struct HttpTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpTransport {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ChatRequest) -> Result<TransportResponse> {
        let url = self.config.endpoint();
        tracing::debug!(%url, model = %request.model, stream = request.stream, "sending request");

        let mut builder = self
            .client
            .post(&url)
            .header(AUTHORIZATION, self.config.credential.bearer())
            .header(CONTENT_TYPE, "application/json");
        if request.stream {
            builder = builder.header(ACCEPT, "text/event-stream");
        }

        let response = builder.json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "request rejected");
            return Err(status_error(status.as_u16(), body));
        }

        if request.stream {
            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(Error::from));
            Ok(TransportResponse::Streaming(Box::pin(body)))
        } else {
            Ok(TransportResponse::Buffered(response.bytes().await?))
        }
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ApiErrorBody,
}

/// Classify a non-success response, preferring the provider's own error body
fn status_error(status: u16, body: String) -> Error {
    match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) => Error::Api {
            code: envelope.error.code(),
            message: envelope.error.message(),
            status: Some(status),
        },
        Err(_) => Error::HttpStatus { status, body },
    }
}
