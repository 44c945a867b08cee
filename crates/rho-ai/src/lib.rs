//! rho-ai: client layer for OpenAI-style chat-completion endpoints
//!
//! This crate turns conversation history into request payloads, sends them
//! over HTTP, and decodes both streamed and complete responses.

pub mod client;
pub mod credential;
pub mod error;
pub mod request;
pub mod response;
pub mod stream;
pub mod types;

pub use client::{ClientConfig, HttpTransport, Transport, TransportResponse};
pub use credential::Credential;
pub use error::{Error, ErrorKind, Result};
pub use request::{ChatRequest, build_request};
pub use response::{Completion, parse_completion};
pub use stream::{ByteStream, StreamEvent, StreamParser};
pub use types::*;
