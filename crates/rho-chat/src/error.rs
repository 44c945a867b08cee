//! Error types for rho-chat

use thiserror::Error;

/// Result type alias using rho-chat Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a turn
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the client layer
    #[error(transparent)]
    Ai(#[from] rho_ai::Error),

    /// The user turn had no text
    #[error("input is empty")]
    EmptyInput,
}

impl Error {
    /// Classification of client-layer errors
    pub fn kind(&self) -> Option<rho_ai::ErrorKind> {
        match self {
            Error::Ai(e) => Some(e.kind()),
            Error::EmptyInput => None,
        }
    }

    /// Whether the process should stop rather than move on to the next turn
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Ai(e) if e.is_fatal())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Ai(rho_ai::Error::Cancelled))
    }
}
