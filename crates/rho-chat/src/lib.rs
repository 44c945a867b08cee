//! rho-chat: conversation state and the per-turn driver
//!
//! [`ChatSession`] owns the history of one run and turns each user input
//! into a request, a response, and (on success) two new history entries.

pub mod conversation;
pub mod error;
pub mod session;

pub use conversation::ConversationState;
pub use error::{Error, Result};
pub use session::{ChatSession, TurnReport, UserTurnPolicy};
