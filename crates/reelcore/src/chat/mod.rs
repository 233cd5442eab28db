//! The pipeline's view of the chat service.
//!
//! Everything the orchestrator says to a user goes through [`ChatTransport`].
//! The Telegram implementation lives in the bot crate; tests plug in a
//! recording fake.

use async_trait::async_trait;
use std::fmt;
use std::path::Path;

use crate::core::error::TransportError;
use crate::core::retry::{retry_on_rate_limit, RetryPolicy};

pub mod text;

/// Chat identity as assigned by the chat service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message previously sent (or received) in a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat: ChatId,
    pub id: i32,
}

impl MessageRef {
    pub fn new(chat: ChatId, id: i32) -> Self {
        Self { chat, id }
    }
}

/// Activity hint shown in the chat header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ChatAction {
    Typing,
    UploadDocument,
}

/// One inline button: visible text plus the payload echoed back on tap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyboardButton {
    pub text: String,
    pub data: String,
}

impl KeyboardButton {
    pub fn new(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: data.into(),
        }
    }
}

/// Outbound calls the pipeline makes. Implementations report rate limiting
/// as [`TransportError::RetryAfter`]; retrying is the caller's business.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<MessageRef, TransportError>;

    /// Sends `text` with one button per row.
    async fn send_keyboard(
        &self,
        chat: ChatId,
        text: &str,
        buttons: &[KeyboardButton],
    ) -> Result<MessageRef, TransportError>;

    async fn edit_text(&self, message: MessageRef, text: &str) -> Result<(), TransportError>;

    async fn delete_message(&self, message: MessageRef) -> Result<(), TransportError>;

    async fn send_chat_action(&self, chat: ChatId, action: ChatAction) -> Result<(), TransportError>;

    /// Uploads a local file as a document. May take minutes for large files.
    async fn send_document(
        &self,
        chat: ChatId,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<MessageRef, TransportError>;
}

/// Deletes a message, logging instead of failing. Rate limits are waited
/// out under `policy`.
pub async fn delete_quietly(transport: &dyn ChatTransport, policy: RetryPolicy, message: MessageRef) {
    match retry_on_rate_limit(policy, "message delete", || transport.delete_message(message)).await {
        Ok(()) | Err(TransportError::MessageGone) => {}
        Err(e) => log::debug!("Failed to delete message {} in chat {}: {}", message.id, message.chat, e),
    }
}

/// Sends a chat action hint, logging instead of failing.
pub async fn hint_quietly(transport: &dyn ChatTransport, policy: RetryPolicy, chat: ChatId, action: ChatAction) {
    if let Err(e) = retry_on_rate_limit(policy, "chat action", || transport.send_chat_action(chat, action)).await {
        log::debug!("Failed to send {} action to chat {}: {}", action, chat, e);
    }
}
