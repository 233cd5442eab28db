//! Per-chat session state.

pub mod files;
pub mod store;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::chat::{ChatId, MessageRef};
use crate::download::catalog::{Catalog, FormatDescriptor};

pub use files::WorkingFiles;
pub use store::{Created, SessionStore, StoreError};

/// Lifecycle of one request.
///
/// `Idle → AwaitingSelection → Downloading → Transcoding → Uploading → Done`,
/// with `Failed` reachable from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display, strum::AsRefStr)]
pub enum Phase {
    #[default]
    Idle,
    AwaitingSelection,
    Downloading,
    Transcoding,
    Uploading,
    Done,
    Failed,
}

impl Phase {
    /// A worker run owns the session.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Phase::Downloading | Phase::Transcoding | Phase::Uploading)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }
}

/// Sessions are keyed by chat: one active request per chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(ChatId);

impl SessionId {
    pub fn for_chat(chat: ChatId) -> Self {
        Self(chat)
    }

    pub fn chat(self) -> ChatId {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chat:{}", self.0)
    }
}

#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    /// Tag embedded in this session's buttons; taps carrying another tag are stale.
    pub nonce: String,
    pub phase: Phase,
    pub title: Option<String>,
    pub candidates: Arc<[FormatDescriptor]>,
    pub preferred_audio: Option<FormatDescriptor>,
    /// Set once, when the selection is accepted.
    pub selected: Vec<FormatDescriptor>,
    pub keyboard: Option<MessageRef>,
    pub progress: Option<MessageRef>,
    pub working_files: WorkingFiles,
    pub created_at: Instant,
}

impl Session {
    /// A session waiting for the user to pick one of the catalog's formats.
    pub fn awaiting_selection(id: SessionId, catalog: Catalog) -> Self {
        Self {
            id,
            nonce: new_nonce(),
            phase: Phase::AwaitingSelection,
            title: catalog.title,
            candidates: catalog.formats.into(),
            preferred_audio: catalog.preferred_audio,
            selected: Vec::new(),
            keyboard: None,
            progress: None,
            working_files: WorkingFiles::default(),
            created_at: Instant::now(),
        }
    }
}

fn new_nonce() -> String {
    let mut nonce = uuid::Uuid::new_v4().simple().to_string();
    nonce.truncate(10);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_classification() {
        assert!(Phase::Downloading.is_in_flight());
        assert!(Phase::Uploading.is_in_flight());
        assert!(!Phase::AwaitingSelection.is_in_flight());
        assert!(Phase::Failed.is_terminal());
        assert!(!Phase::Transcoding.is_terminal());
        assert_eq!(Phase::AwaitingSelection.to_string(), "AwaitingSelection");
    }

    #[test]
    fn test_nonces_differ() {
        let a = new_nonce();
        assert_eq!(a.len(), 10);
        assert_ne!(a, new_nonce());
    }

    #[test]
    fn test_session_id_display() {
        assert_eq!(SessionId::for_chat(ChatId(-100)).to_string(), "chat:-100");
    }
}
