//! Reelcore - format lookup, download, transcode and delivery pipeline for
//! a chat-driven video downloader.
//!
//! The crate knows nothing about Telegram: the bot implements
//! [`chat::ChatTransport`] and feeds chat events into
//! [`download::Orchestrator`].

pub mod chat;
pub mod core;
pub mod download;
pub mod session;

pub use crate::core::{init_logger, Settings};
pub use download::{Orchestrator, PipelineParts};
