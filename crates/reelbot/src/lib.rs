//! Telegram front end for reelcore.

pub mod cli;
pub mod telegram;
