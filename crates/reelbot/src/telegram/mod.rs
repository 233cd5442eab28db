//! Telegram integration: bot setup, the chat transport and the update handlers.

pub mod bot;
pub mod handlers;
pub mod transport;

pub use bot::{create_bots, load_token, setup_bot_commands, Bots, Command};
pub use handlers::{extract_url, schema, HandlerDeps, HandlerError};
pub use transport::TeloxideTransport;
