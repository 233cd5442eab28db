//! Bot instance creation and the command list.

use anyhow::{anyhow, Context};
use reqwest::ClientBuilder;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use reelcore::core::config::TransportSettings;

/// Environment variables checked for the bot token, in order.
pub const TOKEN_VARS: [&str; 3] = ["BOT_TOKEN", "TELOXIDE_TOKEN", "TELEGRAM_BOT_TOKEN"];

#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    #[command(description = "how to use the bot")]
    Start,
    #[command(description = "show this list")]
    Help,
}

/// Two handles on the same bot: uploads get a longer request timeout.
#[derive(Clone)]
pub struct Bots {
    pub regular: Bot,
    pub upload: Bot,
}

/// Reads the bot token from the first non-empty variable in [`TOKEN_VARS`].
pub fn load_token() -> anyhow::Result<SecretString> {
    token_from(|name| std::env::var(name).ok())
}

fn token_from(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<SecretString> {
    TOKEN_VARS
        .iter()
        .find_map(|name| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()))
        .map(SecretString::from)
        .ok_or_else(|| anyhow!("Bot token not set (expected one of {})", TOKEN_VARS.join(", ")))
}

pub fn create_bots(token: &SecretString, settings: &TransportSettings) -> anyhow::Result<Bots> {
    let api_url = settings
        .api_url
        .as_deref()
        .map(|raw| url::Url::parse(raw).with_context(|| format!("Invalid transport.api_url: {}", raw)))
        .transpose()?;
    if let Some(url) = &api_url {
        log::info!("Using custom Bot API URL: {}", url);
    }

    let build = |timeout: Duration| -> anyhow::Result<Bot> {
        let client = ClientBuilder::new().timeout(timeout).build()?;
        let bot = Bot::with_client(token.expose_secret(), client);
        Ok(match &api_url {
            Some(url) => bot.set_api_url(url.clone()),
            None => bot,
        })
    };

    Ok(Bots {
        regular: build(settings.request_timeout())?,
        upload: build(settings.upload_timeout())?,
    })
}

pub async fn setup_bot_commands(bot: &Bot) -> Result<(), teloxide::RequestError> {
    bot.set_my_commands(Command::bot_commands()).await?;
    Ok(())
}
