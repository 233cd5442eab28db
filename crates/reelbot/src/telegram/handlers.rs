//! Dispatcher schema: commands, links and format button taps.

use indoc::indoc;
use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::Message;
use teloxide::utils::command::BotCommands;

use reelcore::chat::{self, MessageRef};
use reelcore::download::{Orchestrator, Selection};

use crate::telegram::bot::Command;

/// Error type for handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

const GREETING: &str = indoc! {"
    Hello! I'm your video downloader bot.

    Send me a link to a video, pick a format from the list and I'll send the file back.
"};

const USAGE: &str = "Send me a link to a video (http or https).";

/// Dependencies required by handlers
#[derive(Clone)]
pub struct HandlerDeps {
    pub orchestrator: Orchestrator,
}

impl HandlerDeps {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }
}

/// First http(s) link in a message.
pub fn extract_url(text: &str) -> Option<&str> {
    lazy_regex::regex_find!(r#"https?://[^\s<>"]+"#i, text)
}

/// Creates the dispatcher schema for the bot.
pub fn schema(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    dptree::entry()
        .branch(command_handler())
        .branch(message_handler(deps.clone()))
        .branch(callback_handler(deps))
}

fn command_handler() -> UpdateHandler<HandlerError> {
    Update::filter_message().branch(dptree::entry().filter_command::<Command>().endpoint(
        |bot: Bot, msg: Message, cmd: Command| async move {
            log::info!("🎯 Received command: {:?} from chat {}", cmd, msg.chat.id);
            match cmd {
                Command::Start => {
                    bot.send_message(msg.chat.id, GREETING).await?;
                }
                Command::Help => {
                    bot.send_message(msg.chat.id, Command::descriptions().to_string()).await?;
                }
            }
            Ok(())
        },
    ))
}

fn message_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| msg.text().is_some())
        .endpoint(move |bot: Bot, msg: Message| {
            let deps = deps.clone();
            async move {
                let text = msg.text().unwrap_or_default();
                let Some(url) = extract_url(text) else {
                    bot.send_message(msg.chat.id, USAGE).await?;
                    return Ok(());
                };

                log::info!("📥 Link from chat {}: {}", msg.chat.id, url);
                let chat = chat::ChatId(msg.chat.id.0);
                let source = MessageRef::new(chat, msg.id.0);
                let outcome = deps.orchestrator.handle_request(chat, url, Some(source)).await;
                log::debug!("Request from chat {} ended as {:?}", msg.chat.id, outcome);
                Ok(())
            }
        })
}

fn callback_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_callback_query().endpoint(move |bot: Bot, q: CallbackQuery| {
        let deps = deps.clone();
        async move {
            // Stop the button spinner right away.
            if let Err(e) = bot.answer_callback_query(q.id.clone()).await {
                log::debug!("Failed to answer callback query: {}", e);
            }

            let (Some(message), Some(data)) = (q.message.as_ref(), q.data.as_deref()) else {
                return Ok(());
            };
            let chat = chat::ChatId(message.chat().id.0);

            match deps.orchestrator.handle_selection(chat, data).await {
                Ok(Selection::Started(_)) => log::debug!("Pipeline started for chat {}", chat),
                Ok(Selection::Ignored { phase }) => log::debug!("Tap ignored in chat {} ({})", chat, phase),
                Err(e) => log::debug!("Tap rejected in chat {}: {}", chat, e),
            }
            Ok(())
        }
    })
}
