//! [`ChatTransport`] on top of teloxide.

use async_trait::async_trait;
use std::path::Path;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, Message, MessageId};

use reelcore::chat::{self, ChatAction, ChatTransport, KeyboardButton, MessageRef};
use reelcore::core::error::TransportError;

pub struct TeloxideTransport {
    bot: Bot,
    /// Same bot with the upload timeout.
    upload_bot: Bot,
}

impl TeloxideTransport {
    pub fn new(bot: Bot, upload_bot: Bot) -> Self {
        Self { bot, upload_bot }
    }
}

fn tg_chat(chat: chat::ChatId) -> ChatId {
    ChatId(chat.0)
}

fn message_ref(msg: &Message) -> MessageRef {
    MessageRef::new(chat::ChatId(msg.chat.id.0), msg.id.0)
}

fn tg_action(action: ChatAction) -> teloxide::types::ChatAction {
    match action {
        ChatAction::Typing => teloxide::types::ChatAction::Typing,
        ChatAction::UploadDocument => teloxide::types::ChatAction::UploadDocument,
    }
}

fn keyboard(buttons: &[KeyboardButton]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(
        buttons
            .iter()
            .map(|b| vec![InlineKeyboardButton::callback(b.text.clone(), b.data.clone())]),
    )
}

#[async_trait]
impl ChatTransport for TeloxideTransport {
    async fn send_text(&self, chat: chat::ChatId, text: &str) -> Result<MessageRef, TransportError> {
        let msg = self.bot.send_message(tg_chat(chat), text).await?;
        Ok(message_ref(&msg))
    }

    async fn send_keyboard(
        &self,
        chat: chat::ChatId,
        text: &str,
        buttons: &[KeyboardButton],
    ) -> Result<MessageRef, TransportError> {
        let msg = self
            .bot
            .send_message(tg_chat(chat), text)
            .reply_markup(keyboard(buttons))
            .await?;
        Ok(message_ref(&msg))
    }

    async fn edit_text(&self, message: MessageRef, text: &str) -> Result<(), TransportError> {
        self.bot
            .edit_message_text(tg_chat(message.chat), MessageId(message.id), text)
            .await?;
        Ok(())
    }

    async fn delete_message(&self, message: MessageRef) -> Result<(), TransportError> {
        self.bot
            .delete_message(tg_chat(message.chat), MessageId(message.id))
            .await?;
        Ok(())
    }

    async fn send_chat_action(&self, chat: chat::ChatId, action: ChatAction) -> Result<(), TransportError> {
        self.bot.send_chat_action(tg_chat(chat), tg_action(action)).await?;
        Ok(())
    }

    async fn send_document(
        &self,
        chat: chat::ChatId,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<MessageRef, TransportError> {
        let mut request = self.upload_bot.send_document(tg_chat(chat), InputFile::file(path));
        if let Some(caption) = caption {
            request = request.caption(caption);
        }
        let msg = request.await?;
        Ok(message_ref(&msg))
    }
}
