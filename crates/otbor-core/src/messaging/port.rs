use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::types::{InlineKeyboard, MessagingCapabilities, Reply},
    Result,
};

/// Outbound messenger port. Telegram is the only implementation.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    fn capabilities(&self) -> MessagingCapabilities;

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef>;
    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()>;

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef>;

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()>;

    /// Username of the bot account itself, used to build deep links.
    async fn bot_username(&self) -> Result<String>;
}

/// Sends a [`Reply`], with its keyboard when it has one.
pub async fn send_reply(
    messenger: &dyn MessagingPort,
    chat_id: ChatId,
    reply: Reply,
) -> Result<MessageRef> {
    match reply.keyboard {
        Some(kb) if !kb.is_empty() => messenger.send_inline_keyboard(chat_id, &reply.html, kb).await,
        _ => messenger.send_html(chat_id, &reply.html).await,
    }
}
