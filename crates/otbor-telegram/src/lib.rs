//! Telegram adapter (teloxide).
//!
//! This crate implements the `otbor-core` MessagingPort over Telegram Bot API and
//! hosts the update dispatcher.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, ParseMode},
    ApiError, RequestError,
};

use tokio::time::sleep;

pub mod handlers;
pub mod router;

use otbor_core::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{InlineKeyboard, MessagingCapabilities},
    },
    Result,
};

/// Telegram's hard limit on message text.
const MAX_MESSAGE_LEN: usize = 4096;
/// One extra attempt after a `RetryAfter` from flood control.
const FLOOD_RETRIES: usize = 1;

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
    teloxide::types::ChatId(chat_id.0)
}

fn request_failed(e: RequestError) -> Error {
    Error::External(format!("telegram error: {e}"))
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    async fn call<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> std::result::Result<T, RequestError>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        let mut retries = 0;
        loop {
            match op().await {
                Err(RequestError::RetryAfter(wait)) if retries < FLOOD_RETRIES => {
                    retries += 1;
                    tracing::warn!(retry_after = ?wait, "telegram flood control, retrying");
                    sleep(wait).await;
                }
                other => return other,
            }
        }
    }

    async fn send(
        &self,
        chat_id: ChatId,
        html: &str,
        markup: Option<InlineKeyboardMarkup>,
    ) -> Result<MessageRef> {
        let msg = self
            .call(|| {
                let req = self
                    .bot
                    .send_message(tg_chat(chat_id), html)
                    .parse_mode(ParseMode::Html)
                    .disable_web_page_preview(true);
                match markup.clone() {
                    Some(m) => req.reply_markup(m),
                    None => req,
                }
            })
            .await
            .map_err(request_failed)?;
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }
}

/// Rows map one to one onto Telegram's inline keyboard rows.
pub fn markup(keyboard: InlineKeyboard) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(keyboard.rows.into_iter().map(|row| {
        row.into_iter()
            .map(|b| InlineKeyboardButton::callback(b.label, b.callback_data))
            .collect::<Vec<_>>()
    }))
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_html: true,
            supports_edit: true,
            supports_inline_keyboards: true,
            max_message_len: MAX_MESSAGE_LEN,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.send(chat_id, html, None).await
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        let edited = self
            .call(|| {
                self.bot
                    .edit_message_text(
                        tg_chat(msg.chat_id),
                        teloxide::types::MessageId(msg.message_id.0),
                        html,
                    )
                    .parse_mode(ParseMode::Html)
                    .disable_web_page_preview(true)
            })
            .await;
        match edited {
            Ok(_) => Ok(()),
            // A repeated button press re-renders identical text.
            Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
            Err(e) => Err(request_failed(e)),
        }
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.send(chat_id, html, Some(markup(keyboard))).await
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.call(|| {
            let req = self.bot.answer_callback_query(callback_id);
            match text {
                Some(t) => req.text(t),
                None => req,
            }
        })
        .await
        .map_err(request_failed)?;
        Ok(())
    }

    async fn bot_username(&self) -> Result<String> {
        let me = self
            .call(|| self.bot.get_me())
            .await
            .map_err(request_failed)?;
        Ok(me.username().to_string())
    }
}

#[cfg(test)]
mod tests {
    use otbor_core::messaging::types::InlineButton;

    use super::*;

    #[test]
    fn markup_keeps_row_layout() {
        let kb = InlineKeyboard::new(vec![
            vec![
                InlineButton::new("✅ Confirm", "reg|confirm"),
                InlineButton::new("❌ Cancel", "reg|cancel"),
            ],
            vec![InlineButton::new("More", "x|1")],
        ]);
        let m = markup(kb);
        assert_eq!(m.inline_keyboard.len(), 2);
        assert_eq!(m.inline_keyboard[0].len(), 2);
        assert_eq!(m.inline_keyboard[0][1].text, "❌ Cancel");
    }
}
