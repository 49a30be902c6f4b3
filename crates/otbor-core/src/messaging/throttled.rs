use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{
    sync::Mutex,
    time::{sleep, Instant},
};

use crate::{
    domain::{ChatId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{InlineKeyboard, MessagingCapabilities},
    },
    Result,
};

/// Outbound pacing for Telegram's flood limits.
#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Gap between any two API calls (~25/sec).
    pub global_gap: Duration,
    /// Gap between two calls into the same chat (just under 1/sec).
    pub chat_gap: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_gap: Duration::from_millis(40),
            chat_gap: Duration::from_millis(1050),
        }
    }
}

/// Next free instant, globally and per chat. Chats whose instant has passed
/// carry no information and are pruned.
#[derive(Debug)]
struct Pacer {
    cfg: ThrottleConfig,
    global_next: Instant,
    chat_next: HashMap<i64, Instant>,
}

impl Pacer {
    fn new(cfg: ThrottleConfig) -> Self {
        Self {
            cfg,
            global_next: Instant::now(),
            chat_next: HashMap::new(),
        }
    }

    /// Books the earliest start that respects both gaps and returns how long
    /// the caller has to wait for it.
    fn book(&mut self, chat: Option<i64>) -> Duration {
        let now = Instant::now();
        self.chat_next.retain(|_, next| *next > now);

        let mut start = self.global_next.max(now);
        if let Some(chat) = chat {
            if let Some(next) = self.chat_next.get(&chat) {
                start = start.max(*next);
            }
            self.chat_next.insert(chat, start + self.cfg.chat_gap);
        }
        self.global_next = start + self.cfg.global_gap;
        start - now
    }
}

/// [`MessagingPort`] decorator that spaces out calls.
///
/// Bulk invite generation (`links|<faculty>`) sends one message per slot; this keeps
/// those bursts under the flood limits. It does not rule out 429s entirely.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    pacer: Mutex<Pacer>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            pacer: Mutex::new(Pacer::new(cfg)),
        }
    }

    async fn pace(&self, chat: Option<ChatId>) {
        let wait = self.pacer.lock().await.book(chat.map(|c| c.0));
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl MessagingPort for ThrottledMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        self.inner.capabilities()
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.pace(Some(chat_id)).await;
        self.inner.send_html(chat_id, html).await
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.pace(Some(msg.chat_id)).await;
        self.inner.edit_html(msg, html).await
    }

    async fn send_inline_keyboard(
        &self,
        chat_id: ChatId,
        html: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.pace(Some(chat_id)).await;
        self.inner.send_inline_keyboard(chat_id, html, keyboard).await
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.pace(None).await;
        self.inner.answer_callback_query(callback_id, text).await
    }

    async fn bot_username(&self) -> Result<String> {
        self.pace(None).await;
        self.inner.bot_username().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pacer() -> Pacer {
        Pacer::new(ThrottleConfig {
            global_gap: Duration::from_millis(10),
            chat_gap: Duration::from_millis(100),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn same_chat_waits_for_the_chat_gap() {
        let mut p = pacer();
        assert_eq!(p.book(Some(1)), Duration::ZERO);
        assert_eq!(p.book(Some(1)), Duration::from_millis(100));
        assert_eq!(p.book(Some(1)), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn other_chats_only_wait_for_the_global_gap() {
        let mut p = pacer();
        assert_eq!(p.book(Some(1)), Duration::ZERO);
        assert_eq!(p.book(Some(2)), Duration::from_millis(10));
        assert_eq!(p.book(None), Duration::from_millis(20));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_chats_are_forgotten() {
        let mut p = pacer();
        p.book(Some(1));
        p.book(Some(2));
        assert_eq!(p.chat_next.len(), 2);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(p.book(None), Duration::ZERO);
        assert!(p.chat_next.is_empty());
    }
}
