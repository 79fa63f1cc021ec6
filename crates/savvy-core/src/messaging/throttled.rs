use std::{collections::HashMap, path::Path, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatId, MediaRef, MessageRef, UserId},
    messaging::{
        port::ChatTransport,
        types::{ChannelTarget, InlineKeyboard, Markup, MemberRole},
    },
    Result,
};

/// Outbound pacing. Broadcasts stay under Telegram's bot-wide limit of
/// roughly 30 messages per second and its one-per-second limit per chat.
#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Spacing between consecutive outbound calls of the whole bot.
    pub bot_interval: Duration,
    /// Spacing between consecutive calls that touch the same chat.
    pub chat_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            bot_interval: Duration::from_millis(40),
            chat_interval: Duration::from_millis(1050),
        }
    }
}

/// Hands out evenly spaced send slots.
#[derive(Debug)]
struct Pacer {
    interval: Duration,
    next_slot: Instant,
}

impl Pacer {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Instant::now(),
        }
    }

    /// Claim the next free slot; returns how long the caller must wait for it.
    fn claim(&mut self) -> Duration {
        let now = Instant::now();
        let slot = self.next_slot.max(now);
        self.next_slot = slot + self.interval;
        slot - now
    }

    fn is_idle(&self, now: Instant) -> bool {
        self.next_slot <= now
    }
}

/// ChatTransport decorator that paces outbound calls.
///
/// Broadcasts hit every known user back to back, so this keeps the fan-out
/// under Telegram's flood limits. Callback answers and membership lookups
/// have no chat slot and only wait for the bot-wide one.
pub struct ThrottledTransport {
    inner: Arc<dyn ChatTransport>,
    cfg: ThrottleConfig,
    bot: Mutex<Pacer>,
    chats: Mutex<HashMap<ChatId, Arc<Mutex<Pacer>>>>,
}

impl ThrottledTransport {
    pub fn new(inner: Arc<dyn ChatTransport>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            bot: Mutex::new(Pacer::new(cfg.bot_interval)),
            chats: Mutex::new(HashMap::new()),
        }
    }

    async fn wait_for_chat(&self, chat_id: ChatId) {
        let bot_wait = self.bot.lock().await.claim();
        let pacer = {
            let mut chats = self.chats.lock().await;
            chats
                .entry(chat_id)
                .or_insert_with(|| Arc::new(Mutex::new(Pacer::new(self.cfg.chat_interval))))
                .clone()
        };
        let chat_wait = pacer.lock().await.claim();

        let wait = bot_wait.max(chat_wait);
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }

    async fn wait_for_bot(&self) {
        let wait = self.bot.lock().await.claim();
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }

    /// Forget chats whose last slot has passed and that nobody is waiting on.
    /// A broadcast leaves one entry per recipient behind otherwise.
    pub async fn prune_idle(&self) -> usize {
        let now = Instant::now();
        let mut chats = self.chats.lock().await;
        let before = chats.len();
        chats.retain(|_, pacer| {
            Arc::strong_count(pacer) > 1
                || pacer.try_lock().map_or(true, |p| !p.is_idle(now))
        });
        before - chats.len()
    }

    #[cfg(test)]
    async fn tracked_chats(&self) -> usize {
        self.chats.lock().await.len()
    }
}

#[async_trait::async_trait]
impl ChatTransport for ThrottledTransport {
    async fn send_text(&self, chat_id: ChatId, html: &str, markup: Markup) -> Result<MessageRef> {
        self.wait_for_chat(chat_id).await;
        self.inner.send_text(chat_id, html, markup).await
    }

    async fn edit_text(
        &self,
        msg: MessageRef,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()> {
        self.wait_for_chat(msg.chat_id).await;
        self.inner.edit_text(msg, html, keyboard).await
    }

    async fn send_media(
        &self,
        chat_id: ChatId,
        media: &MediaRef,
        caption: Option<&str>,
        markup: Markup,
    ) -> Result<MessageRef> {
        self.wait_for_chat(chat_id).await;
        self.inner.send_media(chat_id, media, caption, markup).await
    }

    async fn send_video_file(
        &self,
        chat_id: ChatId,
        path: &Path,
        caption: &str,
        markup: Markup,
    ) -> Result<MessageRef> {
        self.wait_for_chat(chat_id).await;
        self.inner
            .send_video_file(chat_id, path, caption, markup)
            .await
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<()> {
        self.wait_for_bot().await;
        self.inner.answer_callback(callback_id, text, alert).await
    }

    async fn member_role(&self, channel: &ChannelTarget, user_id: UserId) -> Result<MemberRole> {
        self.wait_for_bot().await;
        self.inner.member_role(channel, user_id).await
    }
}
