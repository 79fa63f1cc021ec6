//! Telegram adapter (teloxide).
//!
//! This crate implements the `savvy-core` ChatTransport over the Telegram Bot
//! API and feeds Telegram updates into the conversation engine.

use std::path::Path;

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    ApiError, RequestError,
    types::{
        ChatMemberKind, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, KeyboardButton,
        KeyboardMarkup, ParseMode, Recipient, ReplyMarkup,
    },
};

use tokio::time::sleep;
use tracing::{debug, warn};

pub mod handlers;
pub mod router;

use savvy_core::{
    domain::{ChatId, MediaKind, MediaRef, MessageId, MessageRef, UserId},
    errors::Error,
    messaging::{
        port::ChatTransport,
        types::{ButtonAction, ChannelTarget, InlineKeyboard, Markup, MemberRole, ReplyKeyboard},
    },
    Result,
};

#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn map_err(e: RequestError) -> Error {
        Error::Transport(format!("telegram error: {e}"))
    }

    fn msg_ref(chat_id: ChatId, msg: &Message) -> MessageRef {
        MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        }
    }

    async fn with_retry<T, Fut>(&self, op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        Self::retry_request(op).await.map_err(Self::map_err)
    }

    /// Run `op`, retrying once when Telegram asks us to back off.
    async fn retry_request<T, Fut>(
        mut op: impl FnMut() -> Fut,
    ) -> std::result::Result<T, RequestError>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Err(RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    sleep(d).await;
                }
                other => return other,
            }
        }
    }
}

/// Telegram refuses edits that would leave a message unchanged, e.g. a
/// repeated "I Joined" click that re-renders the same join prompt.
fn is_not_modified(e: &RequestError) -> bool {
    matches!(e, RequestError::Api(ApiError::MessageNotModified))
}

fn reply_keyboard(kb: &ReplyKeyboard) -> KeyboardMarkup {
    let rows: Vec<Vec<KeyboardButton>> = kb
        .rows
        .iter()
        .map(|row| row.iter().map(KeyboardButton::new).collect())
        .collect();
    KeyboardMarkup::new(rows).resize_keyboard(true)
}

/// URL buttons with unparseable links are dropped rather than failing the send.
fn inline_keyboard(kb: &InlineKeyboard) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = kb
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .filter_map(|b| match &b.action {
                    ButtonAction::Callback(data) => {
                        Some(InlineKeyboardButton::callback(b.label.clone(), data.clone()))
                    }
                    ButtonAction::Url(url) => match reqwest::Url::parse(url) {
                        Ok(u) => Some(InlineKeyboardButton::url(b.label.clone(), u)),
                        Err(e) => {
                            warn!(url = %url, error = %e, "dropping button with invalid url");
                            None
                        }
                    },
                })
                .collect::<Vec<_>>()
        })
        .filter(|row| !row.is_empty())
        .collect();
    InlineKeyboardMarkup::new(rows)
}

fn reply_markup(markup: &Markup) -> Option<ReplyMarkup> {
    match markup {
        Markup::None => None,
        Markup::Reply(kb) => Some(ReplyMarkup::Keyboard(reply_keyboard(kb))),
        Markup::Inline(kb) => Some(ReplyMarkup::InlineKeyboard(inline_keyboard(kb))),
    }
}

fn recipient(channel: &ChannelTarget) -> Recipient {
    match channel {
        ChannelTarget::Username(handle) => Recipient::ChannelUsername(handle.clone()),
        ChannelTarget::Id(id) => Recipient::Id(teloxide::types::ChatId(*id)),
    }
}

fn member_role(kind: &ChatMemberKind) -> MemberRole {
    match kind {
        ChatMemberKind::Owner(_) => MemberRole::Owner,
        ChatMemberKind::Administrator(_) => MemberRole::Administrator,
        ChatMemberKind::Member => MemberRole::Member,
        ChatMemberKind::Restricted(_) => MemberRole::Restricted,
        ChatMemberKind::Left => MemberRole::Left,
        ChatMemberKind::Banned(_) => MemberRole::Banned,
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_text(&self, chat_id: ChatId, html: &str, markup: Markup) -> Result<MessageRef> {
        let markup = reply_markup(&markup);
        let msg = self
            .with_retry(|| {
                let mut req = self
                    .bot
                    .send_message(Self::tg_chat(chat_id), html.to_string())
                    .parse_mode(ParseMode::Html);
                if let Some(m) = markup.clone() {
                    req = req.reply_markup(m);
                }
                req
            })
            .await?;
        Ok(Self::msg_ref(chat_id, &msg))
    }

    async fn edit_text(
        &self,
        msg: MessageRef,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()> {
        let keyboard = keyboard.as_ref().map(inline_keyboard);
        let result = Self::retry_request(|| {
            let mut req = self
                .bot
                .edit_message_text(
                    Self::tg_chat(msg.chat_id),
                    Self::tg_msg_id(msg.message_id),
                    html.to_string(),
                )
                .parse_mode(ParseMode::Html);
            if let Some(kb) = keyboard.clone() {
                req = req.reply_markup(kb);
            }
            req
        })
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_not_modified(&e) => {
                debug!(message_id = msg.message_id.0, "edit left message unchanged");
                Ok(())
            }
            Err(e) => Err(Self::map_err(e)),
        }
    }

    async fn send_media(
        &self,
        chat_id: ChatId,
        media: &MediaRef,
        caption: Option<&str>,
        markup: Markup,
    ) -> Result<MessageRef> {
        let markup = reply_markup(&markup);
        let file = InputFile::file_id(media.file_id.clone());
        let chat = Self::tg_chat(chat_id);

        let msg = match media.kind {
            MediaKind::Photo => {
                self.with_retry(|| {
                    let mut req = self
                        .bot
                        .send_photo(chat, file.clone())
                        .parse_mode(ParseMode::Html);
                    if let Some(c) = caption {
                        req = req.caption(c.to_string());
                    }
                    if let Some(m) = markup.clone() {
                        req = req.reply_markup(m);
                    }
                    req
                })
                .await?
            }
            MediaKind::Animation => {
                self.with_retry(|| {
                    let mut req = self
                        .bot
                        .send_animation(chat, file.clone())
                        .parse_mode(ParseMode::Html);
                    if let Some(c) = caption {
                        req = req.caption(c.to_string());
                    }
                    if let Some(m) = markup.clone() {
                        req = req.reply_markup(m);
                    }
                    req
                })
                .await?
            }
            MediaKind::Document => {
                self.with_retry(|| {
                    let mut req = self
                        .bot
                        .send_document(chat, file.clone())
                        .parse_mode(ParseMode::Html);
                    if let Some(c) = caption {
                        req = req.caption(c.to_string());
                    }
                    if let Some(m) = markup.clone() {
                        req = req.reply_markup(m);
                    }
                    req
                })
                .await?
            }
        };
        Ok(Self::msg_ref(chat_id, &msg))
    }

    async fn send_video_file(
        &self,
        chat_id: ChatId,
        path: &Path,
        caption: &str,
        markup: Markup,
    ) -> Result<MessageRef> {
        let markup = reply_markup(&markup);
        let msg = self
            .with_retry(|| {
                let mut req = self
                    .bot
                    .send_video(Self::tg_chat(chat_id), InputFile::file(path.to_path_buf()))
                    .caption(caption.to_string())
                    .parse_mode(ParseMode::Html)
                    .supports_streaming(true);
                if let Some(m) = markup.clone() {
                    req = req.reply_markup(m);
                }
                req
            })
            .await?;
        Ok(Self::msg_ref(chat_id, &msg))
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<()> {
        self.with_retry(|| {
            let mut req = self.bot.answer_callback_query(callback_id.to_string());
            if let Some(t) = text {
                req = req.text(t.to_string()).show_alert(alert);
            }
            req
        })
        .await?;
        Ok(())
    }

    async fn member_role(&self, channel: &ChannelTarget, user_id: UserId) -> Result<MemberRole> {
        let user = teloxide::types::UserId(u64::try_from(user_id.0).map_err(|_| {
            Error::Transport(format!("invalid telegram user id {}", user_id.0))
        })?);
        let member = self
            .with_retry(|| self.bot.get_chat_member(recipient(channel), user))
            .await?;
        Ok(member_role(&member.kind))
    }
}
