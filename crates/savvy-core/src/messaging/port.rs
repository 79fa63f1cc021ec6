use std::path::Path;

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MediaRef, MessageRef, UserId},
    messaging::types::{ChannelTarget, InlineKeyboard, Markup, MemberRole},
    Result,
};

/// Chat transport port.
///
/// Telegram is the only implementation; the engine and pipelines depend on this
/// capability surface, never on a wire format. All text arguments are Telegram
/// HTML.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, chat_id: ChatId, html: &str, markup: Markup) -> Result<MessageRef>;

    async fn edit_text(
        &self,
        msg: MessageRef,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()>;

    /// Re-send an already uploaded photo/animation/document by reference.
    async fn send_media(
        &self,
        chat_id: ChatId,
        media: &MediaRef,
        caption: Option<&str>,
        markup: Markup,
    ) -> Result<MessageRef>;

    /// Upload a local video file (streamable).
    async fn send_video_file(
        &self,
        chat_id: ChatId,
        path: &Path,
        caption: &str,
        markup: Markup,
    ) -> Result<MessageRef>;

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>, alert: bool)
        -> Result<()>;

    async fn member_role(&self, channel: &ChannelTarget, user_id: UserId) -> Result<MemberRole>;
}
