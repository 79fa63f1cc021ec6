use teloxide::types::CallbackQuery;

use savvy_core::{
    domain::{ChatId, MessageId, MessageRef},
    messaging::types::{self, IncomingUpdate},
};

use super::message::sender;

/// Callback queries without data carry nothing for the engine.
pub(crate) fn to_update(q: &CallbackQuery) -> Option<IncomingUpdate> {
    let data = q.data.clone().filter(|d| !d.is_empty())?;
    let message = q.message.as_ref().map(|m| MessageRef {
        chat_id: ChatId(m.chat.id.0),
        message_id: MessageId(m.id.0),
    });
    // Private chat with the bot when the originating message is unavailable.
    let chat_id = message.map_or(q.from.id.0 as i64, |m| m.chat_id.0);

    Some(IncomingUpdate::Callback(types::CallbackQuery {
        from: sender(&q.from, chat_id),
        callback_id: q.id.clone(),
        data,
        message,
    }))
}
