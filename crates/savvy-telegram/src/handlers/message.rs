use teloxide::types::{Message, User};

use savvy_core::{
    domain::{ChatId, MediaKind, MediaRef, UserId},
    messaging::types::{IncomingUpdate, Sender},
};

use super::commands::is_start;

pub(crate) fn sender(user: &User, chat_id: i64) -> Sender {
    Sender {
        chat_id: ChatId(chat_id),
        user_id: UserId(user.id.0 as i64),
        username: user.username.clone(),
    }
}

/// Telegram attaches a document to every animation, so animations win.
pub(crate) fn pick_media(
    animation: Option<&str>,
    photo: Option<&str>,
    document: Option<&str>,
) -> Option<MediaRef> {
    let (kind, id) = match (animation, photo, document) {
        (Some(id), _, _) => (MediaKind::Animation, id),
        (None, Some(id), _) => (MediaKind::Photo, id),
        (None, None, Some(id)) => (MediaKind::Document, id),
        (None, None, None) => return None,
    };
    Some(MediaRef {
        kind,
        file_id: id.to_string(),
    })
}

/// Map a Telegram message onto the engine's update model. Messages without a
/// sender or with unsupported content yield `None`.
pub(crate) fn to_update(msg: &Message) -> Option<IncomingUpdate> {
    let from = sender(msg.from()?, msg.chat.id.0);

    if let Some(text) = msg.text() {
        if is_start(text) {
            return Some(IncomingUpdate::Start(from));
        }
        return Some(IncomingUpdate::Text {
            from,
            text: text.to_string(),
        });
    }

    // Largest photo size last.
    let photo = msg.photo().and_then(|sizes| sizes.last()).map(|p| p.file.id.as_str());
    let media = pick_media(
        msg.animation().map(|a| a.file.id.as_str()),
        photo,
        msg.document().map(|d| d.file.id.as_str()),
    )?;

    Some(IncomingUpdate::Media {
        from,
        media,
        caption: msg.caption().map(str::to_string),
    })
}
