//! Button labels, keyboards and callback payloads.

use crate::{
    gate::join_url,
    messaging::types::{InlineButton, InlineKeyboard, ReplyKeyboard},
    resolve::VideoOffer,
};

pub const BTN_START: &str = "🚀 Start";
pub const BTN_ADMIN_PANEL: &str = "🛠️ Admin Panel";
pub const BTN_EDIT_INITIAL: &str = "✏️ Edit Initial Welcome";
pub const BTN_EDIT_MAIN: &str = "📝 Edit Main Welcome";
pub const BTN_EDIT_MEDIA: &str = "🎨 Edit Welcome Media";
pub const BTN_ADD_CHANNEL: &str = "➕ Add Channel";
pub const BTN_REMOVE_CHANNEL: &str = "➖ Remove Channel";
pub const BTN_BROADCAST: &str = "📢 Broadcast";
pub const BTN_USER_COUNT: &str = "👥 User Count";
pub const BTN_BACK: &str = "⬅️ Back";
pub const BTN_CANCEL: &str = "❌ Cancel";

pub const BTN_JOIN_CHANNEL: &str = "✅ Join Channel";
pub const BTN_I_JOINED: &str = "✔️ I Joined";

pub const CB_CHECK_JOINED: &str = "check_joined";
const CB_DOWNLOAD_PREFIX: &str = "dl:";

/// True for the labels that leave an admin sub-state.
pub fn is_cancel(text: &str) -> bool {
    let t = text.trim();
    t == BTN_CANCEL || t == BTN_BACK
}

pub fn main_keyboard(is_admin: bool) -> ReplyKeyboard {
    let mut rows = vec![vec![BTN_START]];
    if is_admin {
        rows.push(vec![BTN_ADMIN_PANEL]);
    }
    ReplyKeyboard::new(rows)
}

pub fn admin_keyboard() -> ReplyKeyboard {
    ReplyKeyboard::new(vec![
        vec![BTN_EDIT_INITIAL, BTN_EDIT_MAIN],
        vec![BTN_EDIT_MEDIA],
        vec![BTN_ADD_CHANNEL, BTN_REMOVE_CHANNEL],
        vec![BTN_BROADCAST, BTN_USER_COUNT],
        vec![BTN_BACK],
    ])
}

pub fn cancel_keyboard() -> ReplyKeyboard {
    ReplyKeyboard::new(vec![vec![BTN_CANCEL]])
}

/// One join button per linkable channel, then the re-check button.
pub fn join_keyboard(unmet: &[String]) -> InlineKeyboard {
    let mut buttons: Vec<InlineButton> = unmet
        .iter()
        .filter_map(|c| join_url(c))
        .map(|url| InlineButton::url(BTN_JOIN_CHANNEL, url))
        .collect();
    buttons.push(InlineButton::callback(BTN_I_JOINED, CB_CHECK_JOINED));
    InlineKeyboard::one_per_row(buttons)
}

pub fn download_callback(offer_id: u64, quality: &str) -> String {
    format!("{CB_DOWNLOAD_PREFIX}{offer_id}:{quality}")
}

/// Inverse of [`download_callback`].
pub fn parse_download_callback(data: &str) -> Option<(u64, &str)> {
    let rest = data.strip_prefix(CB_DOWNLOAD_PREFIX)?;
    let (id, quality) = rest.split_once(':')?;
    if quality.is_empty() {
        return None;
    }
    Some((id.parse().ok()?, quality))
}

/// Two quality buttons per row, tallest first.
pub fn quality_keyboard(offer: &VideoOffer) -> InlineKeyboard {
    let buttons: Vec<InlineButton> = offer
        .tiers
        .iter()
        .map(|t| {
            InlineButton::callback(
                format!("📥 {}", t.label),
                download_callback(offer.offer_id, &t.label),
            )
        })
        .collect();
    InlineKeyboard {
        rows: buttons.chunks(2).map(<[InlineButton]>::to_vec).collect(),
    }
}
