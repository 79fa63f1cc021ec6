use crate::domain::{ChatId, MediaRef, MessageRef, UserId};

/// Transport-agnostic incoming update model.
///
/// Telegram-specific fields stay in the Telegram adapter.
#[derive(Clone, Debug)]
pub enum IncomingUpdate {
    /// The entry interaction (`/start`).
    Start(Sender),
    Text {
        from: Sender,
        text: String,
    },
    Media {
        from: Sender,
        media: MediaRef,
        caption: Option<String>,
    },
    Callback(CallbackQuery),
}

impl IncomingUpdate {
    pub fn sender(&self) -> &Sender {
        match self {
            IncomingUpdate::Start(s) => s,
            IncomingUpdate::Text { from, .. } => from,
            IncomingUpdate::Media { from, .. } => from,
            IncomingUpdate::Callback(q) => &q.from,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Sender {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub username: Option<String>,
}

#[derive(Clone, Debug)]
pub struct CallbackQuery {
    pub from: Sender,
    pub callback_id: String,
    pub data: String,
    pub message: Option<MessageRef>,
}

/// Where a membership lookup is addressed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChannelTarget {
    /// Public handle including the leading `@`.
    Username(String),
    Id(i64),
}

/// A user's role inside a channel, as reported by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberRole {
    Owner,
    Administrator,
    Member,
    Restricted,
    Left,
    Banned,
}

impl MemberRole {
    /// Only full members count for gating; restricted users do not.
    pub fn is_joined(self) -> bool {
        matches!(
            self,
            MemberRole::Owner | MemberRole::Administrator | MemberRole::Member
        )
    }
}

/// Reply markup attached to an outgoing message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Markup {
    #[default]
    None,
    Reply(ReplyKeyboard),
    Inline(InlineKeyboard),
}

/// Persistent keyboard under the input field; each button sends its label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyKeyboard {
    pub rows: Vec<Vec<String>>,
}

impl ReplyKeyboard {
    pub fn new(rows: Vec<Vec<&str>>) -> Self {
        Self {
            rows: rows
                .into_iter()
                .map(|r| r.into_iter().map(str::to_string).collect())
                .collect(),
        }
    }
}

/// Inline keyboard (buttons attached to a message).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub rows: Vec<Vec<InlineButton>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub action: ButtonAction,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ButtonAction {
    Callback(String),
    Url(String),
}

impl InlineKeyboard {
    /// Convenience for "one button per row" layouts.
    pub fn one_per_row(buttons: Vec<InlineButton>) -> Self {
        Self {
            rows: buttons.into_iter().map(|b| vec![b]).collect(),
        }
    }
}

impl InlineButton {
    pub fn callback(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Callback(data.into()),
        }
    }

    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Url(url.into()),
        }
    }
}
