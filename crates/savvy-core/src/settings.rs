//! Runtime-editable gating and presentation settings.
//!
//! Readers take an immutable [`GatingConfig`] snapshot; writers publish a whole
//! new snapshot, so nobody ever observes a half-applied edit.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::{config::Config, domain::MediaRef};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatingConfig {
    /// Display/check order; never contains duplicates.
    pub required_channels: Vec<String>,
    pub initial_welcome_text: String,
    pub main_welcome_text: String,
    pub welcome_media: Option<MediaRef>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelEdit {
    Applied,
    Unchanged,
}

pub struct SettingsStore {
    current: ArcSwap<GatingConfig>,
}

impl SettingsStore {
    pub fn new(initial: GatingConfig) -> Self {
        let mut initial = initial;
        let mut seen = Vec::with_capacity(initial.required_channels.len());
        initial.required_channels.retain(|c| {
            if seen.contains(c) {
                false
            } else {
                seen.push(c.clone());
                true
            }
        });
        Self {
            current: ArcSwap::from_pointee(initial),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(GatingConfig {
            required_channels: cfg.required_channels.clone(),
            initial_welcome_text: cfg.initial_welcome_text.clone(),
            main_welcome_text: cfg.main_welcome_text.clone(),
            welcome_media: None,
        })
    }

    pub fn snapshot(&self) -> Arc<GatingConfig> {
        self.current.load_full()
    }

    pub fn set_initial_welcome(&self, text: &str) {
        self.current.rcu(|cur| GatingConfig {
            initial_welcome_text: text.to_string(),
            ..GatingConfig::clone(cur)
        });
    }

    pub fn set_main_welcome(&self, text: &str) {
        self.current.rcu(|cur| GatingConfig {
            main_welcome_text: text.to_string(),
            ..GatingConfig::clone(cur)
        });
    }

    pub fn set_welcome_media(&self, media: MediaRef) {
        self.current.rcu(|cur| GatingConfig {
            welcome_media: Some(media.clone()),
            ..GatingConfig::clone(cur)
        });
    }

    /// Append `channel` unless it is already listed. Returns the list as
    /// published after the edit.
    pub fn add_channel(&self, channel: &str) -> (ChannelEdit, Vec<String>) {
        self.edit_channels(|list| {
            if list.iter().any(|c| c == channel) {
                ChannelEdit::Unchanged
            } else {
                list.push(channel.to_string());
                ChannelEdit::Applied
            }
        })
    }

    pub fn remove_channel(&self, channel: &str) -> (ChannelEdit, Vec<String>) {
        self.edit_channels(|list| {
            let before = list.len();
            list.retain(|c| c != channel);
            if list.len() == before {
                ChannelEdit::Unchanged
            } else {
                ChannelEdit::Applied
            }
        })
    }

    fn edit_channels(
        &self,
        edit: impl Fn(&mut Vec<String>) -> ChannelEdit,
    ) -> (ChannelEdit, Vec<String>) {
        // `rcu` may re-run the closure if another writer raced us; the outcome
        // recorded is the one from the attempt that was actually published.
        let mut outcome = ChannelEdit::Unchanged;
        let mut published = Vec::new();
        self.current.rcu(|cur| {
            let mut next = GatingConfig::clone(cur);
            outcome = edit(&mut next.required_channels);
            published = next.required_channels.clone();
            next
        });
        (outcome, published)
    }
}
