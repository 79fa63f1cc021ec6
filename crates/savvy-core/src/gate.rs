//! Channel-membership gate in front of the welcome screen and link handling.

use std::sync::Arc;

use tracing::warn;

use crate::{
    domain::UserId,
    messaging::{port::ChatTransport, types::ChannelTarget},
    settings::SettingsStore,
};

/// Outcome of a gate evaluation: the configured channel entries (verbatim)
/// the user has not joined, in configured order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GateStatus {
    pub unmet: Vec<String>,
}

impl GateStatus {
    pub fn is_satisfied(&self) -> bool {
        self.unmet.is_empty()
    }
}

/// Turn an admin-entered channel reference into something the transport can
/// look up.
///
/// Accepts `@handle`, bare `handle`, numeric chat ids (`-100…`) and links
/// (`https://t.me/handle`, query/fragment ignored). Private invite links and
/// empty input have no resolvable handle.
pub fn normalize_channel(raw: &str) -> Option<ChannelTarget> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if raw.contains('/') {
        let without_scheme = raw
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(raw);
        let path = without_scheme
            .split(&['?', '#'][..])
            .next()
            .unwrap_or_default();
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let _host = segments.next()?;
        let last = segments.last()?;
        if last.starts_with('+') {
            return None;
        }
        return Some(ChannelTarget::Username(format!(
            "@{}",
            last.trim_start_matches('@')
        )));
    }

    if let Ok(id) = raw.parse::<i64>() {
        return Some(ChannelTarget::Id(id));
    }

    let handle = raw.trim_start_matches('@');
    if handle.is_empty() {
        return None;
    }
    Some(ChannelTarget::Username(format!("@{handle}")))
}

/// Link for the "Join Channel" button, if the entry is linkable.
pub fn join_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Some(raw.to_string());
    }
    match normalize_channel(raw)? {
        ChannelTarget::Username(h) => Some(format!("https://t.me/{}", h.trim_start_matches('@'))),
        ChannelTarget::Id(_) => None,
    }
}

pub struct MembershipGate {
    settings: Arc<SettingsStore>,
    transport: Arc<dyn ChatTransport>,
}

impl MembershipGate {
    pub fn new(settings: Arc<SettingsStore>, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            settings,
            transport,
        }
    }

    /// Evaluate every configured channel. Lookup failures count as "not
    /// joined" and never abort the remaining checks. Read-only.
    pub async fn check(&self, user_id: UserId) -> GateStatus {
        let channels = self.settings.snapshot().required_channels.clone();
        let mut unmet = Vec::new();

        for raw in channels {
            let Some(target) = normalize_channel(&raw) else {
                warn!(channel = %raw, "channel entry cannot be resolved; treating as not joined");
                unmet.push(raw);
                continue;
            };

            match self.transport.member_role(&target, user_id).await {
                Ok(role) if role.is_joined() => {}
                Ok(_) => unmet.push(raw),
                Err(e) => {
                    warn!(channel = %raw, user_id = %user_id, error = %e, "membership check failed");
                    unmet.push(raw);
                }
            }
        }

        GateStatus { unmet }
    }
}
