//! Per-user ephemeral state: conversation state plus the pending download offer.
//!
//! Sessions live in process memory only. Expiry policy: a session idle for
//! longer than the configured TTL reads as a fresh `Idle` session and is
//! removed by [`SessionStore::prune_expired`]; with no TTL sessions live until
//! the process exits.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard,
    },
    time::{Duration, Instant},
};

use crate::domain::UserId;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConversationState {
    #[default]
    Idle,
    AdminMenu,
    EditInitialWelcome,
    EditMainWelcome,
    EditWelcomeMedia,
    AddChannel,
    RemoveChannel,
    Broadcast,
}

impl ConversationState {
    /// Every state except `Idle` belongs to the administrator console.
    pub fn is_admin_state(self) -> bool {
        self != ConversationState::Idle
    }
}

/// What the last successful resolution left for the quality-selection step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingOffer {
    pub id: u64,
    pub link: String,
    pub title: String,
    /// Quality label (`"720p"`) → opaque format token.
    pub formats: BTreeMap<String, String>,
}

/// A quality choice validated against the pending offer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingSelection {
    pub link: String,
    pub title: String,
    pub quality: String,
    pub format_id: String,
}

#[derive(Debug)]
struct UserSession {
    state: ConversationState,
    pending: Option<PendingOffer>,
    touched: Instant,
}

impl UserSession {
    fn new(now: Instant) -> Self {
        Self {
            state: ConversationState::Idle,
            pending: None,
            touched: now,
        }
    }
}

#[derive(Debug)]
pub struct SessionStore {
    ttl: Option<Duration>,
    next_offer_id: AtomicU64,
    sessions: Mutex<HashMap<UserId, UserSession>>,
}

impl SessionStore {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            next_offer_id: AtomicU64::new(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UserId, UserSession>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_expired(&self, s: &UserSession, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.saturating_duration_since(s.touched) > ttl,
            None => false,
        }
    }

    /// Fetch (or create) the live session for `user_id`, replacing an expired one.
    fn entry<'a>(
        &self,
        map: &'a mut HashMap<UserId, UserSession>,
        user_id: UserId,
        now: Instant,
    ) -> &'a mut UserSession {
        let expired = map
            .get(&user_id)
            .is_some_and(|s| self.is_expired(s, now));
        if expired {
            map.remove(&user_id);
        }
        let s = map.entry(user_id).or_insert_with(|| UserSession::new(now));
        s.touched = now;
        s
    }

    pub fn state(&self, user_id: UserId) -> ConversationState {
        self.state_at(user_id, Instant::now())
    }

    pub fn state_at(&self, user_id: UserId, now: Instant) -> ConversationState {
        let mut map = self.lock();
        self.entry(&mut map, user_id, now).state
    }

    pub fn set_state(&self, user_id: UserId, state: ConversationState) {
        self.set_state_at(user_id, state, Instant::now())
    }

    pub fn set_state_at(&self, user_id: UserId, state: ConversationState, now: Instant) {
        let mut map = self.lock();
        self.entry(&mut map, user_id, now).state = state;
    }

    /// Replace any previous offer with a new one and return its id.
    pub fn store_offer(
        &self,
        user_id: UserId,
        link: &str,
        title: &str,
        formats: BTreeMap<String, String>,
    ) -> u64 {
        self.store_offer_at(user_id, link, title, formats, Instant::now())
    }

    pub fn store_offer_at(
        &self,
        user_id: UserId,
        link: &str,
        title: &str,
        formats: BTreeMap<String, String>,
        now: Instant,
    ) -> u64 {
        let id = self.next_offer_id.fetch_add(1, Ordering::Relaxed);
        let mut map = self.lock();
        self.entry(&mut map, user_id, now).pending = Some(PendingOffer {
            id,
            link: link.to_string(),
            title: title.to_string(),
            formats,
        });
        id
    }

    pub fn pending_offer(&self, user_id: UserId) -> Option<PendingOffer> {
        let mut map = self.lock();
        self.entry(&mut map, user_id, Instant::now())
            .pending
            .clone()
    }

    /// Look up `quality` in the offer identified by `offer_id`.
    ///
    /// `None` when there is no offer, the offer was superseded, or the quality
    /// is not part of it. The offer stays in place so another quality can be
    /// picked afterwards.
    pub fn selection(&self, user_id: UserId, offer_id: u64, quality: &str) -> Option<PendingSelection> {
        self.selection_at(user_id, offer_id, quality, Instant::now())
    }

    pub fn selection_at(
        &self,
        user_id: UserId,
        offer_id: u64,
        quality: &str,
        now: Instant,
    ) -> Option<PendingSelection> {
        let mut map = self.lock();
        let offer = self.entry(&mut map, user_id, now).pending.as_ref()?;
        if offer.id != offer_id {
            return None;
        }
        let format_id = offer.formats.get(quality)?;
        Some(PendingSelection {
            link: offer.link.clone(),
            title: offer.title.clone(),
            quality: quality.to_string(),
            format_id: format_id.clone(),
        })
    }

    /// Drop every session idle for longer than the TTL. Returns how many went.
    pub fn prune_expired(&self) -> usize {
        self.prune_expired_at(Instant::now())
    }

    pub fn prune_expired_at(&self, now: Instant) -> usize {
        let mut map = self.lock();
        let before = map.len();
        map.retain(|_, s| !self.is_expired(s, now));
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
