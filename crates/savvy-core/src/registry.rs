use std::{collections::HashSet, sync::RwLock};

use crate::domain::UserId;

/// Every user ever seen via `/start`. Append-only for the process lifetime.
#[derive(Debug, Default)]
pub struct UserRegistry {
    users: RwLock<HashSet<UserId>>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the user was not known before.
    pub fn register(&self, user_id: UserId) -> bool {
        self.users
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id)
    }

    pub fn len(&self) -> usize {
        self.users.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy, sorted for deterministic fan-out order.
    pub fn snapshot(&self) -> Vec<UserId> {
        let mut out: Vec<UserId> = self
            .users
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .copied()
            .collect();
        out.sort();
        out
    }
}
