use std::{collections::HashMap, sync::Arc, time::Duration};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use savvy_core::{
    config::Config,
    conversation::ConversationEngine,
    domain::UserId,
    media::MediaEngine,
    messaging::{
        port::ChatTransport,
        throttled::{ThrottleConfig, ThrottledTransport},
    },
    session::SessionStore,
};

use crate::handlers;
use crate::TelegramTransport;

/// How often expired sessions and idle locks are swept.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(10 * 60);

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConversationEngine>,
    pub user_locks: Arc<UserLocks>,
}

/// One async mutex per user: updates from the same user are handled in
/// arrival order, different users run concurrently.
#[derive(Default)]
pub struct UserLocks {
    inner: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub async fn lock_user(&self, user_id: UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(user_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Drop locks that nobody holds or waits on.
    pub async fn prune_idle(&self) -> usize {
        let mut map = self.inner.lock().await;
        let before = map.len();
        map.retain(|_, lock| Arc::strong_count(lock) > 1 || lock.try_lock().is_err());
        before - map.len()
    }
}

/// Periodic cleanup of per-user and per-chat bookkeeping.
fn spawn_housekeeping(
    sessions: Option<Arc<SessionStore>>,
    throttle: Arc<ThrottledTransport>,
    locks: Arc<UserLocks>,
) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        tick.tick().await;
        loop {
            tick.tick().await;
            if let Some(sessions) = &sessions {
                let removed = sessions.prune_expired();
                if removed > 0 {
                    debug!(removed, remaining = sessions.len(), "pruned expired sessions");
                }
            }
            let chats = throttle.prune_idle().await;
            let users = locks.prune_idle().await;
            if chats + users > 0 {
                debug!(chats, users, "pruned idle limiters and locks");
            }
        }
    });
}

pub async fn run_polling(cfg: Arc<Config>, media: Arc<dyn MediaEngine>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.bot_token.clone());

    match bot.get_me().await {
        Ok(me) => info!(username = %me.username(), "bot started"),
        Err(e) => warn!(error = %e, "get_me failed; continuing"),
    }
    info!(
        admin_id = %cfg.admin_id,
        channels = cfg.required_channels.len(),
        temp_dir = %cfg.temp_dir.display(),
        "configuration loaded"
    );

    // Throttle outbound calls so broadcasts and status edits stay under
    // Telegram's flood limits; the adapter still retries once on RetryAfter.
    let raw_transport: Arc<dyn ChatTransport> = Arc::new(TelegramTransport::new(bot.clone()));
    let throttle = Arc::new(ThrottledTransport::new(
        raw_transport,
        ThrottleConfig::default(),
    ));

    let engine = Arc::new(ConversationEngine::new(&cfg, throttle.clone(), media));
    let user_locks = Arc::new(UserLocks::default());
    let sessions = cfg.session_ttl.map(|_| engine.sessions());
    spawn_housekeeping(sessions, throttle, user_locks.clone());

    let state = Arc::new(AppState { engine, user_locks });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("dispatcher stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_user_is_serialized() {
        let locks = UserLocks::default();
        let guard = locks.lock_user(UserId(1)).await;

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), locks.lock_user(UserId(1))).await;
        assert!(blocked.is_err());

        drop(guard);
        let _again = tokio::time::timeout(Duration::from_millis(50), locks.lock_user(UserId(1)))
            .await
            .expect("lock should be free after release");
    }

    #[tokio::test]
    async fn only_idle_locks_are_pruned() {
        let locks = UserLocks::default();
        let held = locks.lock_user(UserId(1)).await;
        drop(locks.lock_user(UserId(2)).await);

        assert_eq!(locks.prune_idle().await, 1);
        assert_eq!(locks.inner.lock().await.len(), 1);

        drop(held);
        assert_eq!(locks.prune_idle().await, 1);
    }

    #[tokio::test]
    async fn different_users_do_not_block_each_other() {
        let locks = UserLocks::default();
        let _a = locks.lock_user(UserId(1)).await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.lock_user(UserId(2))).await;
        assert!(b.is_ok());
    }
}
