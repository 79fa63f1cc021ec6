use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    domain::{ChatId, Payload},
    messaging::{port::ChatTransport, types::Markup},
    registry::UserRegistry,
    Result,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Sends one payload to every known user.
///
/// Recipients are taken from a registry snapshot; users registering while a
/// broadcast is running are not included in it.
pub struct Broadcaster {
    registry: Arc<UserRegistry>,
    transport: Arc<dyn ChatTransport>,
}

impl Broadcaster {
    pub fn new(registry: Arc<UserRegistry>, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            registry,
            transport,
        }
    }

    pub async fn broadcast(&self, payload: &Payload) -> BroadcastReport {
        let recipients = self.registry.snapshot();
        let mut report = BroadcastReport::default();

        for user_id in recipients {
            match self.deliver(ChatId::from(user_id), payload).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "broadcast delivery failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            delivered = report.delivered,
            failed = report.failed,
            "broadcast finished"
        );
        report
    }

    async fn deliver(&self, chat_id: ChatId, payload: &Payload) -> Result<()> {
        match payload {
            Payload::Text(html) => {
                self.transport.send_text(chat_id, html, Markup::None).await?;
            }
            Payload::Media { media, caption } => {
                self.transport
                    .send_media(chat_id, media, caption.as_deref(), Markup::None)
                    .await?;
            }
        }
        Ok(())
    }
}
