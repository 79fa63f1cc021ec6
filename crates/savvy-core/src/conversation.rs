//! Conversation state machine: routes every inbound update by the sender's
//! current state and drives the gate, pipelines, settings edits and broadcast.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::{
    broadcast::Broadcaster,
    config::Config,
    domain::{ChatId, MediaRef, MessageRef, Payload, UserId},
    download::{DownloadPipeline, DownloadSettings},
    formatting::{escape_html, format_duration, markdown_to_html},
    gate::MembershipGate,
    media::MediaEngine,
    messaging::{
        port::ChatTransport,
        types::{CallbackQuery, IncomingUpdate, Markup, Sender},
    },
    registry::UserRegistry,
    resolve::{is_supported_link, ResolutionError, ResolutionPipeline, VideoOffer},
    session::{ConversationState, SessionStore},
    settings::{ChannelEdit, SettingsStore},
    ui, Result,
};

const MSG_ANALYZING: &str = "🔍 Analyzing your link…";
const MSG_NOT_AUTHORIZED: &str = "⛔ You are not authorized to use the admin panel.";
const MSG_SEND_LINK: &str =
    "📎 Please send a video link (YouTube, Instagram, TikTok, Facebook, Twitter…).";
const MSG_CANCELLED: &str = "❌ Cancelled.";
const MSG_NEED_TEXT: &str = "❌ Please send some text, or press Cancel.";
const MSG_NEED_MEDIA: &str = "❌ Please send a photo, document or GIF.";
const MSG_NOT_JOINED: &str = "❌ You haven't joined all required channels yet.";
const MSG_VERIFIED: &str = "✅ Verified!";
const MSG_SENT: &str = "✅ Video sent successfully!";

pub struct ConversationEngine {
    admin_id: UserId,
    gate_links: bool,
    transport: Arc<dyn ChatTransport>,
    settings: Arc<SettingsStore>,
    registry: Arc<UserRegistry>,
    sessions: Arc<SessionStore>,
    gate: MembershipGate,
    resolver: ResolutionPipeline,
    downloads: DownloadPipeline,
    broadcaster: Broadcaster,
}

impl ConversationEngine {
    /// Wire the stores and pipelines for one bot process.
    pub fn new(
        cfg: &Config,
        transport: Arc<dyn ChatTransport>,
        engine: Arc<dyn MediaEngine>,
    ) -> Self {
        let settings = Arc::new(SettingsStore::from_config(cfg));
        let registry = Arc::new(UserRegistry::new());
        let sessions = Arc::new(SessionStore::new(cfg.session_ttl));

        Self {
            admin_id: cfg.admin_id,
            gate_links: cfg.gate_links,
            gate: MembershipGate::new(settings.clone(), transport.clone()),
            resolver: ResolutionPipeline::new(engine.clone(), sessions.clone(), cfg.resolve_timeout),
            downloads: DownloadPipeline::new(
                engine,
                transport.clone(),
                sessions.clone(),
                DownloadSettings {
                    temp_dir: cfg.temp_dir.clone(),
                    max_filesize_bytes: cfg.max_filesize_bytes,
                    max_concurrent: cfg.max_concurrent_downloads,
                    timeout: cfg.download_timeout,
                },
            ),
            broadcaster: Broadcaster::new(registry.clone(), transport.clone()),
            transport,
            settings,
            registry,
            sessions,
        }
    }

    pub fn sessions(&self) -> Arc<SessionStore> {
        self.sessions.clone()
    }

    fn is_admin(&self, user_id: UserId) -> bool {
        user_id == self.admin_id
    }

    pub async fn handle(&self, update: IncomingUpdate) -> Result<()> {
        match update {
            IncomingUpdate::Start(from) => self.on_start(&from).await,
            IncomingUpdate::Text { from, text } => self.on_text(&from, &text).await,
            IncomingUpdate::Media {
                from,
                media,
                caption,
            } => self.on_media(&from, media, caption).await,
            IncomingUpdate::Callback(q) => self.on_callback(q).await,
        }
    }

    /// Current state, with admin states revoked for anyone but the admin.
    fn state_for(&self, user_id: UserId) -> ConversationState {
        let state = self.sessions.state(user_id);
        if state.is_admin_state() && !self.is_admin(user_id) {
            error!(user_id = %user_id, state = ?state, "non-admin found in admin state; resetting");
            self.sessions.set_state(user_id, ConversationState::Idle);
            return ConversationState::Idle;
        }
        state
    }

    async fn reply(&self, chat_id: ChatId, html: &str, markup: Markup) -> Result<MessageRef> {
        self.transport.send_text(chat_id, html, markup).await
    }

    async fn on_start(&self, from: &Sender) -> Result<()> {
        if self.registry.register(from.user_id) {
            info!(user_id = %from.user_id, username = ?from.username, "new user registered");
        }
        self.sessions.set_state(from.user_id, ConversationState::Idle);

        let text = markdown_to_html(&self.settings.snapshot().initial_welcome_text);
        let keyboard = ui::main_keyboard(self.is_admin(from.user_id));
        self.reply(from.chat_id, &text, Markup::Reply(keyboard)).await?;
        Ok(())
    }

    async fn on_text(&self, from: &Sender, text: &str) -> Result<()> {
        let user_id = from.user_id;
        let trimmed = text.trim();

        match self.state_for(user_id) {
            ConversationState::Idle => self.on_idle_text(from, trimmed).await,
            ConversationState::AdminMenu => self.on_admin_menu(from, trimmed).await,
            state if ui::is_cancel(trimmed) => {
                info!(user_id = %user_id, state = ?state, "admin action cancelled");
                self.back_to_admin_menu(from, MSG_CANCELLED).await
            }
            _ if trimmed.is_empty() => self.back_to_admin_menu(from, MSG_NEED_TEXT).await,
            ConversationState::EditInitialWelcome => {
                self.settings.set_initial_welcome(trimmed);
                info!(user_id = %user_id, "initial welcome text updated");
                self.back_to_admin_menu(from, "✅ Initial welcome text updated!")
                    .await
            }
            ConversationState::EditMainWelcome => {
                self.settings.set_main_welcome(trimmed);
                info!(user_id = %user_id, "main welcome text updated");
                self.back_to_admin_menu(from, "✅ Main welcome text updated!")
                    .await
            }
            ConversationState::EditWelcomeMedia => {
                self.back_to_admin_menu(from, MSG_NEED_MEDIA).await
            }
            ConversationState::AddChannel => {
                let (outcome, channels) = self.settings.add_channel(trimmed);
                let head = match outcome {
                    ChannelEdit::Applied => {
                        info!(user_id = %user_id, channel = trimmed, "required channel added");
                        format!("✅ Channel {} added!", escape_html(trimmed))
                    }
                    ChannelEdit::Unchanged => {
                        format!("⚠️ Channel {} already exists.", escape_html(trimmed))
                    }
                };
                let msg = format!("{head}\n\n<b>Current channels:</b>\n{}", channel_list(&channels));
                self.back_to_admin_menu(from, &msg).await
            }
            ConversationState::RemoveChannel => {
                let (outcome, channels) = self.settings.remove_channel(trimmed);
                let head = match outcome {
                    ChannelEdit::Applied => {
                        info!(user_id = %user_id, channel = trimmed, "required channel removed");
                        format!("✅ Channel {} removed!", escape_html(trimmed))
                    }
                    ChannelEdit::Unchanged => {
                        format!("⚠️ Channel {} not found.", escape_html(trimmed))
                    }
                };
                let msg = format!("{head}\n\n<b>Current channels:</b>\n{}", channel_list(&channels));
                self.back_to_admin_menu(from, &msg).await
            }
            ConversationState::Broadcast => {
                self.run_broadcast(from, Payload::Text(markdown_to_html(trimmed)))
                    .await
            }
        }
    }

    async fn on_media(&self, from: &Sender, media: MediaRef, caption: Option<String>) -> Result<()> {
        let user_id = from.user_id;
        match self.state_for(user_id) {
            ConversationState::Idle => {
                self.reply(from.chat_id, MSG_SEND_LINK, Markup::None).await?;
                Ok(())
            }
            ConversationState::AdminMenu => self.render_admin_menu(from.chat_id).await,
            ConversationState::EditWelcomeMedia => {
                let kind = media.kind;
                self.settings.set_welcome_media(media);
                info!(user_id = %user_id, kind = kind.as_str(), "welcome media updated");
                let msg = format!("✅ Welcome {} updated!", kind.as_str());
                self.back_to_admin_menu(from, &msg).await
            }
            ConversationState::Broadcast => {
                let caption = caption
                    .filter(|c| !c.trim().is_empty())
                    .map(|c| markdown_to_html(&c));
                self.run_broadcast(from, Payload::Media { media, caption })
                    .await
            }
            ConversationState::EditInitialWelcome
            | ConversationState::EditMainWelcome
            | ConversationState::AddChannel
            | ConversationState::RemoveChannel => {
                self.back_to_admin_menu(from, MSG_NEED_TEXT).await
            }
        }
    }

    async fn on_idle_text(&self, from: &Sender, text: &str) -> Result<()> {
        let user_id = from.user_id;

        if text == ui::BTN_ADMIN_PANEL {
            if !self.is_admin(user_id) {
                warn!(user_id = %user_id, "admin panel requested by non-admin");
                self.reply(from.chat_id, MSG_NOT_AUTHORIZED, Markup::None).await?;
                return Ok(());
            }
            self.sessions.set_state(user_id, ConversationState::AdminMenu);
            return self.render_admin_menu(from.chat_id).await;
        }

        if text == ui::BTN_START {
            let status = self.gate.check(user_id).await;
            if !status.is_satisfied() {
                return self.send_join_prompt(from.chat_id, &status.unmet).await;
            }
            return self.render_welcome(from.chat_id, user_id).await;
        }

        if text.is_empty() {
            self.reply(from.chat_id, MSG_SEND_LINK, Markup::None).await?;
            return Ok(());
        }

        if self.gate_links {
            let status = self.gate.check(user_id).await;
            if !status.is_satisfied() {
                return self.send_join_prompt(from.chat_id, &status.unmet).await;
            }
        }

        if !is_supported_link(text) {
            let msg = ResolutionError::Unsupported.user_message();
            self.reply(from.chat_id, msg, Markup::None).await?;
            return Ok(());
        }

        let status = self.reply(from.chat_id, MSG_ANALYZING, Markup::None).await?;
        match self.resolver.resolve(user_id, text).await {
            Ok(offer) => {
                let keyboard = ui::quality_keyboard(&offer);
                self.transport
                    .edit_text(status, &offer_text(&offer), Some(keyboard))
                    .await
            }
            Err(e) => {
                warn!(user_id = %user_id, link = text, error = %e, "link resolution failed");
                self.transport.edit_text(status, e.user_message(), None).await
            }
        }
    }

    async fn on_admin_menu(&self, from: &Sender, text: &str) -> Result<()> {
        let user_id = from.user_id;
        let chat_id = from.chat_id;

        let (next, prompt) = match text {
            ui::BTN_EDIT_INITIAL => (
                ConversationState::EditInitialWelcome,
                "✏️ Send the new <b>initial welcome</b> text (Markdown supported).".to_string(),
            ),
            ui::BTN_EDIT_MAIN => (
                ConversationState::EditMainWelcome,
                "📝 Send the new <b>main welcome</b> text (Markdown supported).".to_string(),
            ),
            ui::BTN_EDIT_MEDIA => (
                ConversationState::EditWelcomeMedia,
                "🎨 Send a photo, GIF or document to show with the welcome message.".to_string(),
            ),
            ui::BTN_ADD_CHANNEL => (
                ConversationState::AddChannel,
                "➕ Send the channel to add (@username, t.me link or numeric id).".to_string(),
            ),
            ui::BTN_REMOVE_CHANNEL => {
                let channels = self.settings.snapshot().required_channels.clone();
                (
                    ConversationState::RemoveChannel,
                    format!(
                        "➖ Send the channel to remove.\n\n<b>Current channels:</b>\n{}",
                        channel_list(&channels)
                    ),
                )
            }
            ui::BTN_BROADCAST => (
                ConversationState::Broadcast,
                "📢 Send the message to broadcast (text, photo, GIF or document).".to_string(),
            ),
            ui::BTN_USER_COUNT => {
                let msg = format!("👥 Total users: <b>{}</b>", self.registry.len());
                self.reply(chat_id, &msg, Markup::Reply(ui::admin_keyboard()))
                    .await?;
                return Ok(());
            }
            ui::BTN_BACK | ui::BTN_CANCEL => {
                self.sessions.set_state(user_id, ConversationState::Idle);
                self.reply(chat_id, "🏠 Main menu.", Markup::Reply(ui::main_keyboard(true)))
                    .await?;
                return Ok(());
            }
            _ => return self.render_admin_menu(chat_id).await,
        };

        self.sessions.set_state(user_id, next);
        self.reply(chat_id, &prompt, Markup::Reply(ui::cancel_keyboard()))
            .await?;
        Ok(())
    }

    async fn on_callback(&self, q: CallbackQuery) -> Result<()> {
        let user_id = q.from.user_id;
        let chat_id = q.from.chat_id;

        if q.data == ui::CB_CHECK_JOINED {
            let status = self.gate.check(user_id).await;
            if !status.is_satisfied() {
                self.acknowledge(&q, Some(MSG_NOT_JOINED), true).await;
                if let Some(msg) = q.message {
                    self.transport
                        .edit_text(msg, &join_text(&status.unmet), Some(ui::join_keyboard(&status.unmet)))
                        .await?;
                }
                return Ok(());
            }
            self.acknowledge(&q, Some(MSG_VERIFIED), false).await;
            return self.render_welcome(chat_id, user_id).await;
        }

        let Some((offer_id, quality)) = ui::parse_download_callback(&q.data) else {
            warn!(user_id = %user_id, data = %q.data, "unknown callback data");
            self.acknowledge(&q, None, false).await;
            return Ok(());
        };

        self.acknowledge(&q, None, false).await;
        if let Some(msg) = q.message {
            let text = format!("⏬ Downloading in {}…", escape_html(quality));
            if let Err(e) = self.transport.edit_text(msg, &text, None).await {
                warn!(user_id = %user_id, error = %e, "failed to update download status");
            }
        }

        let outcome = self
            .downloads
            .download(user_id, chat_id, offer_id, quality, q.message)
            .await;
        let text = match &outcome {
            Ok(_) => MSG_SENT.to_string(),
            Err(e) => {
                error!(user_id = %user_id, quality, error = %e, "download request failed");
                e.user_message()
            }
        };
        match q.message {
            Some(msg) => self.transport.edit_text(msg, &text, None).await,
            None => self.reply(chat_id, &text, Markup::None).await.map(|_| ()),
        }
    }

    /// Answer the callback query. Telegram rejects late answers ("query is
    /// too old"), which must not abort the action the button asked for.
    async fn acknowledge(&self, q: &CallbackQuery, text: Option<&str>, alert: bool) {
        if let Err(e) = self.transport.answer_callback(&q.callback_id, text, alert).await {
            debug!(user_id = %q.from.user_id, error = %e, "callback answer rejected");
        }
    }

    async fn run_broadcast(&self, from: &Sender, payload: Payload) -> Result<()> {
        info!(user_id = %from.user_id, "broadcast started");
        let report = self.broadcaster.broadcast(&payload).await;
        let msg = format!(
            "📢 <b>Broadcast complete!</b>\n\n✅ Delivered: {}\n❌ Failed: {}",
            report.delivered, report.failed
        );
        self.back_to_admin_menu(from, &msg).await
    }

    async fn back_to_admin_menu(&self, from: &Sender, html: &str) -> Result<()> {
        self.sessions.set_state(from.user_id, ConversationState::AdminMenu);
        self.reply(from.chat_id, html, Markup::Reply(ui::admin_keyboard()))
            .await?;
        Ok(())
    }

    async fn render_admin_menu(&self, chat_id: ChatId) -> Result<()> {
        self.reply(
            chat_id,
            "🛠️ <b>Admin Panel</b>\n\nChoose an action:",
            Markup::Reply(ui::admin_keyboard()),
        )
        .await?;
        Ok(())
    }

    async fn send_join_prompt(&self, chat_id: ChatId, unmet: &[String]) -> Result<()> {
        self.reply(chat_id, &join_text(unmet), Markup::Inline(ui::join_keyboard(unmet)))
            .await?;
        Ok(())
    }

    /// Main welcome, with the welcome media when one is set. Falls back to
    /// plain text if the media cannot be sent.
    async fn render_welcome(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        let snapshot = self.settings.snapshot();
        let html = markdown_to_html(&snapshot.main_welcome_text);
        let keyboard = ui::main_keyboard(self.is_admin(user_id));

        if let Some(media) = &snapshot.welcome_media {
            match self
                .transport
                .send_media(chat_id, media, Some(&html), Markup::Reply(keyboard.clone()))
                .await
            {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(user_id = %user_id, kind = media.kind.as_str(), error = %e, "welcome media failed; sending text");
                }
            }
        }

        self.reply(chat_id, &html, Markup::Reply(keyboard)).await?;
        Ok(())
    }
}

fn channel_list(channels: &[String]) -> String {
    if channels.is_empty() {
        return "<i>none</i>".to_string();
    }
    channels
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {}", i + 1, escape_html(c)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn join_text(unmet: &[String]) -> String {
    let list = unmet
        .iter()
        .map(|c| format!("• {}", escape_html(c)))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "🔒 <b>Join required</b>\n\nPlease join the following channel(s) to use this bot:\n{list}\n\n\
         Then press <b>{}</b>.",
        ui::BTN_I_JOINED
    )
}

fn offer_text(offer: &VideoOffer) -> String {
    let mut text = format!("🎬 <b>{}</b>\n", escape_html(&offer.title));
    if let Some(d) = offer.duration_secs {
        text.push_str(&format!("⏱ Duration: {}\n", format_duration(d)));
    }
    if let Some(u) = offer.uploader.as_deref().filter(|u| !u.is_empty()) {
        text.push_str(&format!("👤 Uploader: {}\n", escape_html(u)));
    }
    text.push_str("\n📥 Choose a quality:");
    text
}
