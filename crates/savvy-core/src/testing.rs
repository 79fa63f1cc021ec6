//! Hand-rolled fakes for the transport and engine ports (unit tests only).

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicI32, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MediaRef, MessageId, MessageRef, UserId},
    errors::Error,
    media::{FormatDescriptor, MediaEngine, MediaInfo},
    messaging::{
        port::ChatTransport,
        types::{ChannelTarget, InlineKeyboard, Markup, MemberRole},
    },
    Result,
};

#[derive(Clone, Debug)]
pub struct SentText {
    pub chat_id: ChatId,
    pub html: String,
    pub markup: Markup,
}

#[derive(Clone, Debug)]
pub struct SentVideo {
    pub chat_id: ChatId,
    pub path: PathBuf,
    pub existed: bool,
    pub caption: String,
}

#[derive(Default)]
pub struct FakeTransport {
    next_id: AtomicI32,
    texts: Mutex<Vec<SentText>>,
    edits: Mutex<Vec<(MessageRef, String, Option<InlineKeyboard>)>>,
    media: Mutex<Vec<(ChatId, MediaRef, Option<String>)>>,
    videos: Mutex<Vec<SentVideo>>,
    answers: Mutex<Vec<(String, Option<String>, bool)>>,
    roles: Mutex<HashMap<(ChannelTarget, UserId), MemberRole>>,
    role_lookups: AtomicUsize,
    failing_chats: Mutex<HashSet<ChatId>>,
    fail_media: Mutex<bool>,
    fail_video: Mutex<bool>,
    fail_answers: Mutex<bool>,
}

impl FakeTransport {
    fn alloc(&self, chat_id: ChatId) -> MessageRef {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        MessageRef {
            chat_id,
            message_id: MessageId(id),
        }
    }

    fn check_chat(&self, chat_id: ChatId) -> Result<()> {
        if self.failing_chats.lock().unwrap().contains(&chat_id) {
            return Err(Error::Transport(format!("chat {} blocked the bot", chat_id.0)));
        }
        Ok(())
    }

    pub fn set_role(&self, channel: ChannelTarget, user_id: UserId, role: MemberRole) {
        self.roles.lock().unwrap().insert((channel, user_id), role);
    }

    pub fn fail_chat(&self, chat_id: ChatId) {
        self.failing_chats.lock().unwrap().insert(chat_id);
    }

    pub fn fail_media(&self) {
        *self.fail_media.lock().unwrap() = true;
    }

    pub fn fail_video(&self) {
        *self.fail_video.lock().unwrap() = true;
    }

    /// Reject every callback answer, as Telegram does once a query is too old.
    pub fn fail_answers(&self) {
        *self.fail_answers.lock().unwrap() = true;
    }

    pub fn texts(&self) -> Vec<SentText> {
        self.texts.lock().unwrap().clone()
    }

    pub fn texts_to(&self, chat_id: ChatId) -> Vec<String> {
        self.texts()
            .into_iter()
            .filter(|t| t.chat_id == chat_id)
            .map(|t| t.html)
            .collect()
    }

    pub fn last_text(&self) -> Option<SentText> {
        self.texts.lock().unwrap().last().cloned()
    }

    pub fn edits(&self) -> Vec<(MessageRef, String, Option<InlineKeyboard>)> {
        self.edits.lock().unwrap().clone()
    }

    pub fn media_sends(&self) -> Vec<(ChatId, MediaRef, Option<String>)> {
        self.media.lock().unwrap().clone()
    }

    pub fn videos(&self) -> Vec<SentVideo> {
        self.videos.lock().unwrap().clone()
    }

    pub fn callback_answers(&self) -> Vec<(String, Option<String>, bool)> {
        self.answers.lock().unwrap().clone()
    }

    pub fn role_lookups(&self) -> usize {
        self.role_lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatTransport for FakeTransport {
    async fn send_text(&self, chat_id: ChatId, html: &str, markup: Markup) -> Result<MessageRef> {
        self.check_chat(chat_id)?;
        self.texts.lock().unwrap().push(SentText {
            chat_id,
            html: html.to_string(),
            markup,
        });
        Ok(self.alloc(chat_id))
    }

    async fn edit_text(
        &self,
        msg: MessageRef,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()> {
        self.edits
            .lock()
            .unwrap()
            .push((msg, html.to_string(), keyboard));
        Ok(())
    }

    async fn send_media(
        &self,
        chat_id: ChatId,
        media: &MediaRef,
        caption: Option<&str>,
        _markup: Markup,
    ) -> Result<MessageRef> {
        self.check_chat(chat_id)?;
        if *self.fail_media.lock().unwrap() {
            return Err(Error::Transport("wrong file identifier".to_string()));
        }
        self.media
            .lock()
            .unwrap()
            .push((chat_id, media.clone(), caption.map(str::to_string)));
        Ok(self.alloc(chat_id))
    }

    async fn send_video_file(
        &self,
        chat_id: ChatId,
        path: &Path,
        caption: &str,
        _markup: Markup,
    ) -> Result<MessageRef> {
        self.videos.lock().unwrap().push(SentVideo {
            chat_id,
            path: path.to_path_buf(),
            existed: path.exists(),
            caption: caption.to_string(),
        });
        if *self.fail_video.lock().unwrap() {
            return Err(Error::Transport("upload interrupted".to_string()));
        }
        Ok(self.alloc(chat_id))
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<()> {
        if *self.fail_answers.lock().unwrap() {
            return Err(Error::Transport(
                "Bad Request: query is too old and response timeout expired".to_string(),
            ));
        }
        self.answers.lock().unwrap().push((
            callback_id.to_string(),
            text.map(str::to_string),
            alert,
        ));
        Ok(())
    }

    async fn member_role(&self, channel: &ChannelTarget, user_id: UserId) -> Result<MemberRole> {
        self.role_lookups.fetch_add(1, Ordering::SeqCst);
        self.roles
            .lock()
            .unwrap()
            .get(&(channel.clone(), user_id))
            .copied()
            .ok_or_else(|| Error::Transport("Bad Request: chat not found".to_string()))
    }
}

/// What `FakeEngine::fetch` leaves behind.
#[derive(Clone, Debug)]
pub enum FetchOutcome {
    /// Write `<prefix>.<ext>` with `size` bytes (sparse) and succeed.
    Produce { ext: &'static str, size: u64 },
    /// Write a partial file, then fail.
    FailWithPartial,
    /// Succeed without writing anything.
    ProduceNothing,
}

pub struct FakeEngine {
    pub info: Mutex<Option<MediaInfo>>,
    pub outcome: Mutex<FetchOutcome>,
    probes: AtomicUsize,
    fetches: Mutex<Vec<(String, String, PathBuf)>>,
    stall: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeEngine {
    pub fn new(info: Option<MediaInfo>, outcome: FetchOutcome) -> Self {
        Self {
            info: Mutex::new(info),
            outcome: Mutex::new(outcome),
            probes: AtomicUsize::new(0),
            fetches: Mutex::new(Vec::new()),
            stall: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Make `fetch` write a `.part` file and sleep before finishing.
    pub fn stall_for(&self, delay: Duration) {
        *self.stall.lock().unwrap() = Some(delay);
    }

    /// Most fetches ever running at the same time.
    pub fn peak_fetches(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn probe_calls(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> Vec<(String, String, PathBuf)> {
        self.fetches.lock().unwrap().clone()
    }
}

pub fn format(id: &str, height: u32, audio: bool) -> FormatDescriptor {
    FormatDescriptor {
        format_id: id.to_string(),
        height: Some(height),
        vcodec: Some("avc1".to_string()),
        acodec: Some(if audio { "mp4a" } else { "none" }.to_string()),
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    async fn probe(&self, _link: &str) -> Result<MediaInfo> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.info
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::Extraction("Video unavailable".to_string()))
    }

    async fn fetch(
        &self,
        link: &str,
        selector: &str,
        output_prefix: &Path,
    ) -> Result<Vec<PathBuf>> {
        self.fetches.lock().unwrap().push((
            link.to_string(),
            selector.to_string(),
            output_prefix.to_path_buf(),
        ));
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _running = InFlight(&self.in_flight);
        self.peak.fetch_max(running, Ordering::SeqCst);

        let outcome = self.outcome.lock().unwrap().clone();
        let with_ext = |ext: &str| {
            let mut name = output_prefix.as_os_str().to_os_string();
            name.push(format!(".{ext}"));
            PathBuf::from(name)
        };

        let stall = *self.stall.lock().unwrap();
        if let Some(delay) = stall {
            std::fs::write(with_ext("mp4.part"), b"partial")?;
            tokio::time::sleep(delay).await;
        }
        match outcome {
            FetchOutcome::Produce { ext, size } => {
                let path = with_ext(ext);
                let f = std::fs::File::create(&path)?;
                f.set_len(size)?;
                Ok(vec![path])
            }
            FetchOutcome::FailWithPartial => {
                std::fs::write(with_ext("f137.mp4.part"), b"partial")?;
                Err(Error::Extraction("HTTP Error 403: Forbidden".to_string()))
            }
            FetchOutcome::ProduceNothing => Ok(Vec::new()),
        }
    }
}
