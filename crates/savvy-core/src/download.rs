//! Quality selection → file on disk → video in the chat.
//!
//! Every request owns `<temp_dir>/<uuid>/` and names its output `<uuid>.*`
//! inside it. The directory is removed on every exit path: explicitly on the
//! normal paths and by [`ArtifactDir`]'s `Drop` when the future is cancelled,
//! times out, or panics.

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    domain::{ChatId, MessageRef, UserId},
    formatting::{escape_html, format_megabytes},
    media::MediaEngine,
    messaging::{port::ChatTransport, types::Markup},
    session::SessionStore,
};

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("no pending offer for this selection")]
    ExpiredSession,
    #[error("engine reported success but produced no file")]
    ArtifactMissing,
    #[error("artifact is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },
    #[error("delivery failed: {0}")]
    Transport(String),
    #[error("download failed: {0}")]
    Extraction(String),
    #[error("download timed out after {0:?}")]
    TimedOut(Duration),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DownloadError {
    pub fn user_message(&self) -> String {
        match self {
            DownloadError::ExpiredSession => {
                "❌ Session expired. Please send the link again.".to_string()
            }
            DownloadError::TooLarge { size, limit } => format!(
                "❌ Video too large ({}, limit {}).\n\nPlease pick a lower quality.",
                format_megabytes(*size),
                format_megabytes(*limit)
            ),
            DownloadError::TimedOut(_) => {
                "❌ The download took too long.\n\nPlease try again later or pick a lower quality."
                    .to_string()
            }
            DownloadError::ArtifactMissing
            | DownloadError::Transport(_)
            | DownloadError::Extraction(_)
            | DownloadError::Io(_) => {
                "❌ Download failed.\n\n<b>Possible reasons:</b>\n• Video is too large\n\
                 • Network issues\n• Platform restrictions\n\nPlease try again later or pick a lower quality."
                    .to_string()
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveredArtifactInfo {
    pub title: String,
    pub quality: String,
    pub size_bytes: u64,
}

#[derive(Clone, Debug)]
pub struct DownloadSettings {
    pub temp_dir: PathBuf,
    pub max_filesize_bytes: u64,
    pub max_concurrent: usize,
    pub timeout: Duration,
}

/// Request-owned directory, removed when dropped unless already swept.
struct ArtifactDir {
    path: PathBuf,
    swept: bool,
}

impl ArtifactDir {
    async fn create(root: &Path) -> io::Result<(Self, PathBuf)> {
        let id = Uuid::new_v4().to_string();
        let path = root.join(&id);
        tokio::fs::create_dir_all(&path).await?;
        let prefix = path.join(&id);
        Ok((Self { path, swept: false }, prefix))
    }

    /// Async removal. The drop guard stays armed until this completes, so a
    /// sweep cancelled mid-way still cleans up synchronously.
    async fn sweep(mut self) {
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => self.swept = true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => self.swept = true,
            Err(e) => warn!(dir = %self.path.display(), error = %e, "failed to remove download dir"),
        }
    }
}

impl Drop for ArtifactDir {
    fn drop(&mut self) {
        if self.swept {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %self.path.display(), error = %e, "failed to remove download dir"),
        }
    }
}

/// Engine selector: the chosen video stream merged with the best audio, or
/// the best single file as a fallback.
pub fn format_selector(format_id: &str) -> String {
    format!("{format_id}+bestaudio/best")
}

fn is_partial(name: &str) -> bool {
    name.ends_with(".part") || name.ends_with(".ytdl")
}

/// `<prefix>.mp4` if present, else the first (by name) finished file that
/// starts with the prefix's file name.
async fn locate_artifact(prefix: &Path) -> io::Result<Option<PathBuf>> {
    let mut preferred = prefix.as_os_str().to_os_string();
    preferred.push(".mp4");
    let preferred = PathBuf::from(preferred);
    if tokio::fs::metadata(&preferred)
        .await
        .is_ok_and(|m| m.is_file())
    {
        return Ok(Some(preferred));
    }

    let (Some(dir), Some(stem)) = (prefix.parent(), prefix.file_name()) else {
        return Ok(None);
    };
    let stem = stem.to_string_lossy().into_owned();

    let mut candidates = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(&stem) || is_partial(&name) {
            continue;
        }
        if entry.file_type().await?.is_file() {
            candidates.push(entry.path());
        }
    }
    candidates.sort();
    Ok(candidates.into_iter().next())
}

fn caption(title: &str, quality: &str, size: u64) -> String {
    format!(
        "🎬 <b>{}</b>\n📺 Quality: {}\n📦 Size: {}",
        escape_html(title),
        escape_html(quality),
        format_megabytes(size)
    )
}

pub struct DownloadPipeline {
    engine: Arc<dyn MediaEngine>,
    transport: Arc<dyn ChatTransport>,
    sessions: Arc<SessionStore>,
    permits: Semaphore,
    settings: DownloadSettings,
}

impl DownloadPipeline {
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        transport: Arc<dyn ChatTransport>,
        sessions: Arc<SessionStore>,
        settings: DownloadSettings,
    ) -> Self {
        Self {
            engine,
            transport,
            sessions,
            permits: Semaphore::new(settings.max_concurrent.max(1)),
            settings,
        }
    }

    /// Download the selected quality of the user's pending offer and send it
    /// to `chat_id`. `status` is an optional message edited with progress.
    pub async fn download(
        &self,
        user_id: UserId,
        chat_id: ChatId,
        offer_id: u64,
        quality: &str,
        status: Option<MessageRef>,
    ) -> Result<DeliveredArtifactInfo, DownloadError> {
        let selection = self
            .sessions
            .selection(user_id, offer_id, quality)
            .ok_or(DownloadError::ExpiredSession)?;

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| DownloadError::Extraction(e.to_string()))?;

        let (dir, prefix) = ArtifactDir::create(&self.settings.temp_dir).await?;
        let result = self
            .fetch_and_deliver(chat_id, &selection.link, &selection.format_id, &selection.title, quality, &prefix, status)
            .await;
        dir.sweep().await;

        match &result {
            Ok(info) => info!(
                user_id = %user_id,
                quality,
                size_bytes = info.size_bytes,
                "video delivered"
            ),
            Err(e) => warn!(user_id = %user_id, link = %selection.link, quality, error = %e, "download failed"),
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn fetch_and_deliver(
        &self,
        chat_id: ChatId,
        link: &str,
        format_id: &str,
        title: &str,
        quality: &str,
        prefix: &Path,
        status: Option<MessageRef>,
    ) -> Result<DeliveredArtifactInfo, DownloadError> {
        let selector = format_selector(format_id);
        let timeout = self.settings.timeout;
        match tokio::time::timeout(timeout, self.engine.fetch(link, &selector, prefix)).await {
            Ok(Ok(_reported)) => {}
            Ok(Err(e)) => return Err(DownloadError::Extraction(e.to_string())),
            Err(_) => return Err(DownloadError::TimedOut(timeout)),
        }

        let artifact = locate_artifact(prefix)
            .await?
            .ok_or(DownloadError::ArtifactMissing)?;
        let size = tokio::fs::metadata(&artifact).await?.len();
        let limit = self.settings.max_filesize_bytes;
        if size > limit {
            return Err(DownloadError::TooLarge { size, limit });
        }

        if let Some(msg) = status {
            let text = format!("⬆️ Uploading {} video…", escape_html(quality));
            if let Err(e) = self.transport.edit_text(msg, &text, None).await {
                warn!(error = %e, "failed to update download status");
            }
        }

        self.transport
            .send_video_file(chat_id, &artifact, &caption(title, quality, size), Markup::None)
            .await
            .map_err(|e| DownloadError::Transport(e.to_string()))?;

        Ok(DeliveredArtifactInfo {
            title: title.to_string(),
            quality: quality.to_string(),
            size_bytes: size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::testing::{FakeEngine, FakeTransport, FetchOutcome};

    struct Fixture {
        root: tempfile::TempDir,
        engine: Arc<FakeEngine>,
        transport: Arc<FakeTransport>,
        sessions: Arc<SessionStore>,
        pipeline: DownloadPipeline,
    }

    fn fixture(outcome: FetchOutcome, limit: u64) -> Fixture {
        fixture_with(outcome, limit, 2, Duration::from_secs(5))
    }

    fn fixture_with(
        outcome: FetchOutcome,
        limit: u64,
        max_concurrent: usize,
        timeout: Duration,
    ) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new(None, outcome));
        let transport = Arc::new(FakeTransport::default());
        let sessions = Arc::new(SessionStore::new(None));
        let pipeline = DownloadPipeline::new(
            engine.clone(),
            transport.clone(),
            sessions.clone(),
            DownloadSettings {
                temp_dir: root.path().to_path_buf(),
                max_filesize_bytes: limit,
                max_concurrent,
                timeout,
            },
        );
        Fixture {
            root,
            engine,
            transport,
            sessions,
            pipeline,
        }
    }

    const USER: UserId = UserId(77);
    const CHAT: ChatId = ChatId(77);

    fn offer(f: &Fixture) -> u64 {
        let formats: BTreeMap<String, String> =
            [("720p".to_string(), "22".to_string())].into_iter().collect();
        f.sessions
            .store_offer(USER, "https://youtu.be/abc", "Cats & <Dogs>", formats)
    }

    fn leftovers(f: &Fixture) -> usize {
        std::fs::read_dir(f.root.path()).unwrap().count()
    }

    #[tokio::test]
    async fn successful_download_is_delivered_and_swept() {
        let f = fixture(FetchOutcome::Produce { ext: "mp4", size: 4096 }, 1 << 20);
        let id = offer(&f);

        let info = f.pipeline.download(USER, CHAT, id, "720p", None).await.unwrap();
        assert_eq!(info.size_bytes, 4096);
        assert_eq!(info.quality, "720p");

        let (link, selector, _) = f.engine.fetches().pop().unwrap();
        assert_eq!(link, "https://youtu.be/abc");
        assert_eq!(selector, "22+bestaudio/best");

        let videos = f.transport.videos();
        assert_eq!(videos.len(), 1);
        assert!(videos[0].existed);
        assert!(videos[0].caption.contains("Cats &amp; &lt;Dogs&gt;"));
        assert!(videos[0].caption.contains("720p"));
        assert_eq!(leftovers(&f), 0);
    }

    #[tokio::test]
    async fn non_mp4_artifacts_are_found_by_prefix() {
        let f = fixture(FetchOutcome::Produce { ext: "webm", size: 10 }, 1 << 20);
        let id = offer(&f);
        f.pipeline.download(USER, CHAT, id, "720p", None).await.unwrap();
        assert_eq!(
            f.transport.videos()[0].path.extension().unwrap(),
            "webm"
        );
        assert_eq!(leftovers(&f), 0);
    }

    #[tokio::test]
    async fn oversized_artifacts_are_never_delivered() {
        let f = fixture(FetchOutcome::Produce { ext: "mp4", size: 2048 }, 1024);
        let id = offer(&f);
        let err = f.pipeline.download(USER, CHAT, id, "720p", None).await.unwrap_err();
        assert!(matches!(err, DownloadError::TooLarge { size: 2048, limit: 1024 }));
        assert!(f.transport.videos().is_empty());
        assert_eq!(leftovers(&f), 0);
    }

    #[tokio::test]
    async fn engine_failure_removes_partial_files() {
        let f = fixture(FetchOutcome::FailWithPartial, 1 << 20);
        let id = offer(&f);
        let err = f.pipeline.download(USER, CHAT, id, "720p", None).await.unwrap_err();
        assert!(matches!(err, DownloadError::Extraction(_)));
        assert_eq!(leftovers(&f), 0);
    }

    #[tokio::test]
    async fn delivery_failure_still_cleans_up() {
        let f = fixture(FetchOutcome::Produce { ext: "mp4", size: 16 }, 1 << 20);
        f.transport.fail_video();
        let id = offer(&f);
        let err = f.pipeline.download(USER, CHAT, id, "720p", None).await.unwrap_err();
        assert!(matches!(err, DownloadError::Transport(_)));
        assert_eq!(leftovers(&f), 0);
    }

    #[tokio::test]
    async fn missing_artifact_is_reported() {
        let f = fixture(FetchOutcome::ProduceNothing, 1 << 20);
        let id = offer(&f);
        let err = f.pipeline.download(USER, CHAT, id, "720p", None).await.unwrap_err();
        assert!(matches!(err, DownloadError::ArtifactMissing));
        assert_eq!(leftovers(&f), 0);
    }

    #[tokio::test]
    async fn empty_session_is_expired_and_never_fetches() {
        let f = fixture(FetchOutcome::Produce { ext: "mp4", size: 1 }, 1 << 20);
        let err = f.pipeline.download(USER, CHAT, 1, "720p", None).await.unwrap_err();
        assert!(matches!(err, DownloadError::ExpiredSession));

        let id = offer(&f);
        let err = f.pipeline.download(USER, CHAT, id, "4320p", None).await.unwrap_err();
        assert!(matches!(err, DownloadError::ExpiredSession));
        assert!(f.engine.fetches().is_empty());
    }

    #[tokio::test]
    async fn status_message_is_moved_to_uploading() {
        let f = fixture(FetchOutcome::Produce { ext: "mp4", size: 1 }, 1 << 20);
        let id = offer(&f);
        let status = MessageRef {
            chat_id: CHAT,
            message_id: crate::domain::MessageId(5),
        };
        f.pipeline
            .download(USER, CHAT, id, "720p", Some(status))
            .await
            .unwrap();
        let edits = f.transport.edits();
        assert_eq!(edits.len(), 1);
        assert!(edits[0].1.contains("Uploading 720p"));
    }

    #[tokio::test]
    async fn slow_fetches_time_out_without_leftovers() {
        let f = fixture_with(
            FetchOutcome::Produce { ext: "mp4", size: 16 },
            1 << 20,
            2,
            Duration::from_millis(100),
        );
        f.engine.stall_for(Duration::from_secs(30));
        let id = offer(&f);

        let err = f.pipeline.download(USER, CHAT, id, "720p", None).await.unwrap_err();
        assert!(matches!(err, DownloadError::TimedOut(d) if d == Duration::from_millis(100)));
        assert!(err.user_message().contains("took too long"));
        assert!(f.transport.videos().is_empty());
        assert_eq!(leftovers(&f), 0);
    }

    #[tokio::test]
    async fn concurrent_downloads_respect_the_cap() {
        let f = fixture_with(
            FetchOutcome::Produce { ext: "mp4", size: 16 },
            1 << 20,
            1,
            Duration::from_secs(5),
        );
        f.engine.stall_for(Duration::from_millis(30));
        let formats = || -> BTreeMap<String, String> {
            [("720p".to_string(), "22".to_string())].into_iter().collect()
        };
        let ids: Vec<(UserId, u64)> = (1..=4)
            .map(|u| {
                let user = UserId(u);
                (user, f.sessions.store_offer(user, "https://youtu.be/abc", "Clip", formats()))
            })
            .collect();

        let download = |i: usize| {
            let (user, id) = ids[i];
            f.pipeline.download(user, ChatId(user.0), id, "720p", None)
        };
        let (a, b, c, d) = tokio::join!(download(0), download(1), download(2), download(3));
        for result in [a, b, c, d] {
            result.unwrap();
        }

        assert_eq!(f.engine.peak_fetches(), 1);
        assert_eq!(f.transport.videos().len(), 4);
        assert_eq!(leftovers(&f), 0);
    }

    #[tokio::test]
    async fn cancelled_sweep_still_removes_the_directory() {
        let root = tempfile::tempdir().unwrap();
        let (dir, prefix) = ArtifactDir::create(root.path()).await.unwrap();
        for i in 0..64 {
            std::fs::write(format!("{}.{i}.part", prefix.display()), b"x").unwrap();
        }
        let path = dir.path.clone();

        tokio::select! {
            biased;
            _ = dir.sweep() => {}
            _ = std::future::ready(()) => {}
        }
        assert!(!path.exists());
    }

    #[test]
    fn drop_guard_removes_the_directory() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("req");
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("req.f137.mp4.part"), b"x").unwrap();
        drop(ArtifactDir {
            path: path.clone(),
            swept: false,
        });
        assert!(!path.exists());
    }
}
