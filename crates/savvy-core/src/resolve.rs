//! Link → quality offer.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, OnceLock},
    time::Duration,
};

use regex::Regex;
use tracing::{info, warn};

use crate::{
    domain::UserId,
    media::{FormatDescriptor, MediaEngine},
    session::SessionStore,
};

/// Substrings of hosts we bother handing to the engine.
pub const PLATFORM_TOKENS: &[&str] = &[
    "youtu",
    "instagram",
    "tiktok",
    "twitter",
    "x.com",
    "facebook",
    "fb.watch",
    "vimeo",
    "reddit",
    "dailymotion",
];

/// Most quality buttons shown for one link.
pub const MAX_OFFERED_QUALITIES: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("unsupported link")]
    Unsupported,
    #[error("no playable video format")]
    NoPlayableFormat,
    #[error("extraction failed: {0}")]
    Extraction(String),
}

impl ResolutionError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ResolutionError::Unsupported => {
                "❌ This doesn't look like a supported video link.\n\n\
                 Please send a valid link from YouTube, Instagram, TikTok, Facebook, Twitter, or other supported platforms."
            }
            ResolutionError::NoPlayableFormat => {
                "❌ No downloadable video formats found.\n\n\
                 The video may be:\n• Private or restricted\n• Audio-only\n• Not supported"
            }
            ResolutionError::Extraction(_) => {
                "❌ Unable to process this link.\n\n\
                 <b>Possible reasons:</b>\n• Invalid or unsupported URL\n• Private/restricted video\n\
                 • Geo-blocked content\n• Platform temporarily unavailable\n\nPlease try another link."
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QualityTier {
    pub height: u32,
    /// `"720p"`; also the key in the session's format map.
    pub label: String,
    pub format_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoOffer {
    pub offer_id: u64,
    pub link: String,
    pub title: String,
    pub duration_secs: Option<u64>,
    pub uploader: Option<String>,
    /// Descending by height, at most [`MAX_OFFERED_QUALITIES`].
    pub tiers: Vec<QualityTier>,
}

fn http_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^https?://\S+$").expect("valid regex"))
}

/// Cheap syntactic check run before anything reaches the engine.
pub fn is_supported_link(link: &str) -> bool {
    let link = link.trim();
    if !http_link_re().is_match(link) {
        return false;
    }
    let lower = link.to_lowercase();
    PLATFORM_TOKENS.iter().any(|t| lower.contains(t))
}

pub fn quality_label(height: u32) -> String {
    format!("{height}p")
}

/// Collapse engine formats into one tier per distinct height, tallest first.
///
/// Only formats with a real video codec and a height are considered. Within a
/// height, the first candidate carrying audio wins; without any, the first
/// candidate seen wins.
pub fn collapse_formats(formats: &[FormatDescriptor]) -> Vec<QualityTier> {
    let mut best: HashMap<u32, &FormatDescriptor> = HashMap::new();
    for f in formats {
        let Some(height) = f.height.filter(|h| *h > 0) else {
            continue;
        };
        if !f.has_video() {
            continue;
        }
        match best.get(&height) {
            None => {
                best.insert(height, f);
            }
            Some(cur) if !cur.has_audio() && f.has_audio() => {
                best.insert(height, f);
            }
            Some(_) => {}
        }
    }

    let mut tiers: Vec<QualityTier> = best
        .into_iter()
        .map(|(height, f)| QualityTier {
            height,
            label: quality_label(height),
            format_id: f.format_id.clone(),
        })
        .collect();
    tiers.sort_by(|a, b| b.height.cmp(&a.height));
    tiers
}

pub struct ResolutionPipeline {
    engine: Arc<dyn MediaEngine>,
    sessions: Arc<SessionStore>,
    timeout: Duration,
}

impl ResolutionPipeline {
    pub fn new(engine: Arc<dyn MediaEngine>, sessions: Arc<SessionStore>, timeout: Duration) -> Self {
        Self {
            engine,
            sessions,
            timeout,
        }
    }

    /// Probe `link` and record the resulting offer in the user's session.
    ///
    /// The session is written only on success, before the offer is returned,
    /// because the quality-selection step reads from the session alone.
    pub async fn resolve(&self, user_id: UserId, link: &str) -> Result<VideoOffer, ResolutionError> {
        let link = link.trim();
        if !is_supported_link(link) {
            return Err(ResolutionError::Unsupported);
        }

        let info = match tokio::time::timeout(self.timeout, self.engine.probe(link)).await {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                warn!(user_id = %user_id, link, error = %e, "probe failed");
                return Err(ResolutionError::Extraction(e.to_string()));
            }
            Err(_) => {
                warn!(user_id = %user_id, link, timeout = ?self.timeout, "probe timed out");
                return Err(ResolutionError::Extraction(format!(
                    "probe timed out after {:?}",
                    self.timeout
                )));
            }
        };

        let tiers = collapse_formats(&info.formats);
        if tiers.is_empty() {
            return Err(ResolutionError::NoPlayableFormat);
        }

        let title = info
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Video".to_string());
        let formats: BTreeMap<String, String> = tiers
            .iter()
            .map(|t| (t.label.clone(), t.format_id.clone()))
            .collect();
        let offer_id = self.sessions.store_offer(user_id, link, &title, formats);

        info!(user_id = %user_id, link, qualities = tiers.len(), "link resolved");

        Ok(VideoOffer {
            offer_id,
            link: link.to_string(),
            title,
            duration_secs: info.duration_secs,
            uploader: info.uploader,
            tiers: tiers.into_iter().take(MAX_OFFERED_QUALITIES).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaInfo;
    use crate::testing::{format, FakeEngine, FetchOutcome};

    fn pipeline(engine: Arc<FakeEngine>) -> (ResolutionPipeline, Arc<SessionStore>) {
        let sessions = Arc::new(SessionStore::new(None));
        (
            ResolutionPipeline::new(engine, sessions.clone(), Duration::from_secs(5)),
            sessions,
        )
    }

    fn info(formats: Vec<FormatDescriptor>) -> MediaInfo {
        MediaInfo {
            title: Some("Clip".to_string()),
            duration_secs: Some(95),
            uploader: Some("someone".to_string()),
            formats,
        }
    }

    #[test]
    fn prefilter_rejects_non_http_and_unknown_platforms() {
        assert!(is_supported_link("https://www.youtube.com/watch?v=abc"));
        assert!(is_supported_link("  HTTPS://youtu.be/abc  "));
        assert!(is_supported_link("http://vimeo.com/1"));
        assert!(!is_supported_link("youtube.com/watch?v=abc"));
        assert!(!is_supported_link("ftp://youtube.com/x"));
        assert!(!is_supported_link("https://example.com/video.mp4"));
        assert!(!is_supported_link("hello there"));
        assert!(!is_supported_link("https://youtube.com/a b"));
    }

    #[tokio::test]
    async fn unsupported_links_never_reach_the_engine() {
        let engine = Arc::new(FakeEngine::new(Some(info(vec![])), FetchOutcome::ProduceNothing));
        let (p, sessions) = pipeline(engine.clone());

        for link in ["not a link", "https://example.com/x", "www.youtube.com/watch"] {
            let err = p.resolve(UserId(1), link).await.unwrap_err();
            assert!(matches!(err, ResolutionError::Unsupported));
        }
        assert_eq!(engine.probe_calls(), 0);
        assert!(sessions.pending_offer(UserId(1)).is_none());
    }

    #[test]
    fn collapse_prefers_audio_and_dedupes_heights() {
        let formats = vec![
            format("1080v", 1080, false),
            format("720v", 720, false),
            format("720av", 720, true),
            format("480v", 480, false),
        ];
        let tiers = collapse_formats(&formats);
        let labels: Vec<_> = tiers.iter().map(|t| t.label.as_str()).collect();
        assert_eq!(labels, vec!["1080p", "720p", "480p"]);
        assert_eq!(tiers[1].format_id, "720av");
        assert_eq!(tiers[0].format_id, "1080v");
    }

    #[test]
    fn collapse_keeps_first_seen_without_audio_and_first_audio_candidate() {
        let formats = vec![
            format("a", 360, false),
            format("b", 360, false),
            format("c", 240, true),
            format("d", 240, true),
        ];
        let tiers = collapse_formats(&formats);
        assert_eq!(tiers[0].format_id, "a");
        assert_eq!(tiers[1].format_id, "c");
    }

    #[test]
    fn collapse_skips_audio_only_and_heightless_formats() {
        let mut audio_only = format("aud", 0, true);
        audio_only.vcodec = Some("none".to_string());
        audio_only.height = None;
        let mut no_codec = format("nc", 720, true);
        no_codec.vcodec = None;
        let mut zero = format("z", 0, false);
        zero.height = Some(0);

        assert!(collapse_formats(&[audio_only, no_codec, zero]).is_empty());
    }

    #[tokio::test]
    async fn successful_resolution_populates_the_session() {
        let engine = Arc::new(FakeEngine::new(
            Some(info(vec![
                format("1080v", 1080, false),
                format("720v", 720, false),
                format("720av", 720, true),
                format("480v", 480, false),
            ])),
            FetchOutcome::ProduceNothing,
        ));
        let (p, sessions) = pipeline(engine);
        let user = UserId(2);

        let offer = p.resolve(user, "https://youtu.be/abc").await.unwrap();
        assert_eq!(offer.title, "Clip");
        assert_eq!(offer.tiers.len(), 3);

        let pending = sessions.pending_offer(user).unwrap();
        assert_eq!(pending.id, offer.offer_id);
        assert_eq!(pending.link, "https://youtu.be/abc");
        let keys: Vec<_> = pending.formats.keys().cloned().collect();
        assert_eq!(keys, vec!["1080p", "480p", "720p"]);
        assert_eq!(pending.formats["720p"], "720av");
    }

    #[tokio::test]
    async fn offer_is_capped_but_session_keeps_every_tier() {
        let formats = (1..=12).map(|i| format(&format!("f{i}"), i * 100, true)).collect();
        let engine = Arc::new(FakeEngine::new(Some(info(formats)), FetchOutcome::ProduceNothing));
        let (p, sessions) = pipeline(engine);

        let offer = p.resolve(UserId(4), "https://vimeo.com/1").await.unwrap();
        assert_eq!(offer.tiers.len(), MAX_OFFERED_QUALITIES);
        assert_eq!(offer.tiers[0].label, "1200p");
        assert_eq!(sessions.pending_offer(UserId(4)).unwrap().formats.len(), 12);
    }

    #[tokio::test]
    async fn failures_leave_the_previous_offer_intact() {
        let engine = Arc::new(FakeEngine::new(
            Some(info(vec![format("720av", 720, true)])),
            FetchOutcome::ProduceNothing,
        ));
        let (p, sessions) = pipeline(engine.clone());
        let user = UserId(8);
        let first = p.resolve(user, "https://youtu.be/one").await.unwrap();

        *engine.info.lock().unwrap() = Some(info(vec![]));
        let err = p.resolve(user, "https://youtu.be/two").await.unwrap_err();
        assert!(matches!(err, ResolutionError::NoPlayableFormat));

        *engine.info.lock().unwrap() = None;
        let err = p.resolve(user, "https://youtu.be/three").await.unwrap_err();
        assert!(matches!(err, ResolutionError::Extraction(_)));

        let pending = sessions.pending_offer(user).unwrap();
        assert_eq!(pending.id, first.offer_id);
        assert_eq!(pending.link, "https://youtu.be/one");
    }
}
