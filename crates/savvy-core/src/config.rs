use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{domain::UserId, errors::Error, Result};

pub const DEFAULT_INITIAL_WELCOME: &str = "👋 Welcome! Please join our channels to continue.";

pub const DEFAULT_MAIN_WELCOME: &str = "🎬 **Welcome to VideoSavvy Bot!**

✨ _Your all-in-one video downloader_
✨ Supports YouTube, Instagram, TikTok & more
✨ Choose your preferred quality, 360p to 1080p+
✨ Instant download with no ads & no signup required

➡️ **How to use:**
1️⃣ Send any video link
2️⃣ Select quality
3️⃣ Receive your video seamlessly!

_Enjoy effortless video downloads!_ 🎥🚀";

/// Telegram bot uploads top out at 2 GB; stay below it.
pub const DEFAULT_MAX_FILESIZE: u64 = 1950 * 1024 * 1024;

/// Typed process configuration.
///
/// Everything here is fixed at startup. Settings the administrator edits at
/// runtime (channels, welcome content) are only *seeded* from here and then
/// live in [`crate::settings::SettingsStore`].
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub bot_token: String,
    pub admin_id: UserId,

    // Seeds for the runtime settings store
    pub required_channels: Vec<String>,
    pub initial_welcome_text: String,
    pub main_welcome_text: String,

    // Downloads
    pub temp_dir: PathBuf,
    pub max_filesize_bytes: u64,
    pub max_concurrent_downloads: usize,
    pub download_timeout: Duration,
    pub resolve_timeout: Duration,

    // Sessions / gating
    pub session_ttl: Option<Duration>,
    pub gate_links: bool,

    // Media engine
    pub ytdlp_path: PathBuf,
    pub merge_output_format: String,
}

impl Config {
    /// Defaults for everything except the two mandatory values.
    pub fn new(bot_token: impl Into<String>, admin_id: UserId) -> Self {
        Self {
            bot_token: bot_token.into(),
            admin_id,
            required_channels: Vec::new(),
            initial_welcome_text: DEFAULT_INITIAL_WELCOME.to_string(),
            main_welcome_text: DEFAULT_MAIN_WELCOME.to_string(),
            temp_dir: PathBuf::from("/tmp/savvy-downloads"),
            max_filesize_bytes: DEFAULT_MAX_FILESIZE,
            max_concurrent_downloads: 2,
            download_timeout: Duration::from_secs(15 * 60),
            resolve_timeout: Duration::from_secs(60),
            session_ttl: Some(Duration::from_secs(6 * 60 * 60)),
            gate_links: true,
            ytdlp_path: PathBuf::from("yt-dlp"),
            merge_output_format: "mp4".to_string(),
        }
    }

    /// Load from the process environment (after an optional `.env`) and make
    /// sure the transient download directory exists.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        let cfg = Self::from_lookup(|key| env::var(key).ok())?;
        fs::create_dir_all(&cfg.temp_dir)?;
        Ok(cfg)
    }

    /// Build a config from an arbitrary key lookup. There is no fallback for the
    /// bot token: a missing secret is a startup failure.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let bot_token = get("BOT_TOKEN").ok_or_else(|| {
            Error::Config("BOT_TOKEN environment variable is required".to_string())
        })?;
        let admin_id = get("ADMIN_ID")
            .ok_or_else(|| Error::Config("ADMIN_ID environment variable is required".to_string()))?
            .trim()
            .parse::<i64>()
            .map(UserId)
            .map_err(|e| Error::Config(format!("ADMIN_ID must be a numeric user id: {e}")))?;

        let mut cfg = Self::new(bot_token.trim(), admin_id);

        cfg.required_channels = dedupe(parse_csv(get("REQUIRED_CHANNELS")));
        if let Some(v) = get("INITIAL_WELCOME_TEXT") {
            cfg.initial_welcome_text = v;
        }
        if let Some(v) = get("MAIN_WELCOME_TEXT") {
            cfg.main_welcome_text = v;
        }

        if let Some(v) = get("TEMP_DIR") {
            cfg.temp_dir = PathBuf::from(v);
        }
        if let Some(v) = parse_num::<u64>(&get, "MAX_FILESIZE_BYTES")? {
            cfg.max_filesize_bytes = v;
        }
        if let Some(v) = parse_num::<usize>(&get, "MAX_CONCURRENT_DOWNLOADS")? {
            cfg.max_concurrent_downloads = v.max(1);
        }
        if let Some(v) = parse_num::<u64>(&get, "DOWNLOAD_TIMEOUT_SECS")? {
            cfg.download_timeout = Duration::from_secs(v.max(1));
        }
        if let Some(v) = parse_num::<u64>(&get, "RESOLVE_TIMEOUT_SECS")? {
            cfg.resolve_timeout = Duration::from_secs(v.max(1));
        }
        if let Some(v) = parse_num::<u64>(&get, "SESSION_TTL_SECS")? {
            // 0 means sessions never expire.
            cfg.session_ttl = (v > 0).then(|| Duration::from_secs(v));
        }
        if let Some(v) = get("GATE_LINKS") {
            cfg.gate_links = parse_bool(&v);
        }

        if let Some(v) = get("YTDLP_PATH") {
            cfg.ytdlp_path = PathBuf::from(v);
        }
        if let Some(v) = get("MERGE_OUTPUT_FORMAT") {
            cfg.merge_output_format = v.trim().to_string();
        }

        Ok(cfg)
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() || env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn parse_num<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    let Some(raw) = get(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|e| Error::Config(format!("{key}: invalid value {raw:?}: {e}")))
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_csv(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn dedupe(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
