//! Media-resolution / download engine port.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::Result;

/// One downloadable rendition as reported by the engine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FormatDescriptor {
    /// Opaque token round-tripped from `probe` to `fetch`.
    pub format_id: String,
    pub height: Option<u32>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
}

impl FormatDescriptor {
    pub fn has_video(&self) -> bool {
        codec_present(self.vcodec.as_deref())
    }

    pub fn has_audio(&self) -> bool {
        codec_present(self.acodec.as_deref())
    }
}

fn codec_present(codec: Option<&str>) -> bool {
    matches!(codec, Some(c) if !c.is_empty() && c != "none")
}

/// Metadata returned by a probe (no download).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MediaInfo {
    pub title: Option<String>,
    pub duration_secs: Option<u64>,
    pub uploader: Option<String>,
    pub formats: Vec<FormatDescriptor>,
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn probe(&self, link: &str) -> Result<MediaInfo>;

    /// Download `link` using `selector`, writing files whose names start with
    /// `output_prefix`. Returns the paths the engine reports having produced
    /// (possibly empty; callers locate artifacts themselves).
    async fn fetch(&self, link: &str, selector: &str, output_prefix: &Path)
        -> Result<Vec<PathBuf>>;
}
