//! yt-dlp adapter for the media engine port.
//!
//! `probe` runs `yt-dlp -J` and parses the info JSON; `fetch` downloads the
//! selected formats into the caller's output prefix. Child processes are
//! killed when the calling future is dropped, so timeouts and cancellation do
//! not leave stray downloads behind.

use std::{
    collections::VecDeque,
    ffi::OsString,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    process::Command,
    sync::Mutex,
};
use tracing::debug;

use savvy_core::{
    config::Config,
    errors::Error,
    media::{FormatDescriptor, MediaEngine, MediaInfo},
    Result,
};

const STDERR_TAIL_MAX_BYTES: usize = 16 * 1024;
const STDERR_TAIL_MAX_LINES: usize = 200;

#[derive(Clone, Debug)]
pub struct YtDlpConfig {
    pub program: PathBuf,
    pub merge_output_format: String,
}

impl YtDlpConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            program: cfg.ytdlp_path.clone(),
            merge_output_format: cfg.merge_output_format.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct YtDlpEngine {
    cfg: YtDlpConfig,
}

impl YtDlpEngine {
    pub fn new(cfg: YtDlpConfig) -> Self {
        Self { cfg }
    }

    /// Run yt-dlp to completion and return its stdout.
    async fn run(&self, args: Vec<OsString>) -> Result<String> {
        debug!(program = %self.cfg.program.display(), ?args, "spawning yt-dlp");

        let mut child = Command::new(&self.cfg.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::External(format!(
                    "failed to start {}: {e}",
                    self.cfg.program.display()
                ))
            })?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::External("yt-dlp stdout was not captured".to_string()))?;
        let stderr = child.stderr.take();
        let tail: Arc<Mutex<StderrTail>> = Arc::new(Mutex::new(StderrTail::default()));

        // Drain stderr in the background so a chatty child never blocks on a full pipe.
        let drain = stderr.map(|stderr| {
            let tail = tail.clone();
            tokio::spawn(async move {
                let mut r = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = r.next_line().await {
                    tail.lock().await.push_line(line);
                }
            })
        });

        let mut out = String::new();
        stdout.read_to_string(&mut out).await?;
        let status = child.wait().await?;
        if let Some(handle) = drain {
            let _ = handle.await;
        }

        if !status.success() {
            let tail = tail.lock().await;
            return Err(Error::Extraction(format!(
                "yt-dlp exited with {status}: {}",
                tail.error_summary()
            )));
        }
        Ok(out)
    }
}

#[async_trait]
impl MediaEngine for YtDlpEngine {
    async fn probe(&self, link: &str) -> Result<MediaInfo> {
        let out = self.run(probe_args(link)).await?;
        parse_info(&out)
    }

    async fn fetch(
        &self,
        link: &str,
        selector: &str,
        output_prefix: &Path,
    ) -> Result<Vec<PathBuf>> {
        let args = fetch_args(
            link,
            selector,
            output_prefix,
            &self.cfg.merge_output_format,
        );
        let out = self.run(args).await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .collect())
    }
}

fn probe_args(link: &str) -> Vec<OsString> {
    ["-J", "--no-playlist", "--no-warnings", "--", link]
        .into_iter()
        .map(OsString::from)
        .collect()
}

/// Output goes to `<prefix>.<ext>`; the final path is printed on stdout.
fn fetch_args(link: &str, selector: &str, prefix: &Path, merge_format: &str) -> Vec<OsString> {
    let mut template = prefix.as_os_str().to_os_string();
    template.push(".%(ext)s");

    let mut args: Vec<OsString> = [
        "-f",
        selector,
        "--merge-output-format",
        merge_format,
        "--no-playlist",
        "--no-warnings",
        "--no-progress",
        "--no-simulate",
        "--print",
        "after_move:filepath",
        "-o",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.push(template);
    args.push("--".into());
    args.push(link.into());
    args
}

#[derive(Debug, Deserialize)]
struct RawInfo {
    title: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    #[serde(default)]
    formats: Vec<RawFormat>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    format_id: Option<String>,
    height: Option<f64>,
    vcodec: Option<String>,
    acodec: Option<String>,
}

fn parse_info(json: &str) -> Result<MediaInfo> {
    let raw: RawInfo = serde_json::from_str(json)?;
    let formats = raw
        .formats
        .into_iter()
        .filter_map(|f| {
            Some(FormatDescriptor {
                format_id: f.format_id?,
                height: f.height.filter(|h| *h >= 1.0).map(|h| h as u32),
                vcodec: f.vcodec,
                acodec: f.acodec,
            })
        })
        .collect();

    Ok(MediaInfo {
        title: raw.title,
        duration_secs: raw.duration.filter(|d| *d >= 0.0).map(|d| d as u64),
        uploader: raw.uploader,
        formats,
    })
}

#[derive(Clone, Debug, Default)]
struct StderrTail {
    lines: VecDeque<String>,
    bytes: usize,
}

impl StderrTail {
    fn push_line(&mut self, line: String) {
        // +1 for the '\n' we join with later.
        self.bytes = self.bytes.saturating_add(line.len() + 1);
        self.lines.push_back(line);

        while self.lines.len() > STDERR_TAIL_MAX_LINES || self.bytes > STDERR_TAIL_MAX_BYTES {
            match self.lines.pop_front() {
                Some(front) => self.bytes = self.bytes.saturating_sub(front.len() + 1),
                None => break,
            }
        }
    }

    /// The last `ERROR:` line if yt-dlp printed one, else the whole tail.
    fn error_summary(&self) -> String {
        self.lines
            .iter()
            .rev()
            .find(|l| l.starts_with("ERROR:"))
            .cloned()
            .unwrap_or_else(|| self.lines.iter().cloned().collect::<Vec<_>>().join("\n"))
    }
}
