use std::sync::Arc;

use savvy_core::{config::Config, media::MediaEngine};
use savvy_ytdlp::{YtDlpConfig, YtDlpEngine};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), savvy_core::Error> {
    savvy_core::logging::init("savvy")?;

    let cfg = Arc::new(Config::load()?);
    info!(
        ytdlp = %cfg.ytdlp_path.display(),
        max_concurrent_downloads = cfg.max_concurrent_downloads,
        "starting VideoSavvy bot"
    );

    let media: Arc<dyn MediaEngine> = Arc::new(YtDlpEngine::new(YtDlpConfig::from_config(&cfg)));

    savvy_telegram::router::run_polling(cfg, media)
        .await
        .map_err(|e| savvy_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
