//! Daemon entry point: configuration, wiring, and the two periodic tasks.

use std::sync::Arc;

use anyhow::Context;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use abridge::adapters::{
    AudiobookApi, AudiobookClient, EbookSyncApi, EbookSyncClient, ReadalongDb, ReadalongStore,
};
use abridge::config::Config;
use abridge::jobs::JobController;
use abridge::store::ProgressStore;
use abridge::sync::ReconciliationEngine;
use abridge::transcript::{CommandTranscriber, Transcriber};

const JOB_TICK_SECS: u64 = 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    std::fs::create_dir_all(&config.data_dir).context("creating data directory")?;
    let store = Arc::new(ProgressStore::open(&config.data_dir).context("opening progress store")?);
    let recovered = store.recover_interrupted()?;
    if recovered > 0 {
        info!(recovered, "forgave interrupted jobs at startup");
    }

    let audiobook = AudiobookClient::new(
        config.audiobook.url.clone(),
        config.audiobook.token.clone(),
    )
    .context("building audiobook client")?;
    let ebook_sync = EbookSyncClient::new(
        config.ebook_sync.url.clone(),
        config.ebook_sync.username.clone(),
        &config.ebook_sync.password,
    )
    .context("building ebook sync client")?;
    let readalong = ReadalongStore::new(
        config.readalong.db_path.clone(),
        config.readalong.user_id.clone(),
    );

    info!("performing connectivity checks");
    if !audiobook.check_connection().await {
        warn!("audiobook server connection failed");
    }
    if !ebook_sync.check_connection().await {
        warn!("ebook sync service connection failed");
    }
    if !readalong.check_connection().await {
        warn!("read-along database connection failed");
    }

    let transcriber: Option<Arc<dyn Transcriber>> = config.transcriber_cmd.clone().map(|cmd| {
        Arc::new(CommandTranscriber::new(cmd, config.transcripts_dir())) as Arc<dyn Transcriber>
    });
    let jobs = JobController::new(
        store.clone(),
        audiobook.clone(),
        transcriber,
        config.books_dir.clone(),
        config.index_cache_dir(),
    );
    let mut engine = ReconciliationEngine::new(
        audiobook,
        ebook_sync,
        readalong,
        store,
        config.thresholds,
        config.books_dir.clone(),
        config.index_cache_dir(),
    );

    info!(
        period_secs = config.sync_period.as_secs(),
        delta_audio_secs = config.thresholds.audio_seconds,
        delta_ebook = config.thresholds.ebook_fraction,
        delta_chars = config.thresholds.char_window,
        "daemon running"
    );

    // first pass right away, then the periodic schedule
    engine.run_cycle().await;

    let mut sync_tick = tokio::time::interval(config.sync_period);
    sync_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    sync_tick.tick().await;
    let mut job_tick = tokio::time::interval(std::time::Duration::from_secs(JOB_TICK_SECS));
    job_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    job_tick.tick().await;

    loop {
        tokio::select! {
            _ = sync_tick.tick() => engine.run_cycle().await,
            _ = job_tick.tick() => jobs.check_pending().await,
        }
    }
}
