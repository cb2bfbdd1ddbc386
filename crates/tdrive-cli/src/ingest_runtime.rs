use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tdrive_catalog::{CatalogStore, SqliteCatalogStore};
use tdrive_channel_ingest::{
    IngestCountersSnapshot, IngestError, IngestPipeline, IngestPipelineConfig, PipelineReport,
    PipelineStopReason, TelegramBotConfig, TelegramBotSession,
};
use tdrive_core::CancellationToken;

use crate::cli_args::Cli;

fn idle_report(stop_reason: PipelineStopReason) -> PipelineReport {
    PipelineReport {
        stop_reason,
        identity: None,
        counters: IngestCountersSnapshot::default(),
        abandoned_in_flight: false,
    }
}

/// Runs ingestion until ctrl-c and returns the final report.
pub(crate) async fn run_ingest(cli: &Cli) -> Result<PipelineReport> {
    let config = cli.pipeline_config()?;
    if !config.enabled {
        tracing::info!("channel ingestion disabled; exiting");
        return Ok(idle_report(PipelineStopReason::Disabled));
    }
    config.validate()?;
    let telegram = cli.telegram_config()?;
    let store: Arc<dyn CatalogStore> = Arc::new(
        SqliteCatalogStore::new(&cli.catalog_db)
            .with_context(|| format!("failed to open catalog {}", cli.catalog_db.display()))?,
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received ctrl-c; stopping ingestion");
            signal_cancel.cancel();
        }
    });

    run_with_rate_limit_retries(
        &config,
        &telegram,
        store,
        &cancel,
        cli.auth_rate_limit_retries,
    )
    .await
}

/// Runs the pipeline to completion, restarting it after a rate-limited
/// authorization up to `max_retries` times. The limit may be reported by
/// `start` or, when the handshake outlives the startup grace, by `join`.
async fn run_with_rate_limit_retries(
    config: &IngestPipelineConfig,
    telegram: &TelegramBotConfig,
    store: Arc<dyn CatalogStore>,
    cancel: &CancellationToken,
    max_retries: u32,
) -> Result<PipelineReport> {
    let mut attempt = 0_u32;
    loop {
        let pipeline = IngestPipeline::telegram(config.clone(), telegram, Arc::clone(&store))?;
        let error = match run_once(pipeline, cancel).await {
            Ok(report) => return Ok(report),
            Err(error) => error,
        };
        let Some(retry_after) = error.retry_after().filter(|_| attempt < max_retries) else {
            return Err(error.into());
        };
        attempt = attempt.saturating_add(1);
        tracing::warn!(
            attempt,
            max_retries,
            retry_after_ms = retry_after.as_millis() as u64,
            "authorization rate limited; retrying"
        );
        if !sleep_unless_cancelled(retry_after, cancel).await {
            return Ok(idle_report(PipelineStopReason::Cancelled));
        }
    }
}

async fn run_once(
    pipeline: IngestPipeline<TelegramBotSession>,
    cancel: &CancellationToken,
) -> Result<PipelineReport, IngestError> {
    pipeline.start(cancel.clone()).await?.join().await
}

async fn sleep_unless_cancelled(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
