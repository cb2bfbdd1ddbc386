//! One channel binding's listener → dispatcher → extractor → writer pipeline.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tdrive_catalog::{CatalogStore, FileCategory};
use tdrive_core::CancellationToken;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::catalog_writer::{CatalogWriter, WriteError, WriteOutcome};
use crate::channel_identity::ChannelBinding;
use crate::document_extractor::{extract_document, ExtractionSkip};
use crate::ingest_counters::{IngestCounter, IngestCounters, IngestCountersSnapshot};
use crate::ingest_error::IngestError;
use crate::listener_state::ListenerStateStore;
use crate::platform_session::{BotIdentity, PlatformSession};
use crate::platform_update::{PlatformMessage, PlatformUpdates};
use crate::telegram_bot_api::{TelegramBotConfig, TelegramBotSession};
use crate::update_dispatcher::UpdateDispatcher;
use crate::update_listener::{ListenerConfig, UpdateListener};

pub const DEFAULT_STARTUP_GRACE_MS: u64 = 2_000;
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq)]
pub struct IngestPipelineConfig {
    pub enabled: bool,
    /// Source channel in the public encoding.
    pub channel_id: Option<i64>,
    pub target_parent_id: Option<String>,
    pub category_parent_ids: BTreeMap<FileCategory, String>,
    pub owner_id: i64,
    pub idempotent_redelivery: bool,
    pub startup_grace: Duration,
    pub shutdown_grace: Duration,
    pub state_path: Option<PathBuf>,
    pub listener: ListenerConfig,
}

impl IngestPipelineConfig {
    pub fn new(channel_id: i64, owner_id: i64) -> Self {
        Self {
            enabled: true,
            channel_id: Some(channel_id),
            target_parent_id: None,
            category_parent_ids: BTreeMap::new(),
            owner_id,
            idempotent_redelivery: false,
            startup_grace: Duration::from_millis(DEFAULT_STARTUP_GRACE_MS),
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
            state_path: None,
            listener: ListenerConfig::default(),
        }
    }

    /// Validates the config and derives the binding. `None` means disabled.
    pub fn validate(&self) -> Result<Option<ChannelBinding>, IngestError> {
        if !self.enabled {
            return Ok(None);
        }
        let channel_id = self.channel_id.ok_or_else(|| {
            IngestError::Config("channel id is required when ingestion is enabled".to_string())
        })?;
        if self.owner_id <= 0 {
            return Err(IngestError::Config(format!(
                "owner id must be a positive account id, got {}",
                self.owner_id
            )));
        }
        if self.listener.auth_timeout.is_zero() {
            return Err(IngestError::Config(
                "auth timeout must be greater than 0".to_string(),
            ));
        }
        self.listener
            .reconnect
            .validate()
            .map_err(IngestError::Config)?;
        if let Some((category, _)) = self
            .category_parent_ids
            .iter()
            .find(|(_, parent)| parent.trim().is_empty())
        {
            return Err(IngestError::Config(format!(
                "category '{}' maps to an empty directory id",
                category.as_str()
            )));
        }

        let binding = ChannelBinding::new(channel_id, self.target_parent_id.clone())?
            .with_category_parents(self.category_parent_ids.clone());
        Ok(Some(binding))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStopReason {
    Disabled,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub stop_reason: PipelineStopReason,
    pub identity: Option<BotIdentity>,
    pub counters: IngestCountersSnapshot,
    /// True when the shutdown grace elapsed with a batch still being written.
    pub abandoned_in_flight: bool,
}

/// Handle to a started pipeline.
#[derive(Debug)]
pub struct PipelineHandle {
    counters: Arc<IngestCounters>,
    task: JoinHandle<Result<PipelineReport, IngestError>>,
}

impl PipelineHandle {
    pub fn counters(&self) -> IngestCountersSnapshot {
        self.counters.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<PipelineReport, IngestError> {
        match self.task.await {
            Ok(result) => result,
            Err(error) => Err(IngestError::TaskFailed(error.to_string())),
        }
    }
}

pub struct IngestPipeline<S> {
    config: IngestPipelineConfig,
    session: S,
    store: Arc<dyn CatalogStore>,
}

impl IngestPipeline<TelegramBotSession> {
    /// Builds a pipeline backed by the Telegram Bot API.
    pub fn telegram(
        config: IngestPipelineConfig,
        telegram: &TelegramBotConfig,
        store: Arc<dyn CatalogStore>,
    ) -> Result<Self, IngestError> {
        let session = TelegramBotSession::new(telegram)
            .map_err(|error| IngestError::Config(format!("{error:#}")))?;
        Ok(Self::new(config, session, store))
    }
}

impl<S: PlatformSession + 'static> IngestPipeline<S> {
    pub fn new(config: IngestPipelineConfig, session: S, store: Arc<dyn CatalogStore>) -> Self {
        Self {
            config,
            session,
            store,
        }
    }

    /// Starts ingestion and returns once the session is confirmed live or the
    /// startup grace elapses with the handshake still in flight.
    ///
    /// A handshake that fails inside the grace window is returned here; one
    /// that fails later surfaces through [`PipelineHandle::join`].
    pub async fn start(self, cancel: CancellationToken) -> Result<PipelineHandle, IngestError> {
        let counters = Arc::new(IngestCounters::new());
        let Some(binding) = self.config.validate()? else {
            tracing::info!("channel ingestion disabled");
            let report = PipelineReport {
                stop_reason: PipelineStopReason::Disabled,
                identity: None,
                counters: IngestCountersSnapshot::default(),
                abandoned_in_flight: false,
            };
            return Ok(PipelineHandle {
                counters,
                task: tokio::spawn(async move { Ok(report) }),
            });
        };

        let state = ListenerStateStore::load(self.config.state_path.as_deref())
            .map_err(IngestError::state)?;
        let binding = Arc::new(binding);
        tracing::info!(
            channel_id = binding.configured_channel_id(),
            internal_channel_id = binding.internal_channel_id(),
            class = binding.normalized().class.as_str(),
            target_parent_id = binding.target_parent_id().unwrap_or("root"),
            idempotent_redelivery = self.config.idempotent_redelivery,
            "starting channel ingestion"
        );

        let listener = UpdateListener::new(self.session, self.config.listener.clone(), state);
        let worker = PipelineWorker {
            dispatcher: UpdateDispatcher::new(Arc::clone(&binding), Arc::clone(&counters)),
            writer: CatalogWriter::new(
                self.store,
                Arc::clone(&binding),
                self.config.owner_id,
                self.config.idempotent_redelivery,
            ),
            counters: Arc::clone(&counters),
            shutdown_grace: self.config.shutdown_grace,
        };

        let (handshake_tx, handshake_rx) = oneshot::channel();
        let handle = PipelineHandle {
            counters,
            task: tokio::spawn(run_pipeline(listener, worker, cancel, handshake_tx)),
        };

        match tokio::time::timeout(self.config.startup_grace, handshake_rx).await {
            Ok(Ok(Ok(()))) => Ok(handle),
            Ok(Ok(Err(error))) => {
                let _ = handle.join().await;
                Err(error)
            }
            Ok(Err(_)) => match handle.join().await {
                Ok(_) => Err(IngestError::TaskFailed(
                    "pipeline ended without reporting its handshake".to_string(),
                )),
                Err(error) => Err(error),
            },
            Err(_) => {
                tracing::info!(
                    grace_ms = self.config.startup_grace.as_millis() as u64,
                    "handshake still in flight after startup grace; continuing in background"
                );
                Ok(handle)
            }
        }
    }
}

struct PipelineWorker {
    dispatcher: UpdateDispatcher,
    writer: CatalogWriter,
    counters: Arc<IngestCounters>,
    shutdown_grace: Duration,
}

impl PipelineWorker {
    /// Processes `shapes`; once `cancel` fires the remaining work gets the
    /// shutdown grace. Returns false when the grace elapsed first.
    async fn process_within_grace(
        &self,
        shapes: Vec<PlatformUpdates>,
        cancel: &CancellationToken,
    ) -> bool {
        let processing = self.process(shapes);
        tokio::pin!(processing);
        tokio::select! {
            biased;
            _ = &mut processing => return true,
            _ = cancel.cancelled() => {}
        }
        tracing::info!(
            grace_ms = self.shutdown_grace.as_millis() as u64,
            "cancellation requested; waiting for in-flight writes"
        );
        tokio::time::timeout(self.shutdown_grace, &mut processing)
            .await
            .is_ok()
    }

    async fn process(&self, shapes: Vec<PlatformUpdates>) {
        for shape in shapes {
            for message in self.dispatcher.dispatch(shape) {
                self.ingest_message(message).await;
            }
        }
    }

    async fn ingest_message(&self, message: PlatformMessage) {
        let document = match extract_document(&message) {
            Ok(document) => document,
            Err(skip) => {
                let counter = match skip {
                    ExtractionSkip::NonDocumentMessage => IngestCounter::NonDocumentMessages,
                    ExtractionSkip::MissingFilename => IngestCounter::MissingFilename,
                };
                self.counters.increment(counter);
                tracing::debug!(message_id = message.message_id, reason = %skip, "skipping message");
                return;
            }
        };

        match self.writer.write(&message, &document).await {
            Ok(WriteOutcome::Inserted { entry, renamed }) => {
                self.counters.increment(IngestCounter::EntriesIngested);
                if renamed {
                    self.counters.increment(IngestCounter::EntriesRenamed);
                }
                tracing::info!(
                    message_id = message.message_id,
                    entry_id = %entry.id,
                    name = %entry.name,
                    size_bytes = document.size_bytes,
                    mime_type = %document.mime_type,
                    renamed,
                    "ingested document"
                );
            }
            Ok(WriteOutcome::AlreadyIngested { fingerprint }) => {
                self.counters.increment(IngestCounter::DuplicatesSkipped);
                tracing::info!(
                    message_id = message.message_id,
                    fingerprint = %fingerprint,
                    "skipping redelivered message"
                );
            }
            Err(error @ WriteError::IngestionFailed { .. }) => {
                self.counters.increment(IngestCounter::IngestionFailures);
                tracing::warn!(message_id = message.message_id, %error, "document not ingested");
            }
            Err(error) => {
                self.counters.increment(IngestCounter::StoreFailures);
                tracing::warn!(message_id = message.message_id, %error, "catalog write failed");
            }
        }
    }
}

async fn run_pipeline<S: PlatformSession>(
    mut listener: UpdateListener<S>,
    worker: PipelineWorker,
    cancel: CancellationToken,
    handshake_tx: oneshot::Sender<Result<(), IngestError>>,
) -> Result<PipelineReport, IngestError> {
    let handshake = tokio::select! {
        _ = cancel.cancelled() => None,
        result = listener.handshake() => Some(result),
    };
    let identity = match handshake {
        Some(Ok(identity)) => {
            let _ = handshake_tx.send(Ok(()));
            identity
        }
        Some(Err(error)) => {
            tracing::error!(%error, "session handshake failed");
            let _ = handshake_tx.send(Err(error.clone()));
            if let Err(shutdown_error) = listener.shutdown(worker.counters.snapshot()).await {
                tracing::warn!(error = %shutdown_error, "listener shutdown failed");
            }
            return Err(error);
        }
        None => {
            let _ = handshake_tx.send(Err(IngestError::Cancelled));
            listener.shutdown(worker.counters.snapshot()).await?;
            return Ok(PipelineReport {
                stop_reason: PipelineStopReason::Cancelled,
                identity: None,
                counters: worker.counters.snapshot(),
                abandoned_in_flight: false,
            });
        }
    };

    let mut abandoned_in_flight = false;
    loop {
        let polled = match listener.next_batch(&cancel).await {
            Ok(Some(polled)) => polled,
            Ok(None) => break,
            Err(error) => {
                tracing::error!(%error, "update stream failed");
                if let Err(shutdown_error) = listener.shutdown(worker.counters.snapshot()).await {
                    tracing::warn!(error = %shutdown_error, "listener shutdown failed");
                }
                return Err(error);
            }
        };

        let next_offset = polled.next_offset;
        if !worker.process_within_grace(polled.shapes, &cancel).await {
            tracing::warn!("shutdown grace elapsed; unfinished batch will be redelivered");
            abandoned_in_flight = true;
            break;
        }
        if let Err(error) = listener.acknowledge(next_offset, worker.counters.snapshot()) {
            if let Err(shutdown_error) = listener.shutdown(worker.counters.snapshot()).await {
                tracing::warn!(error = %shutdown_error, "listener shutdown failed");
            }
            return Err(error);
        }
        if cancel.is_cancelled() {
            break;
        }
    }

    let counters = worker.counters.snapshot();
    listener.shutdown(counters).await?;
    tracing::info!(
        entries_ingested = counters.entries_ingested,
        messages_filtered = counters.messages_filtered,
        "channel ingestion stopped"
    );
    Ok(PipelineReport {
        stop_reason: PipelineStopReason::Cancelled,
        identity: Some(identity),
        counters,
        abandoned_in_flight,
    })
}
