//! Telegram channel ingestion for the tdrive catalog.
//!
//! Listens to one bound channel through a bot session, filters documents
//! posted there and records each one as a catalog file entry.

pub mod catalog_writer;
pub mod channel_identity;
pub mod document_extractor;
pub mod ingest_counters;
pub mod ingest_error;
pub mod ingest_pipeline;
pub mod listener_state;
pub mod platform_session;
pub mod platform_update;
pub mod telegram_bot_api;
pub mod update_dispatcher;
pub mod update_listener;

#[cfg(test)]
pub(crate) mod test_support;

pub use catalog_writer::{CatalogWriter, WriteError, WriteOutcome};
pub use channel_identity::{
    denormalize, normalize, ChannelBinding, ChannelClass, ChannelIdError, NormalizedChannelId,
};
pub use document_extractor::{extract_document, ExtractedDocument, ExtractionSkip};
pub use ingest_counters::{IngestCounter, IngestCounters, IngestCountersSnapshot};
pub use ingest_error::IngestError;
pub use ingest_pipeline::{
    IngestPipeline, IngestPipelineConfig, PipelineHandle, PipelineReport, PipelineStopReason,
};
pub use listener_state::{ListenerStateFile, ListenerStateStore};
pub use platform_session::{AuthStatus, BotIdentity, PlatformError, PlatformSession, PolledUpdates};
pub use platform_update::{
    DocumentAttribute, DocumentKind, DocumentMedia, MessageMedia, Peer, PlatformMessage,
    PlatformUpdates, UpdateEvent,
};
pub use telegram_bot_api::{TelegramBotConfig, TelegramBotSession};
pub use update_dispatcher::UpdateDispatcher;
pub use update_listener::{ListenerConfig, ReconnectBackoffPolicy, UpdateListener};
