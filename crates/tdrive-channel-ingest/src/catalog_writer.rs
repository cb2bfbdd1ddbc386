//! Builds catalog entries for extracted documents and inserts them with
//! collision-resolving renames.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tdrive_catalog::{
    generate_entry_id, split_file_name, CatalogEntry, CatalogStore, CatalogStoreError, EntryKind,
    EntryStatus,
};
use thiserror::Error;

use crate::channel_identity::ChannelBinding;
use crate::document_extractor::ExtractedDocument;
use crate::platform_update::PlatformMessage;

/// Original name plus two renamed retries.
pub const MAX_NAME_ATTEMPTS: usize = 3;
const RANDOM_TOKEN_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("ingestion failed for '{name}': name still colliding after {attempts} attempts")]
    IngestionFailed { name: String, attempts: usize },
    #[error("catalog store unavailable while writing '{name}': {source}")]
    StoreUnavailable {
        name: String,
        #[source]
        source: CatalogStoreError,
    },
    #[error("catalog store rejected '{name}': {source}")]
    Rejected {
        name: String,
        #[source]
        source: CatalogStoreError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted { entry: CatalogEntry, renamed: bool },
    /// Idempotent mode only: the source message already has an entry.
    AlreadyIngested { fingerprint: String },
}

pub struct CatalogWriter {
    store: Arc<dyn CatalogStore>,
    binding: Arc<ChannelBinding>,
    owner_id: i64,
    idempotent_redelivery: bool,
}

impl CatalogWriter {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        binding: Arc<ChannelBinding>,
        owner_id: i64,
        idempotent_redelivery: bool,
    ) -> Self {
        Self {
            store,
            binding,
            owner_id,
            idempotent_redelivery,
        }
    }

    pub async fn write(
        &self,
        message: &PlatformMessage,
        document: &ExtractedDocument,
    ) -> Result<WriteOutcome, WriteError> {
        let fingerprint = self
            .idempotent_redelivery
            .then(|| source_fingerprint(self.binding.internal_channel_id(), message.message_id));

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = candidate_name(&document.file_name, attempt, Utc::now());
            let entry = self.build_entry(name, message, document, fingerprint.clone());
            match self.store.insert(entry.clone()).await {
                Ok(()) => {
                    return Ok(WriteOutcome::Inserted {
                        entry,
                        renamed: attempt > 0,
                    })
                }
                Err(error) if error.is_name_conflict() => {
                    tracing::debug!(
                        attempt = attempt + 1,
                        name = %entry.name,
                        "catalog name collision"
                    );
                }
                Err(error) if error.is_duplicate_source() => {
                    return Ok(WriteOutcome::AlreadyIngested {
                        fingerprint: fingerprint.unwrap_or_default(),
                    });
                }
                Err(
                    error @ (CatalogStoreError::Unavailable(_)
                    | CatalogStoreError::Sqlite(_)
                    | CatalogStoreError::Io(_)),
                ) => {
                    return Err(WriteError::StoreUnavailable {
                        name: entry.name,
                        source: error,
                    })
                }
                Err(error) => {
                    return Err(WriteError::Rejected {
                        name: entry.name,
                        source: error,
                    })
                }
            }
        }

        Err(WriteError::IngestionFailed {
            name: document.file_name.clone(),
            attempts: MAX_NAME_ATTEMPTS,
        })
    }

    fn build_entry(
        &self,
        name: String,
        message: &PlatformMessage,
        document: &ExtractedDocument,
        fingerprint: Option<String>,
    ) -> CatalogEntry {
        let now = Utc::now();
        CatalogEntry {
            id: generate_entry_id(),
            name,
            kind: EntryKind::File,
            size_bytes: Some(document.size_bytes),
            mime_type: Some(document.mime_type.clone()),
            category: Some(document.category),
            parent_id: self
                .binding
                .parent_for(document.category)
                .map(str::to_string),
            owner_id: self.owner_id,
            source_channel_id: Some(self.binding.internal_channel_id()),
            source_message_id: Some(message.message_id),
            source_fingerprint: fingerprint,
            status: EntryStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

pub fn source_fingerprint(channel_id: i64, message_id: i64) -> String {
    format!("{channel_id}:{message_id}")
}

fn candidate_name(original: &str, attempt: usize, now: DateTime<Utc>) -> String {
    match attempt {
        0 => original.to_string(),
        1 => timestamp_suffixed_name(original, now),
        _ => token_prefixed_name(original, &random_token()),
    }
}

/// `base_YYYYMMDD_HHMMSS.ext`, keeping the extension.
pub fn timestamp_suffixed_name(original: &str, at: DateTime<Utc>) -> String {
    let stamp = at.format("%Y%m%d_%H%M%S");
    match split_file_name(original) {
        Some((base, extension)) => format!("{base}_{stamp}.{extension}"),
        None => format!("{original}_{stamp}"),
    }
}

/// `token_base.ext`.
pub fn token_prefixed_name(original: &str, token: &str) -> String {
    format!("{token}_{original}")
}

fn random_token() -> String {
    let mut token = uuid::Uuid::new_v4().simple().to_string();
    token.truncate(RANDOM_TOKEN_LEN);
    token
}
