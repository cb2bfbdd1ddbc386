//! Catalog store abstractions, the entry data model and an in-memory backend.
//!
//! The ingestion pipeline only ever calls [`CatalogStore::insert`]; listing
//! exists for operator inspection and tests.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

mod entry;
mod sqlite;

pub use entry::{
    generate_entry_id, split_file_name, CatalogEntry, EntryKind, EntryStatus, FileCategory,
};
pub use sqlite::SqliteCatalogStore;

/// Result type for catalog store operations.
pub type StoreResult<T> = Result<T, CatalogStoreError>;

/// Errors returned by catalog store implementations.
#[derive(Debug, Error)]
pub enum CatalogStoreError {
    #[error("an active entry named '{name}' already exists in this folder")]
    NameConflict { name: String },
    #[error("source message '{fingerprint}' was already ingested")]
    DuplicateSource { fingerprint: String },
    #[error("entry id '{0}' already exists")]
    IdConflict(String),
    #[error("parent '{0}' is not an existing directory")]
    InvalidParent(String),
    #[error("invalid catalog entry: {0}")]
    InvalidEntry(String),
    #[error("catalog store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CatalogStoreError {
    /// True for the name-uniqueness violation the writer resolves by renaming.
    pub fn is_name_conflict(&self) -> bool {
        matches!(self, Self::NameConflict { .. })
    }

    pub fn is_duplicate_source(&self) -> bool {
        matches!(self, Self::DuplicateSource { .. })
    }
}

/// Async catalog contract shared by the ingestion writer and tooling.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Inserts `entry`, failing with a distinguishable error on name or
    /// source-fingerprint conflicts.
    async fn insert(&self, entry: CatalogEntry) -> StoreResult<()>;

    /// Lists every entry ordered by creation time.
    async fn list_entries(&self) -> StoreResult<Vec<CatalogEntry>>;
}

/// In-memory implementation for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryCatalogStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: Vec<CatalogEntry>,
    index_by_id: HashMap<String, usize>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds `entry` through the normal insert checks.
    pub async fn with_entry(self, entry: CatalogEntry) -> StoreResult<Self> {
        self.insert(entry).await?;
        Ok(self)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn insert(&self, entry: CatalogEntry) -> StoreResult<()> {
        entry.validate()?;
        let mut inner = self.inner.write().await;
        if inner.index_by_id.contains_key(&entry.id) {
            return Err(CatalogStoreError::IdConflict(entry.id));
        }
        if let Some(parent_id) = entry.parent_id.as_deref() {
            let parent_is_directory = inner
                .index_by_id
                .get(parent_id)
                .map(|index| inner.entries[*index].is_directory())
                .unwrap_or(false);
            if !parent_is_directory {
                return Err(CatalogStoreError::InvalidParent(parent_id.to_string()));
            }
        }
        if let Some(fingerprint) = entry.source_fingerprint.as_deref() {
            if inner
                .entries
                .iter()
                .any(|existing| existing.source_fingerprint.as_deref() == Some(fingerprint))
            {
                return Err(CatalogStoreError::DuplicateSource {
                    fingerprint: fingerprint.to_string(),
                });
            }
        }
        if inner
            .entries
            .iter()
            .any(|existing| existing.same_name_scope(&entry))
        {
            return Err(CatalogStoreError::NameConflict { name: entry.name });
        }

        let index = inner.entries.len();
        inner.index_by_id.insert(entry.id.clone(), index);
        inner.entries.push(entry);
        Ok(())
    }

    async fn list_entries(&self) -> StoreResult<Vec<CatalogEntry>> {
        let mut entries = self.inner.read().await.entries.clone();
        entries.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        Ok(entries)
    }
}
