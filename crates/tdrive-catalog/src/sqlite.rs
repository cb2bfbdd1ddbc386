//! SQLite-backed `CatalogStore` implementation with durable persistence.

use crate::{
    CatalogEntry, CatalogStore, CatalogStoreError, EntryKind, EntryStatus, FileCategory,
    StoreResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

const NAME_SCOPE_INDEX: &str = "idx_catalog_entries_name_scope";

/// Persistent SQLite catalog shared by every ingestion pipeline in the process.
#[derive(Debug)]
pub struct SqliteCatalogStore {
    db_path: PathBuf,
}

impl SqliteCatalogStore {
    /// Opens (or creates) the catalog database at `path`, creating schema if needed.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        store.initialize_schema(&connection)?;
        tracing::debug!(path = %store.db_path.display(), "opened sqlite catalog");
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path).map_err(map_unavailable)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection
            .execute_batch(
                r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
            )
            .map_err(map_unavailable)?;
        Ok(connection)
    }

    fn initialize_schema(&self, connection: &Connection) -> StoreResult<()> {
        connection.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS catalog_entries (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('file', 'directory')),
                size_bytes INTEGER NULL,
                mime_type TEXT NULL,
                category TEXT NULL,
                parent_id TEXT NULL REFERENCES catalog_entries(id),
                owner_id INTEGER NOT NULL,
                source_channel_id INTEGER NULL,
                source_message_id INTEGER NULL,
                source_fingerprint TEXT NULL UNIQUE,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                CHECK (kind = 'file' OR (size_bytes IS NULL AND mime_type IS NULL))
            );

            CREATE UNIQUE INDEX IF NOT EXISTS {NAME_SCOPE_INDEX}
                ON catalog_entries (owner_id, COALESCE(parent_id, ''), name)
                WHERE status = 'active';

            CREATE INDEX IF NOT EXISTS idx_catalog_entries_parent
                ON catalog_entries (parent_id);
            "#
        ))?;
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalogStore {
    async fn insert(&self, entry: CatalogEntry) -> StoreResult<()> {
        entry.validate()?;
        let size_bytes = entry
            .size_bytes
            .map(|size| {
                i64::try_from(size).map_err(|_| {
                    CatalogStoreError::InvalidEntry(format!("size {size} exceeds storage range"))
                })
            })
            .transpose()?;

        let mut connection = self.open_connection()?;
        let transaction = connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_unavailable)?;

        if let Some(parent_id) = entry.parent_id.as_deref() {
            let parent_kind = transaction
                .query_row(
                    "SELECT kind FROM catalog_entries WHERE id = ?1",
                    params![parent_id],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            if parent_kind.as_deref() != Some(EntryKind::Directory.as_str()) {
                return Err(CatalogStoreError::InvalidParent(parent_id.to_string()));
            }
        }

        if let Some(fingerprint) = entry.source_fingerprint.as_deref() {
            let exists = transaction
                .query_row(
                    "SELECT 1 FROM catalog_entries WHERE source_fingerprint = ?1",
                    params![fingerprint],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if exists {
                return Err(CatalogStoreError::DuplicateSource {
                    fingerprint: fingerprint.to_string(),
                });
            }
        }

        transaction
            .execute(
                r#"
                INSERT INTO catalog_entries (
                    id, name, kind, size_bytes, mime_type, category, parent_id, owner_id,
                    source_channel_id, source_message_id, source_fingerprint, status,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                "#,
                params![
                    entry.id,
                    entry.name,
                    entry.kind.as_str(),
                    size_bytes,
                    entry.mime_type,
                    entry.category.map(FileCategory::as_str),
                    entry.parent_id,
                    entry.owner_id,
                    entry.source_channel_id,
                    entry.source_message_id,
                    entry.source_fingerprint,
                    entry.status.as_str(),
                    timestamp_to_db(entry.created_at),
                    timestamp_to_db(entry.updated_at),
                ],
            )
            .map_err(|error| classify_insert_error(error, &entry))?;
        transaction.commit().map_err(map_unavailable)?;
        Ok(())
    }

    async fn list_entries(&self) -> StoreResult<Vec<CatalogEntry>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            r#"
            SELECT id, name, kind, size_bytes, mime_type, category, parent_id, owner_id,
                   source_channel_id, source_message_id, source_fingerprint, status,
                   created_at, updated_at
            FROM catalog_entries
            ORDER BY created_at ASC, rowid ASC
            "#,
        )?;
        let rows = statement.query_map([], |row| {
            Ok(RawEntryRow {
                id: row.get(0)?,
                name: row.get(1)?,
                kind: row.get(2)?,
                size_bytes: row.get(3)?,
                mime_type: row.get(4)?,
                category: row.get(5)?,
                parent_id: row.get(6)?,
                owner_id: row.get(7)?,
                source_channel_id: row.get(8)?,
                source_message_id: row.get(9)?,
                source_fingerprint: row.get(10)?,
                status: row.get(11)?,
                created_at: row.get(12)?,
                updated_at: row.get(13)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.into_entry()?);
        }
        Ok(entries)
    }
}

struct RawEntryRow {
    id: String,
    name: String,
    kind: String,
    size_bytes: Option<i64>,
    mime_type: Option<String>,
    category: Option<String>,
    parent_id: Option<String>,
    owner_id: i64,
    source_channel_id: Option<i64>,
    source_message_id: Option<i64>,
    source_fingerprint: Option<String>,
    status: String,
    created_at: String,
    updated_at: String,
}

impl RawEntryRow {
    fn into_entry(self) -> StoreResult<CatalogEntry> {
        Ok(CatalogEntry {
            id: self.id,
            name: self.name,
            kind: entry_kind_from_db(&self.kind)?,
            size_bytes: self
                .size_bytes
                .map(|value| i64_to_u64("size_bytes", value))
                .transpose()?,
            mime_type: self.mime_type,
            category: self
                .category
                .as_deref()
                .map(category_from_db)
                .transpose()?,
            parent_id: self.parent_id,
            owner_id: self.owner_id,
            source_channel_id: self.source_channel_id,
            source_message_id: self.source_message_id,
            source_fingerprint: self.source_fingerprint,
            status: entry_status_from_db(&self.status)?,
            created_at: timestamp_from_db(&self.created_at)?,
            updated_at: timestamp_from_db(&self.updated_at)?,
        })
    }
}

/// Maps constraint failures that slipped past the in-transaction checks.
fn classify_insert_error(error: rusqlite::Error, entry: &CatalogEntry) -> CatalogStoreError {
    let message = match &error {
        rusqlite::Error::SqliteFailure(failure, message)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            message.clone().unwrap_or_default()
        }
        _ => return map_unavailable(error),
    };

    if message.contains(NAME_SCOPE_INDEX) || message.contains("catalog_entries.name") {
        CatalogStoreError::NameConflict {
            name: entry.name.clone(),
        }
    } else if message.contains("source_fingerprint") {
        CatalogStoreError::DuplicateSource {
            fingerprint: entry.source_fingerprint.clone().unwrap_or_default(),
        }
    } else if message.contains("catalog_entries.id") {
        CatalogStoreError::IdConflict(entry.id.clone())
    } else if message.contains("FOREIGN KEY") {
        CatalogStoreError::InvalidParent(entry.parent_id.clone().unwrap_or_default())
    } else {
        CatalogStoreError::InvalidEntry(message)
    }
}

fn map_unavailable(error: rusqlite::Error) -> CatalogStoreError {
    match &error {
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::CannotOpen
                    | ErrorCode::ReadOnly
                    | ErrorCode::DiskFull
            ) =>
        {
            CatalogStoreError::Unavailable(error.to_string())
        }
        _ => CatalogStoreError::Sqlite(error),
    }
}

fn timestamp_to_db(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn timestamp_from_db(value: &str) -> StoreResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn entry_kind_from_db(value: &str) -> StoreResult<EntryKind> {
    EntryKind::parse(value).ok_or_else(|| CatalogStoreError::InvalidPersistedValue {
        field: "kind",
        value: value.to_string(),
    })
}

fn entry_status_from_db(value: &str) -> StoreResult<EntryStatus> {
    EntryStatus::parse(value).ok_or_else(|| CatalogStoreError::InvalidPersistedValue {
        field: "status",
        value: value.to_string(),
    })
}

fn category_from_db(value: &str) -> StoreResult<FileCategory> {
    FileCategory::parse(value).ok_or_else(|| CatalogStoreError::InvalidPersistedValue {
        field: "category",
        value: value.to_string(),
    })
}

fn i64_to_u64(field: &'static str, value: i64) -> StoreResult<u64> {
    u64::try_from(value).map_err(|_| CatalogStoreError::InvalidPersistedValue {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::SqliteCatalogStore;
    use crate::{
        generate_entry_id, CatalogEntry, CatalogStore, CatalogStoreError, EntryKind, EntryStatus,
        FileCategory,
    };
    use chrono::Utc;
    use tempfile::tempdir;

    fn file_entry(name: &str, parent_id: Option<String>) -> CatalogEntry {
        let now = Utc::now();
        CatalogEntry {
            id: generate_entry_id(),
            name: name.to_string(),
            kind: EntryKind::File,
            size_bytes: Some(2048),
            mime_type: Some("application/pdf".to_string()),
            category: Some(FileCategory::from_file_name(name)),
            parent_id,
            owner_id: 7,
            source_channel_id: Some(1_234_567_890),
            source_message_id: Some(55),
            source_fingerprint: None,
            status: EntryStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn functional_entries_persist_across_reopen() {
        let temp = tempdir().expect("create tempdir");
        let db_path = temp.path().join("catalog").join("catalog.sqlite");
        let folder = CatalogEntry::directory("Documents", None, 7);
        let folder_id = folder.id.clone();

        {
            let store = SqliteCatalogStore::new(&db_path).expect("create sqlite store");
            store.insert(folder).await.expect("insert folder");
            store
                .insert(file_entry("report.pdf", Some(folder_id.clone())))
                .await
                .expect("insert file");
        }

        let reopened = SqliteCatalogStore::new(&db_path).expect("reopen sqlite store");
        let entries = reopened.list_entries().await.expect("list entries");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, EntryKind::Directory);
        let file = &entries[1];
        assert_eq!(file.name, "report.pdf");
        assert_eq!(file.size_bytes, Some(2048));
        assert_eq!(file.mime_type.as_deref(), Some("application/pdf"));
        assert_eq!(file.category, Some(FileCategory::Document));
        assert_eq!(file.parent_id.as_deref(), Some(folder_id.as_str()));
        assert_eq!(file.source_message_id, Some(55));
    }

    #[tokio::test]
    async fn unit_insert_reports_name_conflict_within_scope() {
        let temp = tempdir().expect("create tempdir");
        let store = SqliteCatalogStore::new(temp.path().join("catalog.sqlite")).expect("store");
        store.insert(file_entry("x.txt", None)).await.expect("first");
        let error = store
            .insert(file_entry("x.txt", None))
            .await
            .expect_err("conflict");
        assert!(error.is_name_conflict(), "unexpected error: {error}");

        let mut trashed = file_entry("x.txt", None);
        trashed.status = EntryStatus::Trashed;
        store.insert(trashed).await.expect("trashed entry ignored by scope");
    }

    #[tokio::test]
    async fn regression_insert_rejects_file_as_parent() {
        let temp = tempdir().expect("create tempdir");
        let store = SqliteCatalogStore::new(temp.path().join("catalog.sqlite")).expect("store");
        let parent = file_entry("a.txt", None);
        let parent_id = parent.id.clone();
        store.insert(parent).await.expect("file");

        let error = store
            .insert(file_entry("b.txt", Some(parent_id)))
            .await
            .expect_err("file parent");
        assert!(matches!(error, CatalogStoreError::InvalidParent(_)));
    }

    #[tokio::test]
    async fn regression_insert_reports_duplicate_source_fingerprint() {
        let temp = tempdir().expect("create tempdir");
        let store = SqliteCatalogStore::new(temp.path().join("catalog.sqlite")).expect("store");
        let mut first = file_entry("x.txt", None);
        first.source_fingerprint = Some("1234567890:55".to_string());
        store.insert(first).await.expect("first");

        let mut redelivered = file_entry("x_renamed.txt", None);
        redelivered.source_fingerprint = Some("1234567890:55".to_string());
        let error = store.insert(redelivered).await.expect_err("duplicate");
        assert!(error.is_duplicate_source());
    }

    #[tokio::test]
    async fn regression_primary_key_conflict_is_classified() {
        let temp = tempdir().expect("create tempdir");
        let store = SqliteCatalogStore::new(temp.path().join("catalog.sqlite")).expect("store");
        let first = file_entry("a.txt", None);
        let mut second = file_entry("b.txt", None);
        second.id = first.id.clone();
        store.insert(first).await.expect("first");
        let error = store.insert(second).await.expect_err("id reuse");
        assert!(matches!(error, CatalogStoreError::IdConflict(_)));
    }
}
