//! Catalog entry data model shared by the ingestion pipeline and store backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CatalogStoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates catalog entry kinds.
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "file" => Some(Self::File),
            "directory" => Some(Self::Directory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
/// Enumerates catalog entry lifecycle states.
pub enum EntryStatus {
    #[default]
    Active,
    Trashed,
    Pending,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trashed => "trashed",
            Self::Pending => "pending",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(Self::Active),
            "trashed" => Some(Self::Trashed),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Coarse file category derived from a file name extension.
pub enum FileCategory {
    Image,
    Document,
    Video,
    Audio,
    Archive,
    Other,
}

const CATEGORY_EXTENSIONS: &[(FileCategory, &[&str])] = &[
    (FileCategory::Image, &["jpg", "jpeg", "png", "gif", "bmp", "webp"]),
    (
        FileCategory::Document,
        &["pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt"],
    ),
    (FileCategory::Video, &["mp4", "avi", "mkv", "mov", "wmv", "flv"]),
    (FileCategory::Audio, &["mp3", "wav", "ogg", "flac", "aac"]),
    (FileCategory::Archive, &["zip", "rar", "7z", "tar", "gz"]),
];

impl FileCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Document => "document",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Archive => "archive",
            Self::Other => "other",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "image" | "images" => Some(Self::Image),
            "document" | "documents" => Some(Self::Document),
            "video" | "videos" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "archive" | "archives" => Some(Self::Archive),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    /// Classifies a file by the extension of `file_name`, case-insensitively.
    pub fn from_file_name(file_name: &str) -> Self {
        let Some((_, extension)) = split_file_name(file_name) else {
            return Self::Other;
        };
        let extension = extension.to_ascii_lowercase();
        CATEGORY_EXTENSIONS
            .iter()
            .find(|(_, extensions)| extensions.contains(&extension.as_str()))
            .map(|(category, _)| *category)
            .unwrap_or(Self::Other)
    }
}

/// Splits `file_name` into `(base, extension)` at the last dot.
///
/// Returns `None` when there is no extension. A leading dot (`.env`) does not
/// start an extension.
pub fn split_file_name(file_name: &str) -> Option<(&str, &str)> {
    let index = file_name.rfind('.')?;
    if index == 0 || index + 1 == file_name.len() {
        return None;
    }
    Some((&file_name[..index], &file_name[index + 1..]))
}

/// Generates a new globally unique entry id.
pub fn generate_entry_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// One file or directory row in the hierarchical catalog.
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
    pub kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<FileCategory>,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub owner_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_channel_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_message_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_fingerprint: Option<String>,
    #[serde(default)]
    pub status: EntryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogEntry {
    /// Builds an active directory entry with a fresh id.
    pub fn directory(name: impl Into<String>, parent_id: Option<String>, owner_id: i64) -> Self {
        let now = Utc::now();
        Self {
            id: generate_entry_id(),
            name: name.into(),
            kind: EntryKind::Directory,
            size_bytes: None,
            mime_type: None,
            category: None,
            parent_id,
            owner_id,
            source_channel_id: None,
            source_message_id: None,
            source_fingerprint: None,
            status: EntryStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, EntryKind::Directory)
    }

    /// Checks the structural invariants every backend enforces before insert.
    pub fn validate(&self) -> Result<(), CatalogStoreError> {
        if self.id.trim().is_empty() {
            return Err(CatalogStoreError::InvalidEntry(
                "entry id cannot be empty".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(CatalogStoreError::InvalidEntry(
                "entry name cannot be empty".to_string(),
            ));
        }
        if self.name.contains('/') {
            return Err(CatalogStoreError::InvalidEntry(format!(
                "entry name '{}' cannot contain '/'",
                self.name
            )));
        }
        if self.parent_id.as_deref() == Some(self.id.as_str()) {
            return Err(CatalogStoreError::InvalidParent(self.id.clone()));
        }
        if self.is_directory()
            && (self.size_bytes.is_some()
                || self.mime_type.is_some()
                || self.category.is_some()
                || self.source_channel_id.is_some())
        {
            return Err(CatalogStoreError::InvalidEntry(format!(
                "directory '{}' cannot carry file metadata",
                self.name
            )));
        }
        Ok(())
    }

    /// Returns true when `other` shares this entry's name-uniqueness scope.
    pub fn same_name_scope(&self, other: &CatalogEntry) -> bool {
        self.status == EntryStatus::Active
            && other.status == EntryStatus::Active
            && self.owner_id == other.owner_id
            && self.parent_id == other.parent_id
            && self.name == other.name
    }
}
