//! Pulls catalog metadata out of a message's attached document.

use tdrive_catalog::FileCategory;
use thiserror::Error;

use crate::platform_update::{MessageMedia, PlatformMessage};

/// Expected, counted reasons a matching message produces no entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExtractionSkip {
    #[error("message carries no document")]
    NonDocumentMessage,
    #[error("document has no filename attribute")]
    MissingFilename,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub file_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub category: FileCategory,
}

pub fn extract_document(message: &PlatformMessage) -> Result<ExtractedDocument, ExtractionSkip> {
    let document = match &message.media {
        Some(MessageMedia::Document(document)) => document,
        Some(MessageMedia::Photo) | Some(MessageMedia::Other { .. }) | None => {
            return Err(ExtractionSkip::NonDocumentMessage)
        }
    };
    let file_name = document
        .file_name()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or(ExtractionSkip::MissingFilename)?;

    Ok(ExtractedDocument {
        file_name: file_name.to_string(),
        size_bytes: document.size_bytes,
        mime_type: mime_type_for(file_name),
        category: FileCategory::from_file_name(file_name),
    })
}

/// Infers a MIME type from the file extension, defaulting to octet-stream.
pub fn mime_type_for(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
