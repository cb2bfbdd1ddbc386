use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates the observable ingestion decisions.
pub enum IngestCounter {
    UpdatesReceived,
    MessagesSeen,
    MessagesFiltered,
    UpdatesWithoutMessage,
    NonDocumentMessages,
    MissingFilename,
    EntriesIngested,
    EntriesRenamed,
    DuplicatesSkipped,
    IngestionFailures,
    StoreFailures,
}

/// Lock-free counters shared between a running pipeline and its handle.
#[derive(Debug, Default)]
pub struct IngestCounters {
    updates_received: AtomicU64,
    messages_seen: AtomicU64,
    messages_filtered: AtomicU64,
    updates_without_message: AtomicU64,
    non_document_messages: AtomicU64,
    missing_filename: AtomicU64,
    entries_ingested: AtomicU64,
    entries_renamed: AtomicU64,
    duplicates_skipped: AtomicU64,
    ingestion_failures: AtomicU64,
    store_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Point-in-time copy of [`IngestCounters`].
pub struct IngestCountersSnapshot {
    #[serde(default)]
    pub updates_received: u64,
    #[serde(default)]
    pub messages_seen: u64,
    #[serde(default)]
    pub messages_filtered: u64,
    #[serde(default)]
    pub updates_without_message: u64,
    #[serde(default)]
    pub non_document_messages: u64,
    #[serde(default)]
    pub missing_filename: u64,
    #[serde(default)]
    pub entries_ingested: u64,
    #[serde(default)]
    pub entries_renamed: u64,
    #[serde(default)]
    pub duplicates_skipped: u64,
    #[serde(default)]
    pub ingestion_failures: u64,
    #[serde(default)]
    pub store_failures: u64,
}

impl IngestCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, counter: IngestCounter) -> &AtomicU64 {
        match counter {
            IngestCounter::UpdatesReceived => &self.updates_received,
            IngestCounter::MessagesSeen => &self.messages_seen,
            IngestCounter::MessagesFiltered => &self.messages_filtered,
            IngestCounter::UpdatesWithoutMessage => &self.updates_without_message,
            IngestCounter::NonDocumentMessages => &self.non_document_messages,
            IngestCounter::MissingFilename => &self.missing_filename,
            IngestCounter::EntriesIngested => &self.entries_ingested,
            IngestCounter::EntriesRenamed => &self.entries_renamed,
            IngestCounter::DuplicatesSkipped => &self.duplicates_skipped,
            IngestCounter::IngestionFailures => &self.ingestion_failures,
            IngestCounter::StoreFailures => &self.store_failures,
        }
    }

    pub fn increment(&self, counter: IngestCounter) {
        self.slot(counter).fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, counter: IngestCounter) -> u64 {
        self.slot(counter).load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> IngestCountersSnapshot {
        IngestCountersSnapshot {
            updates_received: self.get(IngestCounter::UpdatesReceived),
            messages_seen: self.get(IngestCounter::MessagesSeen),
            messages_filtered: self.get(IngestCounter::MessagesFiltered),
            updates_without_message: self.get(IngestCounter::UpdatesWithoutMessage),
            non_document_messages: self.get(IngestCounter::NonDocumentMessages),
            missing_filename: self.get(IngestCounter::MissingFilename),
            entries_ingested: self.get(IngestCounter::EntriesIngested),
            entries_renamed: self.get(IngestCounter::EntriesRenamed),
            duplicates_skipped: self.get(IngestCounter::DuplicatesSkipped),
            ingestion_failures: self.get(IngestCounter::IngestionFailures),
            store_failures: self.get(IngestCounter::StoreFailures),
        }
    }
}
