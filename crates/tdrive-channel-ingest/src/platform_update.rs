//! Platform-neutral update model consumed by the dispatcher.
//!
//! Every level is a closed enum so each decision point (update shape, event,
//! media) has exactly one `match`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::channel_identity::NormalizedChannelId;

/// One delivery from the platform update stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformUpdates {
    /// Several events delivered together, in platform order.
    Batch(Vec<UpdateEvent>),
    /// A single event.
    Short(UpdateEvent),
    /// The update offset jumped; `skipped` is the size of the gap when known.
    /// Updates of kinds the session did not subscribe to also leave gaps, so
    /// this is not proof of lost messages.
    TooLong { skipped: Option<u64> },
}

impl PlatformUpdates {
    /// Wraps events in the shape the platform would use for that many events.
    pub fn from_events(mut events: Vec<UpdateEvent>) -> Option<Self> {
        match events.len() {
            0 => None,
            1 => events.pop().map(Self::Short),
            _ => Some(Self::Batch(events)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    NewMessage(PlatformMessage),
    /// Updates that carry no new message (edits, membership changes, ...).
    Service { kind: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformMessage {
    pub message_id: i64,
    pub peer: Peer,
    pub date: Option<DateTime<Utc>>,
    pub media: Option<MessageMedia>,
}

/// Origin of a message. Channels keep their id class: equal internal ids
/// of different classes are different channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Peer {
    Channel(NormalizedChannelId),
    Chat(i64),
    User(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageMedia {
    Document(DocumentMedia),
    Photo,
    Other { kind: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMedia {
    pub file_id: String,
    pub size_bytes: u64,
    /// MIME type as reported by the platform. Informational only.
    pub reported_mime_type: Option<String>,
    pub attributes: Vec<DocumentAttribute>,
}

impl DocumentMedia {
    pub fn file_name(&self) -> Option<&str> {
        self.attributes.iter().find_map(|attribute| match attribute {
            DocumentAttribute::Filename(name) => Some(name.as_str()),
            DocumentAttribute::Kind(_) => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentAttribute {
    Filename(String),
    Kind(DocumentKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    File,
    Audio,
    Video,
    Animation,
    Voice,
    VideoNote,
}
