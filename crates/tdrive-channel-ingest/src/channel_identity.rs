//! Channel identity normalization between the public and internal id encodings.
//!
//! Operators configure channels by the id the platform shows publicly, which
//! carries a class-specific negative offset. Inbound messages carry the bare
//! internal id. This module is the only place the mapping is implemented.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tdrive_catalog::FileCategory;
use thiserror::Error;

use crate::platform_update::Peer;

/// Offset applied to broadcast-class (channel/supergroup) ids.
pub const BROADCAST_ID_OFFSET: i64 = 1_000_000_000_000;
/// Offset applied to legacy-class ids.
pub const LEGACY_ID_OFFSET: i64 = 1_000_000;

const LEGACY_INTERNAL_MAX: i64 = BROADCAST_ID_OFFSET - LEGACY_ID_OFFSET;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates the channel id encoding classes.
pub enum ChannelClass {
    Broadcast,
    Legacy,
}

impl ChannelClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Broadcast => "broadcast",
            Self::Legacy => "legacy",
        }
    }

    fn offset(self) -> i64 {
        match self {
            Self::Broadcast => BROADCAST_ID_OFFSET,
            Self::Legacy => LEGACY_ID_OFFSET,
        }
    }

    fn internal_range(self) -> (i64, i64) {
        match self {
            Self::Broadcast => (1, i64::MAX - BROADCAST_ID_OFFSET),
            Self::Legacy => (1, LEGACY_INTERNAL_MAX),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelIdError {
    #[error("unsupported channel id format: {value} ({reason})")]
    UnsupportedChannelIdFormat { value: i64, reason: &'static str },
}

impl ChannelIdError {
    fn unsupported(value: i64, reason: &'static str) -> Self {
        Self::UnsupportedChannelIdFormat { value, reason }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NormalizedChannelId {
    pub internal: i64,
    pub class: ChannelClass,
}

/// Maps a configured public channel id to the internal id carried by messages.
pub fn normalize(configured_id: i64) -> Result<NormalizedChannelId, ChannelIdError> {
    if configured_id < -BROADCAST_ID_OFFSET {
        let magnitude = configured_id.checked_neg().ok_or_else(|| {
            ChannelIdError::unsupported(configured_id, "magnitude exceeds supported range")
        })?;
        return Ok(NormalizedChannelId {
            internal: magnitude - BROADCAST_ID_OFFSET,
            class: ChannelClass::Broadcast,
        });
    }
    if configured_id < -LEGACY_ID_OFFSET {
        return Ok(NormalizedChannelId {
            internal: -configured_id - LEGACY_ID_OFFSET,
            class: ChannelClass::Legacy,
        });
    }
    Err(ChannelIdError::unsupported(
        configured_id,
        "expected a negative channel id below -1000000",
    ))
}

/// Inverse of [`normalize`] for an internal id of the given class.
pub fn denormalize(internal_id: i64, class: ChannelClass) -> Result<i64, ChannelIdError> {
    let (min, max) = class.internal_range();
    if internal_id < min || internal_id > max {
        return Err(ChannelIdError::unsupported(
            internal_id,
            "internal id outside the class range",
        ));
    }
    internal_id
        .checked_add(class.offset())
        .and_then(i64::checked_neg)
        .ok_or_else(|| ChannelIdError::unsupported(internal_id, "public id overflows"))
}

/// Source channel and attachment targets for one ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBinding {
    configured_channel_id: i64,
    normalized: NormalizedChannelId,
    target_parent_id: Option<String>,
    category_parent_ids: BTreeMap<FileCategory, String>,
}

impl ChannelBinding {
    pub fn new(
        configured_channel_id: i64,
        target_parent_id: Option<String>,
    ) -> Result<Self, ChannelIdError> {
        let normalized = normalize(configured_channel_id)?;
        Ok(Self {
            configured_channel_id,
            normalized,
            target_parent_id: target_parent_id.filter(|value| !value.trim().is_empty()),
            category_parent_ids: BTreeMap::new(),
        })
    }

    pub fn with_category_parents(
        mut self,
        category_parent_ids: BTreeMap<FileCategory, String>,
    ) -> Self {
        self.category_parent_ids = category_parent_ids;
        self
    }

    pub fn configured_channel_id(&self) -> i64 {
        self.configured_channel_id
    }

    pub fn normalized(&self) -> NormalizedChannelId {
        self.normalized
    }

    pub fn internal_channel_id(&self) -> i64 {
        self.normalized.internal
    }

    pub fn target_parent_id(&self) -> Option<&str> {
        self.target_parent_id.as_deref()
    }

    /// Directory a document of `category` attaches to: the category folder when
    /// configured, otherwise the binding's target parent.
    pub fn parent_for(&self, category: FileCategory) -> Option<&str> {
        self.category_parent_ids
            .get(&category)
            .map(String::as_str)
            .or(self.target_parent_id())
    }

    /// True when a message from `peer` originates from the bound channel.
    pub fn matches(&self, peer: &Peer) -> bool {
        matches!(peer, Peer::Channel(channel) if *channel == self.normalized)
    }
}
