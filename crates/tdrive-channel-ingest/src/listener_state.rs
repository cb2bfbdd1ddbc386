//! Persisted listener state: polling offset, authorized identity and the last
//! counters snapshot.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tdrive_core::{current_unix_timestamp_ms, load_state_file, save_state_file, VersionedState};

use crate::ingest_counters::IngestCountersSnapshot;
use crate::platform_session::BotIdentity;

const LISTENER_STATE_SCHEMA_VERSION: u32 = 1;

fn listener_state_schema_version() -> u32 {
    LISTENER_STATE_SCHEMA_VERSION
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerStateFile {
    #[serde(default = "listener_state_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub next_update_offset: Option<i64>,
    #[serde(default)]
    pub authorized_identity: Option<BotIdentity>,
    #[serde(default)]
    pub last_counters: IngestCountersSnapshot,
    #[serde(default)]
    pub updated_unix_ms: u64,
}

impl Default for ListenerStateFile {
    fn default() -> Self {
        Self {
            schema_version: LISTENER_STATE_SCHEMA_VERSION,
            next_update_offset: None,
            authorized_identity: None,
            last_counters: IngestCountersSnapshot::default(),
            updated_unix_ms: 0,
        }
    }
}

impl VersionedState for ListenerStateFile {
    const SCHEMA_VERSION: u32 = LISTENER_STATE_SCHEMA_VERSION;

    fn schema_version(&self) -> u32 {
        self.schema_version
    }
}

/// Listener state kept in memory and mirrored to disk when a path is set.
#[derive(Debug, Clone, Default)]
pub struct ListenerStateStore {
    path: Option<PathBuf>,
    state: ListenerStateFile,
}

impl ListenerStateStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let state = match path {
            Some(path) => load_state_file::<ListenerStateFile>(path)?,
            None => ListenerStateFile::default(),
        };
        Ok(Self {
            path: path.map(Path::to_path_buf),
            state,
        })
    }

    pub fn state(&self) -> &ListenerStateFile {
        &self.state
    }

    pub fn next_update_offset(&self) -> Option<i64> {
        self.state.next_update_offset
    }

    pub fn authorized_identity(&self) -> Option<&BotIdentity> {
        self.state.authorized_identity.as_ref()
    }

    pub fn set_authorized_identity(&mut self, identity: BotIdentity) -> Result<()> {
        self.state.authorized_identity = Some(identity);
        self.save()
    }

    /// Drops a persisted identity the platform no longer accepts.
    pub fn clear_authorized_identity(&mut self) -> Result<()> {
        if self.state.authorized_identity.take().is_some() {
            self.save()?;
        }
        Ok(())
    }

    /// Records a dispatched batch so it is not fetched again.
    pub fn acknowledge(&mut self, next_offset: i64, counters: IngestCountersSnapshot) -> Result<()> {
        let current = self.state.next_update_offset.unwrap_or(i64::MIN);
        self.state.next_update_offset = Some(current.max(next_offset));
        self.state.last_counters = counters;
        self.save()
    }

    pub fn record_counters(&mut self, counters: IngestCountersSnapshot) -> Result<()> {
        self.state.last_counters = counters;
        self.save()
    }

    fn save(&mut self) -> Result<()> {
        self.state.updated_unix_ms = current_unix_timestamp_ms();
        match self.path.as_deref() {
            Some(path) => save_state_file(path, &self.state),
            None => Ok(()),
        }
    }
}
