//! Versioned JSON state files written with temp-file + rename semantics.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::time_utils::current_unix_timestamp_ms;

/// State documents carry a schema version that is checked on load.
pub trait VersionedState: Serialize + DeserializeOwned + Default {
    const SCHEMA_VERSION: u32;

    fn schema_version(&self) -> u32;
}

/// Loads `path`, returning the default document when the file does not exist.
pub fn load_state_file<T: VersionedState>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read state file {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(T::default());
    }
    let state = serde_json::from_str::<T>(&raw)
        .with_context(|| format!("failed to parse state file {}", path.display()))?;
    if state.schema_version() != T::SCHEMA_VERSION {
        bail!(
            "unsupported state schema in {}: expected {}, found {}",
            path.display(),
            T::SCHEMA_VERSION,
            state.schema_version()
        );
    }
    Ok(state)
}

/// Serializes `state` as pretty JSON and replaces `path` atomically.
pub fn save_state_file<T: VersionedState>(path: &Path, state: &T) -> Result<()> {
    let mut payload = serde_json::to_string_pretty(state).context("failed to encode state")?;
    payload.push('\n');
    write_text_atomic(path, &payload)
}

/// Writes text through a sibling temp file so readers never observe partial data.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("destination path cannot be empty");
    }
    if path.is_dir() {
        bail!("destination path '{}' is a directory", path.display());
    }

    let parent_dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent_dir)
        .with_context(|| format!("failed to create {}", parent_dir.display()))?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("state");
    let temp_path = parent_dir.join(format!(
        ".{file_name}.{}-{}.partial",
        std::process::id(),
        current_unix_timestamp_ms()
    ));
    std::fs::write(&temp_path, content)
        .with_context(|| format!("failed to write {}", temp_path.display()))?;
    if let Err(error) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(error).with_context(|| format!("failed to replace {}", path.display()));
    }
    Ok(())
}
