use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tdrive_catalog::{CatalogStore, SqliteCatalogStore};
use tdrive_channel_ingest::{denormalize, normalize};

pub(crate) fn channel_id_inspection_json(configured_id: i64) -> Result<Value> {
    let normalized = normalize(configured_id)?;
    let round_trip = denormalize(normalized.internal, normalized.class)?;
    Ok(json!({
        "configured_id": configured_id,
        "internal_id": normalized.internal,
        "class": normalized.class.as_str(),
        "round_trip": round_trip,
    }))
}

pub(crate) async fn catalog_inspection_json(db_path: &Path) -> Result<Value> {
    if !db_path.exists() {
        bail!("catalog database {} does not exist", db_path.display());
    }
    let store = SqliteCatalogStore::new(db_path)
        .with_context(|| format!("failed to open catalog {}", db_path.display()))?;
    let entries = store
        .list_entries()
        .await
        .context("failed to list catalog entries")?;
    Ok(json!({
        "db_path": db_path.display().to_string(),
        "entry_count": entries.len(),
        "entries": entries,
    }))
}
