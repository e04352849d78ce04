//! Hub persistence using one JSON file per hub

use crate::error::EngineError;
use crate::model::Condition;
use hub_core::Hub;
use leaf_protocol::HubId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Everything stored for one hub
#[derive(Debug, Deserialize)]
pub struct HubSnapshot {
    pub hub: Hub,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    hub: &'a Hub,
    conditions: &'a [Condition],
}

/// Snapshot file of a hub inside `dir`
#[must_use]
pub fn hub_path(dir: &Path, hub_id: HubId) -> PathBuf {
    dir.join(format!("hub-{hub_id}.json"))
}

/// Load every hub snapshot in a directory
///
/// A missing directory means a fresh start. Files that cannot be read or
/// parsed are skipped with a warning.
#[allow(clippy::missing_errors_doc)]
pub async fn load_hubs(dir: &Path) -> Result<Vec<HubSnapshot>, EngineError> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No data directory at {:?}, starting fresh", dir);
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut snapshots = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_snapshot = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("hub-") && n.ends_with(".json"));
        if !is_snapshot {
            continue;
        }

        match load_hub(&path).await {
            Ok(snapshot) => {
                tracing::info!(
                    "Loaded hub {} with {} leaves and {} conditions from {:?}",
                    snapshot.hub.id(),
                    snapshot.hub.leaves().count(),
                    snapshot.conditions.len(),
                    path
                );
                snapshots.push(snapshot);
            }
            Err(e) => tracing::warn!("Failed to load hub file {:?}: {}", path, e),
        }
    }

    snapshots.sort_by_key(|s| s.hub.id());
    Ok(snapshots)
}

async fn load_hub(path: &Path) -> Result<HubSnapshot, EngineError> {
    let contents = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&contents)?)
}

/// Save a hub atomically
#[allow(clippy::missing_errors_doc)]
pub async fn save_hub(path: &Path, hub: &Hub, conditions: &[Condition]) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let json = serde_json::to_string_pretty(&SnapshotRef { hub, conditions })?;

    // Write to a temp file, then rename
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &json).await?;
    fs::rename(&tmp_path, path).await?;

    tracing::debug!("Saved hub {} to {:?}", hub.id(), path);
    Ok(())
}
