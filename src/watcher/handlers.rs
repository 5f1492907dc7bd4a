use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

use super::FsEvent;
use crate::catalog::ingest::{file_name_of, load_image};
use crate::catalog::{CatalogError, IngestOutcome, Registry, ingest_file};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Added(String),
    Unchanged(String),
    Removed(String),
    Renamed { from: String, to: String },
    Ignored,
}

pub async fn handle_event(
    registry: &Registry,
    event: FsEvent,
    settle_interval: Duration,
) -> Result<EventOutcome, CatalogError> {
    match event {
        FsEvent::Created(path) => handle_created(registry, &path, settle_interval).await,
        FsEvent::Removed(path) => handle_removed(registry, &path),
        FsEvent::Renamed { from, to } => handle_renamed(registry, &from, &to).await,
    }
}

async fn is_directory(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|metadata| metadata.is_dir())
        .unwrap_or(false)
}

/// Canonicalize the file name if needed, then catalog the file.
pub async fn handle_created(
    registry: &Registry,
    path: &Path,
    settle_interval: Duration,
) -> Result<EventOutcome, CatalogError> {
    if is_directory(path).await {
        return Ok(EventOutcome::Ignored);
    }
    let Some(group) = registry.map_to_group(path) else {
        return Ok(EventOutcome::Ignored);
    };

    match ingest_file(group, path, settle_interval).await? {
        IngestOutcome::Added(image) => {
            info!("Added: [{}] {}", group.name(), image.name);
            Ok(EventOutcome::Added(image.name.clone()))
        }
        IngestOutcome::Unchanged(image) => Ok(EventOutcome::Unchanged(image.name.clone())),
        IngestOutcome::Vanished => Ok(EventOutcome::Ignored),
    }
}

/// Drop the catalog entry, if there is one.
pub fn handle_removed(registry: &Registry, path: &Path) -> Result<EventOutcome, CatalogError> {
    let Some(group) = registry.map_to_group(path) else {
        return Ok(EventOutcome::Ignored);
    };

    let name = file_name_of(path)?;
    match group.remove(&name) {
        Some(image) => {
            info!("Removed: [{}] {}", group.name(), image.name);
            Ok(EventOutcome::Removed(name))
        }
        None => Ok(EventOutcome::Ignored),
    }
}

/// Move a cataloged entry to its new name under the group's structure lock.
/// If the file at the new path cannot be probed the entry stays removed.
pub async fn handle_renamed(
    registry: &Registry,
    from: &Path,
    to: &Path,
) -> Result<EventOutcome, CatalogError> {
    if is_directory(to).await {
        return Ok(EventOutcome::Ignored);
    }
    let Some(group) = registry.map_to_group(to) else {
        return Ok(EventOutcome::Ignored);
    };

    let old_name = file_name_of(from)?;
    if !group.contains(&old_name) {
        return Ok(EventOutcome::Ignored);
    }

    let _guard = group.lock_structure().await;

    let Some(previous) = group.remove(&old_name) else {
        return Ok(EventOutcome::Ignored);
    };

    match load_image(group, to).await {
        Ok(image) => {
            let image = group.insert(image);
            info!("Renamed: [{}] {} => {}", group.name(), previous.name, image.name);
            Ok(EventOutcome::Renamed {
                from: previous.name.clone(),
                to: image.name.clone(),
            })
        }
        Err(e) => {
            error!(
                "Renamed add failed: [{}] {} => {:?}: {}",
                group.name(),
                previous.name,
                to,
                e
            );
            Err(e)
        }
    }
}
