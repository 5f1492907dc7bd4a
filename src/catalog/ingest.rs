use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{CatalogError, Group, Image, MediaInfo};
use crate::identity::{canonical_file_name, hash_file, is_canonical_name};

// Upper bound on how long a growing file is waited on before it is hashed anyway.
const MAX_SETTLE_ROUNDS: usize = 20;

#[derive(Debug)]
pub enum IngestOutcome {
    Added(Arc<Image>),
    /// Already cataloged under the same name, path and size.
    Unchanged(Arc<Image>),
    /// The file disappeared before it could be cataloged.
    Vanished,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    pub added: usize,
    pub unchanged: usize,
    pub skipped: usize,
}

/// Ask the decoder for dimensions and format without decoding pixel data.
pub async fn probe_media(path: &Path) -> Result<MediaInfo, CatalogError> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || probe_media_blocking(&owned)).await?
}

fn probe_media_blocking(path: &Path) -> Result<MediaInfo, CatalogError> {
    let unreadable = |source| CatalogError::UnreadableFile {
        path: path.to_path_buf(),
        source,
    };

    let reader = image::ImageReader::open(path)
        .map_err(unreadable)?
        .with_guessed_format()
        .map_err(unreadable)?;

    let format = reader.format().ok_or_else(|| CatalogError::Undecodable {
        path: path.to_path_buf(),
        reason: "unrecognized format".to_string(),
    })?;

    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| CatalogError::Undecodable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    Ok(MediaInfo {
        width,
        height,
        format: format!("{:?}", format).to_lowercase(),
    })
}

pub(crate) fn file_name_of(path: &Path) -> Result<String, CatalogError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| CatalogError::InvalidFileName(path.to_path_buf()))
}

async fn file_size(path: &Path) -> Result<Option<u64>, CatalogError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(Some(metadata.len())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(CatalogError::UnreadableFile {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Wait until two consecutive size samples agree. Returns false if the file
/// went away in the meantime.
async fn wait_for_stable_size(path: &Path, interval: Duration) -> Result<bool, CatalogError> {
    let Some(mut previous) = file_size(path).await? else {
        return Ok(false);
    };

    for _ in 0..MAX_SETTLE_ROUNDS {
        tokio::time::sleep(interval).await;
        let Some(current) = file_size(path).await? else {
            return Ok(false);
        };
        if current == previous {
            return Ok(true);
        }
        previous = current;
    }

    debug!("File {:?} still changing, hashing anyway", path);
    Ok(true)
}

/// Rename a file to `{identity}{ext}` unless its name is already canonical.
/// Returns the final path, or `None` when the file vanished underneath us.
pub async fn settle_name(path: &Path) -> Result<Option<PathBuf>, CatalogError> {
    let file_name = file_name_of(path)?;
    if is_canonical_name(&file_name) {
        return Ok(Some(path.to_path_buf()));
    }

    let identity = match hash_file(path).await {
        Ok(identity) => identity,
        Err(e) if e.is_missing_file() => return Ok(None),
        Err(e) => return Err(e),
    };

    let destination = path.with_file_name(canonical_file_name(&identity, path));
    if tokio::fs::try_exists(&destination).await? {
        // Another handler may have finished this very rename already.
        if !tokio::fs::try_exists(path).await? {
            return Ok(None);
        }
        return Err(CatalogError::DuplicateContent {
            path: path.to_path_buf(),
            existing: destination,
        });
    }

    match tokio::fs::rename(path, &destination).await {
        Ok(()) => {
            info!("Canonicalized: {} => {:?}", file_name, destination);
            Ok(Some(destination))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(CatalogError::RenameFailed {
            from: path.to_path_buf(),
            to: destination,
            source,
        }),
    }
}

/// Load an image record for a file that already carries its final name.
pub async fn load_image(group: &Group, path: &Path) -> Result<Image, CatalogError> {
    let name = file_name_of(path)?;
    let size = file_size(path)
        .await?
        .ok_or_else(|| CatalogError::UnreadableFile {
            path: path.to_path_buf(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })?;
    let media = probe_media(path).await?;
    Ok(Image::new(group.name(), path.to_path_buf(), name, size, media))
}

/// Canonicalize, probe and insert one file.
pub async fn ingest_file(
    group: &Group,
    path: &Path,
    settle_interval: Duration,
) -> Result<IngestOutcome, CatalogError> {
    if !settle_interval.is_zero() && !wait_for_stable_size(path, settle_interval).await? {
        return Ok(IngestOutcome::Vanished);
    }

    let Some(final_path) = settle_name(path).await? else {
        return Ok(IngestOutcome::Vanished);
    };

    let name = file_name_of(&final_path)?;
    let Some(size) = file_size(&final_path).await? else {
        return Ok(IngestOutcome::Vanished);
    };

    if let Some(existing) = group.get(&name)
        && existing.path == final_path
        && existing.size == size
    {
        return Ok(IngestOutcome::Unchanged(existing));
    }

    let media = probe_media(&final_path).await?;
    let image = group.insert(Image::new(group.name(), final_path, name, size, media));
    Ok(IngestOutcome::Added(image))
}

/// Catalog every file directly inside the group directory. Per-file failures
/// are logged and skipped.
pub async fn scan_group(group: &Group) -> Result<ScanReport, CatalogError> {
    info!("Scanning group [{}] at {:?}", group.name(), group.root_path());

    let mut report = ScanReport::default();
    let mut entries = tokio::fs::read_dir(group.root_path()).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        match entry.file_type().await {
            Ok(file_type) if file_type.is_file() => {}
            Ok(_) => continue,
            Err(e) => {
                warn!("Skipping {:?} in group [{}]: {}", path, group.name(), e);
                report.skipped += 1;
                continue;
            }
        }

        match ingest_file(group, &path, Duration::ZERO).await {
            Ok(IngestOutcome::Added(image)) => {
                debug!("Added: [{}] {}", group.name(), image.name);
                report.added += 1;
            }
            Ok(IngestOutcome::Unchanged(_)) => report.unchanged += 1,
            Ok(IngestOutcome::Vanished) => report.skipped += 1,
            Err(e) => {
                warn!("Skipping {:?} in group [{}]: {}", path, group.name(), e);
                report.skipped += 1;
            }
        }
    }

    info!(
        "Scanned group [{}]: {} added, {} unchanged, {} skipped",
        group.name(),
        report.added,
        report.unchanged,
        report.skipped
    );

    Ok(report)
}
