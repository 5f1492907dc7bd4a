use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::keys::{MetadataKey, MetadataUpdate, group_prefix, image_prefix};
use super::{DynMetadataStore, StoreError, WatchEvent, WatchSubscription};
use crate::catalog::{Group, Image, SharedGroup};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub applied: usize,
    pub skipped: usize,
    pub orphans_removed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The key names an image id this group does not have.
    UnknownImage(String),
    /// Unrecognized key or undecodable value.
    Skipped,
}

/// Keeps tags and reactions of cataloged images in step with the store.
pub struct MetadataSync {
    store: DynMetadataStore,
    prefix: String,
    cancel: CancellationToken,
    watches: Mutex<Vec<JoinHandle<()>>>,
}

impl MetadataSync {
    pub fn new(store: DynMetadataStore, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            cancel: CancellationToken::new(),
            watches: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &DynMetadataStore {
        &self.store
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Read the group's whole subtree once, apply what matches a cataloged
    /// image and delete the records of ids that have no image.
    pub async fn initial_load(&self, group: &Group) -> Result<LoadReport, StoreError> {
        let prefix = group_prefix(&self.prefix, group.name());
        let records = self.store.get_prefix(&prefix).await?;

        let by_id: HashMap<String, Arc<Image>> = group
            .images()
            .await
            .into_iter()
            .map(|image| (image.id.clone(), image))
            .collect();

        let mut report = LoadReport::default();
        let mut orphans = BTreeSet::new();

        for record in records {
            let Some(key) = MetadataKey::parse(&prefix, &record.key) else {
                debug!("Ignoring unrecognized metadata key {}", record.key);
                report.skipped += 1;
                continue;
            };

            let Some(image) = by_id.get(&key.image_id) else {
                orphans.insert(key.image_id);
                continue;
            };

            match MetadataUpdate::decode(&key.field, &record.value) {
                Ok(update) => {
                    image.apply(&update).await;
                    report.applied += 1;
                }
                Err(e) => {
                    warn!("Skipping undecodable metadata at {}: {}", record.key, e);
                    report.skipped += 1;
                }
            }
        }

        for image_id in orphans {
            let orphan_prefix = image_prefix(&self.prefix, group.name(), &image_id);
            let removed = self.store.delete_prefix(&orphan_prefix).await?;
            info!(
                "Removed {} orphaned metadata records for [{}] {}",
                removed,
                group.name(),
                image_id
            );
            report.orphans_removed += 1;
        }

        info!(
            "Loaded metadata for group [{}]: {} applied, {} skipped, {} orphans removed",
            group.name(),
            report.applied,
            report.skipped,
            report.orphans_removed
        );

        Ok(report)
    }

    /// Apply one remote put to the group. Unknown images are dropped.
    pub async fn apply_put(&self, group: &Group, key: &str, value: &[u8]) -> ApplyOutcome {
        let prefix = group_prefix(&self.prefix, group.name());
        let Some(parsed) = MetadataKey::parse(&prefix, key) else {
            debug!("Ignoring unrecognized metadata key {}", key);
            return ApplyOutcome::Skipped;
        };

        let Some(image) = group.find(&parsed.image_id) else {
            return ApplyOutcome::UnknownImage(parsed.image_id);
        };

        match MetadataUpdate::decode(&parsed.field, value) {
            Ok(update) => {
                image.apply(&update).await;
                ApplyOutcome::Applied
            }
            Err(e) => {
                warn!("Skipping undecodable metadata at {}: {}", key, e);
                ApplyOutcome::Skipped
            }
        }
    }

    /// Subscribe to the group's subtree and apply changes until shutdown.
    pub async fn watch_group(self: &Arc<Self>, group: SharedGroup) -> Result<(), StoreError> {
        let subscription = self.subscribe(&group).await?;
        self.spawn_watch(group, subscription).await;
        Ok(())
    }

    /// Initial load followed by a watch, with no window in between.
    ///
    /// The watch is opened before the prefix read, so puts that land while
    /// the read is in flight queue up in the subscription and are replayed
    /// afterwards. Replays of values the read already saw are idempotent.
    pub async fn load_and_watch(self: &Arc<Self>, group: SharedGroup) -> Result<LoadReport, StoreError> {
        let subscription = self.subscribe(&group).await?;
        let report = self.initial_load(&group).await?;
        self.spawn_watch(group, subscription).await;
        Ok(report)
    }

    async fn subscribe(&self, group: &Group) -> Result<WatchSubscription, StoreError> {
        let prefix = group_prefix(&self.prefix, group.name());
        let subscription = self.store.watch_prefix(&prefix).await?;
        info!("Watching metadata for group [{}] under {}", group.name(), prefix);
        Ok(subscription)
    }

    async fn spawn_watch(self: &Arc<Self>, group: SharedGroup, subscription: WatchSubscription) {
        let sync = Arc::clone(self);
        let handle = tokio::spawn(async move { sync.run_watch(group, subscription).await });
        self.watches.lock().await.push(handle);
    }

    async fn run_watch(&self, group: SharedGroup, mut subscription: WatchSubscription) {
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = subscription.next() => event,
            };

            match event {
                Some(WatchEvent::Put { key, value }) => {
                    match self.apply_put(&group, &key, &value).await {
                        ApplyOutcome::Applied => debug!("Applied remote update {}", key),
                        ApplyOutcome::UnknownImage(id) => {
                            trace!("Dropping update for uncataloged image {} in [{}]", id, group.name())
                        }
                        ApplyOutcome::Skipped => {}
                    }
                }
                // Remote deletions are not mirrored locally.
                Some(WatchEvent::Delete { key }) => trace!("Ignoring remote delete of {}", key),
                None => {
                    warn!("Metadata watch for group [{}] ended", group.name());
                    break;
                }
            }
        }

        subscription.cancel().await;
        debug!("Metadata watch for group [{}] stopped", group.name());
    }

    /// Write the full new value upstream, then apply it locally. There is no
    /// merge or version check; the last writer wins.
    pub async fn persist(&self, image: &Image, update: MetadataUpdate) -> Result<(), StoreError> {
        let key = MetadataKey::new(image.id.clone(), update.field()).to_key(&self.prefix, &image.group);
        self.store.put(&key, update.encode()?).await?;
        image.apply(&update).await;
        debug!("Persisted {}", key);
        Ok(())
    }

    /// Stop every watch loop; each cancels its subscription before exiting.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = self.watches.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Metadata watch task failed: {}", e);
            }
        }
    }
}
