//! The running image library: group registry, filesystem watcher and
//! metadata sync, plus the edit operations the HTTP API calls.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::CatalogConfig;
use crate::catalog::{
    CatalogError, Image, ReactionValue, Registry, SharedGroup, SharedRegistry, scan_group,
};
use crate::metadata::{DynMetadataStore, MetadataSync, MetadataUpdate};
use crate::watcher::FsWatcher;

pub type SharedLibrary = Arc<Library>;

pub struct Library {
    registry: SharedRegistry,
    sync: Arc<MetadataSync>,
    watcher: Mutex<Option<FsWatcher>>,
    startup: Mutex<Vec<JoinHandle<Result<(), CatalogError>>>>,
    cancel: CancellationToken,
}

impl Library {
    /// Discover groups, start watching the content root, then bring each
    /// group up on its own task: scan, initial metadata load, metadata watch.
    /// Returns before the groups are populated.
    pub async fn start(
        config: &CatalogConfig,
        store: DynMetadataStore,
        prefix: &str,
    ) -> Result<SharedLibrary, CatalogError> {
        let registry = Arc::new(Registry::discover(&config.base_directory).await?);
        info!(
            "Discovered {} groups under {:?}",
            registry.len(),
            registry.root()
        );

        let sync = Arc::new(MetadataSync::new(store, prefix));
        info!("Using {} under prefix {}", sync.store().name(), prefix);

        let watcher = if config.watch {
            Some(FsWatcher::start(registry.clone(), config.watcher_settings())?)
        } else {
            info!("Filesystem watching disabled");
            None
        };

        let cancel = CancellationToken::new();
        let startup: Vec<_> = registry
            .groups()
            .map(|group| {
                let group = group.clone();
                let sync = sync.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => Ok(()),
                        result = bring_up_group(group, sync) => result,
                    }
                })
            })
            .collect();

        Ok(Arc::new(Self {
            registry,
            sync,
            watcher: Mutex::new(watcher),
            startup: Mutex::new(startup),
            cancel,
        }))
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn sync(&self) -> &Arc<MetadataSync> {
        &self.sync
    }

    pub fn group(&self, name: &str) -> Result<&SharedGroup, CatalogError> {
        self.registry
            .group(name)
            .ok_or_else(|| CatalogError::GroupNotFound(name.to_string()))
    }

    /// Image by id or file name.
    pub fn image(&self, group: &str, id: &str) -> Result<Arc<Image>, CatalogError> {
        self.group(group)?
            .find(id)
            .ok_or_else(|| CatalogError::ImageNotFound(id.to_string()))
    }

    /// Wait for every group's startup task. The first failure is returned;
    /// a store that cannot be reached shows up here.
    pub async fn wait_for_initial_load(&self) -> Result<(), CatalogError> {
        let handles: Vec<_> = self.startup.lock().await.drain(..).collect();
        for handle in handles {
            handle.await??;
        }
        Ok(())
    }

    pub async fn shutdown(&self) {
        info!("Shutting down image library");
        self.cancel.cancel();

        if let Some(watcher) = self.watcher.lock().await.take() {
            watcher.shutdown().await;
        }

        for handle in self.startup.lock().await.drain(..) {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Group startup failed before shutdown: {}", e),
                Err(e) => error!("Group startup task failed: {}", e),
            }
        }

        self.sync.shutdown().await;
    }

    pub async fn add_tag(&self, group: &str, id: &str, tag: String) -> Result<Vec<String>, CatalogError> {
        let image = self.image(group, id)?;
        let _edit = image.lock_edits().await;

        let mut tags = image.tags().await;
        tags.push(tag);
        self.sync
            .persist(&image, MetadataUpdate::Tags(tags.clone()))
            .await?;
        Ok(tags)
    }

    pub async fn replace_tags(
        &self,
        group: &str,
        id: &str,
        tags: Vec<String>,
    ) -> Result<Vec<String>, CatalogError> {
        let image = self.image(group, id)?;
        let _edit = image.lock_edits().await;

        self.sync
            .persist(&image, MetadataUpdate::Tags(tags.clone()))
            .await?;
        Ok(tags)
    }

    /// Remove the first occurrence of `tag`.
    pub async fn remove_tag(&self, group: &str, id: &str, tag: &str) -> Result<Vec<String>, CatalogError> {
        let image = self.image(group, id)?;
        let _edit = image.lock_edits().await;

        let mut tags = image.tags().await;
        let position = tags
            .iter()
            .position(|existing| existing == tag)
            .ok_or(CatalogError::NotFound)?;
        tags.remove(position);

        self.sync
            .persist(&image, MetadataUpdate::Tags(tags.clone()))
            .await?;
        Ok(tags)
    }

    pub async fn add_reaction(
        &self,
        group: &str,
        id: &str,
        name: &str,
        value: ReactionValue,
    ) -> Result<Vec<ReactionValue>, CatalogError> {
        let image = self.image(group, id)?;
        let _edit = image.lock_edits().await;

        let mut values = image.reaction(name).await.unwrap_or_default();
        values.push(value);
        self.persist_reaction(&image, name, values).await
    }

    pub async fn replace_reactions(
        &self,
        group: &str,
        id: &str,
        name: &str,
        values: Vec<ReactionValue>,
    ) -> Result<Vec<ReactionValue>, CatalogError> {
        let image = self.image(group, id)?;
        let _edit = image.lock_edits().await;

        self.persist_reaction(&image, name, values).await
    }

    /// Remove the first value equal to `key` as text, or failing that the
    /// first count equal to `key` parsed as an unsigned integer.
    pub async fn remove_reaction(
        &self,
        group: &str,
        id: &str,
        name: &str,
        key: &str,
    ) -> Result<Vec<ReactionValue>, CatalogError> {
        let image = self.image(group, id)?;
        let _edit = image.lock_edits().await;

        let mut values = image.reaction(name).await.ok_or(CatalogError::NotFound)?;
        let position = values
            .iter()
            .position(|value| value.matches_text(key))
            .or_else(|| {
                let count = ReactionValue::Count(key.parse().ok()?);
                values.iter().position(|value| *value == count)
            })
            .ok_or(CatalogError::NotFound)?;
        values.remove(position);

        self.persist_reaction(&image, name, values).await
    }

    async fn persist_reaction(
        &self,
        image: &Image,
        name: &str,
        values: Vec<ReactionValue>,
    ) -> Result<Vec<ReactionValue>, CatalogError> {
        self.sync
            .persist(
                image,
                MetadataUpdate::Reactions {
                    name: name.to_string(),
                    values: values.clone(),
                },
            )
            .await?;
        Ok(values)
    }
}

async fn bring_up_group(group: SharedGroup, sync: Arc<MetadataSync>) -> Result<(), CatalogError> {
    scan_group(&group).await?;
    sync.load_and_watch(group).await?;
    Ok(())
}
