use dashmap::DashMap;
use rand::seq::IndexedRandom;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use super::{CatalogError, Image};

/// The images found directly inside one subdirectory of the content root.
#[derive(Debug)]
pub struct Group {
    name: String,
    root_path: PathBuf,
    images: DashMap<String, Arc<Image>>,
    // Held across multi-step changes (rename) and by readers that need a
    // consistent view of the whole group.
    structure: Mutex<()>,
}

impl Group {
    pub fn new(name: impl Into<String>, root_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root_path: root_path.into(),
            images: DashMap::new(),
            structure: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Insert or replace the entry keyed by the image's file name.
    pub fn insert(&self, image: Image) -> Arc<Image> {
        let image = Arc::new(image);
        self.images.insert(image.name.clone(), image.clone());
        image
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Image>> {
        self.images.remove(name).map(|(_, image)| image)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Image>> {
        self.images.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.images.contains_key(name)
    }

    /// Look an image up by file name, falling back to its id (file stem).
    pub fn find(&self, id_or_name: &str) -> Option<Arc<Image>> {
        if let Some(image) = self.get(id_or_name) {
            return Some(image);
        }
        self.images
            .iter()
            .find(|entry| entry.value().id == id_or_name)
            .map(|entry| entry.value().clone())
    }

    pub async fn lock_structure(&self) -> MutexGuard<'_, ()> {
        self.structure.lock().await
    }

    /// All images, sorted by file name.
    pub async fn images(&self) -> Vec<Arc<Image>> {
        let _guard = self.structure.lock().await;
        let mut images: Vec<Arc<Image>> = self
            .images
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        images.sort_by(|a, b| a.name.cmp(&b.name));
        images
    }

    pub async fn random(&self) -> Option<Arc<Image>> {
        let images = self.images().await;
        images.choose(&mut rand::rng()).cloned()
    }

    /// True when `dir` is exactly this group's directory.
    pub fn owns_directory(&self, dir: &Path) -> bool {
        dir.file_name().and_then(|name| name.to_str()) == Some(self.name.as_str())
            && dir == self.root_path
    }
}

/// Every group under the content root, fixed at startup.
#[derive(Debug)]
pub struct Registry {
    root: PathBuf,
    groups: HashMap<String, Arc<Group>>,
}

impl Registry {
    /// Register one group per immediate subdirectory of `root`.
    pub async fn discover(root: &Path) -> Result<Self, CatalogError> {
        let root = tokio::fs::canonicalize(root).await?;
        let mut groups = HashMap::new();

        let mut entries = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }

            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!("Skipping group directory with non UTF-8 name: {:?}", entry.path());
                continue;
            };

            info!("Registered group [{}] at {:?}", name, entry.path());
            groups.insert(name.clone(), Arc::new(Group::new(name, entry.path())));
        }

        Ok(Self { root, groups })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn group(&self, name: &str) -> Option<&Arc<Group>> {
        self.groups.get(name)
    }

    pub fn groups(&self) -> impl Iterator<Item = &Arc<Group>> {
        self.groups.values()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// The group a file path belongs to: its parent directory must carry a
    /// registered group name and be that group's root path exactly.
    pub fn map_to_group(&self, path: &Path) -> Option<&Arc<Group>> {
        let parent = path.parent()?;
        let name = parent.file_name()?.to_str()?;
        self.groups
            .get(name)
            .filter(|group| group.owns_directory(parent))
    }
}
