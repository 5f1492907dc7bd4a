use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::identity::identity_of;
use crate::metadata::MetadataUpdate;

/// A single reaction entry. JSON numbers decode as counts, JSON strings as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReactionValue {
    Count(u64),
    Text(String),
}

impl ReactionValue {
    pub fn matches_text(&self, key: &str) -> bool {
        matches!(self, ReactionValue::Text(text) if text == key)
    }
}

impl From<&str> for ReactionValue {
    fn from(value: &str) -> Self {
        ReactionValue::Text(value.to_string())
    }
}

impl From<u64> for ReactionValue {
    fn from(value: u64) -> Self {
        ReactionValue::Count(value)
    }
}

/// Width, height and format name as reported by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub format: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserMetadata {
    pub tags: Vec<String>,
    pub reactions: BTreeMap<String, Vec<ReactionValue>>,
}

/// One cataloged file. Structural fields are fixed for the lifetime of the
/// entry; tags and reactions sit behind their own lock.
#[derive(Debug)]
pub struct Image {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub format: String,
    pub width: u32,
    pub height: u32,
    pub group: String,
    metadata: RwLock<UserMetadata>,
    // Serializes read-modify-write edits made through the API.
    edits: Mutex<()>,
}

/// Serialized form of an [`Image`] for API responses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageRecord {
    pub id: String,
    pub name: String,
    pub uri: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub width: u32,
    pub height: u32,
    pub tags: Vec<String>,
    pub reactions: BTreeMap<String, Vec<ReactionValue>>,
}

impl Image {
    pub fn new(group: &str, path: PathBuf, name: String, size: u64, media: MediaInfo) -> Self {
        Self {
            id: identity_of(&name).to_string(),
            name,
            path,
            size,
            format: media.format,
            width: media.width,
            height: media.height,
            group: group.to_string(),
            metadata: RwLock::new(UserMetadata::default()),
            edits: Mutex::new(()),
        }
    }

    pub fn uri(&self) -> String {
        format!("/raw/{}/{}", self.group, self.name)
    }

    pub async fn tags(&self) -> Vec<String> {
        self.metadata.read().await.tags.clone()
    }

    pub async fn reactions(&self) -> BTreeMap<String, Vec<ReactionValue>> {
        self.metadata.read().await.reactions.clone()
    }

    pub async fn reaction(&self, name: &str) -> Option<Vec<ReactionValue>> {
        self.metadata.read().await.reactions.get(name).cloned()
    }

    pub async fn user_metadata(&self) -> UserMetadata {
        self.metadata.read().await.clone()
    }

    pub async fn lock_edits(&self) -> MutexGuard<'_, ()> {
        self.edits.lock().await
    }

    /// Replace one field wholesale. Applying the same update twice is a no-op.
    pub async fn apply(&self, update: &MetadataUpdate) {
        let mut metadata = self.metadata.write().await;
        match update {
            MetadataUpdate::Tags(tags) => metadata.tags = tags.clone(),
            MetadataUpdate::Reactions { name, values } => {
                metadata.reactions.insert(name.clone(), values.clone());
            }
        }
    }

    pub async fn to_record(&self) -> ImageRecord {
        let metadata = self.metadata.read().await;
        ImageRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            uri: self.uri(),
            size: self.size,
            kind: self.format.clone(),
            width: self.width,
            height: self.height,
            tags: metadata.tags.clone(),
            reactions: metadata.reactions.clone(),
        }
    }
}
