use super::backends::memory::MemoryStore;
use super::*;
use crate::catalog::{Group, Image, MediaInfo, ReactionValue};
use std::sync::Arc;
use std::time::Duration;

const PREFIX: &str = "image-server";
const CAT_ID: &str = "0123456789abcdef0123456789abcdef01234567";

fn pets_with_cat() -> Arc<Group> {
    let group = Arc::new(Group::new("pets", "/nowhere/pets"));
    let name = format!("{}.png", CAT_ID);
    group.insert(Image::new(
        "pets",
        format!("/nowhere/pets/{}", name).into(),
        name,
        100,
        MediaInfo {
            width: 2,
            height: 2,
            format: "png".to_string(),
        },
    ));
    group
}

fn key(image_id: &str, field: MetadataField) -> String {
    MetadataKey::new(image_id, field).to_key(PREFIX, "pets")
}

async fn wait_for_tags(image: &Image, expected: &[&str]) -> bool {
    for _ in 0..100 {
        if image.tags().await == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_initial_load_applies_known_images() {
    let store = Arc::new(MemoryStore::new());
    store
        .put(&key(CAT_ID, MetadataField::Tags), br#"["cute","orange"]"#.to_vec())
        .await
        .unwrap();
    store
        .put(
            &key(CAT_ID, MetadataField::Reactions("like".to_string())),
            br#"["alice",2]"#.to_vec(),
        )
        .await
        .unwrap();

    let group = pets_with_cat();
    let sync = MetadataSync::new(store.clone(), PREFIX);
    let report = sync.initial_load(&group).await.unwrap();

    assert_eq!(report.applied, 2);
    assert_eq!(report.orphans_removed, 0);

    let cat = group.find(CAT_ID).unwrap();
    assert_eq!(cat.tags().await, vec!["cute", "orange"]);
    assert_eq!(
        cat.reaction("like").await.unwrap(),
        vec![ReactionValue::from("alice"), ReactionValue::from(2)]
    );
}

#[tokio::test]
async fn test_initial_load_removes_orphans() {
    let store = Arc::new(MemoryStore::new());
    let orphan = "ffffffffffffffffffffffffffffffffffffffff";
    store
        .put(&key(orphan, MetadataField::Tags), br#"["gone"]"#.to_vec())
        .await
        .unwrap();
    store
        .put(
            &key(orphan, MetadataField::Reactions("like".to_string())),
            b"[1]".to_vec(),
        )
        .await
        .unwrap();
    store
        .put(&key(CAT_ID, MetadataField::Tags), br#"["cute"]"#.to_vec())
        .await
        .unwrap();
    // Other groups are out of reach.
    store
        .put("image-server/cars/Images/abc/Tags", br#"["fast"]"#.to_vec())
        .await
        .unwrap();

    let group = pets_with_cat();
    let sync = MetadataSync::new(store.clone(), PREFIX);
    let report = sync.initial_load(&group).await.unwrap();

    assert_eq!(report.orphans_removed, 1);
    assert_eq!(report.applied, 1);
    assert!(store.get(&key(orphan, MetadataField::Tags)).await.is_none());
    assert!(store.get(&key(CAT_ID, MetadataField::Tags)).await.is_some());
    assert!(store.get("image-server/cars/Images/abc/Tags").await.is_some());
}

#[tokio::test]
async fn test_initial_load_skips_bad_records() {
    let store = Arc::new(MemoryStore::new());
    store
        .put(&key(CAT_ID, MetadataField::Tags), b"not json".to_vec())
        .await
        .unwrap();
    store
        .put("image-server/pets/Images/stray", b"[]".to_vec())
        .await
        .unwrap();

    let group = pets_with_cat();
    let sync = MetadataSync::new(store, PREFIX);
    let report = sync.initial_load(&group).await.unwrap();

    assert_eq!(report.applied, 0);
    assert_eq!(report.skipped, 2);
    assert!(group.find(CAT_ID).unwrap().tags().await.is_empty());
}

#[tokio::test]
async fn test_apply_put_is_idempotent() {
    let group = pets_with_cat();
    let sync = MetadataSync::new(Arc::new(MemoryStore::new()), PREFIX);
    let tags_key = key(CAT_ID, MetadataField::Tags);

    for _ in 0..2 {
        assert_eq!(
            sync.apply_put(&group, &tags_key, br#"["cute"]"#).await,
            ApplyOutcome::Applied
        );
    }
    assert_eq!(group.find(CAT_ID).unwrap().tags().await, vec!["cute"]);

    assert_eq!(
        sync.apply_put(&group, &key("unknown", MetadataField::Tags), b"[]")
            .await,
        ApplyOutcome::UnknownImage("unknown".to_string())
    );
    assert_eq!(
        sync.apply_put(&group, "image-server/pets/Images/x/Ratings", b"[]")
            .await,
        ApplyOutcome::Skipped
    );
}

#[tokio::test]
async fn test_persist_writes_full_value_upstream() {
    let store = Arc::new(MemoryStore::new());
    let group = pets_with_cat();
    let sync = MetadataSync::new(store.clone(), PREFIX);
    let cat = group.find(CAT_ID).unwrap();

    sync.persist(
        &cat,
        MetadataUpdate::Reactions {
            name: "like".to_string(),
            values: vec![ReactionValue::Count(42)],
        },
    )
    .await
    .unwrap();

    let stored = store
        .get(&key(CAT_ID, MetadataField::Reactions("like".to_string())))
        .await
        .unwrap();
    assert_eq!(stored, b"[42]".to_vec());
    assert_eq!(
        cat.reaction("like").await.unwrap(),
        vec![ReactionValue::Count(42)]
    );
}

#[tokio::test]
async fn test_watch_applies_remote_puts_and_ignores_deletes() {
    let store = Arc::new(MemoryStore::new());
    let group = pets_with_cat();
    let sync = Arc::new(MetadataSync::new(store.clone(), PREFIX));
    sync.watch_group(group.clone()).await.unwrap();

    let tags_key = key(CAT_ID, MetadataField::Tags);
    store.put(&tags_key, br#"["remote"]"#.to_vec()).await.unwrap();

    let cat = group.find(CAT_ID).unwrap();
    assert!(wait_for_tags(&cat, &["remote"]).await);

    store
        .delete_prefix(&keys::image_prefix(PREFIX, "pets", CAT_ID))
        .await
        .unwrap();
    // Give the watch a chance to (not) react.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cat.tags().await, vec!["remote"]);

    sync.shutdown().await;
}

#[tokio::test]
async fn test_watch_echo_of_persist_is_noop() {
    let store = Arc::new(MemoryStore::new());
    let group = pets_with_cat();
    let sync = Arc::new(MetadataSync::new(store.clone(), PREFIX));
    sync.watch_group(group.clone()).await.unwrap();

    let cat = group.find(CAT_ID).unwrap();
    sync.persist(&cat, MetadataUpdate::Tags(vec!["a".to_string(), "b".to_string()]))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cat.tags().await, vec!["a", "b"]);

    sync.shutdown().await;
}

#[tokio::test]
async fn test_watch_drops_updates_for_unknown_images() {
    let store = Arc::new(MemoryStore::new());
    let group = pets_with_cat();
    let sync = Arc::new(MetadataSync::new(store.clone(), PREFIX));
    sync.watch_group(group.clone()).await.unwrap();

    store
        .put(&key("unknown", MetadataField::Tags), br#"["x"]"#.to_vec())
        .await
        .unwrap();
    store
        .put(&key(CAT_ID, MetadataField::Tags), br#"["after"]"#.to_vec())
        .await
        .unwrap();

    let cat = group.find(CAT_ID).unwrap();
    assert!(wait_for_tags(&cat, &["after"]).await);
    assert_eq!(group.len(), 1);

    sync.shutdown().await;
}

#[tokio::test]
async fn test_create_store_memory_backend() {
    let store = create_store(&StoreBackendConfig::Memory).await.unwrap();
    assert_eq!(store.name(), "In-memory metadata store");
}

#[test]
fn test_metadata_config_from_toml() {
    let config: MetadataConfig = toml_edit::de::from_str(
        r#"
prefix = "gallery"
backend = "memory"
"#,
    )
    .unwrap();
    assert_eq!(config.prefix, "gallery");
    assert!(matches!(config.backend, StoreBackendConfig::Memory));
}

/// Lands a remote write right after each prefix read returns its snapshot.
struct LateWriteStore {
    inner: MemoryStore,
    late_key: String,
    late_value: Vec<u8>,
}

#[async_trait::async_trait]
impl MetadataStore for LateWriteStore {
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        let snapshot = self.inner.get_prefix(prefix).await?;
        self.inner.put(&self.late_key, self.late_value.clone()).await?;
        Ok(snapshot)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, StoreError> {
        self.inner.delete_prefix(prefix).await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.inner.put(key, value).await
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchSubscription, StoreError> {
        self.inner.watch_prefix(prefix).await
    }

    fn name(&self) -> &str {
        "late-write"
    }
}

#[tokio::test]
async fn test_load_and_watch_keeps_writes_made_during_the_read() {
    let inner = MemoryStore::new();
    inner
        .put(&key(CAT_ID, MetadataField::Tags), br#"["stale"]"#.to_vec())
        .await
        .unwrap();
    let store = Arc::new(LateWriteStore {
        inner,
        late_key: key(CAT_ID, MetadataField::Tags),
        late_value: br#"["fresh"]"#.to_vec(),
    });

    let group = pets_with_cat();
    let sync = Arc::new(MetadataSync::new(store, PREFIX));
    let report = sync.load_and_watch(group.clone()).await.unwrap();
    assert_eq!(report.applied, 1);

    let cat = group.find(CAT_ID).unwrap();
    assert!(wait_for_tags(&cat, &["fresh"]).await);

    sync.shutdown().await;
}
