//! Integration tests for config identity find-or-create and the usage ledger.

mod common;

use common::*;
use futures::future::join_all;
use lookout_core::{
    ResourceCacheDescriptor, ResourceConfigDescriptor, ResourceUser, Source, VersionedResourceType,
};
use lookout_metadata::models::UsedConfigParent;
use lookout_metadata::{MetadataError, MetadataStore, safe_find_or_create};
use std::sync::Arc;

fn custom_type_config() -> ResourceConfigDescriptor {
    let types = vec![VersionedResourceType {
        name: "my-git".to_string(),
        type_name: "registry-image".to_string(),
        source: Source::new().with("repository", "example/my-git"),
        version: Some(version("sha256:abc")),
    }];
    ResourceConfigDescriptor::for_resource_type("my-git", git_source("https://example.com/a.git"), &types)
        .expect("descriptor")
}

#[tokio::test]
async fn test_find_or_create_is_idempotent() {
    run_metadata_test_both(|store: Arc<dyn MetadataStore>| async move {
        let seeded = seed_pipeline(store.as_ref(), "main").await;
        let resource = seed_resource(store.as_ref(), seeded.pipeline.id, "repo").await;
        store.save_base_resource_type("git").await.unwrap();

        let desc = git_config("https://example.com/a.git");
        let user = ResourceUser::Resource(resource.id);
        let first = store.find_or_create_resource_config(&desc, user).await.unwrap();
        let second = store.find_or_create_resource_config(&desc, user).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.base_resource_type().name, "git");
        assert_eq!(store.count_resource_config_uses(first.id).await.unwrap(), 1);

        let uses = store.list_resource_config_uses(first.id).await.unwrap();
        assert_eq!(uses[0].user(), Some(user));
    })
    .await;
}

#[tokio::test]
async fn test_distinct_sources_get_distinct_identities() {
    run_metadata_test_both(|store: Arc<dyn MetadataStore>| async move {
        let seeded = seed_pipeline(store.as_ref(), "main").await;
        let build = seed_builds(store.as_ref(), &seeded, 1).await.remove(0);
        store.save_base_resource_type("git").await.unwrap();

        let user = ResourceUser::Build(build.id);
        let a = store
            .find_or_create_resource_config(&git_config("https://example.com/a.git"), user)
            .await
            .unwrap();
        let b = store
            .find_or_create_resource_config(&git_config("https://example.com/b.git"), user)
            .await
            .unwrap();
        assert_ne!(a.id, b.id);

        let row = store.get_resource_config(a.id).await.unwrap().unwrap();
        assert!(row.resource_cache_id.is_none());
        assert!(row.base_resource_type_id.is_some());
    })
    .await;
}

#[tokio::test]
async fn test_concurrent_users_converge_on_one_identity() {
    run_metadata_test_both(|store: Arc<dyn MetadataStore>| async move {
        const USERS: usize = 8;
        let seeded = seed_pipeline(store.as_ref(), "main").await;
        let builds = seed_builds(store.as_ref(), &seeded, USERS).await;
        store.save_base_resource_type("git").await.unwrap();

        let tasks = builds.iter().map(|build| {
            let store = store.clone();
            let user = ResourceUser::Build(build.id);
            tokio::spawn(async move {
                let desc = git_config("https://example.com/shared.git");
                safe_find_or_create(5, || store.find_or_create_resource_config(&desc, user)).await
            })
        });
        let results: Vec<_> = join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.expect("task panicked").expect("find or create"))
            .collect();

        let id = results[0].id;
        assert!(results.iter().all(|used| used.id == id));
        assert_eq!(store.count_resource_config_uses(id).await.unwrap(), USERS as u64);
    })
    .await;
}

#[tokio::test]
async fn test_missing_base_type_fails() {
    run_metadata_test_both(|store: Arc<dyn MetadataStore>| async move {
        let seeded = seed_pipeline(store.as_ref(), "main").await;
        let build = seed_builds(store.as_ref(), &seeded, 1).await.remove(0);

        let err = store
            .find_or_create_resource_config(
                &ResourceConfigDescriptor::base("no-such-type", Source::new()),
                ResourceUser::Build(build.id),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::BaseResourceTypeNotFound(name) if name == "no-such-type"));
        assert!(store.list_unused_resource_configs().await.unwrap().is_empty());
    })
    .await;
}

#[tokio::test]
async fn test_vanished_user_is_reported() {
    run_metadata_test_both(|store: Arc<dyn MetadataStore>| async move {
        let seeded = seed_pipeline(store.as_ref(), "main").await;
        let build = seed_builds(store.as_ref(), &seeded, 1).await.remove(0);
        store.save_base_resource_type("git").await.unwrap();
        store.delete_build(build.id).await.unwrap();

        let user = ResourceUser::Build(build.id);
        let err = store
            .find_or_create_resource_config(&git_config("https://example.com/a.git"), user)
            .await
            .unwrap_err();
        assert!(matches!(err, MetadataError::UserDisappeared(u) if u == user));
        assert!(!err.is_retryable());
    })
    .await;
}

#[tokio::test]
async fn test_custom_type_chain_records_every_level() {
    run_metadata_test_both(|store: Arc<dyn MetadataStore>| async move {
        let seeded = seed_pipeline(store.as_ref(), "main").await;
        let build = seed_builds(store.as_ref(), &seeded, 1).await.remove(0);
        store.save_base_resource_type("registry-image").await.unwrap();

        let user = ResourceUser::Build(build.id);
        let used = store
            .find_or_create_resource_config(&custom_type_config(), user)
            .await
            .unwrap();

        let UsedConfigParent::ResourceCache(cache) = &used.created_by else {
            panic!("expected a cache parent, got {:?}", used.created_by);
        };
        assert_eq!(cache.version, version("sha256:abc"));
        assert_eq!(used.base_resource_type().name, "registry-image");

        let image_config = cache.resource_config.id;
        assert_ne!(image_config, used.id);
        assert_eq!(store.count_resource_config_uses(used.id).await.unwrap(), 1);
        assert_eq!(store.count_resource_config_uses(image_config).await.unwrap(), 1);

        let row = store.get_resource_config(used.id).await.unwrap().unwrap();
        assert_eq!(row.resource_cache_id, Some(cache.id));

        let again = store
            .find_or_create_resource_config(&custom_type_config(), user)
            .await
            .unwrap();
        assert_eq!(again, used);
    })
    .await;
}

#[tokio::test]
async fn test_find_or_create_cache() {
    run_metadata_test_both(|store: Arc<dyn MetadataStore>| async move {
        let seeded = seed_pipeline(store.as_ref(), "main").await;
        let build = seed_builds(store.as_ref(), &seeded, 1).await.remove(0);
        store.save_base_resource_type("git").await.unwrap();

        let desc = ResourceCacheDescriptor {
            resource_config: git_config("https://example.com/a.git"),
            version: version("abc123"),
            params: Source::new().with("depth", 1),
        };
        let user = ResourceUser::Build(build.id);
        let cache = store.find_or_create_resource_cache(&desc, user).await.unwrap();
        let again = store.find_or_create_resource_cache(&desc, user).await.unwrap();

        assert_eq!(cache, again);
        assert_eq!(cache.version, version("abc123"));
        assert_eq!(
            store
                .count_resource_config_uses(cache.resource_config.id)
                .await
                .unwrap(),
            1
        );
    })
    .await;
}

#[tokio::test]
async fn test_release_use_makes_config_collectable() {
    run_metadata_test_both(|store: Arc<dyn MetadataStore>| async move {
        let seeded = seed_pipeline(store.as_ref(), "main").await;
        let builds = seed_builds(store.as_ref(), &seeded, 2).await;
        store.save_base_resource_type("git").await.unwrap();

        let desc = git_config("https://example.com/a.git");
        let a = ResourceUser::Build(builds[0].id);
        let b = ResourceUser::Build(builds[1].id);
        let used = store.find_or_create_resource_config(&desc, a).await.unwrap();
        store.find_or_create_resource_config(&desc, b).await.unwrap();

        assert!(store.release_resource_config_use(used.id, a).await.unwrap());
        assert!(!store.release_resource_config_use(used.id, a).await.unwrap());
        assert!(store.list_unused_resource_configs().await.unwrap().is_empty());

        store.delete_build(builds[1].id).await.unwrap();
        let unused = store.list_unused_resource_configs().await.unwrap();
        assert_eq!(unused.len(), 1);
        assert_eq!(unused[0].id, used.id);
    })
    .await;
}

#[tokio::test]
async fn test_collected_config_is_recreated() {
    let metadata = TestMetadata::new().await.expect("Failed to create metadata");
    let store = metadata.store();
    let seeded = seed_pipeline(store.as_ref(), "main").await;
    let build = seed_builds(store.as_ref(), &seeded, 1).await.remove(0);
    store.save_base_resource_type("git").await.unwrap();

    let desc = git_config("https://example.com/a.git");
    let user = ResourceUser::Build(build.id);
    let first = store.find_or_create_resource_config(&desc, user).await.unwrap();

    // Stand in for the collector.
    sqlx::query("DELETE FROM resource_configs WHERE id = ?")
        .bind(first.id)
        .execute(metadata.pool())
        .await
        .unwrap();
    assert!(store.get_resource_config(first.id).await.unwrap().is_none());

    let second = safe_find_or_create(3, || store.find_or_create_resource_config(&desc, user))
        .await
        .unwrap();
    assert_ne!(second.id, first.id);
    assert_eq!(store.count_resource_config_uses(second.id).await.unwrap(), 1);
}
