//! End-to-end access scenarios against the in-memory collaborators.

use rolegate_core::{
    AccessResolver, MemoryCacheStore, MemoryRepository, PermissionFilter, RbacConfig, Repository,
    Subject,
};
use rolegate_events::{EventKind, Holder, MemoryEventBus};
use rolegate_rbac::{AssignmentKind, NewRecord, RbacError, RecordAttributes, TenantId};
use std::sync::Arc;
use std::time::Duration;

type Resolver = AccessResolver<MemoryRepository, MemoryCacheStore>;

fn resolver(config: RbacConfig) -> Resolver {
    AccessResolver::new(MemoryRepository::new(), MemoryCacheStore::new(), config)
}

#[tokio::test]
async fn test_editor_scenario() {
    let resolver = resolver(RbacConfig::default());
    resolver.create_permission(RecordAttributes::new("posts.view")).await.unwrap();
    resolver.create_permission(RecordAttributes::new("posts.edit")).await.unwrap();
    resolver.create_permission(RecordAttributes::new("posts.delete")).await.unwrap();
    let editor = resolver.create_role(RecordAttributes::new("Editor")).await.unwrap();
    resolver
        .give_permission_to_role(&editor, vec!["posts.view", "posts.edit"])
        .await
        .unwrap();

    let user = Subject::new("user", 1);
    resolver.assign_role(&user, "Editor").await.unwrap();

    assert!(resolver.has_permission_to(&user, "posts.edit", None).await.unwrap());
    assert!(!resolver.has_permission_to(&user, "posts.delete", None).await.unwrap());

    resolver.remove_role(&user, "Editor").await.unwrap();
    assert!(!resolver.has_permission_to(&user, "posts.edit", None).await.unwrap());
}

#[tokio::test]
async fn test_tenant_isolation() {
    let resolver = resolver(RbacConfig::default().with_tenancy(true));
    let tenants = resolver.tenant_context().clone();
    resolver
        .create_permission(RecordAttributes::new("settings.edit"))
        .await
        .unwrap();

    tenants.set(Some(TenantId(1)));
    let t1_admin = resolver.create_role(RecordAttributes::new("Admin")).await.unwrap();
    resolver
        .give_permission_to_role(&t1_admin, "settings.edit")
        .await
        .unwrap();

    tenants.set(Some(TenantId(2)));
    let t2_admin = resolver.create_role(RecordAttributes::new("Admin")).await.unwrap();
    assert_ne!(t1_admin.id, t2_admin.id);

    let found = resolver.find_role_by_name("Admin", None).await.unwrap();
    assert_eq!(found.id, t2_admin.id);

    let user = Subject::new("user", 1);
    {
        let _scope = tenants.scoped(Some(TenantId(1)));

        // A record owned by another tenant is not usable here
        let err = resolver.assign_role(&user, &t2_admin).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!resolver.has_role(&user, "Admin", None).await.unwrap());

        assert_eq!(
            resolver.find_role_by_name("Admin", None).await.unwrap().id,
            t1_admin.id
        );
        resolver.assign_role(&user, "Admin").await.unwrap();
        assert!(resolver.has_role(&user, "Admin", None).await.unwrap());
        assert!(resolver.has_permission_to(&user, "settings.edit", None).await.unwrap());
    }

    assert_eq!(tenants.get(), Some(TenantId(2)));
    assert!(!resolver.has_role(&user, "Admin", None).await.unwrap());
    assert!(!resolver.has_permission_to(&user, "settings.edit", None).await.unwrap());
}

#[tokio::test]
async fn test_cache_coherence() {
    let repository = Arc::new(MemoryRepository::new());
    let cache = Arc::new(MemoryCacheStore::new());
    let resolver = AccessResolver::from_shared(repository.clone(), cache.clone(), RbacConfig::default());

    resolver.index().load().await.unwrap();
    assert!(cache.contains(resolver.index().cache_key()));

    // Written behind the resolver's back: not visible until forgotten
    repository
        .create_permission(NewRecord {
            name: "posts.view".into(),
            guard_name: "web".into(),
            tenant_id: None,
        })
        .await
        .unwrap();
    let filter = PermissionFilter::new().with_name("posts.view");
    assert!(resolver.index().query(&filter, true).await.unwrap().is_empty());

    assert!(resolver.forget_cached_permissions().await.unwrap());
    assert_eq!(resolver.index().query(&filter, true).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_end_request_keeps_shared_entry() {
    let resolver = resolver(RbacConfig::default().with_tenancy(true));
    resolver.tenant_context().set(Some(TenantId(4)));
    resolver.index().load().await.unwrap();
    let fetches = resolver.repository().fetch_count();

    resolver.end_request();
    assert_eq!(resolver.tenant_context().get(), None);
    assert!(!resolver.index().is_loaded());

    resolver.index().load().await.unwrap();
    assert_eq!(resolver.repository().fetch_count(), fetches);
}

#[tokio::test]
async fn test_sync_twice_is_stable() {
    let resolver = resolver(RbacConfig::default());
    for name in ["Editor", "Author"] {
        resolver.create_role(RecordAttributes::new(name)).await.unwrap();
    }
    let user = Subject::new("user", 1);
    let subject_ref = user.subject_ref().unwrap();

    resolver.assign_role(&user, "Editor").await.unwrap();
    resolver.assign_role(&user, "Editor").await.unwrap();
    assert_eq!(
        resolver.repository().assignment_count(&subject_ref, AssignmentKind::Role),
        1
    );

    resolver.sync_roles(&user, "Editor|Author").await.unwrap();
    resolver.sync_roles(&user, "Editor|Author").await.unwrap();
    assert_eq!(
        resolver.repository().assignment_count(&subject_ref, AssignmentKind::Role),
        2
    );
    assert!(resolver.has_all_roles(&user, "Editor|Author", None).await.unwrap());
    assert!(!resolver.has_exact_roles(&user, "Editor", None).await.unwrap());
}

#[tokio::test]
async fn test_wildcard_via_role() {
    let resolver = resolver(RbacConfig::default().with_wildcard(true));
    resolver.create_permission(RecordAttributes::new("admin.*")).await.unwrap();
    let admin = resolver.create_role(RecordAttributes::new("Admin")).await.unwrap();
    resolver.give_permission_to_role(&admin, "admin.*").await.unwrap();

    let user = Subject::new("user", 1);
    resolver.assign_role(&user, "Admin").await.unwrap();

    assert!(resolver.has_permission_to(&user, "admin.create", None).await.unwrap());
    assert!(resolver
        .has_permission_to(&user, "admin.anything.nested", None)
        .await
        .unwrap());
    assert!(!resolver.has_permission_to(&user, "user.create", None).await.unwrap());

    // Revoking from the role drops the cached wildcard index
    resolver.revoke_permission_from_role(&admin, "admin.*").await.unwrap();
    assert!(!resolver.has_permission_to(&user, "admin.create", None).await.unwrap());
}

#[tokio::test]
async fn test_concurrent_first_load_builds_once() {
    let repository = MemoryRepository::new().with_fetch_delay(Duration::from_millis(50));
    let resolver = Arc::new(AccessResolver::new(
        repository,
        MemoryCacheStore::new(),
        RbacConfig::default(),
    ));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let resolver = resolver.clone();
        handles.push(tokio::spawn(async move {
            resolver.index().load().await.map(|snapshot| snapshot.len())
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), 0);
    }

    assert_eq!(resolver.repository().fetch_count(), 1);
}

#[tokio::test]
async fn test_repository_failure_propagates() {
    let resolver = resolver(RbacConfig::default());
    resolver.create_permission(RecordAttributes::new("posts.view")).await.unwrap();
    resolver.forget_cached_permissions().await.unwrap();
    resolver.repository().fail_fetches(true);

    let user = Subject::new("user", 1);
    let err = resolver
        .check_permission_to(&user, "posts.view", None)
        .await
        .unwrap_err();
    assert!(matches!(err, RbacError::Storage(_)));
    assert!(!resolver.index().is_loaded());

    resolver.repository().fail_fetches(false);
    assert!(!resolver.check_permission_to(&user, "posts.view", None).await.unwrap());
}

#[tokio::test]
async fn test_write_errors_reach_the_caller() {
    let resolver = resolver(RbacConfig::default());
    resolver.create_role(RecordAttributes::new("Editor")).await.unwrap();
    let err = resolver
        .create_role(RecordAttributes::new("Editor"))
        .await
        .unwrap_err();
    assert!(matches!(err, RbacError::RoleAlreadyExists { .. }));
    assert_eq!(err.status_code(), 409);

    let api_role = resolver
        .create_role(RecordAttributes::new("Client").with_guard("machine"))
        .await
        .unwrap();
    let user = Subject::new("user", 1);
    let err = resolver.assign_role(&user, &api_role).await.unwrap_err();
    match err {
        RbacError::GuardMismatch { given, expected } => {
            assert_eq!(given, "machine");
            assert_eq!(expected, vec!["web", "api"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_deferred_attach_emits_on_commit() {
    let bus = Arc::new(MemoryEventBus::new());
    let mut attached = bus.subscribe("role.attached");
    let resolver = resolver(RbacConfig::default().with_events(true)).with_notifier(bus.clone());
    let editor = resolver.create_role(RecordAttributes::new("Editor")).await.unwrap();

    let mut draft = Subject::unsaved("user");
    resolver.assign_role(&draft, "Editor").await.unwrap();
    assert!(attached.try_recv().is_err());

    resolver.commit(&mut draft, 42).await.unwrap();
    let event = attached.try_recv().unwrap();
    assert_eq!(event.kind, EventKind::Attached);
    assert_eq!(event.keys, vec![editor.id.0]);
    assert!(matches!(event.holder, Holder::Subject { ref subject } if subject.id == 42));

    resolver.commit(&mut draft, 42).await.unwrap();
    assert!(attached.try_recv().is_err());
}
