//! # Permission Index
//!
//! The cache-backed snapshot of every permission and the roles granting it.
//!
//! ## Lifecycle
//!
//! ```text
//! load() ─→ local copy? ──yes──→ return it
//!              │ no
//!              ▼
//!          shared cache entry? ──yes──→ hydrate, keep locally
//!              │ no / corrupt
//!              ▼
//!          repository fetch ─→ serialize ─→ shared cache (TTL) ─→ hydrate
//!
//! forget()      drops the shared entry and the local copy
//! clear_local() drops only the local copy (request boundary)
//! ```
//!
//! The snapshot holds every guard and every tenant. Scoping is applied by
//! callers at query time.

use parking_lot::RwLock;
use rolegate_rbac::{
    PermissionId, PermissionRecord, RbacResult, RoleId, RoleRecord, SubjectRef, TenantId,
    WildcardMatcher,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::store::{CacheStore, PermissionGrants, Repository};

/// Serialized form stored in the shared cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CachedSnapshot {
    permissions: Vec<CachedPermission>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedPermission {
    id: u64,
    name: String,
    guard_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tenant_id: Option<TenantId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    roles: Vec<CachedRole>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedRole {
    id: u64,
    name: String,
    guard_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tenant_id: Option<TenantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    grant_tenant_id: Option<TenantId>,
}

impl CachedSnapshot {
    fn from_grants(grants: Vec<PermissionGrants>) -> Self {
        let permissions = grants
            .into_iter()
            .map(|entry| CachedPermission {
                id: entry.permission.id.0,
                name: entry.permission.name,
                guard_name: entry.permission.guard_name,
                tenant_id: entry.permission.tenant_id,
                roles: entry
                    .roles
                    .into_iter()
                    .map(|granted| CachedRole {
                        id: granted.role.id.0,
                        name: granted.role.name,
                        guard_name: granted.role.guard_name,
                        tenant_id: granted.role.tenant_id,
                        grant_tenant_id: granted.tenant_id,
                    })
                    .collect(),
            })
            .collect();
        Self { permissions }
    }
}

/// A role granting an indexed permission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGrant {
    /// The granting role, shared between every permission it grants.
    pub role: Arc<RoleRecord>,
    /// Tenant of the grant row; `None` grants apply in every tenant.
    pub tenant_id: Option<TenantId>,
}

impl RoleGrant {
    /// Check if the grant applies within `tenant`.
    pub fn applies_in(&self, tenant: Option<TenantId>) -> bool {
        self.tenant_id.is_none() || self.tenant_id == tenant
    }
}

/// A permission with its granting roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedPermission {
    /// The permission record.
    pub record: PermissionRecord,
    /// Roles granting it, across tenants.
    pub grants: Vec<RoleGrant>,
}

impl IndexedPermission {
    /// Check if any of `roles` grants this permission within `tenant`.
    pub fn granted_to_any(&self, roles: &HashSet<RoleId>, tenant: Option<TenantId>) -> bool {
        self.grants
            .iter()
            .any(|grant| grant.applies_in(tenant) && roles.contains(&grant.role.id))
    }
}

/// Lookup filter, a conjunction of exact-equality fields.
///
/// # Example
///
/// ```
/// use rolegate_core::PermissionFilter;
/// use rolegate_rbac::{PermissionId, PermissionRecord};
///
/// let record = PermissionRecord::new(PermissionId(1), "posts.view", "web");
/// assert!(PermissionFilter::new().with_name("posts.view").matches(&record));
/// assert!(!PermissionFilter::new().with_guard("api").matches(&record));
/// assert!(PermissionFilter::new().with_tenant(None).matches(&record));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionFilter {
    /// Primary key
    pub id: Option<PermissionId>,
    /// Permission name
    pub name: Option<String>,
    /// Guard name
    pub guard_name: Option<String>,
    /// Owning tenant (`Some(None)` selects global records)
    pub tenant_id: Option<Option<TenantId>>,
}

impl PermissionFilter {
    /// An empty filter matching everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter by primary key.
    pub fn with_id(mut self, id: PermissionId) -> Self {
        self.id = Some(id);
        self
    }

    /// Filter by name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Filter by guard.
    pub fn with_guard(mut self, guard: impl Into<String>) -> Self {
        self.guard_name = Some(guard.into());
        self
    }

    /// Filter by owning tenant.
    pub fn with_tenant(mut self, tenant: Option<TenantId>) -> Self {
        self.tenant_id = Some(tenant);
        self
    }

    /// Check if a record satisfies every set field.
    pub fn matches(&self, record: &PermissionRecord) -> bool {
        self.id.map_or(true, |id| record.id == id)
            && self.name.as_deref().map_or(true, |name| record.name == name)
            && self
                .guard_name
                .as_deref()
                .map_or(true, |guard| record.guard_name == guard)
            && self.tenant_id.map_or(true, |tenant| record.tenant_id == tenant)
    }
}

/// The hydrated snapshot.
#[derive(Debug, Default)]
pub struct Snapshot {
    permissions: Vec<Arc<IndexedPermission>>,
    by_id: HashMap<PermissionId, usize>,
}

impl Snapshot {
    fn hydrate(cached: CachedSnapshot) -> Self {
        let mut roles: HashMap<u64, Arc<RoleRecord>> = HashMap::new();
        let mut permissions = Vec::with_capacity(cached.permissions.len());
        let mut by_id = HashMap::with_capacity(cached.permissions.len());

        for permission in cached.permissions {
            let grants = permission
                .roles
                .into_iter()
                .map(|role| RoleGrant {
                    role: roles
                        .entry(role.id)
                        .or_insert_with(|| {
                            Arc::new(RoleRecord {
                                id: RoleId(role.id),
                                name: role.name,
                                guard_name: role.guard_name,
                                tenant_id: role.tenant_id,
                            })
                        })
                        .clone(),
                    tenant_id: role.grant_tenant_id,
                })
                .collect();

            let record = PermissionRecord {
                id: PermissionId(permission.id),
                name: permission.name,
                guard_name: permission.guard_name,
                tenant_id: permission.tenant_id,
            };
            by_id.insert(record.id, permissions.len());
            permissions.push(Arc::new(IndexedPermission { record, grants }));
        }

        Self { permissions, by_id }
    }

    /// Number of permissions.
    pub fn len(&self) -> usize {
        self.permissions.len()
    }

    /// Check if the snapshot holds no permissions.
    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    /// Iterate over all permissions.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<IndexedPermission>> {
        self.permissions.iter()
    }

    /// Permission by primary key.
    pub fn get(&self, id: PermissionId) -> Option<&Arc<IndexedPermission>> {
        self.by_id.get(&id).and_then(|&idx| self.permissions.get(idx))
    }

    /// Scan for permissions matching `filter`.
    ///
    /// With `only_one` the scan stops at the first match. No match yields an
    /// empty list.
    pub fn query(&self, filter: &PermissionFilter, only_one: bool) -> Vec<Arc<IndexedPermission>> {
        if let Some(id) = filter.id {
            return self
                .get(id)
                .filter(|p| filter.matches(&p.record))
                .cloned()
                .into_iter()
                .collect();
        }

        let matches = self.permissions.iter().filter(|p| filter.matches(&p.record));
        if only_one {
            matches.take(1).cloned().collect()
        } else {
            matches.cloned().collect()
        }
    }
}

/// A held permission of one subject, compiled for matching.
#[derive(Debug, Clone)]
pub struct WildcardEntry {
    /// Compiled pattern.
    pub matcher: WildcardMatcher,
    /// Guard of the held permission.
    pub guard_name: String,
}

type WildcardKey = (SubjectRef, Option<TenantId>);

/// Cache-backed permission snapshot with single-flight loading.
pub struct PermissionIndex<R, C> {
    repository: Arc<R>,
    cache: Arc<C>,
    cache_key: String,
    ttl: Duration,
    local: RwLock<Option<Arc<Snapshot>>>,
    build_lock: AsyncMutex<()>,
    generation: AtomicU64,
    wildcards: RwLock<HashMap<WildcardKey, Arc<Vec<WildcardEntry>>>>,
}

impl<R, C> std::fmt::Debug for PermissionIndex<R, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionIndex")
            .field("cache_key", &self.cache_key)
            .field("ttl", &self.ttl)
            .field("loaded", &self.local.read().is_some())
            .finish()
    }
}

impl<R: Repository, C: CacheStore> PermissionIndex<R, C> {
    /// Create an index over the given collaborators.
    ///
    /// # Arguments
    ///
    /// * `repository` - Source of truth for permissions and grants
    /// * `cache` - Shared cache store
    /// * `cache_key` - Key of the serialized snapshot
    /// * `ttl` - Lifetime of the shared entry
    pub fn new(repository: Arc<R>, cache: Arc<C>, cache_key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            repository,
            cache,
            cache_key: cache_key.into(),
            ttl,
            local: RwLock::new(None),
            build_lock: AsyncMutex::new(()),
            generation: AtomicU64::new(0),
            wildcards: RwLock::new(HashMap::new()),
        }
    }

    /// Shared cache key.
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    /// Check if a hydrated copy is held locally.
    pub fn is_loaded(&self) -> bool {
        self.local.read().is_some()
    }

    /// Get the current snapshot, building it if absent.
    ///
    /// Concurrent first calls share one build. Repository failures propagate
    /// without retry. A corrupt shared entry is rebuilt.
    pub async fn load(&self) -> RbacResult<Arc<Snapshot>> {
        let local = self.local.read().clone();
        if let Some(snapshot) = local {
            return Ok(snapshot);
        }

        let _building = self.build_lock.lock().await;
        let local = self.local.read().clone();
        if let Some(snapshot) = local {
            debug!("Permission snapshot loaded by concurrent caller");
            return Ok(snapshot);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let cached = match self.cache.get(&self.cache_key).await? {
            Some(raw) => match serde_json::from_str::<CachedSnapshot>(&raw) {
                Ok(cached) => {
                    debug!(key = %self.cache_key, "Permission cache hit");
                    cached
                }
                Err(e) => {
                    warn!(key = %self.cache_key, error = %e, "Corrupt permission cache entry, rebuilding");
                    self.build().await?
                }
            },
            None => {
                debug!(key = %self.cache_key, "Permission cache miss");
                self.build().await?
            }
        };

        let snapshot = Arc::new(Snapshot::hydrate(cached));
        if self.generation.load(Ordering::SeqCst) == generation {
            *self.local.write() = Some(snapshot.clone());
        } else {
            debug!("Local copy cleared during build, not keeping it");
        }
        Ok(snapshot)
    }

    async fn build(&self) -> RbacResult<CachedSnapshot> {
        let grants = self.repository.fetch_all_permissions_with_roles().await?;
        let cached = CachedSnapshot::from_grants(grants);
        let encoded = serde_json::to_string(&cached)?;
        self.cache.set(&self.cache_key, encoded, self.ttl).await?;

        info!(
            key = %self.cache_key,
            permissions = cached.permissions.len(),
            ttl_secs = self.ttl.as_secs(),
            "Permission snapshot built"
        );
        Ok(cached)
    }

    /// Load, then scan with `filter`.
    pub async fn query(
        &self,
        filter: &PermissionFilter,
        only_one: bool,
    ) -> RbacResult<Vec<Arc<IndexedPermission>>> {
        Ok(self.load().await?.query(filter, only_one))
    }

    /// Drop the shared entry, the local copy and every wildcard index.
    ///
    /// Must follow any write to permissions, roles or their relationships.
    ///
    /// Waits for an in-flight build so its write to the shared cache cannot
    /// land after the delete.
    pub async fn forget(&self) -> RbacResult<bool> {
        let _building = self.build_lock.lock().await;
        self.clear_local();
        let existed = self.cache.forget(&self.cache_key).await?;
        debug!(key = %self.cache_key, existed, "Permission cache forgotten");
        Ok(existed)
    }

    /// Drop only process-local state; the shared entry is kept.
    pub fn clear_local(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.local.write() = None;
        self.wildcards.write().clear();
    }

    /// Cached wildcard entries of a subject.
    pub fn wildcard_index(
        &self,
        subject: &SubjectRef,
        tenant: Option<TenantId>,
    ) -> Option<Arc<Vec<WildcardEntry>>> {
        self.wildcards
            .read()
            .get(&(subject.clone(), tenant))
            .cloned()
    }

    /// Remember the wildcard entries of a subject.
    pub fn store_wildcard_index(
        &self,
        subject: &SubjectRef,
        tenant: Option<TenantId>,
        entries: Vec<WildcardEntry>,
    ) -> Arc<Vec<WildcardEntry>> {
        let entries = Arc::new(entries);
        self.wildcards
            .write()
            .insert((subject.clone(), tenant), entries.clone());
        entries
    }

    /// Drop the wildcard entries of a subject, in every tenant.
    pub fn forget_wildcard_index(&self, subject: &SubjectRef) {
        self.wildcards.write().retain(|(held_by, _), _| held_by != subject);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryCacheStore, MemoryRepository};
    use rolegate_rbac::{NewRecord, RbacError};

    const KEY: &str = "test.permission.cache";

    fn record(name: &str) -> NewRecord {
        NewRecord {
            name: name.to_string(),
            guard_name: "web".to_string(),
            tenant_id: None,
        }
    }

    async fn seeded() -> (Arc<MemoryRepository>, Arc<MemoryCacheStore>, PermissionIndex<MemoryRepository, MemoryCacheStore>) {
        let repo = Arc::new(MemoryRepository::new());
        let view = repo.create_permission(record("posts.view")).await.unwrap();
        let edit = repo.create_permission(record("posts.edit")).await.unwrap();
        let editor = repo.create_role(record("Editor")).await.unwrap();
        let author = repo.create_role(record("Author")).await.unwrap();
        repo.grant_to_role(editor.id, &[view.id, edit.id], None).await.unwrap();
        repo.grant_to_role(author.id, &[view.id], Some(TenantId(1))).await.unwrap();

        let cache = Arc::new(MemoryCacheStore::new());
        let index = PermissionIndex::new(repo.clone(), cache.clone(), KEY, Duration::from_secs(60));
        (repo, cache, index)
    }

    #[tokio::test]
    async fn test_load_builds_and_caches() {
        let (repo, cache, index) = seeded().await;

        let snapshot = index.load().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(cache.contains(KEY));
        assert!(index.is_loaded());

        index.load().await.unwrap();
        assert_eq!(repo.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_roles_shared_between_permissions() {
        let (_repo, _cache, index) = seeded().await;
        let snapshot = index.load().await.unwrap();

        let view = &snapshot.query(&PermissionFilter::new().with_name("posts.view"), true)[0];
        let edit = &snapshot.query(&PermissionFilter::new().with_name("posts.edit"), true)[0];
        let editor_on_view = view.grants.iter().find(|g| g.role.name == "Editor").unwrap();
        let editor_on_edit = edit.grants.iter().find(|g| g.role.name == "Editor").unwrap();
        assert!(Arc::ptr_eq(&editor_on_view.role, &editor_on_edit.role));

        let author = view.grants.iter().find(|g| g.role.name == "Author").unwrap();
        assert!(author.applies_in(Some(TenantId(1))));
        assert!(!author.applies_in(Some(TenantId(2))));
    }

    #[tokio::test]
    async fn test_query_is_pure_conjunction() {
        let (_repo, _cache, index) = seeded().await;

        let all = index.query(&PermissionFilter::new(), false).await.unwrap();
        assert_eq!(all.len(), 2);

        let first = index.query(&PermissionFilter::new(), true).await.unwrap();
        assert_eq!(first.len(), 1);

        let none = index
            .query(&PermissionFilter::new().with_name("posts.view").with_guard("api"), false)
            .await
            .unwrap();
        assert!(none.is_empty());

        let by_id = index
            .query(&PermissionFilter::new().with_id(PermissionId(2)), true)
            .await
            .unwrap();
        assert_eq!(by_id[0].record.name, "posts.edit");
    }

    #[tokio::test]
    async fn test_forget_reflects_new_permissions() {
        let (repo, cache, index) = seeded().await;
        index.load().await.unwrap();

        repo.create_permission(record("posts.delete")).await.unwrap();
        assert_eq!(index.load().await.unwrap().len(), 2);

        assert!(index.forget().await.unwrap());
        assert!(!cache.contains(KEY));
        assert_eq!(index.load().await.unwrap().len(), 3);
        assert_eq!(repo.fetch_count(), 2);
    }

    /// Cache store whose writes take a while to land.
    struct SlowWrites {
        inner: MemoryCacheStore,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl CacheStore for SlowWrites {
        async fn get(&self, key: &str) -> RbacResult<Option<String>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: String, ttl: Duration) -> RbacResult<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.set(key, value, ttl).await
        }

        async fn forget(&self, key: &str) -> RbacResult<bool> {
            self.inner.forget(key).await
        }
    }

    #[tokio::test]
    async fn test_forget_during_build_drops_stale_entry() {
        let repo = Arc::new(MemoryRepository::new());
        repo.create_permission(record("posts.edit")).await.unwrap();
        let cache = Arc::new(SlowWrites {
            inner: MemoryCacheStore::new(),
            delay: Duration::from_millis(100),
        });
        let index = PermissionIndex::new(repo.clone(), cache.clone(), KEY, Duration::from_secs(60));

        let (built, forgotten) = tokio::join!(index.load(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            repo.create_permission(record("posts.view")).await.unwrap();
            index.forget().await
        });
        assert_eq!(built.unwrap().len(), 1);
        assert!(forgotten.unwrap());
        assert!(!index.is_loaded());

        let snapshot = index.load().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(repo.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_clear_local_reuses_shared_entry() {
        let (repo, cache, index) = seeded().await;
        index.load().await.unwrap();

        index.clear_local();
        assert!(!index.is_loaded());
        assert!(cache.contains(KEY));

        index.load().await.unwrap();
        assert_eq!(repo.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_entry_triggers_rebuild() {
        let (repo, cache, index) = seeded().await;
        cache
            .set(KEY, "{not json".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        let snapshot = index.load().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(repo.fetch_count(), 1);

        let raw = cache.get(KEY).await.unwrap().unwrap();
        assert!(raw.contains("posts.view"));
    }

    #[tokio::test]
    async fn test_repository_failure_propagates() {
        let (repo, cache, index) = seeded().await;
        repo.fail_fetches(true);

        let err = index.load().await.unwrap_err();
        assert!(matches!(err, RbacError::Storage(_)));
        assert!(!index.is_loaded());
        assert!(!cache.contains(KEY));
    }

    #[tokio::test]
    async fn test_wildcard_index_per_subject() {
        let (_repo, _cache, index) = seeded().await;
        let alice = SubjectRef::new("user", 1);
        let bob = SubjectRef::new("user", 2);

        let entry = WildcardEntry {
            matcher: WildcardMatcher::new("posts.*").unwrap(),
            guard_name: "web".into(),
        };
        index.store_wildcard_index(&alice, None, vec![entry.clone()]);
        index.store_wildcard_index(&bob, None, vec![entry]);

        index.forget_wildcard_index(&alice);
        assert!(index.wildcard_index(&alice, None).is_none());
        assert_eq!(index.wildcard_index(&bob, None).unwrap().len(), 1);

        index.forget().await.unwrap();
        assert!(index.wildcard_index(&bob, None).is_none());
    }
}
