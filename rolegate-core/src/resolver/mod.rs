//! # Access Resolver
//!
//! The decision layer: has-role and has-permission questions, assignment
//! writes, record lookups and role grants, scoped by guard and tenant.
//!
//! Operations are split across submodules:
//! - `records`: permission and role lookup, creation, deletion, role grants
//! - `queries`: role and permission checks and reads
//! - `writes`: assign, remove, give, revoke, sync, commit
//! - `holders`: subjects holding a role or permission, subject removal

mod holders;
mod queries;
mod records;
mod writes;

use rolegate_events::{AccessEvent, NoopSink, NotificationSink};
use rolegate_rbac::records::pick_visible;
use rolegate_rbac::{
    AccessRecord, GuardResolver, PermissionId, PermissionRecord, PermissionTarget, RbacError,
    RbacResult, RoleId, RoleRecord, RoleTarget, Target, TenantId,
};
use rolegate_tenancy::TenantContext;
use std::sync::Arc;

use crate::config::RbacConfig;
use crate::index::{PermissionFilter, PermissionIndex};
use crate::memory::MemoryCacheStore;
use crate::store::{CacheStore, Repository};
use crate::subject::Subject;

/// Role and permission decision engine.
///
/// Bound once at startup to a repository and a cache store.
///
/// # Example
///
/// ```
/// use rolegate_core::{AccessResolver, MemoryCacheStore, MemoryRepository, RbacConfig, Subject};
/// use rolegate_rbac::RecordAttributes;
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let resolver = AccessResolver::new(
///     MemoryRepository::new(),
///     MemoryCacheStore::new(),
///     RbacConfig::default(),
/// );
///
/// resolver.create_permission(RecordAttributes::new("posts.edit")).await.unwrap();
/// let editor = resolver.create_role(RecordAttributes::new("Editor")).await.unwrap();
/// resolver.give_permission_to_role(&editor, "posts.edit").await.unwrap();
///
/// let user = Subject::new("user", 1);
/// resolver.assign_role(&user, "Editor").await.unwrap();
///
/// assert!(resolver.has_permission_to(&user, "posts.edit", None).await.unwrap());
/// # });
/// ```
pub struct AccessResolver<R, C = MemoryCacheStore> {
    repository: Arc<R>,
    index: PermissionIndex<R, C>,
    guards: GuardResolver,
    tenant: Arc<TenantContext>,
    notifier: Arc<dyn NotificationSink>,
    config: RbacConfig,
}

impl<R, C> std::fmt::Debug for AccessResolver<R, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessResolver")
            .field("index", &self.index)
            .field("guards", &self.guards)
            .field("tenant", &self.tenant.get())
            .field("config", &self.config)
            .finish()
    }
}

impl<R: Repository, C: CacheStore> AccessResolver<R, C> {
    /// Create a resolver owning its collaborators.
    pub fn new(repository: R, cache: C, config: RbacConfig) -> Self {
        Self::from_shared(Arc::new(repository), Arc::new(cache), config)
    }

    /// Create a resolver over shared collaborators.
    pub fn from_shared(repository: Arc<R>, cache: Arc<C>, config: RbacConfig) -> Self {
        let index = PermissionIndex::new(
            repository.clone(),
            cache,
            config.cache_key.clone(),
            config.cache_ttl(),
        );
        Self {
            repository,
            index,
            guards: config.guard_resolver(),
            tenant: Arc::new(TenantContext::new()),
            notifier: Arc::new(NoopSink),
            config,
        }
    }

    /// Deliver attached/detached events to `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Share a tenant context with the host application.
    pub fn with_tenant_context(mut self, tenant: Arc<TenantContext>) -> Self {
        self.tenant = tenant;
        self
    }

    /// The repository collaborator.
    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// The permission index.
    pub fn index(&self) -> &PermissionIndex<R, C> {
        &self.index
    }

    /// The guard resolver.
    pub fn guards(&self) -> &GuardResolver {
        &self.guards
    }

    /// The active configuration.
    pub fn config(&self) -> &RbacConfig {
        &self.config
    }

    /// The tenant context lookups are scoped by.
    pub fn tenant_context(&self) -> &Arc<TenantContext> {
        &self.tenant
    }

    /// Tenant applied to lookups and assignment rows.
    ///
    /// Always `None` when tenancy is disabled.
    pub fn scope_tenant(&self) -> Option<TenantId> {
        if self.config.tenancy {
            self.tenant.get()
        } else {
            None
        }
    }

    /// Invalidate the shared snapshot and every process-local cache.
    pub async fn forget_cached_permissions(&self) -> RbacResult<bool> {
        self.index.forget().await
    }

    /// Request boundary hook for reused workers.
    ///
    /// Clears the tenant context and the process-local snapshot; the shared
    /// cache entry is kept.
    pub fn end_request(&self) {
        self.tenant.reset();
        self.index.clear_local();
        tracing::debug!("Request state cleared");
    }

    pub(crate) fn notify(&self, event: AccessEvent) {
        if self.config.events_enabled {
            self.notifier.notify(event.with_tenant(self.scope_tenant()));
        }
    }

    /// Roles of a subject in the current tenant, cached on the subject.
    pub(crate) async fn roles_of(&self, subject: &Subject) -> RbacResult<Arc<Vec<RoleRecord>>> {
        let tenant = self.scope_tenant();
        if let Some(cached) = subject.cached_roles(tenant) {
            return Ok(cached);
        }
        let Some(subject_ref) = subject.subject_ref() else {
            return Ok(Arc::new(Vec::new()));
        };
        let roles = self.repository.subject_roles(&subject_ref, tenant).await?;
        Ok(subject.store_roles(tenant, roles))
    }

    /// Direct permissions of a subject in the current tenant, cached on the subject.
    pub(crate) async fn direct_permissions_of(
        &self,
        subject: &Subject,
    ) -> RbacResult<Arc<Vec<PermissionRecord>>> {
        let tenant = self.scope_tenant();
        if let Some(cached) = subject.cached_permissions(tenant) {
            return Ok(cached);
        }
        let Some(subject_ref) = subject.subject_ref() else {
            return Ok(Arc::new(Vec::new()));
        };
        let permissions = self
            .repository
            .subject_permissions(&subject_ref, tenant)
            .await?;
        Ok(subject.store_permissions(tenant, permissions))
    }

    /// Permission by name and guard from the snapshot.
    pub(crate) async fn permission_named(
        &self,
        name: &str,
        guard: &str,
    ) -> RbacResult<Option<PermissionRecord>> {
        let filter = PermissionFilter::new().with_name(name).with_guard(guard);
        let matches = self.index.query(&filter, false).await?;
        Ok(pick_visible(matches.iter().map(|p| &p.record), self.scope_tenant()).cloned())
    }

    /// Permission by id and guard from the snapshot.
    pub(crate) async fn permission_with_id(
        &self,
        id: PermissionId,
        guard: &str,
    ) -> RbacResult<Option<PermissionRecord>> {
        let filter = PermissionFilter::new().with_id(id).with_guard(guard);
        let matches = self.index.query(&filter, true).await?;
        let tenant = self.scope_tenant();
        Ok(matches
            .into_iter()
            .map(|p| p.record.clone())
            .find(|record| record.visible_in(tenant)))
    }

    /// Resolve a single permission leaf to its record.
    pub(crate) async fn resolve_permission(
        &self,
        leaf: PermissionTarget,
        guard: &str,
    ) -> RbacResult<PermissionRecord> {
        match leaf {
            Target::Record(record) => {
                let filter = PermissionFilter::new().with_id(record.id);
                let tenant = self.scope_tenant();
                self.index
                    .query(&filter, true)
                    .await?
                    .into_iter()
                    .map(|p| p.record.clone())
                    .find(|stored| stored.visible_in(tenant))
                    .ok_or(RbacError::PermissionNotFound {
                        name: record.name,
                        guard: guard.to_string(),
                    })
            }
            Target::Name(name) => match self.permission_named(&name, guard).await? {
                Some(record) => Ok(record),
                None => Err(RbacError::PermissionNotFound {
                    name,
                    guard: guard.to_string(),
                }),
            },
            Target::Id(id) => self
                .permission_with_id(PermissionId(id), guard)
                .await?
                .ok_or_else(|| RbacError::PermissionIdNotFound {
                    id,
                    guard: guard.to_string(),
                }),
            Target::AnyOf(_) => Err(RbacError::InvalidWildcardInput(
                "nested permission list".to_string(),
            )),
        }
    }

    /// Resolve a single role leaf to its record.
    pub(crate) async fn resolve_role(&self, leaf: RoleTarget, guard: &str) -> RbacResult<RoleRecord> {
        let tenant = self.scope_tenant();
        match leaf {
            // Re-read so a record from another tenant, or one deleted since, is rejected
            Target::Record(record) => self
                .repository
                .find_role_by_id(record.id)
                .await?
                .filter(|stored| stored.visible_in(tenant))
                .ok_or(RbacError::RoleNotFound {
                    name: record.name,
                    guard: guard.to_string(),
                }),
            Target::Name(name) => match self.repository.find_role(&name, guard, tenant).await? {
                Some(record) => Ok(record),
                None => Err(RbacError::RoleNotFound {
                    name,
                    guard: guard.to_string(),
                }),
            },
            Target::Id(id) => self
                .repository
                .find_role_by_id(RoleId(id))
                .await?
                .filter(|role| role.guard_name == guard && role.visible_in(tenant))
                .ok_or_else(|| RbacError::RoleIdNotFound {
                    id,
                    guard: guard.to_string(),
                }),
            Target::AnyOf(_) => Err(RbacError::RoleNotFound {
                name: "nested role list".to_string(),
                guard: guard.to_string(),
            }),
        }
    }

    /// Resolve every leaf of a permission target, deduplicated by id.
    pub(crate) async fn collect_permissions(
        &self,
        target: PermissionTarget,
        guard: &str,
    ) -> RbacResult<Vec<PermissionRecord>> {
        let mut collected: Vec<PermissionRecord> = Vec::new();
        for leaf in target.into_leaves() {
            let record = self.resolve_permission(leaf, guard).await?;
            if !collected.iter().any(|p| p.id == record.id) {
                collected.push(record);
            }
        }
        Ok(collected)
    }

    /// Resolve every leaf of a role target, deduplicated by id.
    pub(crate) async fn collect_roles(&self, target: RoleTarget, guard: &str) -> RbacResult<Vec<RoleRecord>> {
        let mut collected: Vec<RoleRecord> = Vec::new();
        for leaf in target.into_leaves() {
            let record = self.resolve_role(leaf, guard).await?;
            if !collected.iter().any(|r| r.id == record.id) {
                collected.push(record);
            }
        }
        Ok(collected)
    }
}
