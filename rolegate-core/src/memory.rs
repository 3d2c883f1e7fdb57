//! In-memory collaborators
//!
//! Reference [`Repository`] and [`CacheStore`] implementations for tests and
//! single-process embedders.

use async_trait::async_trait;
use parking_lot::Mutex;
use rolegate_rbac::records::pick_visible;
use rolegate_rbac::{
    AccessRecord, AssignmentKind, NewRecord, PermissionId, PermissionRecord, RbacError,
    RbacResult, RoleId, RoleRecord, SubjectRef, TenantId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::store::{CacheStore, GrantedRole, PermissionGrants, Repository};

#[derive(Debug, Clone, PartialEq, Eq)]
struct GrantRow {
    permission: PermissionId,
    role: RoleId,
    tenant: Option<TenantId>,
}

impl GrantRow {
    fn applies_in(&self, tenant: Option<TenantId>) -> bool {
        self.tenant.is_none() || self.tenant == tenant
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AssignmentRow {
    subject: SubjectRef,
    kind: AssignmentKind,
    key: u64,
    tenant: Option<TenantId>,
}

#[derive(Debug, Default)]
struct State {
    last_permission_id: u64,
    last_role_id: u64,
    permissions: BTreeMap<PermissionId, PermissionRecord>,
    roles: BTreeMap<RoleId, RoleRecord>,
    grants: Vec<GrantRow>,
    assignments: Vec<AssignmentRow>,
}

/// Repository holding everything in process memory.
///
/// # Example
///
/// ```
/// use rolegate_core::{MemoryRepository, Repository};
/// use rolegate_rbac::NewRecord;
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let repo = MemoryRepository::new();
/// let perm = repo
///     .create_permission(NewRecord {
///         name: "posts.view".into(),
///         guard_name: "web".into(),
///         tenant_id: None,
///     })
///     .await
///     .unwrap();
/// assert_eq!(perm.id.0, 1);
/// # });
/// ```
#[derive(Debug, Default)]
pub struct MemoryRepository {
    state: Mutex<State>,
    fetches: AtomicUsize,
    fail_fetches: AtomicBool,
    fetch_delay: Mutex<Option<Duration>>,
}

impl MemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of full snapshot fetches served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Make snapshot fetches fail with a storage error.
    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    /// Delay every snapshot fetch, simulating a slow store.
    pub fn with_fetch_delay(self, delay: Duration) -> Self {
        *self.fetch_delay.lock() = Some(delay);
        self
    }

    fn holders(&self, kind: AssignmentKind, keys: &[u64], tenant: Option<TenantId>) -> Vec<SubjectRef> {
        let state = self.state.lock();
        let mut holders: Vec<SubjectRef> = Vec::new();
        for row in state
            .assignments
            .iter()
            .filter(|a| a.kind == kind && a.tenant == tenant && keys.contains(&a.key))
        {
            if !holders.contains(&row.subject) {
                holders.push(row.subject.clone());
            }
        }
        holders
    }

    /// Number of assignment rows held by a subject, all tenants included.
    pub fn assignment_count(&self, subject: &SubjectRef, kind: AssignmentKind) -> usize {
        self.state
            .lock()
            .assignments
            .iter()
            .filter(|row| row.subject == *subject && row.kind == kind)
            .count()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn fetch_all_permissions_with_roles(&self) -> RbacResult<Vec<PermissionGrants>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let delay = *self.fetch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_fetches.load(Ordering::SeqCst) {
            return Err(RbacError::Storage("permission store unavailable".to_string()));
        }

        let state = self.state.lock();
        let grants = state
            .permissions
            .values()
            .map(|permission| PermissionGrants {
                permission: permission.clone(),
                roles: state
                    .grants
                    .iter()
                    .filter(|grant| grant.permission == permission.id)
                    .filter_map(|grant| {
                        state.roles.get(&grant.role).map(|role| GrantedRole {
                            role: role.clone(),
                            tenant_id: grant.tenant,
                        })
                    })
                    .collect(),
            })
            .collect();
        Ok(grants)
    }

    async fn list_permissions(
        &self,
        guard: Option<&str>,
        tenant: Option<TenantId>,
    ) -> RbacResult<Vec<PermissionRecord>> {
        let state = self.state.lock();
        Ok(state
            .permissions
            .values()
            .filter(|p| guard.map_or(true, |g| p.guard_name == g))
            .filter(|p| p.visible_in(tenant))
            .cloned()
            .collect())
    }

    async fn find_permission(
        &self,
        name: &str,
        guard: &str,
        tenant: Option<TenantId>,
    ) -> RbacResult<Option<PermissionRecord>> {
        let state = self.state.lock();
        let candidates = state
            .permissions
            .values()
            .filter(|p| p.name == name && p.guard_name == guard);
        Ok(pick_visible(candidates, tenant).cloned())
    }

    async fn find_permission_by_id(&self, id: PermissionId) -> RbacResult<Option<PermissionRecord>> {
        Ok(self.state.lock().permissions.get(&id).cloned())
    }

    async fn find_role(
        &self,
        name: &str,
        guard: &str,
        tenant: Option<TenantId>,
    ) -> RbacResult<Option<RoleRecord>> {
        let state = self.state.lock();
        let candidates = state
            .roles
            .values()
            .filter(|r| r.name == name && r.guard_name == guard);
        Ok(pick_visible(candidates, tenant).cloned())
    }

    async fn find_role_by_id(&self, id: RoleId) -> RbacResult<Option<RoleRecord>> {
        Ok(self.state.lock().roles.get(&id).cloned())
    }

    async fn create_permission(&self, record: NewRecord) -> RbacResult<PermissionRecord> {
        let mut state = self.state.lock();
        let duplicate = state.permissions.values().any(|p| {
            p.name == record.name
                && p.guard_name == record.guard_name
                && p.tenant_id == record.tenant_id
        });
        if duplicate {
            return Err(RbacError::PermissionAlreadyExists {
                name: record.name,
                guard: record.guard_name,
            });
        }

        state.last_permission_id += 1;
        let permission = PermissionRecord {
            id: PermissionId(state.last_permission_id),
            name: record.name,
            guard_name: record.guard_name,
            tenant_id: record.tenant_id,
        };
        state.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    async fn create_role(&self, record: NewRecord) -> RbacResult<RoleRecord> {
        let mut state = self.state.lock();
        let duplicate = state.roles.values().any(|r| {
            r.name == record.name
                && r.guard_name == record.guard_name
                && r.tenant_id == record.tenant_id
        });
        if duplicate {
            return Err(RbacError::RoleAlreadyExists {
                name: record.name,
                guard: record.guard_name,
            });
        }

        state.last_role_id += 1;
        let role = RoleRecord {
            id: RoleId(state.last_role_id),
            name: record.name,
            guard_name: record.guard_name,
            tenant_id: record.tenant_id,
        };
        state.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn delete_permission(&self, id: PermissionId) -> RbacResult<bool> {
        let mut state = self.state.lock();
        if state.permissions.remove(&id).is_none() {
            return Ok(false);
        }
        state.grants.retain(|g| g.permission != id);
        state
            .assignments
            .retain(|a| !(a.kind == AssignmentKind::Permission && a.key == id.0));
        Ok(true)
    }

    async fn delete_role(&self, id: RoleId) -> RbacResult<bool> {
        let mut state = self.state.lock();
        if state.roles.remove(&id).is_none() {
            return Ok(false);
        }
        state.grants.retain(|g| g.role != id);
        state
            .assignments
            .retain(|a| !(a.kind == AssignmentKind::Role && a.key == id.0));
        Ok(true)
    }

    async fn subject_roles(
        &self,
        subject: &SubjectRef,
        tenant: Option<TenantId>,
    ) -> RbacResult<Vec<RoleRecord>> {
        let state = self.state.lock();
        Ok(state
            .assignments
            .iter()
            .filter(|a| a.subject == *subject && a.kind == AssignmentKind::Role && a.tenant == tenant)
            .filter_map(|a| state.roles.get(&RoleId(a.key)).cloned())
            .collect())
    }

    async fn subject_permissions(
        &self,
        subject: &SubjectRef,
        tenant: Option<TenantId>,
    ) -> RbacResult<Vec<PermissionRecord>> {
        let state = self.state.lock();
        Ok(state
            .assignments
            .iter()
            .filter(|a| {
                a.subject == *subject && a.kind == AssignmentKind::Permission && a.tenant == tenant
            })
            .filter_map(|a| state.permissions.get(&PermissionId(a.key)).cloned())
            .collect())
    }

    async fn attach(
        &self,
        subject: &SubjectRef,
        kind: AssignmentKind,
        keys: &[u64],
        tenant: Option<TenantId>,
    ) -> RbacResult<()> {
        let mut state = self.state.lock();
        for &key in keys {
            let row = AssignmentRow {
                subject: subject.clone(),
                kind,
                key,
                tenant,
            };
            if !state.assignments.contains(&row) {
                state.assignments.push(row);
            }
        }
        Ok(())
    }

    async fn detach(
        &self,
        subject: &SubjectRef,
        kind: AssignmentKind,
        keys: Option<&[u64]>,
        tenant: Option<TenantId>,
    ) -> RbacResult<Vec<u64>> {
        let mut state = self.state.lock();
        let mut detached = Vec::new();
        state.assignments.retain(|a| {
            let selected = a.subject == *subject
                && a.kind == kind
                && a.tenant == tenant
                && keys.map_or(true, |keys| keys.contains(&a.key));
            if selected {
                detached.push(a.key);
            }
            !selected
        });
        Ok(detached)
    }

    async fn subjects_with_roles(
        &self,
        roles: &[RoleId],
        tenant: Option<TenantId>,
    ) -> RbacResult<Vec<SubjectRef>> {
        let keys: Vec<u64> = roles.iter().map(|id| id.0).collect();
        Ok(self.holders(AssignmentKind::Role, &keys, tenant))
    }

    async fn subjects_with_permissions(
        &self,
        permissions: &[PermissionId],
        tenant: Option<TenantId>,
    ) -> RbacResult<Vec<SubjectRef>> {
        let keys: Vec<u64> = permissions.iter().map(|id| id.0).collect();
        Ok(self.holders(AssignmentKind::Permission, &keys, tenant))
    }

    async fn detach_subject(&self, subject: &SubjectRef) -> RbacResult<usize> {
        let mut state = self.state.lock();
        let before = state.assignments.len();
        state.assignments.retain(|a| a.subject != *subject);
        Ok(before - state.assignments.len())
    }

    async fn role_permissions(
        &self,
        role: RoleId,
        tenant: Option<TenantId>,
    ) -> RbacResult<Vec<PermissionRecord>> {
        let state = self.state.lock();
        let mut seen = Vec::new();
        for grant in state
            .grants
            .iter()
            .filter(|g| g.role == role && g.applies_in(tenant))
        {
            if let Some(permission) = state.permissions.get(&grant.permission) {
                if !seen.iter().any(|p: &PermissionRecord| p.id == permission.id) {
                    seen.push(permission.clone());
                }
            }
        }
        Ok(seen)
    }

    async fn grant_to_role(
        &self,
        role: RoleId,
        permissions: &[PermissionId],
        tenant: Option<TenantId>,
    ) -> RbacResult<()> {
        let mut state = self.state.lock();
        for &permission in permissions {
            let row = GrantRow {
                permission,
                role,
                tenant,
            };
            if !state.grants.contains(&row) {
                state.grants.push(row);
            }
        }
        Ok(())
    }

    async fn revoke_from_role(
        &self,
        role: RoleId,
        permissions: Option<&[PermissionId]>,
        tenant: Option<TenantId>,
    ) -> RbacResult<Vec<PermissionId>> {
        let mut state = self.state.lock();
        let mut revoked = Vec::new();
        state.grants.retain(|g| {
            let selected = g.role == role
                && g.tenant == tenant
                && permissions.map_or(true, |ids| ids.contains(&g.permission));
            if selected {
                revoked.push(g.permission);
            }
            !selected
        });
        Ok(revoked)
    }
}

/// Key/value cache with per-entry expiry.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCacheStore {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if an unexpired entry exists.
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .get(key)
            .map_or(false, |(_, expires_at)| *expires_at > Instant::now())
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> RbacResult<Option<String>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> RbacResult<()> {
        self.entries
            .lock()
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn forget(&self, key: &str) -> RbacResult<bool> {
        Ok(self.entries.lock().remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_record(name: &str, tenant: Option<TenantId>) -> NewRecord {
        NewRecord {
            name: name.to_string(),
            guard_name: "web".to_string(),
            tenant_id: tenant,
        }
    }

    #[tokio::test]
    async fn test_duplicate_create_is_rejected() {
        let repo = MemoryRepository::new();
        repo.create_role(new_record("Admin", None)).await.unwrap();

        let err = repo.create_role(new_record("Admin", None)).await.unwrap_err();
        assert!(matches!(err, RbacError::RoleAlreadyExists { .. }));

        // Same name in a tenant is a different record
        assert!(repo
            .create_role(new_record("Admin", Some(TenantId(1))))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_find_prefers_tenant_record() {
        let repo = MemoryRepository::new();
        let global = repo.create_role(new_record("Admin", None)).await.unwrap();
        let t1 = repo
            .create_role(new_record("Admin", Some(TenantId(1))))
            .await
            .unwrap();
        repo.create_role(new_record("Admin", Some(TenantId(2))))
            .await
            .unwrap();

        let found = repo.find_role("Admin", "web", Some(TenantId(1))).await.unwrap();
        assert_eq!(found, Some(t1));

        let found = repo.find_role("Admin", "web", Some(TenantId(3))).await.unwrap();
        assert_eq!(found, Some(global.clone()));

        let found = repo.find_role("Admin", "web", None).await.unwrap();
        assert_eq!(found, Some(global));
    }

    #[tokio::test]
    async fn test_assignments_scoped_by_exact_tenant() {
        let repo = MemoryRepository::new();
        let role = repo.create_role(new_record("Admin", None)).await.unwrap();
        let user = SubjectRef::new("user", 1);

        repo.attach(&user, AssignmentKind::Role, &[role.id.0, role.id.0], Some(TenantId(1)))
            .await
            .unwrap();
        assert_eq!(repo.assignment_count(&user, AssignmentKind::Role), 1);

        assert_eq!(repo.subject_roles(&user, Some(TenantId(1))).await.unwrap().len(), 1);
        assert!(repo.subject_roles(&user, Some(TenantId(2))).await.unwrap().is_empty());
        assert!(repo.subject_roles(&user, None).await.unwrap().is_empty());

        let detached = repo
            .detach(&user, AssignmentKind::Role, None, Some(TenantId(1)))
            .await
            .unwrap();
        assert_eq!(detached, vec![role.id.0]);
        assert_eq!(repo.assignment_count(&user, AssignmentKind::Role), 0);
    }

    #[tokio::test]
    async fn test_holders_and_subject_detach() {
        let repo = MemoryRepository::new();
        let role = repo.create_role(new_record("Editor", None)).await.unwrap();
        let perm = repo.create_permission(new_record("posts.view", None)).await.unwrap();
        let alice = SubjectRef::new("user", 1);
        let bob = SubjectRef::new("user", 2);

        repo.attach(&alice, AssignmentKind::Role, &[role.id.0], Some(TenantId(1)))
            .await
            .unwrap();
        repo.attach(&alice, AssignmentKind::Role, &[role.id.0], Some(TenantId(2)))
            .await
            .unwrap();
        repo.attach(&bob, AssignmentKind::Permission, &[perm.id.0], Some(TenantId(1)))
            .await
            .unwrap();

        let holders = repo.subjects_with_roles(&[role.id], Some(TenantId(1))).await.unwrap();
        assert_eq!(holders, vec![alice.clone()]);
        assert!(repo.subjects_with_roles(&[role.id], None).await.unwrap().is_empty());
        let holders = repo
            .subjects_with_permissions(&[perm.id], Some(TenantId(1)))
            .await
            .unwrap();
        assert_eq!(holders, vec![bob.clone()]);

        assert_eq!(repo.detach_subject(&alice).await.unwrap(), 2);
        assert_eq!(repo.assignment_count(&alice, AssignmentKind::Role), 0);
        assert_eq!(repo.assignment_count(&bob, AssignmentKind::Permission), 1);
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let repo = MemoryRepository::new();
        let perm = repo.create_permission(new_record("posts.view", None)).await.unwrap();
        let role = repo.create_role(new_record("Editor", None)).await.unwrap();
        let user = SubjectRef::new("user", 1);

        repo.grant_to_role(role.id, &[perm.id], None).await.unwrap();
        repo.attach(&user, AssignmentKind::Permission, &[perm.id.0], None)
            .await
            .unwrap();

        assert!(repo.delete_permission(perm.id).await.unwrap());
        assert!(!repo.delete_permission(perm.id).await.unwrap());
        assert!(repo.role_permissions(role.id, None).await.unwrap().is_empty());
        assert_eq!(repo.assignment_count(&user, AssignmentKind::Permission), 0);
    }

    #[tokio::test]
    async fn test_snapshot_fetch_carries_grants() {
        let repo = MemoryRepository::new();
        let perm = repo.create_permission(new_record("posts.view", None)).await.unwrap();
        let role = repo.create_role(new_record("Editor", None)).await.unwrap();
        repo.grant_to_role(role.id, &[perm.id], Some(TenantId(4)))
            .await
            .unwrap();

        let all = repo.fetch_all_permissions_with_roles().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].roles[0].role, role);
        assert_eq!(all[0].roles[0].tenant_id, Some(TenantId(4)));
        assert_eq!(repo.fetch_count(), 1);

        repo.fail_fetches(true);
        assert!(matches!(
            repo.fetch_all_permissions_with_roles().await,
            Err(RbacError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_cache_entries_expire() {
        let cache = MemoryCacheStore::new();
        cache
            .set("key", "value".into(), Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(cache.get("key").await.unwrap().as_deref(), Some("value"));
        assert!(cache.contains("key"));

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(cache.get("key").await.unwrap(), None);
        assert!(!cache.forget("key").await.unwrap());
    }
}
