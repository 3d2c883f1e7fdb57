//! Permission-bearing subjects
//!
//! A [`Subject`] is the resolver's handle on a user (or any other holder).
//! It lazily caches its role and direct-permission associations and stages
//! assignments made before it has a persisted identity.

use parking_lot::Mutex;
use rolegate_rbac::{Guarded, PermissionId, PermissionRecord, RoleId, RoleRecord, SubjectRef, TenantId};
use std::sync::Arc;

#[derive(Debug)]
struct Loaded<T> {
    tenant: Option<TenantId>,
    records: Arc<Vec<T>>,
}

#[derive(Debug, Default)]
struct Staged {
    roles: Vec<RoleId>,
    permissions: Vec<PermissionId>,
}

/// A role and permission holder.
///
/// # Example
///
/// ```
/// use rolegate_core::Subject;
///
/// let user = Subject::new("user", 42).with_guard("api");
/// assert!(user.is_persisted());
/// assert_eq!(user.subject_ref().unwrap().to_string(), "user#42");
///
/// let draft = Subject::unsaved("user");
/// assert!(draft.subject_ref().is_none());
/// ```
#[derive(Debug)]
pub struct Subject {
    kind: String,
    id: Option<u64>,
    guard_name: Option<String>,
    roles: Mutex<Option<Loaded<RoleRecord>>>,
    permissions: Mutex<Option<Loaded<PermissionRecord>>>,
    staged: Mutex<Staged>,
}

impl Subject {
    /// A persisted subject.
    pub fn new(kind: impl Into<String>, id: u64) -> Self {
        Self::build(kind.into(), Some(id))
    }

    /// A subject that has no persisted identity yet.
    ///
    /// Assignments made to it are staged until
    /// [`AccessResolver::commit`](crate::AccessResolver::commit).
    pub fn unsaved(kind: impl Into<String>) -> Self {
        Self::build(kind.into(), None)
    }

    fn build(kind: String, id: Option<u64>) -> Self {
        Self {
            kind,
            id,
            guard_name: None,
            roles: Mutex::new(None),
            permissions: Mutex::new(None),
            staged: Mutex::new(Staged::default()),
        }
    }

    /// Pin the subject to a guard.
    pub fn with_guard(mut self, guard: impl Into<String>) -> Self {
        self.guard_name = Some(guard.into());
        self
    }

    /// Subject kind discriminator.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Persisted identity, if any.
    pub fn id(&self) -> Option<u64> {
        self.id
    }

    /// Check if the subject has a persisted identity.
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// Reference used for assignment rows.
    pub fn subject_ref(&self) -> Option<SubjectRef> {
        self.id.map(|id| SubjectRef::new(self.kind.clone(), id))
    }

    /// Drop the cached role and permission associations.
    pub fn forget_cached_associations(&self) {
        *self.roles.lock() = None;
        *self.permissions.lock() = None;
    }

    /// Role ids waiting for the subject to be committed.
    pub fn staged_roles(&self) -> Vec<RoleId> {
        self.staged.lock().roles.clone()
    }

    /// Permission ids waiting for the subject to be committed.
    pub fn staged_permissions(&self) -> Vec<PermissionId> {
        self.staged.lock().permissions.clone()
    }

    pub(crate) fn set_id(&mut self, id: u64) {
        self.id = Some(id);
        self.forget_cached_associations();
    }

    pub(crate) fn cached_roles(&self, tenant: Option<TenantId>) -> Option<Arc<Vec<RoleRecord>>> {
        self.roles
            .lock()
            .as_ref()
            .filter(|loaded| loaded.tenant == tenant)
            .map(|loaded| loaded.records.clone())
    }

    pub(crate) fn store_roles(&self, tenant: Option<TenantId>, records: Vec<RoleRecord>) -> Arc<Vec<RoleRecord>> {
        let records = Arc::new(records);
        *self.roles.lock() = Some(Loaded {
            tenant,
            records: records.clone(),
        });
        records
    }

    pub(crate) fn cached_permissions(
        &self,
        tenant: Option<TenantId>,
    ) -> Option<Arc<Vec<PermissionRecord>>> {
        self.permissions
            .lock()
            .as_ref()
            .filter(|loaded| loaded.tenant == tenant)
            .map(|loaded| loaded.records.clone())
    }

    pub(crate) fn store_permissions(
        &self,
        tenant: Option<TenantId>,
        records: Vec<PermissionRecord>,
    ) -> Arc<Vec<PermissionRecord>> {
        let records = Arc::new(records);
        *self.permissions.lock() = Some(Loaded {
            tenant,
            records: records.clone(),
        });
        records
    }

    pub(crate) fn stage_roles(&self, ids: &[RoleId]) {
        let mut staged = self.staged.lock();
        for id in ids {
            if !staged.roles.contains(id) {
                staged.roles.push(*id);
            }
        }
    }

    pub(crate) fn unstage_roles(&self, ids: Option<&[RoleId]>) {
        let mut staged = self.staged.lock();
        match ids {
            Some(ids) => staged.roles.retain(|id| !ids.contains(id)),
            None => staged.roles.clear(),
        }
    }

    pub(crate) fn stage_permissions(&self, ids: &[PermissionId]) {
        let mut staged = self.staged.lock();
        for id in ids {
            if !staged.permissions.contains(id) {
                staged.permissions.push(*id);
            }
        }
    }

    pub(crate) fn unstage_permissions(&self, ids: Option<&[PermissionId]>) {
        let mut staged = self.staged.lock();
        match ids {
            Some(ids) => staged.permissions.retain(|id| !ids.contains(id)),
            None => staged.permissions.clear(),
        }
    }

    pub(crate) fn take_staged(&self) -> (Vec<RoleId>, Vec<PermissionId>) {
        let mut staged = self.staged.lock();
        (
            std::mem::take(&mut staged.roles),
            std::mem::take(&mut staged.permissions),
        )
    }
}

impl Guarded for Subject {
    fn subject_kind(&self) -> &str {
        &self.kind
    }

    fn guard_attribute(&self) -> Option<&str> {
        self.guard_name.as_deref()
    }
}
