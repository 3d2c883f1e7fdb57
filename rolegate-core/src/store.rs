//! Storage collaborators
//!
//! The resolver never talks to a database or cache server directly. It goes
//! through the two traits defined here, bound once at startup.

use async_trait::async_trait;
use rolegate_rbac::{
    AssignmentKind, NewRecord, PermissionId, PermissionRecord, RbacResult, RoleId, RoleRecord,
    SubjectRef, TenantId,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A role granting a permission, with the tenant of the grant row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GrantedRole {
    /// The granting role.
    pub role: RoleRecord,
    /// Tenant the grant row was written under.
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
}

/// A permission together with every role granting it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionGrants {
    /// The permission.
    pub permission: PermissionRecord,
    /// Roles granting it, across all tenants.
    #[serde(default)]
    pub roles: Vec<GrantedRole>,
}

/// Persistent store of permissions, roles, grants and assignments.
///
/// Assignment rows (subject ↔ role, subject ↔ permission) carry the tenant
/// they were written under and are matched on exact tenant equality. Grant
/// rows (role ↔ permission) written without a tenant apply in every tenant.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Every permission with its granting roles, across guards and tenants.
    async fn fetch_all_permissions_with_roles(&self) -> RbacResult<Vec<PermissionGrants>>;

    /// Permissions visible from `tenant`, optionally restricted to a guard.
    async fn list_permissions(
        &self,
        guard: Option<&str>,
        tenant: Option<TenantId>,
    ) -> RbacResult<Vec<PermissionRecord>>;

    /// Permission by name and guard, preferring the tenant's own record over a global one.
    async fn find_permission(
        &self,
        name: &str,
        guard: &str,
        tenant: Option<TenantId>,
    ) -> RbacResult<Option<PermissionRecord>>;

    /// Permission by primary key.
    async fn find_permission_by_id(&self, id: PermissionId) -> RbacResult<Option<PermissionRecord>>;

    /// Role by name and guard, preferring the tenant's own record over a global one.
    async fn find_role(
        &self,
        name: &str,
        guard: &str,
        tenant: Option<TenantId>,
    ) -> RbacResult<Option<RoleRecord>>;

    /// Role by primary key.
    async fn find_role_by_id(&self, id: RoleId) -> RbacResult<Option<RoleRecord>>;

    /// Insert a permission.
    ///
    /// Fails with `PermissionAlreadyExists` on a duplicate name, guard and tenant.
    async fn create_permission(&self, record: NewRecord) -> RbacResult<PermissionRecord>;

    /// Insert a role.
    ///
    /// Fails with `RoleAlreadyExists` on a duplicate name, guard and tenant.
    async fn create_role(&self, record: NewRecord) -> RbacResult<RoleRecord>;

    /// Delete a permission and every grant and assignment row pointing at it.
    async fn delete_permission(&self, id: PermissionId) -> RbacResult<bool>;

    /// Delete a role and every grant and assignment row pointing at it.
    async fn delete_role(&self, id: RoleId) -> RbacResult<bool>;

    /// Roles assigned to a subject within `tenant`.
    async fn subject_roles(
        &self,
        subject: &SubjectRef,
        tenant: Option<TenantId>,
    ) -> RbacResult<Vec<RoleRecord>>;

    /// Permissions assigned directly to a subject within `tenant`.
    async fn subject_permissions(
        &self,
        subject: &SubjectRef,
        tenant: Option<TenantId>,
    ) -> RbacResult<Vec<PermissionRecord>>;

    /// Add assignment rows. Rows that already exist are left alone.
    async fn attach(
        &self,
        subject: &SubjectRef,
        kind: AssignmentKind,
        keys: &[u64],
        tenant: Option<TenantId>,
    ) -> RbacResult<()>;

    /// Remove assignment rows; `None` removes every row of `kind`.
    ///
    /// # Returns
    ///
    /// The keys that were actually detached
    async fn detach(
        &self,
        subject: &SubjectRef,
        kind: AssignmentKind,
        keys: Option<&[u64]>,
        tenant: Option<TenantId>,
    ) -> RbacResult<Vec<u64>>;

    /// Subjects holding any of `roles` within `tenant`, each listed once.
    async fn subjects_with_roles(
        &self,
        roles: &[RoleId],
        tenant: Option<TenantId>,
    ) -> RbacResult<Vec<SubjectRef>>;

    /// Subjects holding any of `permissions` directly within `tenant`, each
    /// listed once. Holders through a role are not included.
    async fn subjects_with_permissions(
        &self,
        permissions: &[PermissionId],
        tenant: Option<TenantId>,
    ) -> RbacResult<Vec<SubjectRef>>;

    /// Remove every assignment row of a subject, of both kinds and in every
    /// tenant. Returns the number of rows removed.
    async fn detach_subject(&self, subject: &SubjectRef) -> RbacResult<usize>;

    /// Permissions granted to a role, as seen from `tenant`.
    async fn role_permissions(
        &self,
        role: RoleId,
        tenant: Option<TenantId>,
    ) -> RbacResult<Vec<PermissionRecord>>;

    /// Add grant rows. Rows that already exist are left alone.
    async fn grant_to_role(
        &self,
        role: RoleId,
        permissions: &[PermissionId],
        tenant: Option<TenantId>,
    ) -> RbacResult<()>;

    /// Remove grant rows; `None` removes every grant of the role in `tenant`.
    async fn revoke_from_role(
        &self,
        role: RoleId,
        permissions: Option<&[PermissionId]>,
        tenant: Option<TenantId>,
    ) -> RbacResult<Vec<PermissionId>>;
}

/// Shared key/value cache holding the serialized permission snapshot.
///
/// Implementations are assumed atomic per call.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> RbacResult<Option<String>>;

    /// Write a value that expires after `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> RbacResult<()>;

    /// Delete a value, returning whether it existed.
    async fn forget(&self, key: &str) -> RbacResult<bool>;
}
