//! Permission and role records, and the permissions granted to roles.

use rolegate_events::{AccessEvent, Holder};
use rolegate_rbac::{
    AccessRecord, AssignmentKind, NewRecord, PermissionId, PermissionRecord, PermissionTarget,
    RbacError, RbacResult, RecordAttributes, RoleId, RoleRecord, Target,
};
use tracing::info;

use super::AccessResolver;
use crate::index::PermissionFilter;
use crate::store::{CacheStore, Repository};

impl<R: Repository, C: CacheStore> AccessResolver<R, C> {
    fn new_record(&self, attributes: RecordAttributes) -> NewRecord {
        let tenant_id = match attributes.tenant_id {
            Some(tenant) => Some(tenant),
            None => self.scope_tenant(),
        };
        NewRecord {
            name: attributes.name,
            guard_name: attributes
                .guard_name
                .unwrap_or_else(|| self.config.default_guard.clone()),
            tenant_id,
        }
    }

    /// Find a permission by name.
    ///
    /// `guard` defaults to the deployment default guard.
    ///
    /// # Errors
    ///
    /// Returns `PermissionNotFound` if no visible permission matches.
    pub async fn find_permission_by_name(
        &self,
        name: &str,
        guard: Option<&str>,
    ) -> RbacResult<PermissionRecord> {
        let guard = guard.unwrap_or(&self.config.default_guard);
        self.resolve_permission(Target::Name(name.to_string()), guard)
            .await
    }

    /// Find a permission by id.
    ///
    /// # Errors
    ///
    /// Returns `PermissionIdNotFound` if no visible permission matches.
    pub async fn find_permission_by_id(
        &self,
        id: PermissionId,
        guard: Option<&str>,
    ) -> RbacResult<PermissionRecord> {
        let guard = guard.unwrap_or(&self.config.default_guard);
        self.resolve_permission(Target::Id(id.0), guard).await
    }

    /// Find a permission by name, creating it if absent.
    pub async fn find_or_create_permission(
        &self,
        name: &str,
        guard: Option<&str>,
    ) -> RbacResult<PermissionRecord> {
        match self.find_permission_by_name(name, guard).await {
            Ok(record) => Ok(record),
            Err(e) if e.is_not_found() => {
                let mut attributes = RecordAttributes::new(name);
                attributes.guard_name = guard.map(String::from);
                self.create_permission(attributes).await
            }
            Err(e) => Err(e),
        }
    }

    /// Create a permission.
    ///
    /// The guard defaults to the deployment default and, with tenancy
    /// enabled, the record is stamped with the active tenant.
    ///
    /// # Errors
    ///
    /// Returns `PermissionAlreadyExists` for a duplicate name, guard and tenant.
    pub async fn create_permission(&self, attributes: RecordAttributes) -> RbacResult<PermissionRecord> {
        let record = self.new_record(attributes);

        let filter = PermissionFilter::new()
            .with_name(record.name.clone())
            .with_guard(record.guard_name.clone())
            .with_tenant(record.tenant_id);
        if !self.index.query(&filter, true).await?.is_empty() {
            return Err(RbacError::PermissionAlreadyExists {
                name: record.name,
                guard: record.guard_name,
            });
        }

        let created = self.repository.create_permission(record).await?;
        self.index.forget().await?;
        info!(
            permission = %created.name,
            guard = %created.guard_name,
            tenant = ?created.tenant_id,
            "Permission created"
        );
        Ok(created)
    }

    /// Delete a permission with every grant and assignment of it.
    pub async fn delete_permission(&self, id: PermissionId) -> RbacResult<bool> {
        let deleted = self.repository.delete_permission(id).await?;
        if deleted {
            self.index.forget().await?;
            info!(permission_id = %id, "Permission deleted");
        }
        Ok(deleted)
    }

    /// Find a role by name.
    ///
    /// # Errors
    ///
    /// Returns `RoleNotFound` if no visible role matches.
    pub async fn find_role_by_name(&self, name: &str, guard: Option<&str>) -> RbacResult<RoleRecord> {
        let guard = guard.unwrap_or(&self.config.default_guard);
        self.resolve_role(Target::Name(name.to_string()), guard).await
    }

    /// Find a role by id.
    ///
    /// # Errors
    ///
    /// Returns `RoleIdNotFound` if no visible role matches.
    pub async fn find_role_by_id(&self, id: RoleId, guard: Option<&str>) -> RbacResult<RoleRecord> {
        let guard = guard.unwrap_or(&self.config.default_guard);
        self.resolve_role(Target::Id(id.0), guard).await
    }

    /// Find a role by name, creating it if absent.
    pub async fn find_or_create_role(&self, name: &str, guard: Option<&str>) -> RbacResult<RoleRecord> {
        match self.find_role_by_name(name, guard).await {
            Ok(record) => Ok(record),
            Err(e) if e.is_not_found() => {
                let mut attributes = RecordAttributes::new(name);
                attributes.guard_name = guard.map(String::from);
                self.create_role(attributes).await
            }
            Err(e) => Err(e),
        }
    }

    /// Create a role.
    ///
    /// # Errors
    ///
    /// Returns `RoleAlreadyExists` for a duplicate name, guard and tenant.
    pub async fn create_role(&self, attributes: RecordAttributes) -> RbacResult<RoleRecord> {
        let record = self.new_record(attributes);

        let existing = self
            .repository
            .find_role(&record.name, &record.guard_name, record.tenant_id)
            .await?;
        if existing.is_some_and(|role| role.tenant_id == record.tenant_id) {
            return Err(RbacError::RoleAlreadyExists {
                name: record.name,
                guard: record.guard_name,
            });
        }

        let created = self.repository.create_role(record).await?;
        self.index.forget().await?;
        info!(
            role = %created.name,
            guard = %created.guard_name,
            tenant = ?created.tenant_id,
            "Role created"
        );
        Ok(created)
    }

    /// Delete a role with every grant and assignment of it.
    pub async fn delete_role(&self, id: RoleId) -> RbacResult<bool> {
        let deleted = self.repository.delete_role(id).await?;
        if deleted {
            self.index.forget().await?;
            info!(role_id = %id, "Role deleted");
        }
        Ok(deleted)
    }

    /// Permissions granted to a role, as seen from the active tenant.
    pub async fn role_permissions(&self, role: &RoleRecord) -> RbacResult<Vec<PermissionRecord>> {
        self.repository
            .role_permissions(role.id, self.scope_tenant())
            .await
    }

    /// Resolve permissions for a role, rejecting those of another guard.
    async fn collect_role_grants(
        &self,
        role: &RoleRecord,
        permissions: PermissionTarget,
    ) -> RbacResult<Vec<PermissionRecord>> {
        let collected = self.collect_permissions(permissions, &role.guard_name).await?;
        if let Some(foreign) = collected.iter().find(|p| p.guard_name != role.guard_name) {
            return Err(RbacError::GuardMismatch {
                given: foreign.guard_name.clone(),
                expected: vec![role.guard_name.clone()],
            });
        }
        Ok(collected)
    }

    /// Grant permissions to a role. Already granted permissions are skipped.
    ///
    /// # Errors
    ///
    /// Returns `GuardMismatch` if a permission belongs to another guard; no
    /// grant is written in that case.
    pub async fn give_permission_to_role(
        &self,
        role: &RoleRecord,
        permissions: impl Into<PermissionTarget>,
    ) -> RbacResult<()> {
        let collected = self.collect_role_grants(role, permissions.into()).await?;
        let held = self.role_permissions(role).await?;
        let new: Vec<PermissionId> = collected
            .iter()
            .map(|p| p.id)
            .filter(|id| !held.iter().any(|h| h.id == *id))
            .collect();

        if !new.is_empty() {
            self.repository
                .grant_to_role(role.id, &new, self.scope_tenant())
                .await?;
        }
        self.index.forget().await?;

        info!(role = %role.name, granted = new.len(), "Permissions granted to role");
        self.notify(AccessEvent::attached(
            AssignmentKind::Permission,
            Holder::role(role.id),
            collected.iter().map(|p| p.key()).collect(),
        ));
        Ok(())
    }

    /// Revoke permissions from a role.
    pub async fn revoke_permission_from_role(
        &self,
        role: &RoleRecord,
        permissions: impl Into<PermissionTarget>,
    ) -> RbacResult<()> {
        let collected = self.collect_role_grants(role, permissions.into()).await?;
        let ids: Vec<PermissionId> = collected.iter().map(|p| p.id).collect();
        let revoked = self
            .repository
            .revoke_from_role(role.id, Some(&ids), self.scope_tenant())
            .await?;
        self.index.forget().await?;

        info!(role = %role.name, revoked = revoked.len(), "Permissions revoked from role");
        self.notify(AccessEvent::detached(
            AssignmentKind::Permission,
            Holder::role(role.id),
            ids.iter().map(|id| id.0).collect(),
        ));
        Ok(())
    }

    /// Replace every permission of a role.
    pub async fn sync_role_permissions(
        &self,
        role: &RoleRecord,
        permissions: impl Into<PermissionTarget>,
    ) -> RbacResult<()> {
        let collected = self.collect_role_grants(role, permissions.into()).await?;
        let tenant = self.scope_tenant();

        let revoked = self.repository.revoke_from_role(role.id, None, tenant).await?;
        let ids: Vec<PermissionId> = collected.iter().map(|p| p.id).collect();
        if !ids.is_empty() {
            self.repository.grant_to_role(role.id, &ids, tenant).await?;
        }
        self.index.forget().await?;

        info!(
            role = %role.name,
            revoked = revoked.len(),
            granted = ids.len(),
            "Role permissions synced"
        );
        if !revoked.is_empty() {
            self.notify(AccessEvent::detached(
                AssignmentKind::Permission,
                Holder::role(role.id),
                revoked.iter().map(|id| id.0).collect(),
            ));
        }
        self.notify(AccessEvent::attached(
            AssignmentKind::Permission,
            Holder::role(role.id),
            ids.iter().map(|id| id.0).collect(),
        ));
        Ok(())
    }

    /// Check if a role carries a permission.
    ///
    /// In wildcard mode a held pattern such as `posts.*` satisfies
    /// `posts.edit`.
    ///
    /// # Errors
    ///
    /// Returns a lookup error if the permission does not exist, or
    /// `GuardMismatch` if it belongs to another guard.
    pub async fn role_has_permission(
        &self,
        role: &RoleRecord,
        permission: impl Into<PermissionTarget>,
    ) -> RbacResult<bool> {
        let held = self.role_permissions(role).await?;
        let guard = role.guard_name.as_str();

        for leaf in permission.into().into_leaves() {
            if self.config.wildcard_permissions {
                let (name, guard) = self.wildcard_request(leaf, guard).await?;
                let same_guard = held.iter().filter(|p| p.guard_name == guard);
                if self.held_implies(same_guard, &name)? {
                    return Ok(true);
                }
                continue;
            }

            let record = self.resolve_permission(leaf, guard).await?;
            if record.guard_name != role.guard_name {
                return Err(RbacError::GuardMismatch {
                    given: record.guard_name,
                    expected: vec![role.guard_name.clone()],
                });
            }
            if held.iter().any(|p| p.id == record.id) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
