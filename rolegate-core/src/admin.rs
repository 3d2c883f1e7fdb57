//! # Admin commands
//!
//! Operator-facing commands: create records, provision a super user and
//! reset the permission cache. Each command is a thin wrapper over the
//! resolver; a CLI binds its arguments straight to these methods.

use rolegate_rbac::{PermissionRecord, RbacResult, RecordAttributes, RoleRecord, TenantId};
use serde::Serialize;
use tracing::info;

use crate::resolver::AccessResolver;
use crate::store::{CacheStore, Repository};
use crate::subject::Subject;

/// Role given to super users.
pub const SUPER_ADMIN_ROLE: &str = "Super Admin";

/// Standard permission catalogue seeded by [`AdminCommands::create_superuser`].
pub const DEFAULT_PERMISSIONS: &[&str] = &[
    "users.view",
    "users.create",
    "users.edit",
    "users.delete",
    "users.restore",
    "users.force-delete",
    "roles.view",
    "roles.create",
    "roles.edit",
    "roles.delete",
    "roles.assign",
    "permissions.view",
    "permissions.create",
    "permissions.edit",
    "permissions.delete",
    "permissions.assign",
    "posts.view",
    "posts.create",
    "posts.edit",
    "posts.delete",
    "posts.publish",
    "pages.view",
    "pages.create",
    "pages.edit",
    "pages.delete",
    "pages.publish",
    "categories.view",
    "categories.create",
    "categories.edit",
    "categories.delete",
    "media.view",
    "media.upload",
    "media.edit",
    "media.delete",
    "settings.view",
    "settings.edit",
    "settings.general",
    "settings.security",
    "settings.integrations",
    "system.view",
    "system.maintenance",
    "system.logs",
    "system.cache",
    "system.backup",
    "analytics.view",
    "reports.view",
    "reports.create",
    "reports.export",
    "api.access",
    "api.admin",
    "admin.*",
    "system.*",
];

/// Outcome of [`AdminCommands::create_superuser`].
#[derive(Debug, Clone, Serialize)]
pub struct SuperuserReport {
    /// The super admin role.
    pub role: RoleRecord,
    /// Catalogue permissions that did not exist before.
    pub permissions_created: usize,
    /// Permissions now granted to the role.
    pub permissions_granted: usize,
    /// Whether the role was newly assigned to the subject.
    pub role_assigned: bool,
}

/// Operator commands over a resolver.
///
/// # Example
///
/// ```
/// use rolegate_core::{AccessResolver, AdminCommands, MemoryCacheStore, MemoryRepository, RbacConfig, Subject};
///
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// let resolver = AccessResolver::new(MemoryRepository::new(), MemoryCacheStore::new(), RbacConfig::default());
/// let admin = AdminCommands::new(&resolver);
///
/// let report = admin.create_superuser(&Subject::new("user", 1)).await.unwrap();
/// assert!(report.role_assigned);
/// # });
/// ```
#[derive(Debug)]
pub struct AdminCommands<'a, R, C> {
    resolver: &'a AccessResolver<R, C>,
}

impl<'a, R: Repository, C: CacheStore> AdminCommands<'a, R, C> {
    /// Bind the commands to a resolver.
    pub fn new(resolver: &'a AccessResolver<R, C>) -> Self {
        Self { resolver }
    }

    fn attributes(name: &str, guard: Option<&str>, tenant: Option<TenantId>) -> RecordAttributes {
        RecordAttributes {
            name: name.to_string(),
            guard_name: guard.map(String::from),
            tenant_id: tenant,
        }
    }

    /// Create a permission.
    ///
    /// # Arguments
    ///
    /// * `name` - Permission name
    /// * `guard` - Guard, or the default guard
    /// * `tenant` - Owning tenant, or the active one when tenancy is enabled
    pub async fn create_permission(
        &self,
        name: &str,
        guard: Option<&str>,
        tenant: Option<TenantId>,
    ) -> RbacResult<PermissionRecord> {
        let permission = self
            .resolver
            .create_permission(Self::attributes(name, guard, tenant))
            .await?;
        info!(
            id = %permission.id,
            permission = %permission.name,
            guard = %permission.guard_name,
            "Permission created by admin command"
        );
        Ok(permission)
    }

    /// Create a role.
    pub async fn create_role(
        &self,
        name: &str,
        guard: Option<&str>,
        tenant: Option<TenantId>,
    ) -> RbacResult<RoleRecord> {
        let role = self
            .resolver
            .create_role(Self::attributes(name, guard, tenant))
            .await?;
        info!(
            id = %role.id,
            role = %role.name,
            guard = %role.guard_name,
            "Role created by admin command"
        );
        Ok(role)
    }

    /// Make `subject` a super user.
    ///
    /// Ensures the super admin role and the standard permission catalogue
    /// exist in the default guard, grants every permission of that guard to
    /// the role, and assigns the role unless the subject already holds it.
    /// Safe to run repeatedly.
    pub async fn create_superuser(&self, subject: &Subject) -> RbacResult<SuperuserReport> {
        let guard = self.resolver.config().default_guard.clone();
        let role = self
            .resolver
            .find_or_create_role(SUPER_ADMIN_ROLE, Some(&guard))
            .await?;

        let mut permissions_created = 0;
        for name in DEFAULT_PERMISSIONS {
            match self.resolver.find_permission_by_name(name, Some(&guard)).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {
                    self.resolver
                        .create_permission(RecordAttributes::new(*name).with_guard(guard.as_str()))
                        .await?;
                    permissions_created += 1;
                }
                Err(e) => return Err(e),
            }
        }

        let all = self
            .resolver
            .repository()
            .list_permissions(Some(&guard), self.resolver.scope_tenant())
            .await?;
        let permissions_granted = all.len();
        self.resolver.sync_role_permissions(&role, all).await?;

        let role_assigned = !self
            .resolver
            .has_role(subject, &role, Some(&guard))
            .await?;
        if role_assigned {
            self.resolver.assign_role(subject, &role).await?;
        }

        info!(
            role = %role.name,
            permissions_created,
            permissions_granted,
            role_assigned,
            "Super user provisioned"
        );
        Ok(SuperuserReport {
            role,
            permissions_created,
            permissions_granted,
            role_assigned,
        })
    }

    /// Drop the shared permission cache.
    ///
    /// Returns whether a cache entry existed.
    pub async fn reset_cache(&self) -> RbacResult<bool> {
        let existed = self.resolver.forget_cached_permissions().await?;
        info!(existed, "Permission cache reset");
        Ok(existed)
    }
}
