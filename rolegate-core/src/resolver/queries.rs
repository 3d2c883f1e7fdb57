//! Role and permission checks for a subject.

use rolegate_rbac::wildcard::contains_wildcard;
use rolegate_rbac::{
    AccessRecord, PermissionRecord, PermissionTarget, RbacError, RbacResult, RoleId, RoleRecord,
    RoleTarget, Target, WildcardMatcher,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use super::AccessResolver;
use crate::index::WildcardEntry;
use crate::store::{CacheStore, Repository};
use crate::subject::Subject;

fn role_leaf_held(held: &[&RoleRecord], leaf: &RoleTarget) -> bool {
    match leaf {
        Target::Name(name) => held.iter().any(|r| r.name == *name),
        Target::Id(id) => held.iter().any(|r| r.id.0 == *id),
        Target::Record(record) => held.iter().any(|r| r.id == record.id),
        Target::AnyOf(items) => items.iter().any(|item| role_leaf_held(held, item)),
    }
}

impl<R: Repository, C: CacheStore> AccessResolver<R, C> {
    async fn held_roles(&self, subject: &Subject, guard: Option<&str>) -> RbacResult<Vec<RoleRecord>> {
        let roles = self.roles_of(subject).await?;
        Ok(roles
            .iter()
            .filter(|role| guard.map_or(true, |g| role.guard_name == g))
            .cloned()
            .collect())
    }

    /// Check if the subject holds any of the given roles.
    ///
    /// # Arguments
    ///
    /// * `subject` - The role holder
    /// * `roles` - A name, pipe list, id, record or list of those
    /// * `guard` - Only compare roles of this guard
    ///
    /// # Example
    ///
    /// ```ignore
    /// resolver.has_role(&user, "Editor|Author", None).await?;
    /// resolver.has_role(&user, vec!["Editor", "Author"], Some("web")).await?;
    /// ```
    pub async fn has_role(
        &self,
        subject: &Subject,
        roles: impl Into<RoleTarget>,
        guard: Option<&str>,
    ) -> RbacResult<bool> {
        let held = self.held_roles(subject, guard).await?;
        let held: Vec<&RoleRecord> = held.iter().collect();
        Ok(roles
            .into()
            .into_leaves()
            .iter()
            .any(|leaf| role_leaf_held(&held, leaf)))
    }

    /// Alias of [`has_role`](Self::has_role).
    pub async fn has_any_role(
        &self,
        subject: &Subject,
        roles: impl Into<RoleTarget>,
        guard: Option<&str>,
    ) -> RbacResult<bool> {
        self.has_role(subject, roles, guard).await
    }

    /// Check if the subject holds every one of the given roles.
    pub async fn has_all_roles(
        &self,
        subject: &Subject,
        roles: impl Into<RoleTarget>,
        guard: Option<&str>,
    ) -> RbacResult<bool> {
        let held = self.held_roles(subject, guard).await?;
        let held: Vec<&RoleRecord> = held.iter().collect();
        Ok(roles
            .into()
            .into_leaves()
            .iter()
            .all(|leaf| role_leaf_held(&held, leaf)))
    }

    /// Check if the subject's role names equal the given set, no more, no less.
    pub async fn has_exact_roles(
        &self,
        subject: &Subject,
        roles: impl Into<RoleTarget>,
        guard: Option<&str>,
    ) -> RbacResult<bool> {
        let held = self.held_roles(subject, guard).await?;

        let mut requested = Vec::new();
        for leaf in roles.into().into_leaves() {
            let name = match leaf {
                Target::Name(name) => name,
                Target::Record(record) => record.name,
                Target::Id(id) => match held.iter().find(|r| r.id.0 == id) {
                    Some(role) => role.name.clone(),
                    None => return Ok(false),
                },
                Target::AnyOf(_) => continue,
            };
            requested.push(name);
        }
        requested.sort();
        requested.dedup();

        let mut names: Vec<String> = held.into_iter().map(|r| r.name).collect();
        names.sort();
        names.dedup();
        Ok(names == requested)
    }

    /// Names of the subject's roles in the current tenant.
    pub async fn get_role_names(&self, subject: &Subject) -> RbacResult<Vec<String>> {
        let roles = self.roles_of(subject).await?;
        Ok(roles.iter().map(|r| r.name.clone()).collect())
    }

    async fn held_role_ids(&self, subject: &Subject) -> RbacResult<HashSet<RoleId>> {
        let roles = self.roles_of(subject).await?;
        Ok(roles.iter().map(|r| r.id).collect())
    }

    async fn holds_directly(&self, subject: &Subject, permission: &PermissionRecord) -> RbacResult<bool> {
        let direct = self.direct_permissions_of(subject).await?;
        Ok(direct.iter().any(|p| p.id == permission.id))
    }

    async fn holds_via_role(&self, subject: &Subject, permission: &PermissionRecord) -> RbacResult<bool> {
        let role_ids = self.held_role_ids(subject).await?;
        if role_ids.is_empty() {
            return Ok(false);
        }
        let snapshot = self.index.load().await?;
        Ok(snapshot
            .get(permission.id)
            .is_some_and(|indexed| indexed.granted_to_any(&role_ids, self.scope_tenant())))
    }

    /// Permissions reached through the subject's roles, one level deep.
    async fn via_role_records(&self, subject: &Subject) -> RbacResult<Vec<PermissionRecord>> {
        let role_ids = self.held_role_ids(subject).await?;
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }
        let tenant = self.scope_tenant();
        let snapshot = self.index.load().await?;
        Ok(snapshot
            .iter()
            .filter(|p| p.record.visible_in(tenant) && p.granted_to_any(&role_ids, tenant))
            .map(|p| p.record.clone())
            .collect())
    }

    /// Direct and role-derived permissions, deduplicated by id.
    async fn permission_closure(&self, subject: &Subject) -> RbacResult<Vec<PermissionRecord>> {
        let mut all: Vec<PermissionRecord> = self.direct_permissions_of(subject).await?.to_vec();
        for record in self.via_role_records(subject).await? {
            if !all.iter().any(|p| p.id == record.id) {
                all.push(record);
            }
        }
        Ok(all)
    }

    /// Requested name and guard for one leaf in wildcard mode.
    pub(crate) async fn wildcard_request(
        &self,
        leaf: PermissionTarget,
        guard: &str,
    ) -> RbacResult<(String, String)> {
        match leaf {
            Target::Name(name) if name.trim().is_empty() => Err(RbacError::InvalidWildcardInput(
                "empty permission name".to_string(),
            )),
            Target::Name(name) => Ok((name, guard.to_string())),
            leaf @ (Target::Record(_) | Target::Id(_)) => {
                let record = self.resolve_permission(leaf, guard).await?;
                Ok((record.name, record.guard_name))
            }
            Target::AnyOf(_) => Err(RbacError::InvalidWildcardInput(
                "nested permission list".to_string(),
            )),
        }
    }

    /// Check if any held permission implies `requested`.
    pub(crate) fn held_implies<'a, I>(&self, held: I, requested: &str) -> RbacResult<bool>
    where
        I: IntoIterator<Item = &'a PermissionRecord>,
    {
        for permission in held {
            if WildcardMatcher::new(permission.name.as_str())?.implies(requested) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Matchers for every permission the subject holds, built once per
    /// subject and tenant.
    ///
    /// Plain names are included too; their matcher implies only the name
    /// itself, so one cached list answers exact and pattern requests.
    async fn wildcard_entries(&self, subject: &Subject) -> RbacResult<Arc<Vec<WildcardEntry>>> {
        let tenant = self.scope_tenant();
        let subject_ref = subject.subject_ref();
        if let Some(cached) = subject_ref
            .as_ref()
            .and_then(|s| self.index.wildcard_index(s, tenant))
        {
            return Ok(cached);
        }

        let closure = self.permission_closure(subject).await?;
        let mut entries = Vec::with_capacity(closure.len());
        for permission in &closure {
            entries.push(WildcardEntry {
                matcher: WildcardMatcher::new(permission.name.as_str())?,
                guard_name: permission.guard_name.clone(),
            });
        }

        match subject_ref {
            Some(subject_ref) => {
                debug!(
                    subject = %subject_ref,
                    entries = entries.len(),
                    patterns = closure.iter().filter(|p| contains_wildcard(&p.name)).count(),
                    "Wildcard index built"
                );
                Ok(self.index.store_wildcard_index(&subject_ref, tenant, entries))
            }
            None => Ok(Arc::new(entries)),
        }
    }

    /// Check if the subject holds a permission, directly or through a role.
    ///
    /// Alternatives are evaluated with short-circuit OR. With wildcard
    /// permissions enabled, a held pattern such as `posts.*` satisfies
    /// `posts.edit`.
    ///
    /// # Arguments
    ///
    /// * `subject` - The permission holder
    /// * `permission` - A name, pipe list, id, record or list of those
    /// * `guard` - Guard to resolve names in, defaulting to the subject's guard
    ///
    /// # Errors
    ///
    /// Returns a lookup error if no alternative matched and one of them did
    /// not exist, or `InvalidWildcardInput` for an empty name in wildcard mode.
    pub async fn has_permission_to(
        &self,
        subject: &Subject,
        permission: impl Into<PermissionTarget>,
        guard: Option<&str>,
    ) -> RbacResult<bool> {
        let guard = match guard {
            Some(guard) => guard.to_string(),
            None => self.guards.default_name_for(subject),
        };
        let leaves = permission.into().into_leaves();

        if self.config.wildcard_permissions {
            return self.has_wildcard_permission(subject, leaves, &guard).await;
        }

        let mut missing = None;
        for leaf in leaves {
            let record = match self.resolve_permission(leaf, &guard).await {
                Ok(record) => record,
                Err(e) if e.is_not_found() => {
                    missing.get_or_insert(e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if self.holds_directly(subject, &record).await?
                || self.holds_via_role(subject, &record).await?
            {
                return Ok(true);
            }
        }

        match missing {
            Some(e) => Err(e),
            None => Ok(false),
        }
    }

    async fn has_wildcard_permission(
        &self,
        subject: &Subject,
        leaves: Vec<PermissionTarget>,
        guard: &str,
    ) -> RbacResult<bool> {
        let entries = self.wildcard_entries(subject).await?;

        for leaf in leaves {
            let (name, guard) = self.wildcard_request(leaf, guard).await?;
            if entries
                .iter()
                .any(|entry| entry.guard_name == guard && entry.matcher.implies(&name))
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// [`has_permission_to`](Self::has_permission_to) with unknown
    /// permissions answered as `false`.
    pub async fn check_permission_to(
        &self,
        subject: &Subject,
        permission: impl Into<PermissionTarget>,
        guard: Option<&str>,
    ) -> RbacResult<bool> {
        match self.has_permission_to(subject, permission, guard).await {
            Err(e) if e.is_not_found() => Ok(false),
            result => result,
        }
    }

    /// Check if the subject holds at least one of the permissions.
    pub async fn has_any_permission(
        &self,
        subject: &Subject,
        permissions: impl Into<PermissionTarget>,
    ) -> RbacResult<bool> {
        for leaf in permissions.into().into_leaves() {
            if self.check_permission_to(subject, leaf, None).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Check if the subject holds every one of the permissions.
    pub async fn has_all_permissions(
        &self,
        subject: &Subject,
        permissions: impl Into<PermissionTarget>,
    ) -> RbacResult<bool> {
        for leaf in permissions.into().into_leaves() {
            if !self.check_permission_to(subject, leaf, None).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Check if the subject holds a permission assigned straight to it.
    ///
    /// # Errors
    ///
    /// Returns a lookup error for an unknown permission.
    pub async fn has_direct_permission(
        &self,
        subject: &Subject,
        permission: impl Into<PermissionTarget>,
    ) -> RbacResult<bool> {
        let guard = self.guards.default_name_for(subject);
        for leaf in permission.into().into_leaves() {
            let record = self.resolve_permission(leaf, &guard).await?;
            if self.holds_directly(subject, &record).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Alias of [`has_direct_permission`](Self::has_direct_permission).
    pub async fn has_any_direct_permission(
        &self,
        subject: &Subject,
        permissions: impl Into<PermissionTarget>,
    ) -> RbacResult<bool> {
        self.has_direct_permission(subject, permissions).await
    }

    /// Check if every permission is assigned straight to the subject.
    pub async fn has_all_direct_permissions(
        &self,
        subject: &Subject,
        permissions: impl Into<PermissionTarget>,
    ) -> RbacResult<bool> {
        let guard = self.guards.default_name_for(subject);
        for leaf in permissions.into().into_leaves() {
            let record = self.resolve_permission(leaf, &guard).await?;
            if !self.holds_directly(subject, &record).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Check if one of the subject's roles carries the permission.
    ///
    /// Roles of roles are not followed.
    pub async fn has_permission_via_role(
        &self,
        subject: &Subject,
        permission: impl Into<PermissionTarget>,
    ) -> RbacResult<bool> {
        let guard = self.guards.default_name_for(subject);
        for leaf in permission.into().into_leaves() {
            let record = self.resolve_permission(leaf, &guard).await?;
            if self.holds_via_role(subject, &record).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Permissions assigned straight to the subject.
    pub async fn get_direct_permissions(&self, subject: &Subject) -> RbacResult<Vec<PermissionRecord>> {
        Ok(self.direct_permissions_of(subject).await?.to_vec())
    }

    /// Permissions the subject holds through its roles.
    pub async fn get_permissions_via_roles(&self, subject: &Subject) -> RbacResult<Vec<PermissionRecord>> {
        let mut records = self.via_role_records(subject).await?;
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    /// Direct and role-derived permissions, deduplicated and sorted by name.
    pub async fn get_all_permissions(&self, subject: &Subject) -> RbacResult<Vec<PermissionRecord>> {
        let mut records = self.permission_closure(subject).await?;
        records.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(records)
    }
}
