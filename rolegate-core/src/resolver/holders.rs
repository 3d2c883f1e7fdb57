//! Subject lookups by held role or permission, and removal of a deleted
//! subject's assignments.
//!
//! Holder queries are scoped to the current tenant and to one subject kind.
//! The repository keeps no table of subjects, so the `without` variants
//! narrow a candidate list supplied by the caller.

use rolegate_rbac::{AccessRecord, PermissionTarget, RbacResult, RoleId, RoleTarget, SubjectRef};
use std::collections::HashSet;
use tracing::{debug, info};

use super::AccessResolver;
use crate::store::{CacheStore, Repository};
use crate::subject::Subject;

impl<R: Repository, C: CacheStore> AccessResolver<R, C> {
    fn guard_for_kind(&self, kind: &str, guard: Option<&str>) -> String {
        match guard {
            Some(guard) => guard.to_string(),
            None => self.guards.default_name_for_kind(kind),
        }
    }

    async fn role_holders(&self, kind: &str, roles: RoleTarget, guard: &str) -> RbacResult<HashSet<SubjectRef>> {
        let ids: Vec<RoleId> = self
            .collect_roles(roles, guard)
            .await?
            .iter()
            .map(|role| role.id)
            .collect();
        let holders = self
            .repository
            .subjects_with_roles(&ids, self.scope_tenant())
            .await?;
        Ok(holders.into_iter().filter(|s| s.kind == kind).collect())
    }

    async fn permission_holders(
        &self,
        kind: &str,
        permissions: PermissionTarget,
        guard: &str,
    ) -> RbacResult<HashSet<SubjectRef>> {
        let tenant = self.scope_tenant();
        let records = self.collect_permissions(permissions, guard).await?;
        let snapshot = self.index.load().await?;

        let mut granting: Vec<RoleId> = Vec::new();
        for record in &records {
            let Some(indexed) = snapshot.get(record.id) else {
                continue;
            };
            for grant in indexed
                .grants
                .iter()
                .filter(|g| g.applies_in(tenant) && g.role.visible_in(tenant))
            {
                if !granting.contains(&grant.role.id) {
                    granting.push(grant.role.id);
                }
            }
        }

        let ids: Vec<_> = records.iter().map(|p| p.id).collect();
        let mut holders = self.repository.subjects_with_permissions(&ids, tenant).await?;
        if !granting.is_empty() {
            holders.extend(self.repository.subjects_with_roles(&granting, tenant).await?);
        }
        debug!(
            permissions = records.len(),
            granting_roles = granting.len(),
            "Permission holders collected"
        );
        Ok(holders.into_iter().filter(|s| s.kind == kind).collect())
    }

    /// Subjects of `kind` holding any of `roles` in the current tenant.
    ///
    /// # Arguments
    ///
    /// * `kind` - Subject kind to list, such as `"user"`
    /// * `roles` - A name, pipe list, id, record or list of those
    /// * `guard` - Guard to resolve names in, defaulting to the kind's guard
    ///
    /// # Errors
    ///
    /// Returns a lookup error for an unknown role.
    pub async fn subjects_with_role(
        &self,
        kind: &str,
        roles: impl Into<RoleTarget>,
        guard: Option<&str>,
    ) -> RbacResult<Vec<SubjectRef>> {
        let guard = self.guard_for_kind(kind, guard);
        let mut holders: Vec<_> = self
            .role_holders(kind, roles.into(), &guard)
            .await?
            .into_iter()
            .collect();
        holders.sort_by_key(|s| s.id);
        Ok(holders)
    }

    /// The `candidates` of `kind` that hold none of `roles`.
    ///
    /// Candidate order is kept. Candidates of another kind are dropped.
    pub async fn subjects_without_role(
        &self,
        kind: &str,
        candidates: &[SubjectRef],
        roles: impl Into<RoleTarget>,
        guard: Option<&str>,
    ) -> RbacResult<Vec<SubjectRef>> {
        let guard = self.guard_for_kind(kind, guard);
        let holders = self.role_holders(kind, roles.into(), &guard).await?;
        Ok(candidates
            .iter()
            .filter(|s| s.kind == kind && !holders.contains(*s))
            .cloned()
            .collect())
    }

    /// Subjects of `kind` holding any of `permissions` in the current
    /// tenant, directly or through a role.
    ///
    /// # Errors
    ///
    /// Returns a lookup error for an unknown permission.
    pub async fn subjects_with_permission(
        &self,
        kind: &str,
        permissions: impl Into<PermissionTarget>,
        guard: Option<&str>,
    ) -> RbacResult<Vec<SubjectRef>> {
        let guard = self.guard_for_kind(kind, guard);
        let mut holders: Vec<_> = self
            .permission_holders(kind, permissions.into(), &guard)
            .await?
            .into_iter()
            .collect();
        holders.sort_by_key(|s| s.id);
        Ok(holders)
    }

    /// The `candidates` of `kind` that hold none of `permissions`, either
    /// directly or through a role.
    pub async fn subjects_without_permission(
        &self,
        kind: &str,
        candidates: &[SubjectRef],
        permissions: impl Into<PermissionTarget>,
        guard: Option<&str>,
    ) -> RbacResult<Vec<SubjectRef>> {
        let guard = self.guard_for_kind(kind, guard);
        let holders = self
            .permission_holders(kind, permissions.into(), &guard)
            .await?;
        Ok(candidates
            .iter()
            .filter(|s| s.kind == kind && !holders.contains(*s))
            .cloned()
            .collect())
    }

    /// Remove every role and permission assignment of a subject that is
    /// being deleted, in every tenant.
    ///
    /// Staged assignments of an unsaved subject are discarded. No events are
    /// emitted.
    ///
    /// # Returns
    ///
    /// The number of assignment rows removed
    pub async fn forget_subject(&self, subject: &Subject) -> RbacResult<usize> {
        subject.forget_cached_associations();
        let Some(subject_ref) = subject.subject_ref() else {
            let (roles, permissions) = subject.take_staged();
            debug!(
                roles = roles.len(),
                permissions = permissions.len(),
                "Staged assignments discarded"
            );
            return Ok(0);
        };

        let removed = self.repository.detach_subject(&subject_ref).await?;
        self.index.forget_wildcard_index(&subject_ref);
        info!(subject = %subject_ref, removed, "Subject assignments removed");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use crate::{AccessResolver, MemoryCacheStore, MemoryRepository, RbacConfig, Subject};
    use rolegate_rbac::{AssignmentKind, RbacError, RecordAttributes, SubjectRef, TenantId};

    type Resolver = AccessResolver<MemoryRepository, MemoryCacheStore>;

    async fn seeded(config: RbacConfig) -> Resolver {
        let resolver = AccessResolver::new(MemoryRepository::new(), MemoryCacheStore::new(), config);
        for name in ["posts.view", "posts.edit"] {
            resolver.create_permission(RecordAttributes::new(name)).await.unwrap();
        }
        let editor = resolver.create_role(RecordAttributes::new("Editor")).await.unwrap();
        resolver.create_role(RecordAttributes::new("Viewer")).await.unwrap();
        resolver.give_permission_to_role(&editor, "posts.edit").await.unwrap();
        resolver
    }

    fn refs(ids: &[u64]) -> Vec<SubjectRef> {
        ids.iter().map(|&id| SubjectRef::new("user", id)).collect()
    }

    #[tokio::test]
    async fn test_role_holders() {
        let resolver = seeded(RbacConfig::default()).await;
        resolver.assign_role(&Subject::new("user", 2), "Editor").await.unwrap();
        resolver.assign_role(&Subject::new("user", 1), "Viewer").await.unwrap();
        resolver.assign_role(&Subject::new("team", 1), "Editor").await.unwrap();

        let holders = resolver.subjects_with_role("user", "Editor|Viewer", None).await.unwrap();
        assert_eq!(holders, refs(&[1, 2]));
        let holders = resolver.subjects_with_role("team", "Editor", None).await.unwrap();
        assert_eq!(holders, vec![SubjectRef::new("team", 1)]);

        let without = resolver
            .subjects_without_role("user", &refs(&[3, 2, 1]), "Editor", None)
            .await
            .unwrap();
        assert_eq!(without, refs(&[3, 1]));

        let err = resolver.subjects_with_role("user", "Ghost", None).await.unwrap_err();
        assert!(matches!(err, RbacError::RoleNotFound { .. }));
    }

    #[tokio::test]
    async fn test_permission_holders_include_role_holders() {
        let resolver = seeded(RbacConfig::default()).await;
        resolver.assign_role(&Subject::new("user", 1), "Editor").await.unwrap();
        resolver
            .give_permission_to(&Subject::new("user", 2), "posts.edit")
            .await
            .unwrap();
        resolver
            .give_permission_to(&Subject::new("user", 3), "posts.view")
            .await
            .unwrap();

        let holders = resolver
            .subjects_with_permission("user", "posts.edit", None)
            .await
            .unwrap();
        assert_eq!(holders, refs(&[1, 2]));

        let without = resolver
            .subjects_without_permission("user", &refs(&[1, 2, 3, 4]), "posts.edit", None)
            .await
            .unwrap();
        assert_eq!(without, refs(&[3, 4]));
    }

    #[tokio::test]
    async fn test_holders_scoped_to_tenant() {
        let resolver = seeded(RbacConfig::default().with_tenancy(true)).await;
        let user = Subject::new("user", 1);
        {
            let _scope = resolver.tenant_context().scoped(Some(TenantId(1)));
            resolver.assign_role(&user, "Editor").await.unwrap();
            let holders = resolver.subjects_with_permission("user", "posts.edit", None).await.unwrap();
            assert_eq!(holders, refs(&[1]));
        }

        let _scope = resolver.tenant_context().scoped(Some(TenantId(2)));
        assert!(resolver.subjects_with_role("user", "Editor", None).await.unwrap().is_empty());
        assert!(resolver
            .subjects_with_permission("user", "posts.edit", None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_forget_subject_detaches_every_tenant() {
        let resolver = seeded(RbacConfig::default().with_tenancy(true).with_wildcard(true)).await;
        let user = Subject::new("user", 1);
        let subject_ref = user.subject_ref().unwrap();
        for tenant in [1, 2] {
            let _scope = resolver.tenant_context().scoped(Some(TenantId(tenant)));
            resolver.assign_role(&user, "Editor").await.unwrap();
            resolver.give_permission_to(&user, "posts.view").await.unwrap();
            assert!(resolver.has_permission_to(&user, "posts.edit", None).await.unwrap());
        }

        assert_eq!(resolver.forget_subject(&user).await.unwrap(), 4);
        assert_eq!(
            resolver.repository().assignment_count(&subject_ref, AssignmentKind::Role),
            0
        );
        assert!(resolver.index().wildcard_index(&subject_ref, Some(TenantId(2))).is_none());

        let _scope = resolver.tenant_context().scoped(Some(TenantId(2)));
        assert!(!resolver.has_permission_to(&user, "posts.edit", None).await.unwrap());
        assert!(!resolver.has_role(&user, "Editor", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_forget_unsaved_subject_discards_staged() {
        let resolver = seeded(RbacConfig::default()).await;
        let mut draft = Subject::unsaved("user");
        resolver.assign_role(&draft, "Editor").await.unwrap();
        assert_eq!(draft.staged_roles().len(), 1);

        assert_eq!(resolver.forget_subject(&draft).await.unwrap(), 0);
        assert!(draft.staged_roles().is_empty());

        resolver.commit(&mut draft, 7).await.unwrap();
        assert!(!resolver.has_role(&draft, "Editor", None).await.unwrap());
    }
}
