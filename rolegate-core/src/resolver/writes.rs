//! Role and permission assignment to subjects.
//!
//! Every write resolves and validates the whole input before touching the
//! repository, so a guard mismatch on one entry leaves nothing attached.
//! Subjects without a persisted identity stage their assignments until
//! [`AccessResolver::commit`].

use rolegate_events::{AccessEvent, Holder};
use rolegate_rbac::{
    AccessRecord, AssignmentKind, PermissionId, PermissionTarget, RbacResult, RoleId, RoleTarget,
    SubjectRef,
};
use tracing::{debug, info};

use super::AccessResolver;
use crate::store::{CacheStore, Repository};
use crate::subject::Subject;

impl<R: Repository, C: CacheStore> AccessResolver<R, C> {
    /// Drop every cache a subject assignment can affect.
    async fn invalidate_after_write(&self, subject: &Subject) -> RbacResult<()> {
        subject.forget_cached_associations();
        if let Some(subject_ref) = subject.subject_ref() {
            self.index.forget_wildcard_index(&subject_ref);
        }
        self.index.forget().await?;
        Ok(())
    }

    async fn attach_keys(
        &self,
        subject_ref: &SubjectRef,
        kind: AssignmentKind,
        keys: &[u64],
    ) -> RbacResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.repository
            .attach(subject_ref, kind, keys, self.scope_tenant())
            .await?;
        info!(
            subject = %subject_ref,
            kind = kind.as_str(),
            count = keys.len(),
            "Assignments attached"
        );
        Ok(())
    }

    async fn detach_keys(
        &self,
        subject_ref: &SubjectRef,
        kind: AssignmentKind,
        keys: Option<&[u64]>,
    ) -> RbacResult<Vec<u64>> {
        let detached = self
            .repository
            .detach(subject_ref, kind, keys, self.scope_tenant())
            .await?;
        info!(
            subject = %subject_ref,
            kind = kind.as_str(),
            count = detached.len(),
            "Assignments detached"
        );
        Ok(detached)
    }

    /// Assign roles to a subject. Roles already held are skipped.
    ///
    /// # Errors
    ///
    /// Returns a lookup error for an unknown role, or `GuardMismatch` if a
    /// role's guard is not one the subject is valid under. Nothing is
    /// attached in either case.
    pub async fn assign_role(&self, subject: &Subject, roles: impl Into<RoleTarget>) -> RbacResult<()> {
        let guard = self.guards.default_name_for(subject);
        let roles = self.collect_roles(roles.into(), &guard).await?;
        for role in &roles {
            self.guards.ensure_shares_guard(subject, role)?;
        }

        let Some(subject_ref) = subject.subject_ref() else {
            let ids: Vec<RoleId> = roles.iter().map(|r| r.id).collect();
            subject.stage_roles(&ids);
            debug!(kind = subject.kind(), staged = ids.len(), "Roles staged on unsaved subject");
            return Ok(());
        };

        let held = self.roles_of(subject).await?;
        let new: Vec<u64> = roles
            .iter()
            .filter(|r| !held.iter().any(|h| h.id == r.id))
            .map(|r| r.key())
            .collect();
        self.attach_keys(&subject_ref, AssignmentKind::Role, &new).await?;
        self.invalidate_after_write(subject).await?;

        self.notify(AccessEvent::attached(
            AssignmentKind::Role,
            Holder::subject(subject_ref),
            roles.iter().map(|r| r.key()).collect(),
        ));
        Ok(())
    }

    /// Remove roles from a subject.
    pub async fn remove_role(&self, subject: &Subject, roles: impl Into<RoleTarget>) -> RbacResult<()> {
        let guard = self.guards.default_name_for(subject);
        let roles = self.collect_roles(roles.into(), &guard).await?;
        let ids: Vec<RoleId> = roles.iter().map(|r| r.id).collect();

        let Some(subject_ref) = subject.subject_ref() else {
            subject.unstage_roles(Some(&ids));
            return Ok(());
        };

        let keys: Vec<u64> = ids.iter().map(|id| id.0).collect();
        let detached = self
            .detach_keys(&subject_ref, AssignmentKind::Role, Some(&keys))
            .await?;
        self.invalidate_after_write(subject).await?;

        self.notify(AccessEvent::detached(
            AssignmentKind::Role,
            Holder::subject(subject_ref),
            detached,
        ));
        Ok(())
    }

    /// Replace every role of a subject.
    ///
    /// Syncing the same set twice leaves the assignments unchanged.
    pub async fn sync_roles(&self, subject: &Subject, roles: impl Into<RoleTarget>) -> RbacResult<()> {
        let guard = self.guards.default_name_for(subject);
        let roles = self.collect_roles(roles.into(), &guard).await?;
        for role in &roles {
            self.guards.ensure_shares_guard(subject, role)?;
        }
        let ids: Vec<RoleId> = roles.iter().map(|r| r.id).collect();

        let Some(subject_ref) = subject.subject_ref() else {
            subject.unstage_roles(None);
            subject.stage_roles(&ids);
            return Ok(());
        };

        let detached = self
            .detach_keys(&subject_ref, AssignmentKind::Role, None)
            .await?;
        let keys: Vec<u64> = ids.iter().map(|id| id.0).collect();
        self.attach_keys(&subject_ref, AssignmentKind::Role, &keys).await?;
        self.invalidate_after_write(subject).await?;

        if !detached.is_empty() {
            self.notify(AccessEvent::detached(
                AssignmentKind::Role,
                Holder::subject(subject_ref.clone()),
                detached,
            ));
        }
        self.notify(AccessEvent::attached(
            AssignmentKind::Role,
            Holder::subject(subject_ref),
            keys,
        ));
        Ok(())
    }

    /// Give permissions straight to a subject. Permissions already held are skipped.
    ///
    /// # Errors
    ///
    /// Returns a lookup error for an unknown permission, or `GuardMismatch`
    /// if a permission's guard is not one the subject is valid under.
    pub async fn give_permission_to(
        &self,
        subject: &Subject,
        permissions: impl Into<PermissionTarget>,
    ) -> RbacResult<()> {
        let guard = self.guards.default_name_for(subject);
        let permissions = self.collect_permissions(permissions.into(), &guard).await?;
        for permission in &permissions {
            self.guards.ensure_shares_guard(subject, permission)?;
        }

        let Some(subject_ref) = subject.subject_ref() else {
            let ids: Vec<PermissionId> = permissions.iter().map(|p| p.id).collect();
            subject.stage_permissions(&ids);
            debug!(kind = subject.kind(), staged = ids.len(), "Permissions staged on unsaved subject");
            return Ok(());
        };

        let held = self.direct_permissions_of(subject).await?;
        let new: Vec<u64> = permissions
            .iter()
            .filter(|p| !held.iter().any(|h| h.id == p.id))
            .map(|p| p.key())
            .collect();
        self.attach_keys(&subject_ref, AssignmentKind::Permission, &new)
            .await?;
        self.invalidate_after_write(subject).await?;

        self.notify(AccessEvent::attached(
            AssignmentKind::Permission,
            Holder::subject(subject_ref),
            permissions.iter().map(|p| p.key()).collect(),
        ));
        Ok(())
    }

    /// Revoke permissions given straight to a subject.
    ///
    /// Permissions held through a role are unaffected.
    pub async fn revoke_permission_to(
        &self,
        subject: &Subject,
        permissions: impl Into<PermissionTarget>,
    ) -> RbacResult<()> {
        let guard = self.guards.default_name_for(subject);
        let permissions = self.collect_permissions(permissions.into(), &guard).await?;
        let ids: Vec<PermissionId> = permissions.iter().map(|p| p.id).collect();

        let Some(subject_ref) = subject.subject_ref() else {
            subject.unstage_permissions(Some(&ids));
            return Ok(());
        };

        let keys: Vec<u64> = ids.iter().map(|id| id.0).collect();
        let detached = self
            .detach_keys(&subject_ref, AssignmentKind::Permission, Some(&keys))
            .await?;
        self.invalidate_after_write(subject).await?;

        self.notify(AccessEvent::detached(
            AssignmentKind::Permission,
            Holder::subject(subject_ref),
            detached,
        ));
        Ok(())
    }

    /// Replace every direct permission of a subject.
    pub async fn sync_permissions(
        &self,
        subject: &Subject,
        permissions: impl Into<PermissionTarget>,
    ) -> RbacResult<()> {
        let guard = self.guards.default_name_for(subject);
        let permissions = self.collect_permissions(permissions.into(), &guard).await?;
        for permission in &permissions {
            self.guards.ensure_shares_guard(subject, permission)?;
        }
        let ids: Vec<PermissionId> = permissions.iter().map(|p| p.id).collect();

        let Some(subject_ref) = subject.subject_ref() else {
            subject.unstage_permissions(None);
            subject.stage_permissions(&ids);
            return Ok(());
        };

        let detached = self
            .detach_keys(&subject_ref, AssignmentKind::Permission, None)
            .await?;
        let keys: Vec<u64> = ids.iter().map(|id| id.0).collect();
        self.attach_keys(&subject_ref, AssignmentKind::Permission, &keys)
            .await?;
        self.invalidate_after_write(subject).await?;

        if !detached.is_empty() {
            self.notify(AccessEvent::detached(
                AssignmentKind::Permission,
                Holder::subject(subject_ref.clone()),
                detached,
            ));
        }
        self.notify(AccessEvent::attached(
            AssignmentKind::Permission,
            Holder::subject(subject_ref),
            keys,
        ));
        Ok(())
    }

    /// Record the persisted identity of a subject and flush its staged assignments.
    ///
    /// Staged assignments are drained on the first call; committing again
    /// attaches nothing and emits nothing.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut draft = Subject::unsaved("user");
    /// resolver.assign_role(&draft, "Editor").await?;
    /// let id = users.insert(&form).await?;
    /// resolver.commit(&mut draft, id).await?;
    /// ```
    pub async fn commit(&self, subject: &mut Subject, id: u64) -> RbacResult<()> {
        subject.set_id(id);
        let (roles, permissions) = subject.take_staged();
        if roles.is_empty() && permissions.is_empty() {
            return Ok(());
        }
        let Some(subject_ref) = subject.subject_ref() else {
            return Ok(());
        };

        let role_keys: Vec<u64> = roles.iter().map(|id| id.0).collect();
        let permission_keys: Vec<u64> = permissions.iter().map(|id| id.0).collect();
        self.attach_keys(&subject_ref, AssignmentKind::Role, &role_keys)
            .await?;
        self.attach_keys(&subject_ref, AssignmentKind::Permission, &permission_keys)
            .await?;
        self.invalidate_after_write(subject).await?;

        debug!(subject = %subject_ref, "Staged assignments committed");
        if !role_keys.is_empty() {
            self.notify(AccessEvent::attached(
                AssignmentKind::Role,
                Holder::subject(subject_ref.clone()),
                role_keys,
            ));
        }
        if !permission_keys.is_empty() {
            self.notify(AccessEvent::attached(
                AssignmentKind::Permission,
                Holder::subject(subject_ref),
                permission_keys,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{AccessResolver, MemoryCacheStore, MemoryRepository, RbacConfig, Subject};
    use rolegate_rbac::{AssignmentKind, RbacError, RecordAttributes};

    type Resolver = AccessResolver<MemoryRepository, MemoryCacheStore>;

    async fn seeded() -> Resolver {
        let resolver = AccessResolver::new(
            MemoryRepository::new(),
            MemoryCacheStore::new(),
            RbacConfig::default(),
        );
        for name in ["Editor", "Author"] {
            resolver.create_role(RecordAttributes::new(name)).await.unwrap();
        }
        resolver
            .create_role(RecordAttributes::new("Client").with_guard("admin"))
            .await
            .unwrap();
        resolver
            .create_permission(RecordAttributes::new("posts.view"))
            .await
            .unwrap();
        resolver
    }

    #[tokio::test]
    async fn test_assign_is_idempotent() {
        let resolver = seeded().await;
        let user = Subject::new("user", 1);
        let subject_ref = user.subject_ref().unwrap();

        resolver.assign_role(&user, "Editor").await.unwrap();
        resolver.assign_role(&user, "Editor").await.unwrap();
        assert_eq!(
            resolver.repository().assignment_count(&subject_ref, AssignmentKind::Role),
            1
        );
    }

    #[tokio::test]
    async fn test_sync_replaces() {
        let resolver = seeded().await;
        let user = Subject::new("user", 1);
        let subject_ref = user.subject_ref().unwrap();

        resolver.assign_role(&user, "Editor").await.unwrap();
        resolver.sync_roles(&user, "Author").await.unwrap();
        assert_eq!(resolver.get_role_names(&user).await.unwrap(), vec!["Author"]);

        resolver.sync_roles(&user, vec!["Editor", "Author"]).await.unwrap();
        resolver.sync_roles(&user, vec!["Editor", "Author"]).await.unwrap();
        assert_eq!(
            resolver.repository().assignment_count(&subject_ref, AssignmentKind::Role),
            2
        );
    }

    #[tokio::test]
    async fn test_guard_mismatch_attaches_nothing() {
        let resolver = seeded().await;
        let client = resolver.find_role_by_name("Client", Some("admin")).await.unwrap();
        let editor = resolver.find_role_by_name("Editor", None).await.unwrap();
        let user = Subject::new("user", 1);

        let err = resolver
            .assign_role(&user, vec![editor, client])
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::GuardMismatch { .. }));
        assert!(resolver.get_role_names(&user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_and_revoke() {
        let resolver = seeded().await;
        let user = Subject::new("user", 1);
        resolver.assign_role(&user, "Editor|Author").await.unwrap();
        resolver.give_permission_to(&user, "posts.view").await.unwrap();

        resolver.remove_role(&user, "Editor").await.unwrap();
        assert_eq!(resolver.get_role_names(&user).await.unwrap(), vec!["Author"]);

        resolver.revoke_permission_to(&user, "posts.view").await.unwrap();
        assert!(!resolver.has_direct_permission(&user, "posts.view").await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_flushes_staged_once() {
        let resolver = seeded().await;
        let mut draft = Subject::unsaved("user");
        resolver.assign_role(&draft, "Editor").await.unwrap();
        resolver.give_permission_to(&draft, "posts.view").await.unwrap();
        assert_eq!(draft.staged_roles().len(), 1);

        resolver.commit(&mut draft, 7).await.unwrap();
        resolver.commit(&mut draft, 7).await.unwrap();

        let subject_ref = draft.subject_ref().unwrap();
        assert_eq!(
            resolver.repository().assignment_count(&subject_ref, AssignmentKind::Role),
            1
        );
        assert!(resolver.has_role(&draft, "Editor", None).await.unwrap());
        assert!(resolver.has_direct_permission(&draft, "posts.view").await.unwrap());
    }
}
