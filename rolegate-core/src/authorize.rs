//! # Authorization gates
//!
//! Boundary checks for request handlers. Each gate takes the authenticated
//! subject (or `None` when nobody is logged in) and a pipe-delimited list of
//! role or permission names, and either lets the request through or returns
//! [`RbacError::Unauthorized`] carrying a [`Denial`].
//!
//! ## Usage
//!
//! ```ignore
//! resolver.authorize_roles(session.subject(), "Editor|Author", None).await?;
//! resolver.authorize_permissions(session.subject(), "posts.edit", None).await?;
//! ```

use rolegate_rbac::{parse_pipe_list, Denial, RbacError, RbacResult};
use tracing::debug;

use crate::resolver::AccessResolver;
use crate::store::{CacheStore, Repository};
use crate::subject::Subject;

impl<R: Repository, C: CacheStore> AccessResolver<R, C> {
    fn deny(&self, denial: Denial) -> RbacError {
        debug!(reason = ?denial.kind, required = ?denial.required, "Access denied");
        RbacError::Unauthorized(denial)
    }

    /// Let the request through if the subject holds any of `roles`.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` when no subject is given or none of the roles
    /// is held.
    pub async fn authorize_roles(
        &self,
        subject: Option<&Subject>,
        roles: &str,
        guard: Option<&str>,
    ) -> RbacResult<()> {
        let Some(subject) = subject else {
            return Err(self.deny(Denial::not_logged_in()));
        };
        let required = parse_pipe_list(roles);
        if self.has_any_role(subject, required.clone(), guard).await? {
            return Ok(());
        }
        Err(self.deny(Denial::missing_roles(
            required,
            self.config().display_names_in_denials,
        )))
    }

    /// Let the request through if the subject holds any of `permissions`.
    ///
    /// Unknown permission names count as not held.
    pub async fn authorize_permissions(
        &self,
        subject: Option<&Subject>,
        permissions: &str,
        guard: Option<&str>,
    ) -> RbacResult<()> {
        let Some(subject) = subject else {
            return Err(self.deny(Denial::not_logged_in()));
        };
        let required = parse_pipe_list(permissions);
        for permission in &required {
            if self.check_permission_to(subject, permission, guard).await? {
                return Ok(());
            }
        }
        Err(self.deny(Denial::missing_permissions(
            required,
            self.config().display_names_in_denials,
        )))
    }

    /// Let the request through if the subject holds any of the names, read
    /// either as a permission or as a role.
    pub async fn authorize_role_or_permission(
        &self,
        subject: Option<&Subject>,
        roles_or_permissions: &str,
        guard: Option<&str>,
    ) -> RbacResult<()> {
        let Some(subject) = subject else {
            return Err(self.deny(Denial::not_logged_in()));
        };
        let required = parse_pipe_list(roles_or_permissions);
        for name in &required {
            if self.check_permission_to(subject, name, guard).await? {
                return Ok(());
            }
        }
        if self.has_any_role(subject, required.clone(), guard).await? {
            return Ok(());
        }
        Err(self.deny(Denial::missing_roles_or_permissions(
            required,
            self.config().display_names_in_denials,
        )))
    }
}

#[cfg(test)]
mod tests {
    use crate::{AccessResolver, MemoryCacheStore, MemoryRepository, RbacConfig, Subject};
    use rolegate_rbac::{DenialKind, RbacError, RecordAttributes};

    async fn resolver(config: RbacConfig) -> AccessResolver<MemoryRepository, MemoryCacheStore> {
        let resolver = AccessResolver::new(MemoryRepository::new(), MemoryCacheStore::new(), config);
        resolver.create_permission(RecordAttributes::new("posts.edit")).await.unwrap();
        resolver.create_role(RecordAttributes::new("Editor")).await.unwrap();
        resolver.create_role(RecordAttributes::new("Admin")).await.unwrap();
        resolver
    }

    fn denial_kind(err: RbacError) -> DenialKind {
        match err {
            RbacError::Unauthorized(denial) => denial.kind,
            other => panic!("expected a denial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_subject_is_not_logged_in() {
        let resolver = resolver(RbacConfig::default()).await;
        let err = resolver.authorize_roles(None, "Editor", None).await.unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(denial_kind(err), DenialKind::NotLoggedIn);
    }

    #[tokio::test]
    async fn test_role_gate() {
        let resolver = resolver(RbacConfig::default()).await;
        let user = Subject::new("user", 1);
        resolver.assign_role(&user, "Editor").await.unwrap();

        assert!(resolver.authorize_roles(Some(&user), "'Admin|Editor'", None).await.is_ok());
        let err = resolver
            .authorize_roles(Some(&user), "Admin", None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "User does not have the right roles.");
    }

    #[tokio::test]
    async fn test_permission_gate_ignores_unknown_names() {
        let resolver = resolver(RbacConfig::default().with_display_names(true)).await;
        let user = Subject::new("user", 1);
        resolver.give_permission_to(&user, "posts.edit").await.unwrap();

        assert!(resolver
            .authorize_permissions(Some(&user), "posts.publish|posts.edit", None)
            .await
            .is_ok());

        let err = resolver
            .authorize_permissions(Some(&user), "posts.publish", None)
            .await
            .unwrap_err();
        assert!(err.to_string().ends_with("Necessary permissions are posts.publish"));
    }

    #[tokio::test]
    async fn test_role_or_permission_gate() {
        let resolver = resolver(RbacConfig::default()).await;
        let user = Subject::new("user", 1);
        resolver.assign_role(&user, "Editor").await.unwrap();

        assert!(resolver
            .authorize_role_or_permission(Some(&user), "posts.edit|Editor", None)
            .await
            .is_ok());
        let err = resolver
            .authorize_role_or_permission(Some(&user), "posts.edit|Admin", None)
            .await
            .unwrap_err();
        assert_eq!(denial_kind(err), DenialKind::MissingRolesOrPermissions);
    }
}
