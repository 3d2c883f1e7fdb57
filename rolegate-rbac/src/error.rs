//! Error types for access-control operations
//!
//! This module defines the errors raised by lookups, record creation,
//! assignment writes and the authorization gates.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Access-control error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RbacError {
    /// No permission with this name exists for the guard
    #[error("There is no permission named `{name}` for guard `{guard}`.")]
    PermissionNotFound { name: String, guard: String },

    /// No permission with this id exists for the guard
    #[error("There is no permission with id `{id}` for guard `{guard}`.")]
    PermissionIdNotFound { id: u64, guard: String },

    /// No role with this name exists for the guard
    #[error("There is no role named `{name}` for guard `{guard}`.")]
    RoleNotFound { name: String, guard: String },

    /// No role with this id exists for the guard
    #[error("There is no role with id `{id}` for guard `{guard}`.")]
    RoleIdNotFound { id: u64, guard: String },

    /// Creating a permission that already exists
    #[error("A `{name}` permission already exists for guard `{guard}`.")]
    PermissionAlreadyExists { name: String, guard: String },

    /// Creating a role that already exists
    #[error("A role `{name}` already exists for guard `{guard}`.")]
    RoleAlreadyExists { name: String, guard: String },

    /// Role or permission guard is not one the subject is valid under
    #[error(
        "The given role or permission should use guard `{}` instead of `{given}`.",
        .expected.join(", ")
    )]
    GuardMismatch { given: String, expected: Vec<String> },

    /// Wildcard mode received a target that cannot be reduced to a name
    #[error("Wildcard permission must be a name, permission id or permission record: {0}")]
    InvalidWildcardInput(String),

    /// The subject was denied access
    #[error("{0}")]
    Unauthorized(Denial),

    /// Repository failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Cache store failure
    #[error("Cache error: {0}")]
    Cache(String),

    /// Snapshot encoding failure
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for access-control operations.
pub type RbacResult<T> = Result<T, RbacError>;

impl RbacError {
    /// Check if this is a lookup failure.
    ///
    /// Convenience checks such as `check_permission_to` turn these into
    /// `false`; every other error reaches the caller.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RbacError::PermissionNotFound { .. }
                | RbacError::PermissionIdNotFound { .. }
                | RbacError::RoleNotFound { .. }
                | RbacError::RoleIdNotFound { .. }
        )
    }

    /// Check if this error should be logged at error level.
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            RbacError::PermissionNotFound { .. }
            | RbacError::PermissionIdNotFound { .. }
            | RbacError::RoleNotFound { .. }
            | RbacError::RoleIdNotFound { .. } => 404,

            RbacError::PermissionAlreadyExists { .. } | RbacError::RoleAlreadyExists { .. } => 409,

            RbacError::GuardMismatch { .. } | RbacError::InvalidWildcardInput(_) => 422,

            RbacError::Unauthorized(_) => 403,

            RbacError::Storage(_) | RbacError::Cache(_) | RbacError::Serialization(_) => 500,
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            RbacError::PermissionNotFound { .. } => "PERMISSION_NOT_FOUND",
            RbacError::PermissionIdNotFound { .. } => "PERMISSION_ID_NOT_FOUND",
            RbacError::RoleNotFound { .. } => "ROLE_NOT_FOUND",
            RbacError::RoleIdNotFound { .. } => "ROLE_ID_NOT_FOUND",
            RbacError::PermissionAlreadyExists { .. } => "PERMISSION_ALREADY_EXISTS",
            RbacError::RoleAlreadyExists { .. } => "ROLE_ALREADY_EXISTS",
            RbacError::GuardMismatch { .. } => "GUARD_MISMATCH",
            RbacError::InvalidWildcardInput(_) => "INVALID_WILDCARD_INPUT",
            RbacError::Unauthorized(_) => "UNAUTHORIZED",
            RbacError::Storage(_) => "STORAGE_ERROR",
            RbacError::Cache(_) => "CACHE_ERROR",
            RbacError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

impl From<serde_json::Error> for RbacError {
    fn from(err: serde_json::Error) -> Self {
        RbacError::Serialization(err.to_string())
    }
}

/// Why a gate denied access.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    /// No subject was supplied
    NotLoggedIn,
    /// None of the required roles are held
    MissingRoles,
    /// None of the required permissions are held
    MissingPermissions,
    /// Neither a required role nor a required permission is held
    MissingRolesOrPermissions,
}

/// A denial raised by an authorization gate.
///
/// Required names only appear in the message when `display_names` is set,
/// so deployments can avoid leaking their permission catalogue.
///
/// # Example
///
/// ```
/// use rolegate_rbac::Denial;
///
/// let denial = Denial::missing_roles(vec!["Editor".into()], false);
/// assert_eq!(denial.to_string(), "User does not have the right roles.");
///
/// let denial = Denial::missing_roles(vec!["Editor".into()], true);
/// assert!(denial.to_string().ends_with("Necessary roles are Editor"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Denial {
    /// Denial reason
    pub kind: DenialKind,
    /// Names the gate required
    #[serde(default)]
    pub required: Vec<String>,
    /// Whether `required` is rendered into the message
    #[serde(default)]
    pub display_names: bool,
}

impl Denial {
    /// Denial for a missing subject.
    pub fn not_logged_in() -> Self {
        Self {
            kind: DenialKind::NotLoggedIn,
            required: Vec::new(),
            display_names: false,
        }
    }

    /// Denial for missing roles.
    pub fn missing_roles(required: Vec<String>, display_names: bool) -> Self {
        Self {
            kind: DenialKind::MissingRoles,
            required,
            display_names,
        }
    }

    /// Denial for missing permissions.
    pub fn missing_permissions(required: Vec<String>, display_names: bool) -> Self {
        Self {
            kind: DenialKind::MissingPermissions,
            required,
            display_names,
        }
    }

    /// Denial when neither a role nor a permission matched.
    pub fn missing_roles_or_permissions(required: Vec<String>, display_names: bool) -> Self {
        Self {
            kind: DenialKind::MissingRolesOrPermissions,
            required,
            display_names,
        }
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (message, label) = match self.kind {
            DenialKind::NotLoggedIn => return f.write_str("User is not logged in."),
            DenialKind::MissingRoles => ("User does not have the right roles.", "roles"),
            DenialKind::MissingPermissions => {
                ("User does not have the right permissions.", "permissions")
            }
            DenialKind::MissingRolesOrPermissions => (
                "User does not have any of the necessary access rights.",
                "roles or permissions",
            ),
        };

        f.write_str(message)?;
        if self.display_names && !self.required.is_empty() {
            write!(f, " Necessary {} are {}", label, self.required.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        let err = RbacError::PermissionNotFound {
            name: "posts.view".into(),
            guard: "web".into(),
        };
        assert!(err.is_not_found());
        assert_eq!(err.status_code(), 404);
        assert_eq!(
            err.to_string(),
            "There is no permission named `posts.view` for guard `web`."
        );

        let err = RbacError::RoleAlreadyExists {
            name: "Editor".into(),
            guard: "web".into(),
        };
        assert!(!err.is_not_found());
        assert_eq!(err.status_code(), 409);
    }

    #[test]
    fn test_guard_mismatch_message_lists_expected_guards() {
        let err = RbacError::GuardMismatch {
            given: "admin".into(),
            expected: vec!["web".into(), "api".into()],
        };
        assert_eq!(
            err.to_string(),
            "The given role or permission should use guard `web, api` instead of `admin`."
        );
        assert_eq!(err.error_code(), "GUARD_MISMATCH");
        assert_eq!(err.status_code(), 422);
    }

    #[test]
    fn test_denial_messages() {
        assert_eq!(Denial::not_logged_in().to_string(), "User is not logged in.");

        let hidden = Denial::missing_permissions(vec!["posts.edit".into()], false);
        assert_eq!(hidden.to_string(), "User does not have the right permissions.");

        let shown = Denial::missing_roles_or_permissions(
            vec!["Editor".into(), "posts.edit".into()],
            true,
        );
        assert_eq!(
            shown.to_string(),
            "User does not have any of the necessary access rights. \
             Necessary roles or permissions are Editor, posts.edit"
        );
    }

    #[test]
    fn test_unauthorized_is_forbidden() {
        let err = RbacError::Unauthorized(Denial::not_logged_in());
        assert_eq!(err.status_code(), 403);
        assert!(!err.is_server_error());
        assert!(RbacError::Storage("down".into()).is_server_error());
    }
}
