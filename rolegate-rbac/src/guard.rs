//! # Guards
//!
//! A guard is an authentication namespace (for example `web` for browser
//! sessions and `api` for tokens). Roles and permissions belong to exactly
//! one guard; a subject may be valid under several.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{RbacError, RbacResult};
use crate::records::{AccessRecord, SubjectRef};

/// A configured guard and the subject kinds its provider serves.
///
/// # Example
///
/// ```
/// use rolegate_rbac::GuardDefinition;
///
/// let api = GuardDefinition::new("api").serving("user").serving("service");
/// assert!(api.serves("service"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuardDefinition {
    /// Guard name
    pub name: String,
    /// Subject kinds this guard authenticates
    #[serde(default)]
    pub subject_kinds: Vec<String>,
}

impl GuardDefinition {
    /// Create a guard serving no subject kinds yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subject_kinds: Vec::new(),
        }
    }

    /// Add a subject kind served by this guard.
    pub fn serving(mut self, kind: impl Into<String>) -> Self {
        self.subject_kinds.push(kind.into());
        self
    }

    /// Check if this guard serves the subject kind.
    pub fn serves(&self, kind: &str) -> bool {
        self.subject_kinds.iter().any(|k| k == kind)
    }
}

/// Anything that can hold roles and permissions.
pub trait Guarded {
    /// The subject kind discriminator.
    fn subject_kind(&self) -> &str;

    /// An explicit guard pinned on this instance.
    fn guard_attribute(&self) -> Option<&str> {
        None
    }
}

impl Guarded for SubjectRef {
    fn subject_kind(&self) -> &str {
        &self.kind
    }
}

/// Decides which guards apply to a subject.
///
/// Resolution order for a subject:
/// 1. an explicit guard attribute on the instance
/// 2. the guard named for the subject kind (`kind_guards`)
/// 3. every configured guard serving the subject kind
/// 4. the deployment default
///
/// # Example
///
/// ```
/// use rolegate_rbac::{GuardDefinition, GuardResolver, SubjectRef};
///
/// let guards = GuardResolver::new("web")
///     .with_guard(GuardDefinition::new("web").serving("user"))
///     .with_guard(GuardDefinition::new("api").serving("user").serving("client"))
///     .with_kind_guard("robot", "machine");
///
/// let user = SubjectRef::new("user", 1);
/// assert_eq!(guards.names_for(&user), vec!["web", "api"]);
/// assert_eq!(guards.default_name_for(&user), "web");
///
/// assert_eq!(guards.default_name_for_kind("client"), "api");
/// assert_eq!(guards.default_name_for_kind("robot"), "machine");
/// assert_eq!(guards.default_name_for_kind("unknown"), "web");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuardResolver {
    default_guard: String,
    #[serde(default)]
    guards: Vec<GuardDefinition>,
    #[serde(default)]
    kind_guards: HashMap<String, String>,
}

impl GuardResolver {
    /// Create a resolver with only a default guard.
    pub fn new(default_guard: impl Into<String>) -> Self {
        Self {
            default_guard: default_guard.into(),
            guards: Vec::new(),
            kind_guards: HashMap::new(),
        }
    }

    /// Register a configured guard.
    pub fn with_guard(mut self, guard: GuardDefinition) -> Self {
        self.guards.push(guard);
        self
    }

    /// Pin a subject kind to a guard.
    pub fn with_kind_guard(mut self, kind: impl Into<String>, guard: impl Into<String>) -> Self {
        self.kind_guards.insert(kind.into(), guard.into());
        self
    }

    /// The deployment default guard.
    pub fn default_guard(&self) -> &str {
        &self.default_guard
    }

    /// All guards the subject is valid under, in configuration order.
    pub fn names_for(&self, subject: &impl Guarded) -> Vec<String> {
        if let Some(guard) = subject.guard_attribute() {
            return vec![guard.to_string()];
        }
        self.names_for_kind(subject.subject_kind())
    }

    /// All guards a subject kind is valid under.
    pub fn names_for_kind(&self, kind: &str) -> Vec<String> {
        if let Some(guard) = self.kind_guards.get(kind) {
            return vec![guard.clone()];
        }

        let mut names: Vec<String> = Vec::new();
        for guard in self.guards.iter().filter(|g| g.serves(kind)) {
            if !names.contains(&guard.name) {
                names.push(guard.name.clone());
            }
        }

        if names.is_empty() {
            names.push(self.default_guard.clone());
        }
        names
    }

    /// The guard used when a caller does not name one.
    ///
    /// Prefers the deployment default when the subject is valid under it,
    /// otherwise the first applicable guard.
    pub fn default_name_for(&self, subject: &impl Guarded) -> String {
        self.pick_default(self.names_for(subject))
    }

    /// [`default_name_for`](Self::default_name_for) for a bare subject kind.
    pub fn default_name_for_kind(&self, kind: &str) -> String {
        self.pick_default(self.names_for_kind(kind))
    }

    fn pick_default(&self, names: Vec<String>) -> String {
        if names.iter().any(|n| *n == self.default_guard) {
            return self.default_guard.clone();
        }
        names
            .into_iter()
            .next()
            .unwrap_or_else(|| self.default_guard.clone())
    }

    /// Reject a role or permission whose guard the subject cannot satisfy.
    ///
    /// # Errors
    ///
    /// Returns `GuardMismatch` naming the record's guard and the guards the
    /// subject is valid under.
    pub fn ensure_shares_guard(
        &self,
        subject: &impl Guarded,
        record: &impl AccessRecord,
    ) -> RbacResult<()> {
        let expected = self.names_for(subject);
        if expected.iter().any(|g| g == record.guard_name()) {
            return Ok(());
        }
        Err(RbacError::GuardMismatch {
            given: record.guard_name().to_string(),
            expected,
        })
    }
}

impl Default for GuardResolver {
    fn default() -> Self {
        Self::new("web")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{RoleId, RoleRecord};

    struct Pinned;

    impl Guarded for Pinned {
        fn subject_kind(&self) -> &str {
            "user"
        }

        fn guard_attribute(&self) -> Option<&str> {
            Some("admin")
        }
    }

    fn resolver() -> GuardResolver {
        GuardResolver::new("web")
            .with_guard(GuardDefinition::new("api").serving("user"))
            .with_guard(GuardDefinition::new("web").serving("user"))
            .with_guard(GuardDefinition::new("partner").serving("client"))
    }

    #[test]
    fn test_attribute_wins() {
        let guards = resolver();
        assert_eq!(guards.names_for(&Pinned), vec!["admin"]);
        assert_eq!(guards.default_name_for(&Pinned), "admin");
    }

    #[test]
    fn test_default_preferred_when_applicable() {
        let guards = resolver();
        let user = SubjectRef::new("user", 1);
        assert_eq!(guards.names_for(&user), vec!["api", "web"]);
        assert_eq!(guards.default_name_for(&user), "web");
    }

    #[test]
    fn test_first_guard_when_default_not_applicable() {
        let guards = resolver();
        assert_eq!(guards.default_name_for_kind("client"), "partner");
    }

    #[test]
    fn test_unknown_kind_falls_back_to_default() {
        let guards = resolver();
        assert_eq!(guards.names_for_kind("ghost"), vec!["web"]);
    }

    #[test]
    fn test_guard_mismatch_is_rejected() {
        let guards = resolver();
        let user = SubjectRef::new("user", 1);

        let ok = RoleRecord::new(RoleId(1), "Editor", "api");
        assert!(guards.ensure_shares_guard(&user, &ok).is_ok());

        let bad = RoleRecord::new(RoleId(2), "Partner", "partner");
        let err = guards.ensure_shares_guard(&user, &bad).unwrap_err();
        assert_eq!(
            err,
            RbacError::GuardMismatch {
                given: "partner".into(),
                expected: vec!["api".into(), "web".into()],
            }
        );
    }
}
