//! # Records
//!
//! Permission and role records plus the polymorphic subject reference.
//! Records are owned by the storage collaborator; rolegate only reads and
//! creates them.

use rolegate_tenancy::TenantId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Primary key of a permission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct PermissionId(pub u64);

/// Primary key of a role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct RoleId(pub u64);

impl fmt::Display for PermissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named permission (e.g. `posts.edit` or the wildcard `posts.*`).
///
/// The name is unique per guard and tenant.
///
/// # Example
///
/// ```
/// use rolegate_rbac::{PermissionId, PermissionRecord};
///
/// let perm = PermissionRecord::new(PermissionId(1), "posts.*", "web");
/// assert!(perm.is_wildcard());
/// assert!(perm.tenant_id.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PermissionRecord {
    /// Primary key.
    pub id: PermissionId,
    /// Permission name.
    pub name: String,
    /// Guard this permission belongs to.
    pub guard_name: String,
    /// Owning tenant, `None` for global permissions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
}

impl PermissionRecord {
    /// Create a global permission record.
    pub fn new(id: PermissionId, name: impl Into<String>, guard_name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            guard_name: guard_name.into(),
            tenant_id: None,
        }
    }

    /// Scope the record to a tenant.
    pub fn with_tenant(mut self, tenant: TenantId) -> Self {
        self.tenant_id = Some(tenant);
        self
    }

    /// Check if the name contains the wildcard marker.
    pub fn is_wildcard(&self) -> bool {
        self.name.contains('*')
    }
}

/// A named role granting a set of permissions.
///
/// # Example
///
/// ```
/// use rolegate_rbac::{RoleId, RoleRecord, TenantId};
///
/// let role = RoleRecord::new(RoleId(1), "Editor", "web").with_tenant(TenantId(3));
/// assert_eq!(role.tenant_id, Some(TenantId(3)));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RoleRecord {
    /// Primary key.
    pub id: RoleId,
    /// Role name.
    pub name: String,
    /// Guard this role belongs to.
    pub guard_name: String,
    /// Owning tenant, `None` for global roles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<TenantId>,
}

impl RoleRecord {
    /// Create a global role record.
    pub fn new(id: RoleId, name: impl Into<String>, guard_name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            guard_name: guard_name.into(),
            tenant_id: None,
        }
    }

    /// Scope the record to a tenant.
    pub fn with_tenant(mut self, tenant: TenantId) -> Self {
        self.tenant_id = Some(tenant);
        self
    }
}

/// Shared read access to permission and role records.
pub trait AccessRecord {
    /// Primary key as a raw integer.
    fn key(&self) -> u64;

    /// Record name.
    fn name(&self) -> &str;

    /// Guard the record belongs to.
    fn guard_name(&self) -> &str;

    /// Owning tenant.
    fn tenant_id(&self) -> Option<TenantId>;

    /// Check if the record is visible from `tenant`.
    ///
    /// Global records are visible everywhere; tenant records only inside
    /// their own tenant.
    fn visible_in(&self, tenant: Option<TenantId>) -> bool {
        match self.tenant_id() {
            None => true,
            Some(own) => tenant == Some(own),
        }
    }
}

/// Pick the record visible from `tenant`, the tenant's own before a global one.
///
/// # Example
///
/// ```
/// use rolegate_rbac::records::pick_visible;
/// use rolegate_rbac::{RoleId, RoleRecord, TenantId};
///
/// let roles = vec![
///     RoleRecord::new(RoleId(1), "Admin", "web"),
///     RoleRecord::new(RoleId(2), "Admin", "web").with_tenant(TenantId(1)),
/// ];
/// assert_eq!(pick_visible(roles.iter(), Some(TenantId(1))).unwrap().id, RoleId(2));
/// assert_eq!(pick_visible(roles.iter(), Some(TenantId(9))).unwrap().id, RoleId(1));
/// ```
pub fn pick_visible<'a, T, I>(candidates: I, tenant: Option<TenantId>) -> Option<&'a T>
where
    T: AccessRecord + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut global = None;
    for candidate in candidates.into_iter().filter(|c| c.visible_in(tenant)) {
        if candidate.tenant_id().is_some() {
            return Some(candidate);
        }
        global.get_or_insert(candidate);
    }
    global
}

impl AccessRecord for PermissionRecord {
    fn key(&self) -> u64 {
        self.id.0
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn guard_name(&self) -> &str {
        &self.guard_name
    }

    fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }
}

impl AccessRecord for RoleRecord {
    fn key(&self) -> u64 {
        self.id.0
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn guard_name(&self) -> &str {
        &self.guard_name
    }

    fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }
}

/// Caller-supplied attributes for creating a permission or role.
///
/// Missing guard and tenant are filled in by the resolver (default guard,
/// active tenant when tenancy is enabled).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordAttributes {
    /// Record name.
    pub name: String,
    /// Explicit guard, or `None` for the default guard.
    #[serde(default)]
    pub guard_name: Option<String>,
    /// Explicit tenant, or `None` for the active tenant.
    #[serde(default)]
    pub tenant_id: Option<TenantId>,
}

impl RecordAttributes {
    /// Attributes with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the guard.
    pub fn with_guard(mut self, guard: impl Into<String>) -> Self {
        self.guard_name = Some(guard.into());
        self
    }

    /// Set the tenant.
    pub fn with_tenant(mut self, tenant: TenantId) -> Self {
        self.tenant_id = Some(tenant);
        self
    }
}

/// Fully resolved attributes handed to the storage collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewRecord {
    /// Record name.
    pub name: String,
    /// Guard name.
    pub guard_name: String,
    /// Owning tenant.
    pub tenant_id: Option<TenantId>,
}

/// Polymorphic reference to a permission holder.
///
/// `kind` is an explicit discriminator supplied by the host application
/// (e.g. `user`, `api_client`), never inferred.
///
/// # Example
///
/// ```
/// use rolegate_rbac::SubjectRef;
///
/// let subject = SubjectRef::new("user", 42);
/// assert_eq!(subject.to_string(), "user#42");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubjectRef {
    /// Subject kind discriminator.
    pub kind: String,
    /// Persisted identity of the subject.
    pub id: u64,
}

impl SubjectRef {
    /// Create a subject reference.
    pub fn new(kind: impl Into<String>, id: u64) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// What an assignment row points at.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentKind {
    /// Subject ↔ role.
    Role,
    /// Subject ↔ permission (direct), or role ↔ permission (grant).
    Permission,
}

impl AssignmentKind {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Role => "role",
            Self::Permission => "permission",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_record_visible_everywhere() {
        let perm = PermissionRecord::new(PermissionId(1), "posts.view", "web");
        assert!(perm.visible_in(None));
        assert!(perm.visible_in(Some(TenantId(1))));
    }

    #[test]
    fn test_tenant_record_visible_only_in_own_tenant() {
        let role = RoleRecord::new(RoleId(1), "Admin", "web").with_tenant(TenantId(1));
        assert!(role.visible_in(Some(TenantId(1))));
        assert!(!role.visible_in(Some(TenantId(2))));
        assert!(!role.visible_in(None));
    }

    #[test]
    fn test_record_serialization_skips_missing_tenant() {
        let perm = PermissionRecord::new(PermissionId(5), "posts.edit", "web");
        let json = serde_json::to_value(&perm).unwrap();
        assert_eq!(json["id"], 5);
        assert!(json.get("tenant_id").is_none());

        let back: PermissionRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, perm);
    }

    #[test]
    fn test_record_attributes_builder() {
        let attrs = RecordAttributes::new("Editor")
            .with_guard("api")
            .with_tenant(TenantId(4));
        assert_eq!(attrs.name, "Editor");
        assert_eq!(attrs.guard_name.as_deref(), Some("api"));
        assert_eq!(attrs.tenant_id, Some(TenantId(4)));
    }

    #[test]
    fn test_wildcard_detection() {
        assert!(PermissionRecord::new(PermissionId(1), "*", "web").is_wildcard());
        assert!(!PermissionRecord::new(PermissionId(2), "posts.view", "web").is_wildcard());
    }
}
