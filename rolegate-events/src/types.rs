//! Assignment event types
//!
//! This module defines the notifications emitted when roles or permissions
//! are attached to, or detached from, a subject or a role.

use chrono::{DateTime, Utc};
use rolegate_rbac::{AssignmentKind, RoleId, SubjectRef};
use rolegate_tenancy::TenantId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Direction of an assignment change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Roles or permissions were attached
    Attached,
    /// Roles or permissions were detached
    Detached,
}

impl EventKind {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Attached => "attached",
            Self::Detached => "detached",
        }
    }
}

/// Who gained or lost the assignment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Holder {
    /// A subject (user, api client, ...)
    Subject { subject: SubjectRef },
    /// A role receiving or losing permission grants
    Role { role_id: RoleId },
}

impl Holder {
    /// Holder for a subject.
    pub fn subject(subject: SubjectRef) -> Self {
        Holder::Subject { subject }
    }

    /// Holder for a role.
    pub fn role(role_id: RoleId) -> Self {
        Holder::Role { role_id }
    }
}

/// An attached/detached notification.
///
/// # Example
///
/// ```
/// use rolegate_events::{AccessEvent, EventKind, Holder};
/// use rolegate_rbac::{AssignmentKind, SubjectRef};
///
/// let event = AccessEvent::attached(
///     AssignmentKind::Role,
///     Holder::subject(SubjectRef::new("user", 1)),
///     vec![3, 4],
/// );
/// assert_eq!(event.kind, EventKind::Attached);
/// assert_eq!(event.topic(), "role.attached");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessEvent {
    /// Unique event ID
    pub id: Uuid,

    /// Attached or detached
    pub kind: EventKind,

    /// Whether roles or permissions changed
    pub assignment: AssignmentKind,

    /// Subject or role the change applies to
    pub holder: Holder,

    /// Primary keys of the roles or permissions involved
    pub keys: Vec<u64>,

    /// Tenant the assignment rows belong to
    pub tenant_id: Option<TenantId>,

    /// Timestamp when event was created
    pub timestamp: DateTime<Utc>,

    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AccessEvent {
    /// Create a new event.
    ///
    /// # Arguments
    ///
    /// * `kind` - Attached or detached
    /// * `assignment` - Roles or permissions
    /// * `holder` - Who the change applies to
    /// * `keys` - Primary keys of the changed records
    pub fn new(kind: EventKind, assignment: AssignmentKind, holder: Holder, keys: Vec<u64>) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            assignment,
            holder,
            keys,
            tenant_id: None,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Shorthand for an `Attached` event.
    pub fn attached(assignment: AssignmentKind, holder: Holder, keys: Vec<u64>) -> Self {
        Self::new(EventKind::Attached, assignment, holder, keys)
    }

    /// Shorthand for a `Detached` event.
    pub fn detached(assignment: AssignmentKind, holder: Holder, keys: Vec<u64>) -> Self {
        Self::new(EventKind::Detached, assignment, holder, keys)
    }

    /// Set tenant context.
    pub fn with_tenant(mut self, tenant_id: Option<TenantId>) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    /// Add metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Routing topic, `<assignment>.<kind>` (e.g. `permission.detached`).
    pub fn topic(&self) -> String {
        format!("{}.{}", self.assignment.as_str(), self.kind.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_topics() {
        let holder = Holder::role(RoleId(2));
        let event = AccessEvent::detached(AssignmentKind::Permission, holder, vec![9]);
        assert_eq!(event.topic(), "permission.detached");
    }

    #[test]
    fn test_event_serialization() {
        let event = AccessEvent::attached(
            AssignmentKind::Permission,
            Holder::subject(SubjectRef::new("user", 7)),
            vec![1, 2],
        )
        .with_tenant(Some(TenantId(3)))
        .with_metadata("source", serde_json::json!("sync"));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "attached");
        assert_eq!(json["assignment"], "permission");
        assert_eq!(json["holder"]["type"], "subject");
        assert_eq!(json["holder"]["subject"]["kind"], "user");
        assert_eq!(json["tenant_id"], 3);

        let back: AccessEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.id, event.id);
        assert_eq!(back.keys, vec![1, 2]);
    }
}
