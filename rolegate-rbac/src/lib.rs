//! # Rolegate RBAC
//!
//! The data model and pure decision primitives of the rolegate access-control
//! engine.
//!
//! ## Overview
//!
//! The rolegate-rbac crate handles:
//! - **Records**: Permissions and roles, each scoped by guard and optional tenant
//! - **Subjects**: Polymorphic references (`kind` + `id`) to permission holders
//! - **Targets**: The shapes a caller may ask about (name, pipe list, id, record, list)
//! - **Guards**: Which authentication guard applies to a subject or record
//! - **Wildcards**: Whether a held pattern such as `admin.*` implies a permission
//!
//! ## Architecture
//!
//! ```text
//! Subject ──(assignment)──→ Role ──(grant)──→ Permission
//!    └──────────(direct assignment)─────────────┘
//!
//! every record: name + guard_name [+ tenant_id]
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use rolegate_rbac::{GuardResolver, PermissionTarget, WildcardMatcher};
//!
//! // Wildcard matching
//! let matcher = WildcardMatcher::new("posts.*").unwrap();
//! assert!(matcher.implies("posts.edit"));
//! assert!(!matcher.implies("users.edit"));
//!
//! // Pipe lists expand to alternatives
//! let target = PermissionTarget::from("posts.view|posts.edit");
//! assert_eq!(target.flatten().len(), 2);
//!
//! // Guard resolution falls back to the default guard
//! let guards = GuardResolver::new("web");
//! assert_eq!(guards.default_name_for_kind("user"), "web");
//! ```

pub mod error;
pub mod guard;
pub mod records;
pub mod target;
pub mod wildcard;

// Re-export main types for convenience
pub use error::{Denial, DenialKind, RbacError, RbacResult};
pub use guard::{GuardDefinition, GuardResolver, Guarded};
pub use records::{
    AccessRecord, AssignmentKind, NewRecord, PermissionId, PermissionRecord, RecordAttributes,
    RoleId, RoleRecord, SubjectRef,
};
pub use target::{parse_pipe_list, Backed, PermissionTarget, RoleTarget, Target};
pub use wildcard::WildcardMatcher;

pub use rolegate_tenancy::TenantId;
