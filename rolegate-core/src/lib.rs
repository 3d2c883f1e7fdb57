//! # Rolegate Core
//!
//! Role and permission resolution with a cache-backed permission index.
//!
//! ## Overview
//!
//! The rolegate-core crate handles:
//! - **Collaborators**: The [`Repository`] and [`CacheStore`] traits, with in-memory implementations
//! - **Permission Index**: A shared, TTL-bounded snapshot of every permission and its granting roles
//! - **Access Resolution**: has-role and has-permission checks, scoped by guard and tenant
//! - **Assignment**: Idempotent assign, give, revoke and sync, with staging for unsaved subjects
//! - **Gates**: Boundary checks returning a denial instead of a boolean
//! - **Admin Commands**: Record creation, super user provisioning, cache reset
//!
//! ## Features
//!
//! - `redis`: Redis-backed [`CacheStore`] shared between processes
//!
//! ## Usage
//!
//! ```rust
//! use rolegate_core::{AccessResolver, MemoryCacheStore, MemoryRepository, RbacConfig, Subject};
//! use rolegate_rbac::RecordAttributes;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let resolver = AccessResolver::new(
//!     MemoryRepository::new(),
//!     MemoryCacheStore::new(),
//!     RbacConfig::default().with_wildcard(true),
//! );
//!
//! resolver.create_permission(RecordAttributes::new("posts.*")).await.unwrap();
//! let editor = resolver.create_role(RecordAttributes::new("Editor")).await.unwrap();
//! resolver.give_permission_to_role(&editor, "posts.*").await.unwrap();
//!
//! let user = Subject::new("user", 1);
//! resolver.assign_role(&user, "Editor").await.unwrap();
//!
//! assert!(resolver.has_permission_to(&user, "posts.publish", None).await.unwrap());
//! assert!(!resolver.has_permission_to(&user, "users.delete", None).await.unwrap());
//! # });
//! ```
//!
//! ## Request boundaries
//!
//! Workers that serve many requests call [`AccessResolver::end_request`]
//! between them. It resets the tenant context and drops the process-local
//! snapshot without touching the shared cache entry.

pub mod admin;
pub mod authorize;
pub mod config;
pub mod index;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_cache;
pub mod resolver;
pub mod store;
pub mod subject;

// Re-export main types for convenience
pub use admin::{AdminCommands, SuperuserReport, DEFAULT_PERMISSIONS, SUPER_ADMIN_ROLE};
pub use config::RbacConfig;
pub use index::{
    IndexedPermission, PermissionFilter, PermissionIndex, RoleGrant, Snapshot, WildcardEntry,
};
pub use memory::{MemoryCacheStore, MemoryRepository};
pub use resolver::AccessResolver;
pub use store::{CacheStore, GrantedRole, PermissionGrants, Repository};
pub use subject::Subject;

#[cfg(feature = "redis")]
pub use redis_cache::{RedisCacheConfig, RedisCacheStore};

pub use rolegate_rbac::{RbacError, RbacResult};
