//! # Rolegate Tenancy
//!
//! Tenant scoping for the rolegate access-control engine.
//!
//! ## Overview
//!
//! Every role, permission and assignment may belong to a tenant. Lookups are
//! scoped by the tenant held in a [`TenantContext`], a settable scalar that
//! lives for one logical request or worker task.
//!
//! ```text
//! request ─→ TenantContext::set(Some(tenant))
//!              ├─ role / permission lookups filter by tenant
//!              └─ assignments are written with the tenant id
//! request end ─→ TenantContext::reset()
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use rolegate_tenancy::{TenantContext, TenantId};
//!
//! let ctx = TenantContext::new();
//! ctx.set(Some(TenantId(7)));
//! assert_eq!(ctx.get(), Some(TenantId(7)));
//!
//! {
//!     let _scope = ctx.scoped(Some(TenantId(8)));
//!     assert_eq!(ctx.get(), Some(TenantId(8)));
//! }
//! assert_eq!(ctx.get(), Some(TenantId(7)));
//!
//! ctx.reset();
//! assert!(ctx.get().is_none());
//! ```
//!
//! Long-lived workers must call `reset()` between requests; nothing clears
//! the context automatically.

pub mod context;

pub use context::{TenantContext, TenantId, TenantScope};
