//! Active tenant context
//!
//! This module provides the `TenantContext` that holds the tenant every
//! permission lookup and assignment write is scoped to.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a tenant (isolation boundary).
///
/// # Examples
///
/// ```
/// use rolegate_tenancy::TenantId;
///
/// let tenant = TenantId::from(42);
/// assert_eq!(tenant.to_string(), "42");
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct TenantId(pub u64);

impl TenantId {
    /// Get the raw numeric value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TenantId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Holder of the active tenant for a logical request or worker task.
///
/// The context is a nullable scalar. `None` means no tenant is selected, in
/// which case only tenant-less (global) records are visible to scoped lookups.
///
/// # Examples
///
/// ```
/// use rolegate_tenancy::{TenantContext, TenantId};
///
/// let ctx = TenantContext::with_tenant(TenantId(1));
/// assert_eq!(ctx.get(), Some(TenantId(1)));
///
/// ctx.set(None);
/// assert!(ctx.get().is_none());
/// ```
#[derive(Debug, Default)]
pub struct TenantContext {
    current: RwLock<Option<TenantId>>,
}

impl TenantContext {
    /// Creates a context with no tenant selected.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context with the given tenant already selected.
    pub fn with_tenant(tenant: TenantId) -> Self {
        Self {
            current: RwLock::new(Some(tenant)),
        }
    }

    /// Get the active tenant.
    pub fn get(&self) -> Option<TenantId> {
        *self.current.read()
    }

    /// Set (or clear) the active tenant.
    ///
    /// # Returns
    ///
    /// The previously active tenant
    pub fn set(&self, tenant: Option<TenantId>) -> Option<TenantId> {
        let previous = std::mem::replace(&mut *self.current.write(), tenant);
        if previous != tenant {
            tracing::debug!(
                previous = ?previous,
                current = ?tenant,
                "Tenant context switched"
            );
        }
        previous
    }

    /// Clear the active tenant.
    ///
    /// This is the explicit lifecycle hook for reused execution contexts
    /// (worker pools, long-lived processes) between logical requests.
    pub fn reset(&self) {
        self.set(None);
    }

    /// Switch to `tenant` until the returned scope is dropped.
    ///
    /// The previously active tenant is restored on drop.
    pub fn scoped(&self, tenant: Option<TenantId>) -> TenantScope<'_> {
        let previous = self.set(tenant);
        TenantScope {
            context: self,
            previous,
        }
    }
}

/// Guard returned by [`TenantContext::scoped`].
#[derive(Debug)]
pub struct TenantScope<'a> {
    context: &'a TenantContext,
    previous: Option<TenantId>,
}

impl TenantScope<'_> {
    /// The tenant that will be restored when this scope ends.
    pub fn previous(&self) -> Option<TenantId> {
        self.previous
    }
}

impl Drop for TenantScope<'_> {
    fn drop(&mut self) {
        self.context.set(self.previous);
    }
}
