//! Deployment configuration
//!
//! [`RbacConfig`] carries the settings the resolver is bound to at startup:
//! guards, feature switches and the shared cache key and lifetime.

use rolegate_rbac::{GuardDefinition, GuardResolver};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default shared cache key for the permission snapshot.
pub const DEFAULT_CACHE_KEY: &str = "rolegate.permission.cache";

/// Default snapshot lifetime (24 hours).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 24 * 60 * 60;

/// Access-control configuration.
///
/// # Example
///
/// ```
/// use rolegate_core::RbacConfig;
/// use std::time::Duration;
///
/// let config = RbacConfig::default()
///     .with_wildcard(true)
///     .with_cache_ttl(Duration::from_secs(60));
///
/// assert!(config.wildcard_permissions);
/// assert_eq!(config.cache_ttl(), Duration::from_secs(60));
/// assert_eq!(config.default_guard, "web");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RbacConfig {
    /// Guard used when nothing more specific applies
    pub default_guard: String,

    /// Configured guards and the subject kinds they serve
    pub guards: Vec<GuardDefinition>,

    /// Guard pinned per subject kind
    pub kind_guards: HashMap<String, String>,

    /// Evaluate permissions with wildcard patterns
    pub wildcard_permissions: bool,

    /// Scope records and assignments by the active tenant
    pub tenancy: bool,

    /// Shared cache key of the permission snapshot
    pub cache_key: String,

    /// Snapshot lifetime in the shared cache, in seconds
    pub cache_ttl_secs: u64,

    /// Emit attached/detached notifications
    pub events_enabled: bool,

    /// Include required names in denial messages
    pub display_names_in_denials: bool,
}

impl Default for RbacConfig {
    fn default() -> Self {
        Self {
            default_guard: "web".to_string(),
            guards: vec![
                GuardDefinition::new("web").serving("user"),
                GuardDefinition::new("api").serving("user"),
            ],
            kind_guards: HashMap::new(),
            wildcard_permissions: false,
            tenancy: false,
            cache_key: DEFAULT_CACHE_KEY.to_string(),
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            events_enabled: false,
            display_names_in_denials: false,
        }
    }
}

impl RbacConfig {
    /// Load configuration from `ROLEGATE_*` environment variables.
    ///
    /// Unset or unparsable variables keep their defaults.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `ROLEGATE_DEFAULT_GUARD` | `default_guard` |
    /// | `ROLEGATE_WILDCARD` | `wildcard_permissions` |
    /// | `ROLEGATE_TENANCY` | `tenancy` |
    /// | `ROLEGATE_CACHE_KEY` | `cache_key` |
    /// | `ROLEGATE_CACHE_TTL_SECS` | `cache_ttl_secs` |
    /// | `ROLEGATE_EVENTS` | `events_enabled` |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_guard: std::env::var("ROLEGATE_DEFAULT_GUARD")
                .unwrap_or(defaults.default_guard),
            wildcard_permissions: env_flag("ROLEGATE_WILDCARD")
                .unwrap_or(defaults.wildcard_permissions),
            tenancy: env_flag("ROLEGATE_TENANCY").unwrap_or(defaults.tenancy),
            cache_key: std::env::var("ROLEGATE_CACHE_KEY").unwrap_or(defaults.cache_key),
            cache_ttl_secs: env_parse("ROLEGATE_CACHE_TTL_SECS")
                .unwrap_or(defaults.cache_ttl_secs),
            events_enabled: env_flag("ROLEGATE_EVENTS").unwrap_or(defaults.events_enabled),
            ..defaults
        }
    }

    /// Set the default guard.
    pub fn with_default_guard(mut self, guard: impl Into<String>) -> Self {
        self.default_guard = guard.into();
        self
    }

    /// Register a guard.
    pub fn with_guard(mut self, guard: GuardDefinition) -> Self {
        self.guards.push(guard);
        self
    }

    /// Pin a subject kind to a guard.
    pub fn with_kind_guard(mut self, kind: impl Into<String>, guard: impl Into<String>) -> Self {
        self.kind_guards.insert(kind.into(), guard.into());
        self
    }

    /// Toggle wildcard evaluation.
    pub fn with_wildcard(mut self, enabled: bool) -> Self {
        self.wildcard_permissions = enabled;
        self
    }

    /// Toggle tenant scoping.
    pub fn with_tenancy(mut self, enabled: bool) -> Self {
        self.tenancy = enabled;
        self
    }

    /// Toggle notifications.
    pub fn with_events(mut self, enabled: bool) -> Self {
        self.events_enabled = enabled;
        self
    }

    /// Set the shared cache key.
    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = key.into();
        self
    }

    /// Set the snapshot lifetime.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_secs = ttl.as_secs();
        self
    }

    /// Show required names in denial messages.
    pub fn with_display_names(mut self, enabled: bool) -> Self {
        self.display_names_in_denials = enabled;
        self
    }

    /// Snapshot lifetime.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Build the guard resolver for this deployment.
    pub fn guard_resolver(&self) -> GuardResolver {
        let resolver = self
            .guards
            .iter()
            .cloned()
            .fold(GuardResolver::new(&self.default_guard), GuardResolver::with_guard);
        self.kind_guards
            .iter()
            .fold(resolver, |resolver, (kind, guard)| {
                resolver.with_kind_guard(kind.clone(), guard.clone())
            })
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => {
            tracing::warn!(variable = name, value = other, "Ignoring invalid boolean setting");
            None
        }
    }
}

fn env_parse(name: &str) -> Option<u64> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(variable = name, value = %value, "Ignoring invalid numeric setting");
            None
        }
    }
}
