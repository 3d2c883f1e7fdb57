//! # Rolegate Events
//!
//! Notifications emitted when roles and permissions are attached to or
//! detached from subjects and roles.
//!
//! ## Overview
//!
//! The access resolver hands every assignment change to a
//! [`NotificationSink`]. Sinks are fire-and-forget: the resolver never waits
//! on delivery.
//!
//! ## Topics
//!
//! Events are routed by `<assignment>.<kind>`:
//!
//! - `role.attached`, `role.detached`
//! - `permission.attached`, `permission.detached`
//!
//! ## Usage
//!
//! ```rust
//! use rolegate_events::{AccessEvent, Holder, MemoryEventBus, NotificationSink};
//! use rolegate_rbac::{AssignmentKind, SubjectRef};
//!
//! let bus = MemoryEventBus::new();
//! let mut sub = bus.subscribe("permission.*");
//!
//! bus.notify(AccessEvent::detached(
//!     AssignmentKind::Permission,
//!     Holder::subject(SubjectRef::new("user", 9)),
//!     vec![4],
//! ));
//!
//! let event = sub.try_recv().unwrap();
//! assert_eq!(event.keys, vec![4]);
//! ```

pub mod bus;
pub mod types;

pub use bus::{
    topic_matches, BusStats, LogSink, MemoryEventBus, NoopSink, NotificationSink, NotifyError,
    NotifyResult, Subscription,
};
pub use types::{AccessEvent, EventKind, Holder};
