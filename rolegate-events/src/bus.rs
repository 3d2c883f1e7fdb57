//! Notification delivery
//!
//! This module provides the fire-and-forget [`NotificationSink`] the access
//! resolver writes to, and an in-memory broadcast bus implementing it.

use crate::types::AccessEvent;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::broadcast;

/// Notification error types.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Subscriber fell behind and missed events
    #[error("Subscriber lagged, {0} events skipped")]
    Lagged(u64),

    /// No event is waiting
    #[error("No event available")]
    Empty,

    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,
}

/// Result type for notification operations.
pub type NotifyResult<T> = Result<T, NotifyError>;

/// Receiver of attached/detached notifications.
///
/// `notify` must not block; delivery problems are the sink's to log.
pub trait NotificationSink: Send + Sync {
    /// Deliver an event.
    fn notify(&self, event: AccessEvent);
}

/// Sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl NotificationSink for NoopSink {
    fn notify(&self, _event: AccessEvent) {}
}

/// Sink that records every event as a structured log line.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, event: AccessEvent) {
        tracing::info!(
            topic = %event.topic(),
            event_id = %event.id,
            holder = ?event.holder,
            keys = ?event.keys,
            tenant = ?event.tenant_id,
            "Assignment changed"
        );
    }
}

/// Subscription handle for receiving events.
pub struct Subscription {
    /// Subscription ID
    pub id: String,
    /// Topic pattern
    pub pattern: String,
    receiver: broadcast::Receiver<AccessEvent>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .finish()
    }
}

impl Subscription {
    /// Receive the next event.
    pub async fn recv(&mut self) -> NotifyResult<AccessEvent> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Lagged(n) => NotifyError::Lagged(n),
            broadcast::error::RecvError::Closed => NotifyError::ChannelClosed,
        })
    }

    /// Receive an event if one is already waiting.
    pub fn try_recv(&mut self) -> NotifyResult<AccessEvent> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Lagged(n) => NotifyError::Lagged(n),
            broadcast::error::TryRecvError::Empty => NotifyError::Empty,
            broadcast::error::TryRecvError::Closed => NotifyError::ChannelClosed,
        })
    }
}

/// Event bus statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Total events published
    pub events_published: u64,
    /// Total deliveries to live subscribers
    pub events_delivered: u64,
    /// Active subscription patterns
    pub active_patterns: usize,
}

/// In-memory broadcast bus.
///
/// Subscribers register a topic pattern:
/// - `*` matches any single segment
/// - `#` matches zero or more segments
///
/// # Example
///
/// ```
/// use rolegate_events::{AccessEvent, Holder, MemoryEventBus, NotificationSink};
/// use rolegate_rbac::{AssignmentKind, SubjectRef};
///
/// let bus = MemoryEventBus::new();
/// let mut sub = bus.subscribe("role.*");
///
/// bus.notify(AccessEvent::attached(
///     AssignmentKind::Role,
///     Holder::subject(SubjectRef::new("user", 1)),
///     vec![1],
/// ));
///
/// assert_eq!(sub.try_recv().unwrap().topic(), "role.attached");
/// ```
pub struct MemoryEventBus {
    subscribers: RwLock<HashMap<String, broadcast::Sender<AccessEvent>>>,
    events_published: AtomicU64,
    events_delivered: AtomicU64,
    channel_capacity: usize,
}

impl std::fmt::Debug for MemoryEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEventBus")
            .field("channel_capacity", &self.channel_capacity)
            .finish()
    }
}

impl MemoryEventBus {
    /// Create a new in-memory event bus.
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create with custom channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            events_published: AtomicU64::new(0),
            events_delivered: AtomicU64::new(0),
            channel_capacity: capacity,
        }
    }

    /// Subscribe to a topic pattern (e.g. `role.attached`, `permission.*`, `#`).
    pub fn subscribe(&self, pattern: &str) -> Subscription {
        let receiver = {
            let mut subscribers = self.subscribers.write();
            match subscribers.get(pattern) {
                Some(sender) => sender.subscribe(),
                None => {
                    let (sender, receiver) = broadcast::channel(self.channel_capacity);
                    subscribers.insert(pattern.to_string(), sender);
                    receiver
                }
            }
        };

        Subscription {
            id: uuid::Uuid::now_v7().to_string(),
            pattern: pattern.to_string(),
            receiver,
        }
    }

    /// Publish to every matching pattern.
    ///
    /// # Returns
    ///
    /// The number of receivers the event reached
    pub fn publish(&self, event: AccessEvent) -> usize {
        let topic = event.topic();
        self.events_published.fetch_add(1, Ordering::Relaxed);

        let mut delivered = 0;
        let subscribers = self.subscribers.read();
        for (pattern, sender) in subscribers.iter() {
            if !topic_matches(pattern, &topic) {
                continue;
            }
            // A send error only means nobody is listening right now.
            if let Ok(count) = sender.send(event.clone()) {
                delivered += count;
            }
        }

        self.events_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        tracing::debug!(topic = %topic, event_id = %event.id, delivered, "Event published");
        delivered
    }

    /// Get bus statistics.
    pub fn stats(&self) -> BusStats {
        BusStats {
            events_published: self.events_published.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            active_patterns: self
                .subscribers
                .read()
                .values()
                .filter(|sender| sender.receiver_count() > 0)
                .count(),
        }
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSink for MemoryEventBus {
    fn notify(&self, event: AccessEvent) {
        self.publish(event);
    }
}

/// Check if a dotted topic matches a pattern.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let topic: Vec<&str> = topic.split('.').collect();
    segments_match(&pattern, &topic)
}

fn segments_match(pattern: &[&str], topic: &[&str]) -> bool {
    match pattern.split_first() {
        None => topic.is_empty(),
        Some((&"#", rest)) => (0..=topic.len()).any(|skip| segments_match(rest, &topic[skip..])),
        Some((&segment, rest)) => match topic.split_first() {
            Some((&head, tail)) if segment == "*" || segment == head => segments_match(rest, tail),
            _ => false,
        },
    }
}
