//! Actor mailbox monitoring.
//!
//! Each actor mailbox is watched by one [`MailboxMonitor`] shared between
//! the handle (which records enqueues) and the run loop (which records
//! dequeues). Depth thresholds:
//!
//! | Actor       | Normal | Warning | Critical |
//! |-------------|--------|---------|----------|
//! | Dispatcher  | < 500  | 500-2000| > 2000   |
//! | Signaling   | < 100  | 100-500 | > 500    |
//! | Storage     | < 20   | 20-100  | > 100    |
//!
//! Storage thresholds are low because ingestion is serialized
//! globally, so a deep queue means uploads are waiting on the store.

use crate::observability::metrics as prom;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

pub const DISPATCHER_MAILBOX_NORMAL: usize = 500;
pub const DISPATCHER_MAILBOX_WARNING: usize = 2000;

pub const SIGNALING_MAILBOX_NORMAL: usize = 100;
pub const SIGNALING_MAILBOX_WARNING: usize = 500;

pub const STORAGE_MAILBOX_NORMAL: usize = 20;
pub const STORAGE_MAILBOX_WARNING: usize = 100;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// Connection Dispatcher (singleton).
    Dispatcher,
    /// Signaling Coordinator (singleton).
    Signaling,
    /// Chunk Storage Engine ingestion loop (singleton).
    Storage,
}

impl ActorType {
    /// Returns the actor type as a string for metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Dispatcher => "dispatcher",
            ActorType::Signaling => "signaling",
            ActorType::Storage => "storage",
        }
    }

    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Dispatcher => DISPATCHER_MAILBOX_WARNING,
            ActorType::Signaling => SIGNALING_MAILBOX_WARNING,
            ActorType::Storage => STORAGE_MAILBOX_WARNING,
        }
    }

    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Dispatcher => DISPATCHER_MAILBOX_NORMAL,
            ActorType::Signaling => SIGNALING_MAILBOX_NORMAL,
            ActorType::Storage => STORAGE_MAILBOX_NORMAL,
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Mailbox monitor for tracking queue depth and emitting metrics.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
    messages_dropped: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType) -> Self {
        Self {
            actor_type,
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        }
    }

    /// Record a message being added to the mailbox.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);
        prom::set_mailbox_depth(self.actor_type.as_str(), new_depth);

        match self.level_for_depth(new_depth) {
            MailboxLevel::Critical => {
                warn!(
                    target: "stream.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    depth = new_depth,
                    threshold = self.actor_type.warning_threshold(),
                    "Mailbox depth critical"
                );
            }
            MailboxLevel::Warning if new_depth == self.actor_type.normal_threshold() + 1 => {
                debug!(
                    target: "stream.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    depth = new_depth,
                    "Mailbox depth elevated"
                );
            }
            _ => {}
        }
    }

    /// Record a message being removed from the mailbox (processed).
    pub fn record_dequeue(&self) {
        self.decrement();
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Roll back an enqueue whose send failed because the mailbox closed.
    pub fn record_unsent(&self) {
        self.decrement();
        self.record_drop();
    }

    /// Record a message that never reached its recipient.
    pub fn record_drop(&self) {
        let dropped = self.messages_dropped.fetch_add(1, Ordering::Relaxed) + 1;
        prom::record_message_dropped(self.actor_type.as_str());
        warn!(
            target: "stream.actor.mailbox",
            actor_type = self.actor_type.as_str(),
            dropped,
            "Message dropped due to backpressure"
        );
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    fn decrement(&self) {
        let previous = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            })
            .unwrap_or(0);
        prom::set_mailbox_depth(self.actor_type.as_str(), previous.saturating_sub(1));
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth > self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_type_as_str() {
        assert_eq!(ActorType::Dispatcher.as_str(), "dispatcher");
        assert_eq!(ActorType::Signaling.as_str(), "signaling");
        assert_eq!(ActorType::Storage.as_str(), "storage");
    }

    #[test]
    fn test_storage_thresholds_are_tighter_than_dispatcher() {
        assert!(ActorType::Storage.warning_threshold() < ActorType::Dispatcher.normal_threshold());
        assert_eq!(ActorType::Signaling.normal_threshold(), 100);
        assert_eq!(ActorType::Signaling.warning_threshold(), 500);
    }

    #[test]
    fn test_mailbox_monitor_enqueue_dequeue() {
        let monitor = MailboxMonitor::new(ActorType::Signaling);

        monitor.record_enqueue();
        monitor.record_enqueue();
        monitor.record_enqueue();
        assert_eq!(monitor.current_depth(), 3);
        assert_eq!(monitor.peak_depth(), 3);

        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 2);
        assert_eq!(monitor.peak_depth(), 3);
        assert_eq!(monitor.messages_processed(), 1);
    }

    #[test]
    fn test_dequeue_never_underflows() {
        let monitor = MailboxMonitor::new(ActorType::Storage);
        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 0);
    }

    #[test]
    fn test_mailbox_monitor_levels() {
        let monitor = MailboxMonitor::new(ActorType::Storage);
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);

        for _ in 0..50 {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Warning);

        for _ in 0..60 {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);
    }

    #[test]
    fn test_record_unsent_rolls_back_depth() {
        let monitor = MailboxMonitor::new(ActorType::Signaling);
        monitor.record_enqueue();
        monitor.record_unsent();
        assert_eq!(monitor.current_depth(), 0);
        assert_eq!(monitor.messages_processed(), 0);
        assert_eq!(monitor.messages_dropped(), 1);
    }

    #[test]
    fn test_record_drop_counts() {
        let monitor = MailboxMonitor::new(ActorType::Dispatcher);
        monitor.record_drop();
        monitor.record_drop();
        assert_eq!(monitor.messages_dropped(), 2);
    }
}
