//! Reload notification fan-out.
//!
//! Each subscriber gets a bounded channel. Publishing never blocks: a
//! subscriber whose buffer is full misses the event, and a subscriber whose
//! receiver was dropped is removed.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use super::debounce::{Burst, ReloadReason};

/// SSE event name used for reload notifications.
pub const SSE_EVENT_NAME: &str = "file-change";

/// A debounced reload notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadEvent {
    /// Monotonic sequence number, starting at 1
    pub sequence: u64,
    pub reason: ReloadReason,
    /// Changed paths (empty for forced reloads caused by watch errors)
    pub paths: Vec<PathBuf>,
    pub timestamp: DateTime<Utc>,
}

impl ReloadEvent {
    /// Render as a Server-Sent Events frame.
    pub fn to_sse(&self) -> String {
        format!("event: {SSE_EVENT_NAME}\ndata: reload\n\n")
    }
}

/// Fan-out of reload events to any number of subscribers.
#[derive(Debug)]
pub struct ReloadHub {
    subscribers: Mutex<Vec<SyncSender<ReloadEvent>>>,
    buffer: usize,
    sequence: AtomicU64,
}

impl Default for ReloadHub {
    fn default() -> Self {
        Self::new(10)
    }
}

impl ReloadHub {
    /// Create a hub whose subscribers buffer up to `buffer` undelivered events.
    pub fn new(buffer: usize) -> Self {
        Self { subscribers: Mutex::new(Vec::new()), buffer: buffer.max(1), sequence: AtomicU64::new(0) }
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Receiver<ReloadEvent> {
        let (tx, rx) = mpsc::sync_channel(self.buffer);
        self.subscribers.lock().push(tx);
        tracing::debug!(subscribers = self.subscriber_count(), "Reload subscriber added");
        rx
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Announce a debounced burst. Returns how many subscribers received it.
    pub fn publish(&self, burst: Burst) -> usize {
        let event = ReloadEvent {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            reason: burst.reason,
            paths: burst.paths,
            timestamp: Utc::now(),
        };

        let mut delivered = 0;
        self.subscribers.lock().retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(sequence = event.sequence, "Reload subscriber is full, skipping");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });

        tracing::info!(
            sequence = event.sequence,
            reason = ?event.reason,
            delivered,
            "Reload notification sent"
        );
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn burst() -> Burst {
        Burst { reason: ReloadReason::Changed, paths: vec![PathBuf::from("runbook.yaml")] }
    }

    #[test]
    fn test_fan_out_to_all_subscribers() {
        let hub = ReloadHub::new(4);
        let a = hub.subscribe();
        let b = hub.subscribe();

        assert_eq!(hub.publish(burst()), 2);
        assert_eq!(a.try_recv().unwrap().sequence, 1);
        assert_eq!(b.try_recv().unwrap().sequence, 1);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = ReloadHub::default();
        assert_eq!(hub.publish(burst()), 0);
    }

    #[test]
    fn test_full_subscriber_is_skipped_not_blocked() {
        let hub = ReloadHub::new(1);
        let slow = hub.subscribe();
        let fast = hub.subscribe();

        assert_eq!(hub.publish(burst()), 2);
        fast.try_recv().unwrap();

        // slow still holds the first event
        assert_eq!(hub.publish(burst()), 1);
        assert_eq!(hub.subscriber_count(), 2);
        assert_eq!(slow.try_recv().unwrap().sequence, 1);
        assert_eq!(fast.try_recv().unwrap().sequence, 2);
    }

    #[test]
    fn test_disconnected_subscriber_is_dropped() {
        let hub = ReloadHub::new(2);
        let gone = hub.subscribe();
        let _kept = hub.subscribe();
        drop(gone);

        hub.publish(burst());
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[test]
    fn test_sse_frame() {
        let hub = ReloadHub::new(1);
        let rx = hub.subscribe();
        hub.publish(burst());
        assert_eq!(rx.try_recv().unwrap().to_sse(), "event: file-change\ndata: reload\n\n");
    }
}
