//! Requests that found no route, waiting for a retry window.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::event::WebhookEvent;
use crate::ids::NeuronId;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRoute {
    pub event: WebhookEvent,
    pub destination: NeuronId,
    /// Retry windows already spent
    pub attempts: u32,
    pub queued_at: DateTime<Utc>,
}

/// Result of one retry sweep.
#[derive(Debug, Default)]
pub struct RetrySweep {
    pub routed: usize,
    pub requeued: usize,
    /// Routes that used their last window; the caller reports them
    pub abandoned: Vec<PendingRoute>,
}

#[derive(Default)]
pub struct PendingQueue {
    queue: Mutex<VecDeque<PendingRoute>>,
    abandoned: AtomicU64,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, event: WebhookEvent, destination: NeuronId, now: DateTime<Utc>) {
        self.queue.lock().push_back(PendingRoute {
            event,
            destination,
            attempts: 0,
            queued_at: now,
        });
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Routes given up on since start-up.
    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Vec<PendingRoute> {
        self.queue.lock().iter().cloned().collect()
    }

    /// Give every queued route one retry window.
    ///
    /// `attempt` returns true when the route was placed. The queue is
    /// drained before retrying so `attempt` may enqueue new work without
    /// deadlocking; routes that fail again go back unless they have used
    /// `max_retries` windows.
    pub fn retry(&self, max_retries: u32, mut attempt: impl FnMut(&PendingRoute) -> bool) -> RetrySweep {
        let drained: Vec<PendingRoute> = self.queue.lock().drain(..).collect();
        let mut sweep = RetrySweep::default();
        let mut keep = Vec::new();
        for mut route in drained {
            if attempt(&route) {
                sweep.routed += 1;
                continue;
            }
            route.attempts += 1;
            if route.attempts >= max_retries {
                sweep.abandoned.push(route);
            } else {
                keep.push(route);
            }
        }
        sweep.requeued = keep.len();
        self.abandoned
            .fetch_add(sweep.abandoned.len() as u64, Ordering::Relaxed);
        let mut queue = self.queue.lock();
        for route in keep.into_iter().rev() {
            queue.push_front(route);
        }
        sweep
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Severity;
    use serde_json::json;

    fn event(id: &str) -> WebhookEvent {
        WebhookEvent::new(id, "github", "push", json!({}), Severity::Low)
    }

    #[test]
    fn test_abandoned_after_max_retries() {
        let q = PendingQueue::new();
        q.enqueue(event("e1"), "sink".into(), Utc::now());
        let first = q.retry(2, |_| false);
        assert_eq!(first.requeued, 1);
        let second = q.retry(2, |_| false);
        assert_eq!(second.abandoned.len(), 1);
        assert!(q.is_empty());
        assert_eq!(q.abandoned(), 1);
    }

    #[test]
    fn test_routed_routes_leave_queue() {
        let q = PendingQueue::new();
        q.enqueue(event("e1"), "sink".into(), Utc::now());
        q.enqueue(event("e2"), "sink".into(), Utc::now());
        let sweep = q.retry(1, |r| r.event.id == "e1");
        assert_eq!(sweep.routed, 1);
        assert_eq!(sweep.abandoned.len(), 1);
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn test_retry_preserves_order() {
        let q = PendingQueue::new();
        for id in ["e1", "e2", "e3"] {
            q.enqueue(event(id), "sink".into(), Utc::now());
        }
        q.retry(5, |_| false);
        let ids: Vec<String> = q.snapshot().into_iter().map(|r| r.event.id).collect();
        assert_eq!(ids, vec!["e1", "e2", "e3"]);
    }
}
