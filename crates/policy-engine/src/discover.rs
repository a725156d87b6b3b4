//! C7: the discover collector. In discover mode every request context is
//! recorded so policies can be mined from observed traffic later. A
//! bounded ring buffer drops the oldest entry when full and counts the
//! drop, rather than blocking the request path.

use aegis_core::model::RequestContext;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

pub struct DiscoverCollector {
    capacity: usize,
    buffer: Mutex<VecDeque<RequestContext>>,
    dropped: AtomicU64,
}

impl DiscoverCollector {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffer: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            dropped: AtomicU64::new(0),
        }
    }

    /// Records a request context. Drops the oldest buffered entry when at
    /// capacity instead of the new one, so the most recent traffic is
    /// always retained.
    pub fn record(&self, ctx: RequestContext) {
        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.capacity {
            buffer.pop_front();
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(dropped, capacity = self.capacity, "discover buffer full, dropped oldest entry");
        }
        buffer.push_back(ctx);
    }

    /// Drains the buffer for handoff to the store in a batch.
    pub fn drain_batch(&self) -> Vec<RequestContext> {
        self.buffer.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ctx(resource: &str) -> RequestContext {
        RequestContext {
            subject: vec!["user:alice".into()],
            service_name: "crm".into(),
            resource: resource.into(),
            action: "get".into(),
            attributes: HashMap::new(),
        }
    }

    #[test]
    fn records_and_drains_a_batch() {
        let collector = DiscoverCollector::new(8);
        collector.record(ctx("/a"));
        collector.record(ctx("/b"));
        assert_eq!(collector.len(), 2);
        let batch = collector.drain_batch();
        assert_eq!(batch.len(), 2);
        assert!(collector.is_empty());
    }

    #[test]
    fn drops_oldest_entry_when_full() {
        let collector = DiscoverCollector::new(2);
        collector.record(ctx("/a"));
        collector.record(ctx("/b"));
        collector.record(ctx("/c"));
        let batch = collector.drain_batch();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].resource, "/b");
        assert_eq!(batch[1].resource, "/c");
        assert_eq!(collector.dropped_count(), 1);
    }
}
