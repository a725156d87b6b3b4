//! A bounded, many-producer/one-consumer channel for `StoreChangeEvent`s.
//!
//! Ordinary backpressure (block the producer until the consumer catches up)
//! is wrong for store-change events: a store mutation must never block on a
//! slow reactor. Instead the bus drops down to a single coalesced
//! `FULL_RELOAD` event once its buffer saturates, so a producer never
//! blocks and a lagging consumer never rebuilds an incomplete snapshot from
//! a partial event stream.

use aegis_core::model::{EventContent, EventType, StoreChangeEvent};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::warn;

pub struct EventBus {
    capacity: usize,
    queue: Mutex<VecDeque<StoreChangeEvent>>,
    notify: Notify,
    closed: AtomicBool,
    coalesced: AtomicU64,
    synthetic_id: AtomicI64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            coalesced: AtomicU64::new(0),
            synthetic_id: AtomicI64::new(-1),
        })
    }

    /// Enqueues an event. Never blocks. When the buffer is saturated, every
    /// queued event is discarded and replaced by a single synthetic
    /// `FULL_RELOAD` so the consumer rebuilds from scratch instead of
    /// working off a gap it can't detect.
    pub fn publish(&self, event: StoreChangeEvent) {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            queue.clear();
            self.coalesced.fetch_add(1, Ordering::Relaxed);
            let id = self.synthetic_id.fetch_sub(1, Ordering::Relaxed);
            queue.push_back(StoreChangeEvent {
                id,
                kind: EventType::FullReload,
                content: EventContent::None,
            });
            warn!(capacity = self.capacity, "event bus saturated, coalescing to full reload");
        } else {
            queue.push_back(event);
        }
        drop(queue);
        self.notify.notify_one();
    }

    /// Awaits the next event. Returns `None` once the bus is closed and
    /// drained.
    pub async fn recv(&self) -> Option<StoreChangeEvent> {
        loop {
            {
                let mut queue = self.queue.lock();
                if let Some(event) = queue.pop_front() {
                    return Some(event);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Marks the bus closed. Already-queued events are still delivered;
    /// `recv` returns `None` once they're drained. Wakes any waiting
    /// consumer so it observes the close promptly.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of times the buffer has saturated and collapsed to a full
    /// reload. The reactor surfaces this via metrics.
    pub fn coalesced_count(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }
}
