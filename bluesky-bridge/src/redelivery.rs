use std::collections::VecDeque;

use tracing::warn;

/// An encoded post whose publish failed after it was marked seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDelivery {
    pub uri: String,
    pub payload: Vec<u8>,
}

/// What happens to a post whose delivery failed. Dedup has already marked it,
/// so without a requeue it is never published by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeliveryPolicy {
    Drop,
    Requeue { capacity: usize },
}

impl RedeliveryPolicy {
    pub fn from_capacity(capacity: usize) -> Self {
        match capacity {
            0 => RedeliveryPolicy::Drop,
            capacity => RedeliveryPolicy::Requeue { capacity },
        }
    }
}

/// Bounded FIFO of failed deliveries, retried at the start of the next
/// polling cycle. When full, the oldest entry is dropped.
#[derive(Debug)]
pub struct RedeliveryQueue {
    policy: RedeliveryPolicy,
    pending: VecDeque<PendingDelivery>,
}

impl RedeliveryQueue {
    pub fn new(policy: RedeliveryPolicy) -> Self {
        let pending = match policy {
            RedeliveryPolicy::Drop => VecDeque::new(),
            RedeliveryPolicy::Requeue { capacity } => VecDeque::with_capacity(capacity),
        };
        Self { policy, pending }
    }

    pub fn policy(&self) -> RedeliveryPolicy {
        self.policy
    }

    /// Keep a failed delivery for later. Returns the entry that was given up
    /// on, if any: the new one under `Drop`, the oldest one when full.
    pub fn push(&mut self, delivery: PendingDelivery) -> Option<PendingDelivery> {
        let RedeliveryPolicy::Requeue { capacity } = self.policy else {
            return Some(delivery);
        };

        let evicted = if self.pending.len() >= capacity {
            self.pending.pop_front()
        } else {
            None
        };
        if let Some(evicted) = &evicted {
            warn!(uri = %evicted.uri, "redelivery queue full, dropping oldest post");
        }
        self.pending.push_back(delivery);
        evicted
    }

    pub fn pop(&mut self) -> Option<PendingDelivery> {
        self.pending.pop_front()
    }

    /// Put back an entry whose retry failed, keeping its place at the front.
    pub fn requeue_front(&mut self, delivery: PendingDelivery) {
        self.pending.push_front(delivery);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
