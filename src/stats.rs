//! Scheduler counters and their snapshot form.
//!
//! Counters are atomics so a metrics collector on another thread can read them live through
//! [`crate::Scheduler::counters`] while the scheduler thread keeps running. [`Stats`] is the
//! consistent snapshot the scheduler assembles on demand, including per-node and per-partition
//! state the counters alone cannot carry.

use crate::buffer::PartitionUsage;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, shared between the scheduler and any collectors.
#[derive(Debug, Default)]
pub struct Counters {
    /// Packets presented to `enqueue`.
    pub offered: AtomicU64,
    /// Packets that completed admission and the enqueue cascade.
    pub enqueued: AtomicU64,
    /// Packets released by dequeues.
    pub dequeued: AtomicU64,
    /// Drops because no partition had room.
    pub dropped_buffer_full: AtomicU64,
    /// Drops because a cascade level rejected the packet.
    pub dropped_tree_reject: AtomicU64,
    /// Pops requested on an empty PIFO (internal invariant violations).
    pub empty_pops: AtomicU64,
}

impl Counters {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_buffer_full.load(Ordering::Relaxed)
            + self.dropped_tree_reject.load(Ordering::Relaxed)
    }
}

/// Point-in-time view of the scheduler, returned by [`crate::Scheduler::stats`].
#[derive(Clone, Debug, serde::Serialize)]
pub struct Stats {
    pub offered: u64,
    pub enqueued: u64,
    pub dequeued: u64,
    pub dropped_buffer_full: u64,
    pub dropped_tree_reject: u64,
    pub empty_pops: u64,
    /// Packets resident in each node, indexed by global node id.
    pub node_packets: Vec<u32>,
    /// Byte usage of each buffer partition.
    pub partitions: Vec<PartitionUsage>,
}

impl Stats {
    pub fn dropped_total(&self) -> u64 {
        self.dropped_buffer_full + self.dropped_tree_reject
    }

    /// Packets currently inside the scheduler according to the counters alone.
    pub fn in_flight(&self) -> u64 {
        self.enqueued - self.dequeued
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_add_up() {
        let counters = Counters::default();
        Counters::bump(&counters.dropped_buffer_full);
        Counters::bump(&counters.dropped_tree_reject);
        Counters::bump(&counters.dropped_tree_reject);
        assert_eq!(counters.dropped_total(), 3);
    }

    #[test]
    fn snapshot_in_flight() {
        let stats = Stats {
            offered: 10,
            enqueued: 8,
            dequeued: 5,
            dropped_buffer_full: 1,
            dropped_tree_reject: 1,
            empty_pops: 0,
            node_packets: vec![3],
            partitions: vec![],
        };
        assert_eq!(stats.in_flight(), 3);
        assert_eq!(stats.dropped_total(), 2);
    }
}
