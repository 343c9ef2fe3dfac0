//! Typed trace events and the subscription surface.
//!
//! Every observable state change in the scheduler fires a [`TraceEvent`] to the sinks
//! subscribed to that event kind. Sinks are passive observers: they must not block and they
//! cannot mutate scheduler state (they receive shared references and run on the scheduler's
//! thread). For collectors living on another thread, [`ChannelSink`] forwards events over an
//! unbounded channel.

use crate::error::DropReason;
use crate::logic::SchedMeta;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Arc;

/// One scheduler-observable event.
#[derive(Clone, Debug)]
pub enum TraceEvent {
    /// A packet finished its enqueue cascade.
    PacketEnqueued { packet_id: u64, sched_meta: SchedMeta },
    /// A packet was released by a dequeue.
    PacketDequeued { packet_id: u64, sched_meta: SchedMeta },
    /// A packet was refused, with the reason that reached the caller.
    PacketDropped {
        packet_id: u64,
        flow_hash: u32,
        pkt_len: u32,
        reason: DropReason,
    },
    /// Bytes entered a buffer partition.
    BufferEnqueue { partition_id: u32, pkt_len: u32 },
    /// Bytes left a buffer partition.
    BufferDequeue { partition_id: u32, pkt_len: u32 },
    /// Admission found no partition with room under this buffer id.
    BufferDrop { buffer_id: u32, pkt_len: u32 },
    /// A node's enqueue-side trace variables changed.
    EnqTrace { node: u32, vars: [u32; 4] },
    /// A node's dequeue-side trace variables changed.
    DeqTrace { node: u32, vars: [u32; 4] },
    /// A node's packet gauge changed.
    NodeOccupancy { node: u32, packets: u32 },
}

/// Discriminant used for subscription filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceEventKind {
    PacketEnqueued,
    PacketDequeued,
    PacketDropped,
    BufferEnqueue,
    BufferDequeue,
    BufferDrop,
    EnqTrace,
    DeqTrace,
    NodeOccupancy,
}

impl TraceEventKind {
    pub const ALL: [TraceEventKind; 9] = [
        TraceEventKind::PacketEnqueued,
        TraceEventKind::PacketDequeued,
        TraceEventKind::PacketDropped,
        TraceEventKind::BufferEnqueue,
        TraceEventKind::BufferDequeue,
        TraceEventKind::BufferDrop,
        TraceEventKind::EnqTrace,
        TraceEventKind::DeqTrace,
        TraceEventKind::NodeOccupancy,
    ];

    const fn bit(self) -> u16 {
        1 << self as u16
    }
}

impl TraceEvent {
    pub fn kind(&self) -> TraceEventKind {
        match self {
            TraceEvent::PacketEnqueued { .. } => TraceEventKind::PacketEnqueued,
            TraceEvent::PacketDequeued { .. } => TraceEventKind::PacketDequeued,
            TraceEvent::PacketDropped { .. } => TraceEventKind::PacketDropped,
            TraceEvent::BufferEnqueue { .. } => TraceEventKind::BufferEnqueue,
            TraceEvent::BufferDequeue { .. } => TraceEventKind::BufferDequeue,
            TraceEvent::BufferDrop { .. } => TraceEventKind::BufferDrop,
            TraceEvent::EnqTrace { .. } => TraceEventKind::EnqTrace,
            TraceEvent::DeqTrace { .. } => TraceEventKind::DeqTrace,
            TraceEvent::NodeOccupancy { .. } => TraceEventKind::NodeOccupancy,
        }
    }
}

/// A non-blocking trace observer.
pub trait TraceSink: Send + Sync {
    fn on_event(&self, event: &TraceEvent);
}

/// Forwards events into an unbounded channel for an out-of-thread collector.
pub struct ChannelSink {
    tx: Sender<TraceEvent>,
}

impl ChannelSink {
    /// Create a sink plus the receiver a collector drains.
    pub fn new() -> (ChannelSink, Receiver<TraceEvent>) {
        let (tx, rx) = unbounded();
        (ChannelSink { tx }, rx)
    }
}

impl TraceSink for ChannelSink {
    fn on_event(&self, event: &TraceEvent) {
        // A disconnected collector just stops listening; the scheduler never blocks on it.
        let _ = self.tx.send(event.clone());
    }
}

struct Subscription {
    mask: u16,
    sink: Arc<dyn TraceSink>,
}

/// Registry of subscriptions, owned by the scheduler.
#[derive(Default)]
pub(crate) struct Tracer {
    subscriptions: Vec<Subscription>,
    active_mask: u16,
}

impl Tracer {
    pub(crate) fn subscribe(&mut self, kinds: &[TraceEventKind], sink: Arc<dyn TraceSink>) {
        let mask = kinds.iter().fold(0u16, |mask, kind| mask | kind.bit());
        self.active_mask |= mask;
        self.subscriptions.push(Subscription { mask, sink });
    }

    #[inline]
    pub(crate) fn wants(&self, kind: TraceEventKind) -> bool {
        self.active_mask & kind.bit() != 0
    }

    pub(crate) fn emit(&self, event: TraceEvent) {
        let bit = event.kind().bit();
        if self.active_mask & bit == 0 {
            return;
        }
        for sub in &self.subscriptions {
            if sub.mask & bit != 0 {
                sub.sink.on_event(&event);
            }
        }
    }
}
