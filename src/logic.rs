//! Programmable scheduling-logic contracts.
//!
//! Three kinds of logic drive the tree: classification (packet → buffer id + leaf id),
//! per-node enqueue (rank, PIFO selection, shaping), and per-node dequeue (PIFO selection
//! among the heads). Each is a pure
//! function over explicit metadata; any state a program keeps across calls is its own, and the
//! only window into it is the four opaque trace variables that the owning node persists between
//! invocations and mirrors to the tracing surface.
//!
//! The scheduler does not evaluate programs itself. A [`LogicFactory`] turns the two opaque
//! artifact strings of each configuration entry (program, table commands) into live logic
//! instances; an external program runtime supplies its own factory, and
//! [`crate::policies::BuiltinLogicFactory`] covers the reference policies shipped with the
//! crate.

use crate::error::LogicError;
use crate::time::Time;

/// Width of the per-PIFO snapshot handed to dequeue logic. Nodes may own more PIFOs, but only
/// the first `MAX_PIFOS` are visible to the selection program; unused slots read as empty.
pub const MAX_PIFOS: usize = 3;

/// Scheduling metadata that travels with a packet through the enqueue cascade and is stored
/// inside every PIFO entry the packet produces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedMeta {
    /// Payload length in bytes.
    pub pkt_len: u32,
    /// Flow hash carried by the packet.
    pub flow_hash: u32,
    /// Buffer id chosen by classification.
    pub buffer_id: u32,
    /// Partition the buffer admitted the packet into.
    pub partition_id: u32,
    /// Bytes in use in that partition immediately after admission.
    pub partition_size: u32,
    /// Configured byte limit of that partition.
    pub partition_max_size: u32,
}

/// Input to classification logic.
#[derive(Clone, Copy, Debug)]
pub struct ClassInput {
    pub pkt_len: u32,
    pub flow_hash: u32,
    pub now: Time,
    pub trace: [u32; 4],
}

/// Output of classification logic.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClassOutput {
    pub buffer_id: u32,
    pub leaf_id: u32,
    pub trace: [u32; 4],
}

/// Input to per-node enqueue logic for an enqueue trigger.
#[derive(Clone, Copy, Debug)]
pub struct EnqInput {
    pub sched_meta: SchedMeta,
    pub now: Time,
    pub is_leaf: bool,
    /// Local index of the child the entry refers to; 0 at leaves.
    pub child_node: u8,
    /// PIFO within that child the entry refers to; 0 at leaves.
    pub child_pifo: u8,
    pub trace: [u32; 4],
}

/// Output of per-node enqueue logic.
///
/// A `pifo_id` past the node's PIFO count rejects the packet at this level: the cascade stops,
/// entries inserted below are removed, and the packet is reported dropped.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnqOutput {
    pub rank: u64,
    pub pifo_id: u8,
    /// Nanoseconds to wait before performing the parent-level enqueue; 0 continues
    /// synchronously.
    pub enq_delay: u64,
    /// Earliest absolute release time stored in the entry; `Time::ZERO` disables shaping.
    pub tx_time: Time,
    /// Inter-entry release spacing in nanoseconds; 0 disables.
    pub tx_delta: u64,
    pub trace: [u32; 4],
}

/// Dequeue-feedback event posted into a node's enqueue logic right after one of its PIFOs pops.
///
/// For an interior entry, `node`/`pifo` are the child reference the popped entry carried. For a
/// leaf entry, `node` is 0 and `pifo` is the local PIFO the entry left. The event does not
/// produce an enqueue; only the returned trace variables are kept.
#[derive(Clone, Copy, Debug)]
pub struct DeqEvent {
    pub node: u8,
    pub pifo: u8,
    pub rank: u64,
    pub tx_time: Time,
    pub tx_delta: u64,
    pub sched_meta: SchedMeta,
    pub now: Time,
    pub trace: [u32; 4],
}

/// Head-of-PIFO state visible to dequeue logic.
#[derive(Clone, Copy, Debug)]
pub struct PifoSnapshot {
    pub is_empty: bool,
    pub last_deq_time: Time,
    pub child_node: u8,
    pub child_pifo: u8,
    pub rank: u64,
    pub tx_time: Time,
    pub tx_delta: u64,
    pub pkt_len: u32,
}

impl Default for PifoSnapshot {
    fn default() -> Self {
        // Padding slots must read as empty so selection programs can iterate blindly.
        PifoSnapshot {
            is_empty: true,
            last_deq_time: Time::ZERO,
            child_node: 0,
            child_pifo: 0,
            rank: 0,
            tx_time: Time::ZERO,
            tx_delta: 0,
            pkt_len: 0,
        }
    }
}

/// Input to per-node dequeue logic.
#[derive(Clone, Copy, Debug)]
pub struct DeqInput {
    pub now: Time,
    pub is_leaf: bool,
    pub pifos: [PifoSnapshot; MAX_PIFOS],
    pub trace: [u32; 4],
}

/// Output of per-node dequeue logic.
///
/// A `pifo_id` past the node's PIFO count means "release nothing this round". A non-zero
/// `deq_delay` (nanoseconds) schedules a fresh dequeue attempt at this node instead of
/// releasing now.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeqOutput {
    pub pifo_id: u8,
    pub deq_delay: u64,
    pub trace: [u32; 4],
}

/// Classification: maps an arriving packet to a buffer id and a leaf node.
pub trait ClassifyLogic {
    fn classify(&mut self, input: ClassInput) -> ClassOutput;
}

/// Per-node enqueue logic: ranks entries, picks the target PIFO, and programs shaping.
pub trait EnqueueLogic {
    fn on_enqueue(&mut self, input: EnqInput) -> EnqOutput;

    /// Feedback after a pop at this node. The default keeps the trace unchanged; stateful
    /// policies (token buckets, virtual-time clocks, deficit counters) override this to learn
    /// what actually left.
    fn on_dequeue_event(&mut self, event: DeqEvent) -> [u32; 4] {
        event.trace
    }
}

/// Per-node dequeue logic: selects which PIFO head to release.
pub trait DequeueLogic {
    fn select(&mut self, input: DeqInput) -> DeqOutput;
}

/// Closure adapter for classification logic.
pub struct ClassifyFn<F>(pub F);

impl<F> ClassifyLogic for ClassifyFn<F>
where
    F: FnMut(ClassInput) -> ClassOutput,
{
    fn classify(&mut self, input: ClassInput) -> ClassOutput {
        (self.0)(input)
    }
}

/// Closure adapter for enqueue logic; dequeue feedback keeps the trace unchanged.
pub struct EnqueueFn<F>(pub F);

impl<F> EnqueueLogic for EnqueueFn<F>
where
    F: FnMut(EnqInput) -> EnqOutput,
{
    fn on_enqueue(&mut self, input: EnqInput) -> EnqOutput {
        (self.0)(input)
    }
}

/// Closure adapter for dequeue logic.
pub struct DequeueFn<F>(pub F);

impl<F> DequeueLogic for DequeueFn<F>
where
    F: FnMut(DeqInput) -> DeqOutput,
{
    fn select(&mut self, input: DeqInput) -> DeqOutput {
        (self.0)(input)
    }
}

/// Builds logic instances from the opaque artifact pairs named in the configuration.
///
/// The two strings are passed through verbatim from the configuration file; only the factory
/// assigns them meaning (file paths for an external program runtime, policy names for the
/// built-in one).
pub trait LogicFactory {
    fn classification(
        &self,
        program: &str,
        commands: &str,
    ) -> Result<Box<dyn ClassifyLogic>, LogicError>;

    fn enqueue(&self, program: &str, commands: &str) -> Result<Box<dyn EnqueueLogic>, LogicError>;

    /// An empty `program` string yields no dequeue logic; such a node falls back to
    /// first-non-empty selection and cannot be a multi-PIFO root.
    fn dequeue(
        &self,
        program: &str,
        commands: &str,
    ) -> Result<Option<Box<dyn DequeueLogic>>, LogicError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshot_reads_empty() {
        let snap = PifoSnapshot::default();
        assert!(snap.is_empty);
        assert_eq!(snap.rank, 0);
    }

    #[test]
    fn closure_classify_adapts() {
        let mut logic = ClassifyFn(|input: ClassInput| ClassOutput {
            buffer_id: input.flow_hash % 2,
            leaf_id: 1,
            trace: input.trace,
        });
        let out = logic.classify(ClassInput {
            pkt_len: 100,
            flow_hash: 3,
            now: Time::ZERO,
            trace: [0; 4],
        });
        assert_eq!(out.buffer_id, 1);
        assert_eq!(out.leaf_id, 1);
    }

    #[test]
    fn enqueue_feedback_defaults_to_identity() {
        struct Fifo;
        impl EnqueueLogic for Fifo {
            fn on_enqueue(&mut self, input: EnqInput) -> EnqOutput {
                EnqOutput {
                    trace: input.trace,
                    ..EnqOutput::default()
                }
            }
        }
        let mut logic = Fifo;
        let trace = logic.on_dequeue_event(DeqEvent {
            node: 0,
            pifo: 0,
            rank: 5,
            tx_time: Time::ZERO,
            tx_delta: 0,
            sched_meta: SchedMeta::default(),
            now: Time::ZERO,
            trace: [9, 8, 7, 6],
        });
        assert_eq!(trace, [9, 8, 7, 6]);
    }
}
