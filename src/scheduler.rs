//! The scheduler: classification, admission, and the PIFO tree under one roof.
//!
//! Built once from a [`SchedulerSpec`], then driven by the host: `enqueue` on packet arrival,
//! `dequeue` when the egress port wants a packet, and `apply_deferred` (usually via
//! [`crate::runtime::EventCalendar`]) for work that shaping pushed into the future. All calls
//! run on one logical thread; nothing here blocks or yields.

use crate::buffer::PartitionedBuffer;
use crate::config::SchedulerSpec;
use crate::error::{ConfigError, DropReason, EnqueueResult, SchedError};
use crate::logic::{ClassInput, ClassifyLogic, LogicFactory, SchedMeta};
use crate::node::Node;
use crate::packet::Packet;
use crate::runtime::{DeferredOp, Runtime};
use crate::stats::{Counters, Stats};
use crate::trace::{TraceEvent, TraceEventKind, TraceSink, Tracer};
use crate::tree::{CascadeError, PifoTree};
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub struct Scheduler {
    tree: PifoTree,
    buffer: PartitionedBuffer,
    classify: Box<dyn ClassifyLogic>,
    class_trace: [u32; 4],
    runtime: Arc<dyn Runtime>,
    tracer: Tracer,
    counters: Arc<Counters>,
}

impl Scheduler {
    /// Build and validate a scheduler from its configuration.
    ///
    /// Nodes are created in id order and wired child-before-parent; per-node validation runs
    /// after wiring so it can see the final shape. Any failure aborts construction.
    pub fn from_config(
        spec: &SchedulerSpec,
        factory: &dyn LogicFactory,
        runtime: Arc<dyn Runtime>,
    ) -> Result<Scheduler, ConfigError> {
        let validated = spec.validate()?;

        let classify = factory
            .classification(
                validated.class_logic.program(),
                validated.class_logic.commands(),
            )
            .map_err(ConfigError::ClassLogic)?;

        let buffer = PartitionedBuffer::new(validated.partition_sizes, validated.buffer_map);

        let mut nodes = Vec::with_capacity(validated.num_pifos.len());
        for (id, &k) in validated.num_pifos.iter().enumerate() {
            let id = id as u32;
            let enq = &validated.enq_logic[id as usize];
            let deq = &validated.deq_logic[id as usize];
            let enq_logic = factory
                .enqueue(enq.program(), enq.commands())
                .map_err(|source| ConfigError::NodeLogic {
                    node: id,
                    kind: "enqueue",
                    source,
                })?;
            let deq_logic = factory
                .dequeue(deq.program(), deq.commands())
                .map_err(|source| ConfigError::NodeLogic {
                    node: id,
                    kind: "dequeue",
                    source,
                })?;
            nodes.push(Node::new(k as usize, enq_logic, deq_logic));
        }

        for (parent, children) in &validated.edges {
            for &child in children {
                nodes[*parent as usize].add_child(child);
                nodes[child as usize].set_parent(*parent);
            }
        }

        // Post-wiring check: a multi-PIFO root cannot fall back to first-non-empty selection.
        let root = &nodes[0];
        if root.pifo_count() > 1 && !root.has_dequeue_logic() {
            return Err(ConfigError::RootNeedsDequeueLogic {
                pifos: root.pifo_count(),
            });
        }

        tracing::debug!(
            nodes = nodes.len(),
            partitions = buffer.partition_count(),
            "scheduler configured"
        );

        Ok(Scheduler {
            tree: PifoTree::new(nodes),
            buffer,
            classify,
            class_trace: [0; 4],
            runtime,
            tracer: Tracer::default(),
            counters: Arc::new(Counters::default()),
        })
    }

    /// Parse a JSON configuration and build the scheduler from it.
    pub fn from_json(
        json: &str,
        factory: &dyn LogicFactory,
        runtime: Arc<dyn Runtime>,
    ) -> Result<Scheduler, ConfigError> {
        Scheduler::from_config(&SchedulerSpec::from_json(json)?, factory, runtime)
    }

    /// Current time as reported by the host runtime.
    pub fn now(&self) -> crate::time::Time {
        self.runtime.now()
    }

    /// Subscribe a sink to the given trace event kinds.
    pub fn subscribe(&mut self, kinds: &[TraceEventKind], sink: Arc<dyn TraceSink>) {
        self.tracer.subscribe(kinds, sink);
    }

    /// Live counters, shareable with a collector thread.
    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }

    /// Admit a packet and thread it through the tree.
    ///
    /// A full buffer or a cascade-level rejection is an ordinary outcome reported through
    /// [`EnqueueResult`]; classification pointing at a nonexistent buffer or node is a
    /// configuration bug and surfaces as an error.
    pub fn enqueue(&mut self, packet: Packet) -> Result<EnqueueResult, SchedError> {
        let now = self.runtime.now();
        Counters::bump(&self.counters.offered);

        let class = self.classify.classify(ClassInput {
            pkt_len: packet.len(),
            flow_hash: packet.flow_hash,
            now,
            trace: self.class_trace,
        });
        self.class_trace = class.trace;

        // A nonexistent leaf must fail before bytes are reserved for it.
        match self.tree.node(class.leaf_id) {
            None => return Err(SchedError::UnknownLeaf(class.leaf_id)),
            Some(node) if !node.is_leaf() => return Err(SchedError::NotALeaf(class.leaf_id)),
            Some(_) => {}
        }

        let mut meta = SchedMeta {
            pkt_len: packet.len(),
            flow_hash: packet.flow_hash,
            buffer_id: class.buffer_id,
            ..SchedMeta::default()
        };

        let Some(admission) = self.buffer.admit(class.buffer_id, meta.pkt_len)? else {
            self.tracer.emit(TraceEvent::BufferDrop {
                buffer_id: class.buffer_id,
                pkt_len: meta.pkt_len,
            });
            self.drop_packet(packet.id, meta.flow_hash, meta.pkt_len, DropReason::BufferFull);
            return Ok(EnqueueResult::Dropped {
                reason: DropReason::BufferFull,
            });
        };
        meta.partition_id = admission.partition_id;
        meta.partition_size = admission.used;
        meta.partition_max_size = admission.limit;

        self.tracer.emit(TraceEvent::BufferEnqueue {
            partition_id: admission.partition_id,
            pkt_len: meta.pkt_len,
        });

        let packet_id = packet.id;
        match self.tree.enqueue_leaf(
            class.leaf_id,
            packet,
            meta,
            now,
            self.runtime.as_ref(),
            &self.tracer,
        ) {
            Ok(_) => {
                Counters::bump(&self.counters.enqueued);
                self.tracer.emit(TraceEvent::PacketEnqueued {
                    packet_id,
                    sched_meta: meta,
                });
                Ok(EnqueueResult::Admitted)
            }
            Err(CascadeError::Rejected { recovered }) => {
                self.reject_admitted(packet_id, meta, recovered.is_some());
                Ok(EnqueueResult::Dropped {
                    reason: DropReason::TreeReject,
                })
            }
            Err(CascadeError::Fatal(err)) => {
                // Bytes were reserved; give them back before surfacing the wiring error.
                self.buffer.release(meta.partition_id, meta.pkt_len)?;
                Err(err)
            }
        }
    }

    /// Release the next packet chosen by the root, if any.
    pub fn dequeue(&mut self) -> Result<Option<Packet>, SchedError> {
        self.dequeue_at(0, None)
    }

    /// Re-entry form of dequeue: start at `node_id`, optionally with a PIFO already chosen.
    ///
    /// `pifo = None` (or an out-of-range id) lets the node's dequeue logic choose; this is how
    /// deferred dequeues come back in.
    pub fn dequeue_at(
        &mut self,
        node_id: u32,
        pifo: Option<u8>,
    ) -> Result<Option<Packet>, SchedError> {
        let now = self.runtime.now();
        let released = self.tree.dequeue(
            node_id,
            pifo,
            now,
            self.runtime.as_ref(),
            &self.tracer,
            &self.counters,
        )?;

        let Some((packet, meta)) = released else {
            return Ok(None);
        };

        self.buffer.release(meta.partition_id, meta.pkt_len)?;
        Counters::bump(&self.counters.dequeued);
        self.tracer.emit(TraceEvent::BufferDequeue {
            partition_id: meta.partition_id,
            pkt_len: meta.pkt_len,
        });
        self.tracer.emit(TraceEvent::PacketDequeued {
            packet_id: packet.id,
            sched_meta: meta,
        });
        Ok(Some(packet))
    }

    /// Run one deferred operation. Hosts with their own event loop call this when an op comes
    /// due; [`crate::runtime::EventCalendar::advance_until`] does it for simulations.
    ///
    /// Returns a packet when a deferred dequeue released one.
    pub fn apply_deferred(&mut self, op: DeferredOp) -> Result<Option<Packet>, SchedError> {
        match op {
            DeferredOp::EnqueueStep {
                parent,
                child,
                child_pifo,
                sched_meta,
                marks,
            } => {
                let now = self.runtime.now();
                match self.tree.resume_enqueue(
                    parent,
                    child,
                    child_pifo,
                    sched_meta,
                    marks,
                    now,
                    self.runtime.as_ref(),
                    &self.tracer,
                ) {
                    Ok(_) => Ok(None),
                    Err(CascadeError::Rejected { recovered }) => {
                        // The packet id lives in the recovered handle; without it the entry
                        // was already drained and there is nothing left to account for.
                        if let Some(packet) = &recovered {
                            self.reject_admitted(packet.id, sched_meta, true);
                        }
                        Ok(None)
                    }
                    Err(CascadeError::Fatal(err)) => Err(err),
                }
            }
            DeferredOp::Redequeue { node } => self.dequeue_at(node, None),
        }
    }

    /// Snapshot of counters, per-node occupancy, and per-partition usage.
    pub fn stats(&self) -> Stats {
        Stats {
            offered: self.counters.offered.load(Ordering::Relaxed),
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dequeued: self.counters.dequeued.load(Ordering::Relaxed),
            dropped_buffer_full: self.counters.dropped_buffer_full.load(Ordering::Relaxed),
            dropped_tree_reject: self.counters.dropped_tree_reject.load(Ordering::Relaxed),
            empty_pops: self.counters.empty_pops.load(Ordering::Relaxed),
            node_packets: self.tree.node_packets(),
            partitions: self.buffer.usage(),
        }
    }

    /// Classification trace variables, persisted across packets.
    pub fn class_trace(&self) -> [u32; 4] {
        self.class_trace
    }

    /// Handle a cascade rejection for a packet whose bytes were admitted.
    fn reject_admitted(&mut self, packet_id: u64, meta: SchedMeta, bytes_still_held: bool) {
        if bytes_still_held {
            if let Err(err) = self.buffer.release(meta.partition_id, meta.pkt_len) {
                tracing::error!(%err, "buffer release after tree rejection failed");
            } else {
                self.tracer.emit(TraceEvent::BufferDequeue {
                    partition_id: meta.partition_id,
                    pkt_len: meta.pkt_len,
                });
            }
        }
        self.drop_packet(packet_id, meta.flow_hash, meta.pkt_len, DropReason::TreeReject);
    }

    fn drop_packet(&self, packet_id: u64, flow_hash: u32, pkt_len: u32, reason: DropReason) {
        let counter = match reason {
            DropReason::BufferFull => &self.counters.dropped_buffer_full,
            DropReason::TreeReject => &self.counters.dropped_tree_reject,
        };
        Counters::bump(counter);
        tracing::debug!(packet_id, flow_hash, pkt_len, ?reason, "packet dropped");
        self.tracer.emit(TraceEvent::PacketDropped {
            packet_id,
            flow_hash,
            pkt_len,
            reason,
        });
    }
}
