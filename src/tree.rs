//! Tree-wide traversals: the leaf→root enqueue cascade and the root→leaf dequeue descent.
//!
//! Nodes live in an arena indexed by global id (id 0 is the root) so parent/child links are
//! plain indices and the traversals are loops and tail recursion over the arena, never shared
//! mutable references.
//!
//! The cascade is atomic per call: either the packet gains an entry at every level it reached,
//! or every entry inserted on its behalf is removed before the rejection is reported. When a
//! level defers the next step (`enq_delay > 0`), the breadcrumbs of already-inserted entries
//! travel inside the deferred message so a later rejection can still unwind them.

use crate::error::SchedError;
use crate::logic::SchedMeta;
use crate::node::Node;
use crate::packet::Packet;
use crate::pifo::{EntryRef, EntryToken, PifoEntry};
use crate::runtime::{DeferredOp, Runtime};
use crate::stats::Counters;
use crate::time::Time;
use crate::trace::{TraceEvent, TraceEventKind, Tracer};
use std::time::Duration;

/// Breadcrumb for one entry inserted by an enqueue cascade, used to unwind on rejection.
#[derive(Clone, Copy, Debug)]
pub struct EntryMark {
    pub(crate) node: u32,
    pub(crate) pifo: u8,
    pub(crate) token: EntryToken,
}

/// How a cascade call ended when it did not fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CascadeOutcome {
    /// The packet is linked at every level up to the root.
    Complete,
    /// A level requested a delay; the remaining levels run from a deferred operation.
    Deferred,
}

/// Why a cascade call failed.
pub(crate) enum CascadeError {
    /// A level rejected the packet; inserted entries were unwound. `recovered` carries the
    /// packet if its leaf entry was still resident, which tells the caller whether buffer
    /// bytes are still held.
    Rejected { recovered: Option<Packet> },
    /// Broken wiring or a misbehaving program; not a traffic condition.
    Fatal(SchedError),
}

pub(crate) struct PifoTree {
    nodes: Vec<Node>,
}

impl PifoTree {
    pub(crate) fn new(nodes: Vec<Node>) -> PifoTree {
        PifoTree { nodes }
    }

    pub(crate) fn node(&self, id: u32) -> Option<&Node> {
        self.nodes.get(id as usize)
    }

    pub(crate) fn node_packets(&self) -> Vec<u32> {
        self.nodes.iter().map(|n| n.packets()).collect()
    }

    /// Start the cascade for an admitted packet at its leaf.
    pub(crate) fn enqueue_leaf(
        &mut self,
        leaf: u32,
        packet: Packet,
        sched_meta: SchedMeta,
        now: Time,
        runtime: &dyn Runtime,
        tracer: &Tracer,
    ) -> Result<CascadeOutcome, CascadeError> {
        let node = self
            .nodes
            .get_mut(leaf as usize)
            .ok_or(CascadeError::Fatal(SchedError::UnknownLeaf(leaf)))?;
        if !node.is_leaf() {
            return Err(CascadeError::Fatal(SchedError::NotALeaf(leaf)));
        }

        let before = node.enq_trace();
        let out = node.run_enqueue(sched_meta, now, 0, 0);
        emit_enq_trace(tracer, leaf, before, out.trace);

        if out.pifo_id as usize >= node.pifo_count() {
            // Rejected before anything was inserted; the caller still owns the packet's bytes.
            return Err(CascadeError::Rejected {
                recovered: Some(packet),
            });
        }

        let token = node.push_entry(
            out.pifo_id,
            PifoEntry::leaf(packet, out.rank, out.tx_time, out.tx_delta, sched_meta),
        );
        emit_occupancy(tracer, self.nodes[leaf as usize].packets(), leaf);

        let marks = vec![EntryMark {
            node: leaf,
            pifo: out.pifo_id,
            token,
        }];
        self.cascade_up(
            leaf,
            out.enq_delay,
            out.pifo_id,
            sched_meta,
            marks,
            now,
            runtime,
            tracer,
        )
    }

    /// Continue a cascade at `parent` after the step below it finished (synchronously or from a
    /// deferred operation).
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn resume_enqueue(
        &mut self,
        parent: u32,
        child: u32,
        child_pifo: u8,
        sched_meta: SchedMeta,
        marks: Vec<EntryMark>,
        now: Time,
        runtime: &dyn Runtime,
        tracer: &Tracer,
    ) -> Result<CascadeOutcome, CascadeError> {
        let (enq_delay, pifo_id, marks) =
            self.interior_step(parent, child, child_pifo, sched_meta, marks, now, tracer)?;
        self.cascade_up(
            parent, enq_delay, pifo_id, sched_meta, marks, now, runtime, tracer,
        )
    }

    /// Walk from `from` toward the root, performing each parent-level enqueue.
    #[allow(clippy::too_many_arguments)]
    fn cascade_up(
        &mut self,
        mut from: u32,
        mut enq_delay: u64,
        mut pifo_id: u8,
        sched_meta: SchedMeta,
        mut marks: Vec<EntryMark>,
        now: Time,
        runtime: &dyn Runtime,
        tracer: &Tracer,
    ) -> Result<CascadeOutcome, CascadeError> {
        loop {
            let Some(parent) = self.nodes[from as usize].parent() else {
                return Ok(CascadeOutcome::Complete);
            };

            if enq_delay > 0 {
                runtime.schedule(
                    Duration::from_nanos(enq_delay),
                    DeferredOp::EnqueueStep {
                        parent,
                        child: from,
                        child_pifo: pifo_id,
                        sched_meta,
                        marks,
                    },
                );
                return Ok(CascadeOutcome::Deferred);
            }

            let (next_delay, next_pifo, next_marks) =
                self.interior_step(parent, from, pifo_id, sched_meta, marks, now, tracer)?;
            from = parent;
            enq_delay = next_delay;
            pifo_id = next_pifo;
            marks = next_marks;
        }
    }

    /// One interior enqueue: translate the child id, run the logic, insert the reference entry.
    #[allow(clippy::too_many_arguments)]
    fn interior_step(
        &mut self,
        parent: u32,
        child: u32,
        child_pifo: u8,
        sched_meta: SchedMeta,
        mut marks: Vec<EntryMark>,
        now: Time,
        tracer: &Tracer,
    ) -> Result<(u64, u8, Vec<EntryMark>), CascadeError> {
        let Some(node) = self.nodes.get_mut(parent as usize) else {
            self.unwind(&marks, tracer);
            return Err(CascadeError::Fatal(SchedError::UnknownDeferredNode(parent)));
        };
        let Some(local) = node.local_child(child) else {
            tracing::error!(parent, child, "enqueue cascade reached a non-child node");
            self.unwind(&marks, tracer);
            return Err(CascadeError::Fatal(SchedError::UnknownChild {
                node: parent,
                child,
            }));
        };

        let before = node.enq_trace();
        let out = node.run_enqueue(sched_meta, now, local, child_pifo);
        emit_enq_trace(tracer, parent, before, out.trace);

        if out.pifo_id as usize >= node.pifo_count() {
            let recovered = self.unwind(&marks, tracer);
            return Err(CascadeError::Rejected { recovered });
        }

        let token = node.push_entry(
            out.pifo_id,
            PifoEntry::interior(
                local,
                child_pifo,
                out.rank,
                out.tx_time,
                out.tx_delta,
                sched_meta,
            ),
        );
        emit_occupancy(tracer, self.nodes[parent as usize].packets(), parent);

        marks.push(EntryMark {
            node: parent,
            pifo: out.pifo_id,
            token,
        });
        Ok((out.enq_delay, out.pifo_id, marks))
    }

    /// Remove every entry a cascade inserted. Returns the packet if the leaf entry was still
    /// resident (an entry can be gone if it was already dequeued directly).
    fn unwind(&mut self, marks: &[EntryMark], tracer: &Tracer) -> Option<Packet> {
        let mut recovered = None;
        for mark in marks {
            if let Some(node) = self.nodes.get_mut(mark.node as usize) {
                if let Some(entry) = node.remove_entry(mark.pifo, mark.token) {
                    emit_occupancy(tracer, node.packets(), mark.node);
                    if let EntryRef::Packet(packet) = entry.payload {
                        recovered = Some(packet);
                    }
                }
            }
        }
        recovered
    }

    /// Dequeue starting at `node_id`. `pifo` carries the PIFO chosen by the level above, or
    /// `None` when this node's own dequeue logic must choose (the root entry point and
    /// deferred re-entries).
    pub(crate) fn dequeue(
        &mut self,
        node_id: u32,
        pifo: Option<u8>,
        now: Time,
        runtime: &dyn Runtime,
        tracer: &Tracer,
        counters: &Counters,
    ) -> Result<Option<(Packet, SchedMeta)>, SchedError> {
        let node = self
            .nodes
            .get_mut(node_id as usize)
            .ok_or(SchedError::UnknownDeferredNode(node_id))?;
        let pifo_count = node.pifo_count();

        let chosen = match pifo {
            Some(p) if (p as usize) < pifo_count => p,
            _ => {
                let before = node.deq_trace();
                let out = node.select_pifo(now);
                emit_deq_trace(tracer, node_id, before, out.trace);

                if out.pifo_id as usize >= pifo_count {
                    // Nothing to release this round.
                    return Ok(None);
                }
                if out.deq_delay > 0 {
                    runtime.schedule(
                        Duration::from_nanos(out.deq_delay),
                        DeferredOp::Redequeue { node: node_id },
                    );
                    return Ok(None);
                }
                out.pifo_id
            }
        };

        self.dequeue_pifo(node_id, chosen, now, runtime, tracer, counters)
    }

    /// Pop the head of one PIFO, post the feedback event, and either release the packet or
    /// descend into the referenced child.
    fn dequeue_pifo(
        &mut self,
        node_id: u32,
        pifo: u8,
        now: Time,
        runtime: &dyn Runtime,
        tracer: &Tracer,
        counters: &Counters,
    ) -> Result<Option<(Packet, SchedMeta)>, SchedError> {
        let node = &mut self.nodes[node_id as usize];

        let Some(entry) = node.pop_pifo(pifo, now) else {
            // The level above believed this PIFO was occupied; the tree is inconsistent.
            tracing::error!(node = node_id, pifo, "dequeue requested on an empty PIFO");
            Counters::bump(&counters.empty_pops);
            return Ok(None);
        };

        let before = node.enq_trace();
        node.run_feedback(&entry, pifo, now);
        let after = node.enq_trace();
        emit_enq_trace(tracer, node_id, before, after);
        emit_occupancy(tracer, node.packets(), node_id);

        match entry.payload {
            EntryRef::Packet(packet) => Ok(Some((packet, entry.sched_meta))),
            EntryRef::Child {
                node: slot,
                pifo: child_pifo,
            } => {
                let Some(child_gid) = self.nodes[node_id as usize].child_global(slot) else {
                    tracing::error!(node = node_id, slot, "popped entry references no child");
                    return Err(SchedError::InvalidChildRef {
                        node: node_id,
                        slot,
                    });
                };
                self.dequeue(child_gid, Some(child_pifo), now, runtime, tracer, counters)
            }
        }
    }
}

fn emit_enq_trace(tracer: &Tracer, node: u32, before: [u32; 4], after: [u32; 4]) {
    if before != after && tracer.wants(TraceEventKind::EnqTrace) {
        tracer.emit(TraceEvent::EnqTrace { node, vars: after });
    }
}

fn emit_deq_trace(tracer: &Tracer, node: u32, before: [u32; 4], after: [u32; 4]) {
    if before != after && tracer.wants(TraceEventKind::DeqTrace) {
        tracer.emit(TraceEvent::DeqTrace { node, vars: after });
    }
}

fn emit_occupancy(tracer: &Tracer, packets: u32, node: u32) {
    if tracer.wants(TraceEventKind::NodeOccupancy) {
        tracer.emit(TraceEvent::NodeOccupancy { node, packets });
    }
}
