//! One node of the PIFO tree.
//!
//! A node owns its PIFOs and its two logic programs, plus the persisted trace variables those
//! programs carry between invocations. Structure (parent, children, the global→local child
//! map) is wired once at configuration time. Traversal across nodes lives in
//! [`crate::tree::PifoTree`]; everything here touches a single node.

use crate::logic::{
    DeqEvent, DeqInput, DeqOutput, DequeueLogic, EnqInput, EnqOutput, EnqueueLogic, PifoSnapshot,
    SchedMeta, MAX_PIFOS,
};
use crate::pifo::{EntryRef, EntryToken, Pifo, PifoEntry};
use crate::time::Time;
use std::collections::HashMap;

pub(crate) struct Node {
    parent: Option<u32>,
    /// Global ids of children; the position in this list is the child's local index.
    children: Vec<u32>,
    global_to_local: HashMap<u32, u8>,
    pifos: Vec<Pifo>,
    enq_logic: Box<dyn EnqueueLogic>,
    deq_logic: Option<Box<dyn DequeueLogic>>,
    enq_trace: [u32; 4],
    deq_trace: [u32; 4],
    packets: u32,
}

impl Node {
    pub(crate) fn new(
        num_pifos: usize,
        enq_logic: Box<dyn EnqueueLogic>,
        deq_logic: Option<Box<dyn DequeueLogic>>,
    ) -> Node {
        let mut pifos = Vec::with_capacity(num_pifos);
        pifos.resize_with(num_pifos, Pifo::new);
        Node {
            parent: None,
            children: Vec::new(),
            global_to_local: HashMap::new(),
            pifos,
            enq_logic,
            deq_logic,
            enq_trace: [0; 4],
            deq_trace: [0; 4],
            packets: 0,
        }
    }

    pub(crate) fn parent(&self) -> Option<u32> {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: u32) {
        debug_assert!(self.parent.is_none(), "a node has exactly one parent");
        self.parent = Some(parent);
    }

    /// Register `child` as the next local child of this node.
    pub(crate) fn add_child(&mut self, child_global_id: u32) {
        let local = self.children.len() as u8;
        self.children.push(child_global_id);
        self.global_to_local.insert(child_global_id, local);
    }

    pub(crate) fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub(crate) fn pifo_count(&self) -> usize {
        self.pifos.len()
    }

    pub(crate) fn has_dequeue_logic(&self) -> bool {
        self.deq_logic.is_some()
    }

    /// Translate a child's global id into its local index at this node.
    pub(crate) fn local_child(&self, child_global_id: u32) -> Option<u8> {
        self.global_to_local.get(&child_global_id).copied()
    }

    pub(crate) fn child_global(&self, local: u8) -> Option<u32> {
        self.children.get(local as usize).copied()
    }

    pub(crate) fn packets(&self) -> u32 {
        self.packets
    }

    pub(crate) fn enq_trace(&self) -> [u32; 4] {
        self.enq_trace
    }

    pub(crate) fn deq_trace(&self) -> [u32; 4] {
        self.deq_trace
    }

    /// Run the enqueue logic for one trigger and persist its trace variables.
    pub(crate) fn run_enqueue(
        &mut self,
        sched_meta: SchedMeta,
        now: Time,
        child_node: u8,
        child_pifo: u8,
    ) -> EnqOutput {
        let input = EnqInput {
            sched_meta,
            now,
            is_leaf: self.is_leaf(),
            child_node,
            child_pifo,
            trace: self.enq_trace,
        };
        let output = self.enq_logic.on_enqueue(input);
        self.enq_trace = output.trace;
        output
    }

    /// Post the dequeue-feedback event for a popped entry into the enqueue logic.
    ///
    /// Runs strictly after the pop and strictly before any descent into a child; policies such
    /// as token-bucket refill and deficit updates depend on that ordering.
    pub(crate) fn run_feedback(&mut self, entry: &PifoEntry, popped_pifo: u8, now: Time) {
        let (node, pifo) = match entry.payload {
            EntryRef::Packet(_) => (0, popped_pifo),
            EntryRef::Child { node, pifo } => (node, pifo),
        };
        let event = DeqEvent {
            node,
            pifo,
            rank: entry.rank,
            tx_time: entry.tx_time,
            tx_delta: entry.tx_delta,
            sched_meta: entry.sched_meta,
            now,
            trace: self.enq_trace,
        };
        self.enq_trace = self.enq_logic.on_dequeue_event(event);
    }

    /// Ask the dequeue logic which PIFO to release from, persisting its trace variables.
    ///
    /// Without dequeue logic the node falls back to the lowest-indexed non-empty PIFO, which is
    /// the only sensible answer for single-PIFO nodes.
    pub(crate) fn select_pifo(&mut self, now: Time) -> DeqOutput {
        let is_leaf = self.children.is_empty();
        let snapshot = self.snapshot();
        match &mut self.deq_logic {
            Some(logic) => {
                let input = DeqInput {
                    now,
                    is_leaf,
                    pifos: snapshot,
                    trace: self.deq_trace,
                };
                let output = logic.select(input);
                self.deq_trace = output.trace;
                output
            }
            None => DeqOutput {
                pifo_id: self
                    .pifos
                    .iter()
                    .position(|p| !p.is_empty())
                    .map(|i| i as u8)
                    .unwrap_or(u8::MAX),
                deq_delay: 0,
                trace: self.deq_trace,
            },
        }
    }

    /// Build the fixed-width per-PIFO view handed to dequeue logic.
    fn snapshot(&self) -> [PifoSnapshot; MAX_PIFOS] {
        let mut snap = [PifoSnapshot::default(); MAX_PIFOS];
        for (i, slot) in snap.iter_mut().enumerate() {
            let Some(pifo) = self.pifos.get(i) else { break };
            slot.last_deq_time = pifo.last_pop_time();
            if let Some(head) = pifo.peek() {
                let (child_node, child_pifo) = head.child_ref();
                slot.is_empty = false;
                slot.child_node = child_node;
                slot.child_pifo = child_pifo;
                slot.rank = head.rank;
                slot.tx_time = head.tx_time;
                slot.tx_delta = head.tx_delta;
                slot.pkt_len = head.sched_meta.pkt_len;
            }
        }
        snap
    }

    /// Push an entry into the given PIFO and bump the occupancy gauge.
    pub(crate) fn push_entry(&mut self, pifo_id: u8, entry: PifoEntry) -> EntryToken {
        let token = self.pifos[pifo_id as usize].push(entry);
        self.packets += 1;
        token
    }

    pub(crate) fn pop_pifo(&mut self, pifo_id: u8, now: Time) -> Option<PifoEntry> {
        let entry = self.pifos[pifo_id as usize].pop(now)?;
        self.packets -= 1;
        Some(entry)
    }

    /// Remove a previously inserted entry during rollback.
    pub(crate) fn remove_entry(&mut self, pifo_id: u8, token: EntryToken) -> Option<PifoEntry> {
        let entry = self.pifos[pifo_id as usize].remove(token)?;
        self.packets -= 1;
        Some(entry)
    }
}
