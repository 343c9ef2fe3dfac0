//! The deferred-operation contract between the scheduler and its host runtime.
//!
//! Shaping pushes work into the future: a non-zero `enq_delay` defers the next cascade level,
//! a non-zero `deq_delay` defers a fresh dequeue attempt. The scheduler does not own a clock
//! or an event loop; it asks the host for *now* and hands it [`DeferredOp`] messages to run
//! later. Ops scheduled for the same instant run in scheduling order, and an op scheduled with
//! zero delay still runs only after the operation that scheduled it completes.
//!
//! [`EventCalendar`] is the bundled single-threaded implementation: a virtual clock plus a
//! due-time queue that a discrete-event host (or a test) drives explicitly.

use crate::error::SchedError;
use crate::logic::SchedMeta;
use crate::packet::Packet;
use crate::scheduler::Scheduler;
use crate::time::Time;
use crate::tree::EntryMark;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

/// A unit of deferred scheduler work, carried as a message rather than a closure so hosts can
/// queue, inspect, and replay them.
#[derive(Debug)]
pub enum DeferredOp {
    /// Continue an enqueue cascade at `parent` with the entry the level below produced.
    EnqueueStep {
        parent: u32,
        child: u32,
        child_pifo: u8,
        sched_meta: SchedMeta,
        /// Entries already inserted for this packet, so a later rejection can unwind them.
        marks: Vec<EntryMark>,
    },
    /// Re-enter the dequeue path at `node`, letting its dequeue logic choose the PIFO.
    Redequeue { node: u32 },
}

/// Clock and timer facility the scheduler imports from its host.
pub trait Runtime {
    /// Current virtual (or sampled) time. Monotonic.
    fn now(&self) -> Time;

    /// Run `op` against the scheduler once `after` has elapsed.
    fn schedule(&self, after: Duration, op: DeferredOp);
}

struct Pending {
    due: Time,
    seq: u64,
    op: DeferredOp,
}

impl Ord for Pending {
    // Reversed so the std max-heap pops the earliest (due, seq) first.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.due, other.seq).cmp(&(self.due, self.seq))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Pending {}

#[derive(Default)]
struct CalendarState {
    now: Time,
    next_seq: u64,
    queue: BinaryHeap<Pending>,
}

/// Single-threaded virtual-time runtime.
///
/// The host advances time explicitly; due operations are applied to the scheduler in
/// `(due, scheduling order)` order, and the clock never moves backwards. Packets released by
/// deferred dequeues are collected and handed back to the caller of
/// [`EventCalendar::advance_until`].
#[derive(Default)]
pub struct EventCalendar {
    state: Mutex<CalendarState>,
}

impl EventCalendar {
    pub fn new() -> EventCalendar {
        EventCalendar::default()
    }

    pub fn starting_at(start: Time) -> EventCalendar {
        EventCalendar {
            state: Mutex::new(CalendarState {
                now: start,
                ..CalendarState::default()
            }),
        }
    }

    /// Operations waiting to run.
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Advance the clock to `until`, applying every operation due on the way in order.
    ///
    /// Returns the packets released by deferred dequeues; the host forwards them wherever
    /// packets leaving the scheduler go.
    pub fn advance_until(
        &self,
        scheduler: &mut Scheduler,
        until: Time,
    ) -> Result<Vec<Packet>, SchedError> {
        let mut released = Vec::new();
        loop {
            let op = {
                let mut state = self.state.lock();
                let ready = state
                    .queue
                    .peek()
                    .map(|pending| pending.due <= until)
                    .unwrap_or(false);
                if !ready {
                    break;
                }
                let pending = state.queue.pop().expect("a due operation was just observed");
                // Time jumps to the op's due instant so the op observes the clock it was
                // scheduled for.
                state.now = state.now.max(pending.due);
                pending.op
            };
            // The lock is dropped while applying: an op may schedule follow-ups.
            if let Some(packet) = scheduler.apply_deferred(op)? {
                released.push(packet);
            }
        }
        let mut state = self.state.lock();
        state.now = state.now.max(until);
        Ok(released)
    }

    /// Convenience wrapper over [`EventCalendar::advance_until`].
    pub fn advance(
        &self,
        scheduler: &mut Scheduler,
        by: Duration,
    ) -> Result<Vec<Packet>, SchedError> {
        let until = self.now() + by;
        self.advance_until(scheduler, until)
    }
}

impl Runtime for EventCalendar {
    fn now(&self) -> Time {
        self.state.lock().now
    }

    fn schedule(&self, after: Duration, op: DeferredOp) {
        let mut state = self.state.lock();
        let due = state.now + after;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.queue.push(Pending { due, seq, op });
    }
}
