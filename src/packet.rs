//! Packet representation handed to the scheduler by the host.
//!
//! The scheduler treats packets as opaque handles: it never inspects the payload, only the
//! length and the flow hash the host computed. A packet admitted by [`crate::Scheduler::enqueue`]
//! is returned by a later dequeue as the same handle (same `id`), which the conservation tests
//! rely on.

use crate::pool::{lease, PayloadHandle};
use std::sync::atomic::{AtomicU64, Ordering};

static PACKET_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Largest payload the scheduler accepts (standard Ethernet MTU).
pub const MAX_PACKET_SIZE: usize = 1500;

/// An opaque packet handle carrying payload bytes and the flow hash used for classification.
#[derive(Clone, Debug)]
pub struct Packet {
    /// Process-unique identity, assigned at creation.
    pub id: u64,
    /// Flow hash computed by the host (5-tuple hash or equivalent).
    pub flow_hash: u32,
    payload: PayloadHandle,
    len: u32,
}

impl Packet {
    /// Create a packet by copying `payload` into pooled storage.
    pub fn new(flow_hash: u32, payload: &[u8]) -> Packet {
        let len = payload.len().min(MAX_PACKET_SIZE);
        let mut lease = lease(len);
        lease.as_mut_slice()[..len].copy_from_slice(&payload[..len]);
        Packet::from_payload(flow_hash, lease.freeze(len))
    }

    /// Wrap an already pooled payload without copying.
    pub fn from_payload(flow_hash: u32, payload: PayloadHandle) -> Packet {
        let len = payload.len().min(MAX_PACKET_SIZE) as u32;
        Packet {
            id: PACKET_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            flow_hash,
            payload,
            len,
        }
    }

    pub fn payload(&self) -> &[u8] {
        let slice = self.payload.as_slice();
        &slice[..(self.len as usize).min(slice.len())]
    }

    /// Payload length in bytes. This is the value byte accounting uses.
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packets_get_distinct_ids() {
        let a = Packet::new(1, &[0; 10]);
        let b = Packet::new(1, &[0; 10]);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn payload_round_trips() {
        let p = Packet::new(7, &[1, 2, 3]);
        assert_eq!(p.payload(), &[1, 2, 3]);
        assert_eq!(p.len(), 3);
        assert_eq!(p.flow_hash, 7);
    }

    #[test]
    fn oversized_payload_is_clamped() {
        let big = vec![0u8; MAX_PACKET_SIZE + 100];
        let p = Packet::new(0, &big);
        assert_eq!(p.len() as usize, MAX_PACKET_SIZE);
    }
}
