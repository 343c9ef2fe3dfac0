//! Byte-accounted admission control across buffer partitions.
//!
//! Each buffer id maps to an ordered list of partitions; admission walks the list and takes the
//! first partition with room. The buffer is the single accounting authority: nothing else in
//! the scheduler adds or removes bytes, and a packet's bytes are credited back from exactly the
//! partition that admitted it.

use crate::error::SchedError;
use std::collections::HashMap;

/// Result of a successful admission, stamped into the packet's scheduling metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Admission {
    pub partition_id: u32,
    /// Bytes in use in the partition immediately after this admission.
    pub used: u32,
    /// Configured limit of the partition.
    pub limit: u32,
}

/// Point-in-time usage of one partition, surfaced through [`crate::stats::Stats`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub struct PartitionUsage {
    pub used: u32,
    pub limit: u32,
}

/// The partitioned packet buffer.
pub struct PartitionedBuffer {
    used: Vec<u32>,
    limits: Vec<u32>,
    /// buffer id → partition indices tried in preference order.
    map: HashMap<u32, Vec<u32>>,
}

impl PartitionedBuffer {
    /// Build a buffer from partition limits and the id → partition-list map. Validation of the
    /// map against the partition count happens at configuration time.
    pub fn new(limits: Vec<u32>, map: HashMap<u32, Vec<u32>>) -> PartitionedBuffer {
        PartitionedBuffer {
            used: vec![0; limits.len()],
            limits,
            map,
        }
    }

    /// Try to admit `pkt_len` bytes under `buffer_id`.
    ///
    /// Walks the configured partition list in order and admits into the first partition where
    /// the bytes fit, returning the admission record. `Ok(None)` means no partition had room,
    /// which is a drop decided before any tree work. An unknown `buffer_id` is a
    /// configuration-class error, not a drop.
    pub fn admit(&mut self, buffer_id: u32, pkt_len: u32) -> Result<Option<Admission>, SchedError> {
        let partitions = self
            .map
            .get(&buffer_id)
            .ok_or(SchedError::UnknownBufferId(buffer_id))?;

        for &partition in partitions {
            let idx = partition as usize;
            let used = self.used[idx];
            if used as u64 + pkt_len as u64 <= self.limits[idx] as u64 {
                self.used[idx] = used + pkt_len;
                return Ok(Some(Admission {
                    partition_id: partition,
                    used: self.used[idx],
                    limit: self.limits[idx],
                }));
            }
        }
        Ok(None)
    }

    /// Credit `pkt_len` bytes back to the partition that admitted the packet.
    pub fn release(&mut self, partition_id: u32, pkt_len: u32) -> Result<(), SchedError> {
        let idx = partition_id as usize;
        if idx >= self.used.len() {
            return Err(SchedError::PartitionOutOfRange(partition_id));
        }
        if self.used[idx] < pkt_len {
            return Err(SchedError::ReleaseUnderflow {
                partition: partition_id,
                pkt_len,
                used: self.used[idx],
            });
        }
        self.used[idx] -= pkt_len;
        Ok(())
    }

    pub fn partition_count(&self) -> usize {
        self.limits.len()
    }

    pub fn usage(&self) -> Vec<PartitionUsage> {
        self.used
            .iter()
            .zip(&self.limits)
            .map(|(&used, &limit)| PartitionUsage { used, limit })
            .collect()
    }

    pub fn used_bytes(&self, partition_id: u32) -> Option<u32> {
        self.used.get(partition_id as usize).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> PartitionedBuffer {
        let mut map = HashMap::new();
        map.insert(0, vec![0]);
        map.insert(1, vec![0, 1]);
        PartitionedBuffer::new(vec![1000, 500], map)
    }

    #[test]
    fn admits_until_full_then_drops() {
        let mut buf = buffer();
        assert!(buf.admit(0, 400).unwrap().is_some());
        assert!(buf.admit(0, 400).unwrap().is_some());
        assert!(buf.admit(0, 400).unwrap().is_none());
        assert_eq!(buf.used_bytes(0), Some(800));
    }

    #[test]
    fn overflow_spills_to_next_partition_in_order() {
        let mut buf = buffer();
        assert_eq!(buf.admit(1, 900).unwrap().unwrap().partition_id, 0);
        // partition 0 is nearly full; the next admission lands in partition 1
        let admission = buf.admit(1, 300).unwrap().unwrap();
        assert_eq!(admission.partition_id, 1);
        assert_eq!(admission.used, 300);
        assert_eq!(admission.limit, 500);
    }

    #[test]
    fn release_restores_room() {
        let mut buf = buffer();
        let admission = buf.admit(0, 1000).unwrap().unwrap();
        assert!(buf.admit(0, 1).unwrap().is_none());
        buf.release(admission.partition_id, 1000).unwrap();
        assert!(buf.admit(0, 1).unwrap().is_some());
    }

    #[test]
    fn unknown_buffer_id_is_an_error_not_a_drop() {
        let mut buf = buffer();
        assert!(matches!(
            buf.admit(9, 1),
            Err(SchedError::UnknownBufferId(9))
        ));
    }

    #[test]
    fn release_checks_bounds() {
        let mut buf = buffer();
        assert!(matches!(
            buf.release(5, 1),
            Err(SchedError::PartitionOutOfRange(5))
        ));
        assert!(matches!(
            buf.release(0, 1),
            Err(SchedError::ReleaseUnderflow { .. })
        ));
    }

    #[test]
    fn exact_fit_is_admitted() {
        let mut buf = buffer();
        assert!(buf.admit(0, 1000).unwrap().is_some());
        assert_eq!(buf.used_bytes(0), Some(1000));
    }
}
