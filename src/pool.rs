//! Pooled payload storage for packets.
//!
//! Payload buffers are recycled through power-of-two slabs so that admitting and releasing
//! packets in a tight simulation loop does not churn the allocator. Callers lease a buffer
//! sized for the incoming payload, fill it, and freeze it into a [`PayloadHandle`] which wraps
//! the bytes in an `Arc` so packet handles can be cloned without copying.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::OnceLock;

const MIN_SLAB: usize = 64;
const MAX_SLAB: usize = 16_384;
const SLAB_SIZES: [usize; 9] = [64, 128, 256, 512, 1024, 2048, 4096, 8192, 16_384];
const SLAB_DEPTH: usize = 64;

static SLABS: OnceLock<Vec<Mutex<Vec<Vec<u8>>>>> = OnceLock::new();

fn slabs() -> &'static [Mutex<Vec<Vec<u8>>>] {
    SLABS.get_or_init(|| {
        SLAB_SIZES
            .iter()
            .map(|&size| {
                let mut free = Vec::with_capacity(SLAB_DEPTH);
                for _ in 0..SLAB_DEPTH {
                    free.push(vec![0u8; size]);
                }
                Mutex::new(free)
            })
            .collect()
    })
}

#[inline]
fn slab_size_for(len: usize) -> usize {
    len.max(1).next_power_of_two().clamp(MIN_SLAB, MAX_SLAB)
}

#[inline]
fn slab_index(size: usize) -> usize {
    debug_assert!(size.is_power_of_two());
    size.trailing_zeros() as usize - MIN_SLAB.trailing_zeros() as usize
}

fn acquire(size: usize) -> Vec<u8> {
    slabs()[slab_index(size)]
        .lock()
        .pop()
        .unwrap_or_else(|| vec![0u8; size])
}

fn recycle(size: usize, mut buf: Vec<u8>) {
    buf.clear();
    buf.resize(size, 0);
    let mut free = slabs()[slab_index(size)].lock();
    if free.len() < SLAB_DEPTH {
        free.push(buf);
    }
}

/// Exclusive write access to a pooled buffer before it becomes packet payload.
pub struct PayloadLease {
    slab: usize,
    data: Option<Vec<u8>>,
}

impl PayloadLease {
    /// Borrow the writable bytes.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.data
            .as_mut()
            .expect("payload lease already consumed")
            .as_mut_slice()
    }

    /// Finish writing and share the first `len` bytes.
    pub fn freeze(mut self, len: usize) -> PayloadHandle {
        let mut data = self.data.take().expect("payload lease already consumed");
        data.truncate(len.min(data.len()));
        PayloadHandle {
            inner: Arc::new(PayloadInner {
                slab: self.slab,
                data: Some(data),
            }),
        }
    }
}

impl Drop for PayloadLease {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            recycle(self.slab, data);
        }
    }
}

#[derive(Debug)]
struct PayloadInner {
    slab: usize,
    data: Option<Vec<u8>>,
}

impl Drop for PayloadInner {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            recycle(self.slab, data);
        }
    }
}

/// Shared, cloneable view of packet payload bytes.
#[derive(Clone, Debug)]
pub struct PayloadHandle {
    inner: Arc<PayloadInner>,
}

impl PayloadHandle {
    pub fn as_slice(&self) -> &[u8] {
        self.inner.data.as_deref().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lease a buffer with room for `size_hint` bytes.
pub fn lease(size_hint: usize) -> PayloadLease {
    let slab = slab_size_for(size_hint);
    PayloadLease {
        slab,
        data: Some(acquire(slab)),
    }
}
