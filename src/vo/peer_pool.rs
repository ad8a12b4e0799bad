use anyhow::Result;
use log::debug;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::buffer::{ALIGNMENT, FrameMemory, Recycle, try_alloc};

/// Buffer pool advertised by a downstream consumer.
///
/// When one is latched the frame pool takes its frame memory from here
/// instead of allocating. Memory handed out must come back to the pool when
/// it is dropped.
pub trait BufferPool: Send + Sync {
    /// Memory for one frame of `len` bytes, aligned to [`ALIGNMENT`].
    fn acquire(&self, len: usize) -> Result<FrameMemory>;
}

/// Number of released storages kept for reuse.
const MAX_RETAINED: usize = 8;

struct PoolShared {
    free: Mutex<VecDeque<Vec<u8>>>,
    allocated: AtomicU64,
    reused: AtomicU64,
    returned: AtomicU64,
}

impl Recycle for PoolShared {
    fn recycle(&self, data: Vec<u8>) {
        self.returned.fetch_add(1, Ordering::Relaxed);
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        // Only keep storage if pool isn't too large (prevent unbounded growth)
        if free.len() < MAX_RETAINED {
            free.push_back(data);
        }
    }
}

/// Recycling buffer pool for reusing frame storage to avoid allocations.
///
/// - Reuses storage via the acquire / drop cycle
/// - Falls back to allocation if no stored vector is large enough
#[derive(Clone)]
pub struct RecyclingPool {
    shared: Arc<PoolShared>,
}

impl RecyclingPool {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(PoolShared {
                free: Mutex::new(VecDeque::with_capacity(MAX_RETAINED)),
                allocated: AtomicU64::new(0),
                reused: AtomicU64::new(0),
                returned: AtomicU64::new(0),
            }),
        }
    }

    /// Fresh allocations so far
    pub fn allocated(&self) -> u64 {
        self.shared.allocated.load(Ordering::Relaxed)
    }

    /// Acquisitions served from recycled storage
    pub fn reused(&self) -> u64 {
        self.shared.reused.load(Ordering::Relaxed)
    }

    /// Memory handed out and not yet returned
    pub fn outstanding(&self) -> u64 {
        let handed_out = self.allocated() + self.reused();
        handed_out - self.shared.returned.load(Ordering::Relaxed)
    }

    /// Storage currently waiting for reuse
    pub fn idle(&self) -> usize {
        self.shared
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn take_free(&self, needed: usize) -> Option<Vec<u8>> {
        let mut free = self
            .shared
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let index = free.iter().position(|data| data.len() >= needed)?;
        free.remove(index)
    }
}

impl Default for RecyclingPool {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferPool for RecyclingPool {
    fn acquire(&self, len: usize) -> Result<FrameMemory> {
        let needed = len + ALIGNMENT;
        let data = match self.take_free(needed) {
            Some(data) => {
                self.shared.reused.fetch_add(1, Ordering::Relaxed);
                data
            }
            None => {
                debug!("PeerPool: allocating {} bytes", needed);
                let data = try_alloc(needed)?;
                self.shared.allocated.fetch_add(1, Ordering::Relaxed);
                data
            }
        };

        let recycler: Arc<dyn Recycle> = self.shared.clone();
        FrameMemory::from_vec(data, len, Some(recycler))
    }
}

impl std::fmt::Debug for RecyclingPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecyclingPool")
            .field("allocated", &self.allocated())
            .field("reused", &self.reused())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}
