use anyhow::{Context, Result, anyhow};
use log::{debug, info, trace};

use super::buffer::{FrameMemory, PlaneLayout, VideoBuffer};
use super::peer_pool::BufferPool;

/// Slots in the pool: two prediction slots used alternately and one slot
/// for pictures nothing predicts from.
pub const NUM_FRAMES: usize = 3;

const NON_PREDICTION_SLOT: usize = 2;

/// Index of a slot in the [`FramePool`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

impl SlotId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

/// One reusable output buffer.
///
/// An occupied slot holds the pool's reuse reference in `buffer`. Until the
/// frame is delivered it also holds the reference destined for downstream in
/// `delivery`; delivering moves that reference out, discarding drops it.
#[derive(Debug, Default)]
struct Slot {
    buffer: Option<VideoBuffer>,
    delivery: Option<VideoBuffer>,
}

impl Slot {
    fn delivered(&self) -> bool {
        self.delivery.is_none()
    }

    /// Drop every reference the pool still holds.
    fn release(&mut self) {
        if let Some(undelivered) = self.delivery.take() {
            trace!("FramePool: dropping undelivered frame");
            drop(undelivered);
        }
        self.buffer = None;
    }
}

/// Fixed pool of output frames for the decoding engine.
///
/// The engine keeps the last reconstructed prediction picture alive while
/// building the next one, so prediction requests alternate between two
/// slots. Buffers are allocated lazily on acquire and a slot's previous
/// buffer is released on reuse: twice if it was never delivered, once
/// otherwise.
pub struct FramePool {
    slots: [Slot; NUM_FRAMES],
    prediction_index: usize,
    size: Option<(u32, u32)>,
    allocations: u64,
}

impl FramePool {
    pub fn new() -> Self {
        Self {
            slots: Default::default(),
            prediction_index: 1,
            size: None,
            allocations: 0,
        }
    }

    /// Set the frame size for following acquisitions.
    ///
    /// The first prediction request after this lands on slot 0.
    pub fn configure(&mut self, width: u32, height: u32) {
        info!("FramePool: setup {}x{}", width, height);
        self.size = Some((width, height));
        self.prediction_index = 1;
    }

    pub fn frame_size(&self) -> Option<(u32, u32)> {
        self.size
    }

    /// Bytes per frame for the configured size
    pub fn frame_bytes(&self) -> Option<usize> {
        self.size.map(|(w, h)| PlaneLayout::new(w, h).size())
    }

    /// Hand a slot with a fresh buffer to the decoding engine.
    ///
    /// Memory comes from `peer_pool` when one is latched. The new buffer
    /// carries two references: the slot's own and the one that will go
    /// downstream.
    pub fn acquire(
        &mut self,
        predictive: bool,
        peer_pool: Option<&dyn BufferPool>,
    ) -> Result<SlotId> {
        let (width, height) = self
            .size
            .ok_or_else(|| anyhow!("frame requested before the frame size is known"))?;

        let index = if predictive {
            self.prediction_index ^= 1;
            self.prediction_index
        } else {
            NON_PREDICTION_SLOT
        };
        trace!("FramePool: get_frame predictive={} -> slot {}", predictive, index);

        // we are reusing this slot
        let slot = &mut self.slots[index];
        if slot.buffer.is_some() {
            if !slot.delivered() {
                debug!("FramePool: slot {} reused before its frame was delivered", index);
            }
            slot.release();
        }

        let len = PlaneLayout::new(width, height).size();
        let memory = match peer_pool {
            Some(pool) => pool.acquire(len),
            None => FrameMemory::aligned(len),
        }
        .with_context(|| format!("allocating a {}x{} frame", width, height))?;

        let buffer = VideoBuffer::new(memory, width, height)?;
        slot.delivery = Some(buffer.clone());
        slot.buffer = Some(buffer);
        self.allocations += 1;

        Ok(SlotId(index))
    }

    /// Buffer in a slot, for the engine to write into
    pub fn buffer(&self, slot: SlotId) -> Option<&VideoBuffer> {
        self.slots.get(slot.0)?.buffer.as_ref()
    }

    /// Whether the slot's frame was delivered (or discarded)
    pub fn is_delivered(&self, slot: SlotId) -> bool {
        self.slots.get(slot.0).is_none_or(Slot::delivered)
    }

    /// Take the reference destined for downstream out of the slot.
    ///
    /// `None` if the frame was already delivered or discarded.
    pub fn deliver(&mut self, slot: SlotId) -> Option<VideoBuffer> {
        self.slots.get_mut(slot.0)?.delivery.take()
    }

    /// Release the downstream reference without delivering the frame.
    pub fn discard(&mut self, slot: SlotId) {
        if let Some(s) = self.slots.get_mut(slot.0) {
            s.delivery = None;
        }
    }

    /// Buffers allocated since the pool was created
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    /// Slots currently holding a buffer
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.buffer.is_some()).count()
    }

    /// Release every buffer the pool still references.
    pub fn destroy(mut self) {
        info!("FramePool: destroy ({} frames allocated)", self.allocations);
        for slot in &mut self.slots {
            slot.release();
        }
    }
}

impl Default for FramePool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FramePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePool")
            .field("size", &self.size)
            .field("occupied", &self.occupied())
            .field("prediction_index", &self.prediction_index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vo::buffer::{ALIGNMENT, Recycle};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Buffer pool counting how often memory is handed out and released
    #[derive(Default)]
    struct Counting {
        acquired: AtomicUsize,
        released: AtomicUsize,
        released_ids: Mutex<Vec<usize>>,
    }

    struct CountingPool(Arc<Counting>);

    impl Recycle for Counting {
        fn recycle(&self, data: Vec<u8>) {
            // first byte tags the allocation
            self.released_ids.lock().unwrap().push(data[0] as usize);
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl BufferPool for CountingPool {
        fn acquire(&self, len: usize) -> Result<FrameMemory> {
            let id = self.0.acquired.fetch_add(1, Ordering::SeqCst);
            let mut data = vec![0u8; len + 2 * ALIGNMENT];
            data[0] = id as u8;
            let recycler: Arc<dyn Recycle> = self.0.clone();
            FrameMemory::from_vec(data, len, Some(recycler))
        }
    }

    fn counting() -> (Arc<Counting>, CountingPool) {
        let counts = Arc::new(Counting::default());
        (counts.clone(), CountingPool(counts))
    }

    fn configured() -> FramePool {
        let mut pool = FramePool::new();
        pool.configure(16, 16);
        pool
    }

    #[test]
    fn test_acquire_before_setup_fails() {
        let mut pool = FramePool::new();
        assert!(pool.acquire(true, None).is_err());
    }

    #[test]
    fn test_prediction_slots_alternate() {
        let mut pool = configured();
        let slots: Vec<usize> = (0..6)
            .map(|_| pool.acquire(true, None).unwrap().index())
            .collect();
        assert_eq!(slots, vec![0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn test_non_prediction_slot_is_fixed() {
        let mut pool = configured();
        for _ in 0..3 {
            assert_eq!(pool.acquire(false, None).unwrap().index(), 2);
        }
        // non-prediction requests do not disturb the alternation
        assert_eq!(pool.acquire(true, None).unwrap().index(), 0);
        assert_eq!(pool.acquire(false, None).unwrap().index(), 2);
        assert_eq!(pool.acquire(true, None).unwrap().index(), 1);
    }

    #[test]
    fn test_configure_resets_alternation() {
        let mut pool = configured();
        pool.acquire(true, None).unwrap();
        pool.configure(32, 32);
        assert_eq!(pool.acquire(true, None).unwrap().index(), 0);
    }

    #[test]
    fn test_new_buffer_holds_two_references() {
        let mut pool = configured();
        let slot = pool.acquire(true, None).unwrap();
        let buffer = pool.buffer(slot).unwrap();

        assert_eq!(buffer.ref_count(), 2);
        assert_eq!(buffer.size(), 6 * 16 * 16 / 4);
        assert_eq!(buffer.base_address() % ALIGNMENT, 0);
        assert!(!pool.is_delivered(slot));
    }

    #[test]
    fn test_deliver_moves_one_reference() {
        let mut pool = configured();
        let slot = pool.acquire(false, None).unwrap();

        let delivered = pool.deliver(slot).unwrap();
        assert!(pool.is_delivered(slot));
        assert_eq!(delivered.ref_count(), 2);
        assert!(pool.deliver(slot).is_none());

        drop(delivered);
        assert_eq!(pool.buffer(slot).unwrap().ref_count(), 1);
    }

    #[test]
    fn test_reuse_of_delivered_slot_releases_once() {
        let (counts, peer) = counting();
        let mut pool = configured();

        let slot = pool.acquire(false, Some(&peer)).unwrap();
        let downstream = pool.deliver(slot).unwrap();

        pool.acquire(false, Some(&peer)).unwrap();
        // downstream still holds the first frame
        assert_eq!(counts.released.load(Ordering::SeqCst), 0);
        assert_eq!(downstream.ref_count(), 1);

        drop(downstream);
        assert_eq!(counts.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reuse_of_undelivered_slot_releases_both() {
        let (counts, peer) = counting();
        let mut pool = configured();

        pool.acquire(false, Some(&peer)).unwrap();
        pool.acquire(false, Some(&peer)).unwrap();

        assert_eq!(counts.acquired.load(Ordering::SeqCst), 2);
        assert_eq!(counts.released.load(Ordering::SeqCst), 1);
        assert_eq!(*counts.released_ids.lock().unwrap(), vec![0]);
    }

    #[test]
    fn test_discard_then_reuse() {
        let (counts, peer) = counting();
        let mut pool = configured();

        let slot = pool.acquire(true, Some(&peer)).unwrap();
        pool.discard(slot);
        assert!(pool.is_delivered(slot));
        assert_eq!(pool.buffer(slot).unwrap().ref_count(), 1);

        pool.acquire(true, Some(&peer)).unwrap();
        pool.acquire(true, Some(&peer)).unwrap();
        assert_eq!(counts.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reference_balance() {
        let (counts, peer) = counting();
        let mut pool = configured();
        let mut downstream = Vec::new();

        // I P B B P B with reference display order
        let script = [true, true, false, false, true, false, true, false, false];
        let mut held: Option<SlotId> = None;
        for (i, predictive) in script.iter().enumerate() {
            let slot = pool.acquire(*predictive, Some(&peer)).unwrap();
            let show = if *predictive { held.replace(slot) } else { Some(slot) };
            if let Some(show) = show {
                if i % 4 == 3 {
                    pool.discard(show);
                } else {
                    downstream.push(pool.deliver(show).unwrap());
                }
            }
        }

        let acquired = counts.acquired.load(Ordering::SeqCst);
        assert_eq!(acquired, script.len());

        downstream.clear();
        pool.destroy();

        assert_eq!(counts.released.load(Ordering::SeqCst), acquired);
        let mut ids = counts.released_ids.lock().unwrap().clone();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), acquired, "every buffer released exactly once");
    }

    #[test]
    fn test_destroy_with_undelivered_frames() {
        let (counts, peer) = counting();
        let mut pool = configured();

        pool.acquire(true, Some(&peer)).unwrap();
        let slot = pool.acquire(true, Some(&peer)).unwrap();
        let downstream = pool.deliver(slot).unwrap();
        pool.acquire(false, Some(&peer)).unwrap();

        pool.destroy();
        assert_eq!(counts.released.load(Ordering::SeqCst), 2);

        drop(downstream);
        assert_eq!(counts.released.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_self_allocated_buffers() {
        let mut pool = configured();
        let a = pool.acquire(true, None).unwrap();
        let b = pool.acquire(true, None).unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.occupied(), 2);
        assert_eq!(pool.allocations(), 2);
        assert_eq!(pool.frame_bytes(), Some(384));
    }
}
