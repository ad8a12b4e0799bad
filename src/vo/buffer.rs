//! Frame memory and reference-counted video buffers

use anyhow::{Result, anyhow, bail};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::pipeline::types::Timestamp;

/// Alignment of every plane base address.
pub const ALIGNMENT: usize = 16;

/// Receives the backing storage of frame memory once it is released.
pub trait Recycle: Send + Sync {
    fn recycle(&self, data: Vec<u8>);
}

/// Owned region of bytes for one frame, aligned to [`ALIGNMENT`].
///
/// The backing vector is over-allocated and the aligned window inside it is
/// what callers see. When the memory came from a pool it goes back there on
/// drop.
pub struct FrameMemory {
    data: Vec<u8>,
    offset: usize,
    len: usize,
    recycler: Option<Arc<dyn Recycle>>,
}

impl FrameMemory {
    /// Allocate `len` zeroed bytes, over-allocating by one alignment unit.
    pub fn aligned(len: usize) -> Result<Self> {
        let data = try_alloc(len + ALIGNMENT)?;
        Self::from_vec(data, len, None)
    }

    /// Wrap existing storage. It must hold `len` bytes past its first
    /// aligned address.
    pub fn from_vec(
        data: Vec<u8>,
        len: usize,
        recycler: Option<Arc<dyn Recycle>>,
    ) -> Result<Self> {
        let offset = data.as_ptr().align_offset(ALIGNMENT);
        match offset.checked_add(len) {
            Some(end) if end <= data.len() => Ok(Self {
                data,
                offset,
                len,
                recycler,
            }),
            _ => bail!(
                "backing storage of {} bytes cannot hold {} aligned bytes",
                data.len(),
                len
            ),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[self.offset..self.offset + self.len]
    }
}

impl Drop for FrameMemory {
    fn drop(&mut self) {
        if let Some(recycler) = self.recycler.take() {
            recycler.recycle(std::mem::take(&mut self.data));
        }
    }
}

impl std::fmt::Debug for FrameMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameMemory")
            .field("len", &self.len)
            .field("offset", &self.offset)
            .field("pooled", &self.recycler.is_some())
            .finish()
    }
}

/// Allocate a zeroed vector, reporting failure instead of aborting.
pub(crate) fn try_alloc(size: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(size)
        .map_err(|e| anyhow!("failed to allocate {} bytes: {}", size, e))?;
    data.resize(size, 0);
    Ok(data)
}

/// Plane layout of a planar YUV 4:2:0 frame
///
/// With `q = width * height / 4`: luma takes `4q` bytes at offset 0,
/// chroma-U `q` bytes at `4q`, chroma-V `q` bytes at `5q`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    quarter: usize,
}

impl PlaneLayout {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            quarter: width as usize * height as usize / 4,
        }
    }

    /// Total bytes for one frame
    pub fn size(&self) -> usize {
        6 * self.quarter
    }

    /// Base offsets of the Y, U and V planes
    pub fn offsets(&self) -> [usize; 3] {
        [0, 4 * self.quarter, 5 * self.quarter]
    }
}

/// Mutable views on the three planes of a frame
pub struct Planes<'a> {
    pub y: &'a mut [u8],
    pub u: &'a mut [u8],
    pub v: &'a mut [u8],
}

struct BufferData {
    memory: FrameMemory,
    pts: Option<Timestamp>,
    read_only: bool,
}

struct BufferInner {
    width: u32,
    height: u32,
    layout: PlaneLayout,
    data: RwLock<BufferData>,
}

/// Shared handle to a decoded frame
///
/// Cloning takes a reference, dropping releases it. The memory is released
/// when the last handle goes away.
#[derive(Clone)]
pub struct VideoBuffer {
    inner: Arc<BufferInner>,
}

impl VideoBuffer {
    pub fn new(memory: FrameMemory, width: u32, height: u32) -> Result<Self> {
        let layout = PlaneLayout::new(width, height);
        if memory.len() < layout.size() {
            bail!(
                "{} bytes of frame memory for a {}x{} frame needing {}",
                memory.len(),
                width,
                height,
                layout.size()
            );
        }

        Ok(Self {
            inner: Arc::new(BufferInner {
                width,
                height,
                layout,
                data: RwLock::new(BufferData {
                    memory,
                    pts: None,
                    read_only: false,
                }),
            }),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, BufferData> {
        self.inner.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BufferData> {
        self.inner.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn width(&self) -> u32 {
        self.inner.width
    }

    pub fn height(&self) -> u32 {
        self.inner.height
    }

    pub fn layout(&self) -> PlaneLayout {
        self.inner.layout
    }

    /// Bytes of frame data (all three planes)
    pub fn size(&self) -> usize {
        self.inner.layout.size()
    }

    pub fn pts(&self) -> Option<Timestamp> {
        self.read().pts
    }

    pub fn set_pts(&self, pts: Timestamp) {
        self.write().pts = Some(pts);
    }

    pub fn is_read_only(&self) -> bool {
        self.read().read_only
    }

    pub fn set_read_only(&self) {
        self.write().read_only = true;
    }

    /// Number of live handles on this buffer
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn ptr_eq(&self, other: &VideoBuffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Write into the planes. Fails once the buffer was made read-only.
    pub fn write_planes<R>(&self, f: impl FnOnce(Planes<'_>) -> R) -> Result<R> {
        let mut data = self.write();
        if data.read_only {
            bail!("buffer is read-only");
        }

        let [_, u_at, v_at] = self.inner.layout.offsets();
        let size = self.inner.layout.size();
        let frame = &mut data.memory.as_mut_slice()[..size];
        let (y, chroma) = frame.split_at_mut(u_at);
        let (u, v) = chroma.split_at_mut(v_at - u_at);

        Ok(f(Planes { y, u, v }))
    }

    /// Read the frame data (all three planes, contiguous)
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let data = self.read();
        f(&data.memory.as_slice()[..self.inner.layout.size()])
    }

    /// Address of the first byte of frame data
    pub fn base_address(&self) -> usize {
        self.with_data(|d| d.as_ptr() as usize)
    }
}

impl std::fmt::Debug for VideoBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.read();
        f.debug_struct("VideoBuffer")
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .field("pts", &data.pts)
            .field("read_only", &data.read_only)
            .field("refs", &self.ref_count())
            .finish()
    }
}
