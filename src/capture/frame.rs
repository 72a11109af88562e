use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;

/// Stream a frame belongs to. Discriminants match the libfreenect2 bit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Color = 1,
    Ir = 2,
    Depth = 4,
}

impl FrameType {
    pub const ALL: [FrameType; 3] = [FrameType::Color, FrameType::Ir, FrameType::Depth];

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            FrameType::Color => 3,
            FrameType::Ir | FrameType::Depth => 4,
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            FrameType::Color => 0,
            FrameType::Ir => 1,
            FrameType::Depth => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FrameType::Color => "rgb",
            FrameType::Ir => "ir",
            FrameType::Depth => "depth",
        }
    }
}

/// Set of frame types, e.g. the streams a listener synchronizes on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameTypes(u8);

impl FrameTypes {
    pub const COLOR: FrameTypes = FrameTypes(FrameType::Color as u8);
    pub const IR: FrameTypes = FrameTypes(FrameType::Ir as u8);
    pub const DEPTH: FrameTypes = FrameTypes(FrameType::Depth as u8);
    pub const ALL: FrameTypes = FrameTypes(1 | 2 | 4);

    pub fn contains(self, kind: FrameType) -> bool {
        self.0 & kind as u8 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = FrameType> {
        FrameType::ALL.into_iter().filter(move |k| self.contains(*k))
    }
}

impl std::ops::BitOr for FrameTypes {
    type Output = FrameTypes;

    fn bitor(self, rhs: FrameTypes) -> FrameTypes {
        FrameTypes(self.0 | rhs.0)
    }
}

impl From<FrameType> for FrameTypes {
    fn from(kind: FrameType) -> Self {
        FrameTypes(kind as u8)
    }
}

/// Frame metadata
#[derive(Debug, Clone)]
pub struct FrameMetadata {
    pub kind: FrameType,
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: usize,
    pub device_timestamp: Duration,
}

impl FrameMetadata {
    pub fn new(kind: FrameType, sequence: u64, width: u32, height: u32) -> Self {
        Self {
            kind,
            sequence,
            width,
            height,
            bytes_per_pixel: kind.bytes_per_pixel(),
            device_timestamp: Duration::ZERO,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.bytes_per_pixel
    }
}

/// One image of one stream.
///
/// Color frames hold packed 8-bit BGR triplets. IR and depth frames hold
/// native-endian `f32` samples, IR as raw amplitude and depth in millimetres.
/// A frame taken from a [`FramePool`] hands its buffer back when dropped.
pub struct Frame {
    pub meta: FrameMetadata,
    data: BytesMut,
    pool: Option<Arc<FramePool>>,

    /// Host time the frame was assembled, for latency tracking
    pub timestamp: Instant,
}

impl Frame {
    /// Allocate a zeroed, unpooled frame
    pub fn new(meta: FrameMetadata) -> Self {
        let data = BytesMut::zeroed(meta.byte_len());
        Self {
            meta,
            data,
            pool: None,
            timestamp: Instant::now(),
        }
    }

    /// Build a frame on a buffer recycled from `pool`
    pub fn from_pool(meta: FrameMetadata, pool: &Arc<FramePool>) -> Self {
        let data = pool.acquire(meta.byte_len());
        Self {
            meta,
            data,
            pool: Some(Arc::clone(pool)),
            timestamp: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Float samples of an IR or depth frame
    pub fn samples_f32(&self) -> impl Iterator<Item = f32> + '_ {
        self.data
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn write_f32(&mut self, index: usize, value: f32) {
        let at = index * 4;
        self.data[at..at + 4].copy_from_slice(&value.to_ne_bytes());
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("meta", &self.meta)
            .field("len", &self.data.len())
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.recycle(std::mem::take(&mut self.data));
        }
    }
}

/// Bounded pool of sample buffers owned by a device
pub struct FramePool {
    free: ArrayQueue<BytesMut>,
}

impl FramePool {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            free: ArrayQueue::new(capacity.max(1)),
        })
    }

    fn acquire(&self, len: usize) -> BytesMut {
        match self.free.pop() {
            Some(mut buf) => {
                buf.clear();
                buf.resize(len, 0);
                buf
            }
            None => BytesMut::zeroed(len),
        }
    }

    fn recycle(&self, buf: BytesMut) {
        // Full pool: the buffer is simply freed
        let _ = self.free.push(buf);
    }

    /// Buffers currently parked in the pool
    pub fn available(&self) -> usize {
        self.free.len()
    }
}
