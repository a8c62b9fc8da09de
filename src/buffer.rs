//! Display-owned destination buffer for accepted frames.

use std::sync::Arc;

use parking_lot::Mutex;

/// Layout of a frame buffer target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetGeometry {
    /// Width in pixels.
    pub width: u32,
    /// Number of lines the target holds.
    pub height: u32,
    /// Bytes per line.
    pub row_bytes: u32,
}

impl TargetGeometry {
    /// Total capacity in bytes (`height × row_bytes`).
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.height as usize * self.row_bytes as usize
    }
}

/// A fixed-capacity writable region owned by the display surface.
pub trait FrameBufferTarget: Send {
    /// The configured layout. `geometry().capacity()` never exceeds
    /// `write_region().len()`.
    fn geometry(&self) -> TargetGeometry;

    /// The raw destination bytes, starting at the buffer's base address.
    fn write_region(&mut self) -> &mut [u8];
}

/// Frame buffer target shared between the display and capture paths.
pub type SharedTarget = Arc<Mutex<dyn FrameBufferTarget>>;

/// Heap-backed frame buffer target.
#[derive(Debug)]
pub struct PixelBuffer {
    geometry: TargetGeometry,
    data: Box<[u8]>,
}

impl PixelBuffer {
    /// Allocate a zeroed buffer for the given layout.
    #[must_use]
    pub fn new(geometry: TargetGeometry) -> Self {
        Self {
            geometry,
            data: vec![0u8; geometry.capacity()].into_boxed_slice(),
        }
    }

    /// Wrap the buffer for sharing with a capture callback.
    #[must_use]
    pub fn into_shared(self) -> SharedTarget {
        Arc::new(Mutex::new(self))
    }

    /// Read access for the rendering path.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl FrameBufferTarget for PixelBuffer {
    fn geometry(&self) -> TargetGeometry {
        self.geometry
    }

    fn write_region(&mut self) -> &mut [u8] {
        &mut self.data
    }
}
