//! Frame validation ahead of the copy into the display buffer.
//!
//! [`validate_frame`] is the only gate between a device-reported frame size
//! and the copy into the target, so every length the copy relies on is
//! checked here.

use crate::buffer::TargetGeometry;
use crate::traits::VideoFrame;

/// Outcome of validating one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Copy exactly `len` bytes (`row_bytes × height`) into the target.
    Accept {
        /// Number of bytes to copy.
        len: usize,
    },
    /// The device reported no input source. Not an error.
    RejectNoSignal,
    /// Frame height differs from the target height.
    RejectWrongGeometry,
}

/// Frame layouts that indicate a configuration mismatch rather than a
/// per-frame condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// `row_bytes × height` is larger than the target can hold.
    #[error("frame needs {needed} bytes but display buffer holds {capacity}")]
    ExceedsCapacity {
        /// Bytes the frame describes.
        needed: usize,
        /// Bytes available in the target.
        capacity: usize,
    },
    /// The frame's byte slice is shorter than its declared layout.
    #[error("frame declares {declared} bytes but only {available} were delivered")]
    ShortFrame {
        /// Bytes the frame describes.
        declared: usize,
        /// Bytes actually present.
        available: usize,
    },
}

/// Decide whether a frame may be copied into a target of the given layout.
///
/// # Errors
///
/// Returns a [`ValidationError`] when the frame has the target height but its
/// declared size does not fit the target or is not backed by enough bytes.
pub fn validate_frame(
    frame: &VideoFrame<'_>,
    target: &TargetGeometry,
) -> Result<Verdict, ValidationError> {
    if frame.flags.no_input_source {
        return Ok(Verdict::RejectNoSignal);
    }

    if frame.height != target.height {
        return Ok(Verdict::RejectWrongGeometry);
    }

    let needed = frame.byte_len();
    let capacity = target.capacity();
    if needed > capacity {
        return Err(ValidationError::ExceedsCapacity { needed, capacity });
    }

    if frame.bytes.len() < needed {
        return Err(ValidationError::ShortFrame {
            declared: needed,
            available: frame.bytes.len(),
        });
    }

    Ok(Verdict::Accept { len: needed })
}
