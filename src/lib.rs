//! Capture-View: live capture-to-display frame hand-off
//!
//! This library connects an asynchronous capture device to a display-owned
//! frame buffer: frames delivered on the device's thread are validated and
//! copied into the buffer, while the session thread blocks until a signal
//! requests shutdown. The capture subsystem sits behind trait abstractions so
//! the session runs against real V4L2 hardware or a mock device.

pub mod buffer;
pub mod callback;
pub mod config;
pub mod device;
pub mod lifecycle;
pub mod session;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use buffer::{FrameBufferTarget, PixelBuffer, SharedTarget, TargetGeometry};
pub use callback::{CaptureAndDisplay, FrameStats, FrameStatsSnapshot, SharedCallback};
pub use config::{CaptureConfig, ConfigError, MAX_DIMENSION};
pub use device::{V4l2Driver, V4l2Input};
pub use lifecycle::{install_signal_handlers, Lifecycle, SignalListener, WakeReason};
pub use session::{CaptureSession, SessionError, SessionState, SessionSummary};
pub use traits::{
    CaptureDriver, CaptureError, CaptureInput, DisplayMode, FormatChange, FormatChangeAction,
    FourCC, FrameDisposition, FrameFlags, InputCallback, InputFlags, PixelFormat, VideoFrame,
};
pub use validation::{validate_frame, ValidationError, Verdict};
