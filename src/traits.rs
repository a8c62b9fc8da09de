//! Core traits and types for the capture-subsystem abstraction.

use crate::callback::SharedCallback;

/// Pixel format representation (e.g., YUYV, BGR4, AR24).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// 32-bit ARGB, alpha first in memory.
    pub const AR24: Self = Self::new(b"AR24");
    /// 32-bit BGRA as produced by most capture cards.
    pub const BGR4: Self = Self::new(b"BGR4");
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

impl std::fmt::Display for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Pixel layouts the display buffer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PixelFormat {
    /// 8-bit ARGB, 4 bytes per pixel.
    #[default]
    Argb8,
    /// 8-bit BGRA, 4 bytes per pixel.
    Bgra8,
    /// 8-bit YUV 4:2:2 packed, 2 bytes per pixel.
    Yuyv,
}

impl PixelFormat {
    /// Bytes occupied by one pixel.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Argb8 | Self::Bgra8 => 4,
            Self::Yuyv => 2,
        }
    }

    /// The V4L2 four-character code for this layout.
    #[must_use]
    pub const fn fourcc(self) -> FourCC {
        match self {
            Self::Argb8 => FourCC::AR24,
            Self::Bgra8 => FourCC::BGR4,
            Self::Yuyv => FourCC::YUYV,
        }
    }
}

/// A video mode offered by a capture input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayMode {
    /// Human-readable mode name, e.g. `1280x720`.
    pub name: String,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in lines.
    pub height: u32,
}

impl DisplayMode {
    /// Create a mode named after its geometry.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            name: format!("{width}x{height}"),
            width,
            height,
        }
    }
}

/// Options passed when enabling video input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputFlags {
    /// Ask the device to report input format changes.
    pub format_detection: bool,
}

/// Per-frame flags reported by the capture subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags {
    /// The device saw no input source (cable unplugged, source off).
    pub no_input_source: bool,
}

/// One capture event, borrowed from the capture subsystem.
///
/// The byte slice is only valid for the duration of the callback
/// invocation; the lifetime keeps it from being retained.
#[derive(Debug, Clone, Copy)]
pub struct VideoFrame<'a> {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in lines.
    pub height: u32,
    /// Bytes per line, including any padding.
    pub row_bytes: u32,
    /// Signal-presence and other frame flags.
    pub flags: FrameFlags,
    /// Raw frame bytes.
    pub bytes: &'a [u8],
}

impl VideoFrame<'_> {
    /// Number of bytes described by `row_bytes × height`.
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        self.row_bytes as usize * self.height as usize
    }
}

/// Input format change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatChange {
    /// The newly detected mode.
    pub mode: DisplayMode,
    /// The newly detected pixel layout, if the device reports one.
    pub pixel_format: Option<PixelFormat>,
}

/// What the capture subsystem should do after a format change callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatChangeAction {
    /// Continue with the currently enabled mode.
    Continue,
}

/// Error type for capture-subsystem operations.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// Failed to open device.
    #[error("failed to open device: {0}")]
    DeviceOpenFailed(String),
    /// Device is already in use by another application.
    #[error("device busy: {0}")]
    DeviceBusy(String),
    /// Requested mode or format is not supported.
    #[error("mode not supported: {0}")]
    ModeNotSupported(String),
    /// Operation requires a different input state (e.g. start before enable).
    #[error("invalid input state: {0}")]
    InvalidState(&'static str),
    /// Error during streaming operation.
    #[error("stream error: {0}")]
    StreamError(String),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for capture operations.
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Receiver of capture-subsystem notifications.
///
/// Implementations are invoked on the subsystem's delivery thread and must
/// never panic or block on the session thread.
pub trait InputCallback: Send + Sync {
    /// A frame arrived. The return value is informational only.
    fn on_frame_arrived(&self, frame: &VideoFrame<'_>) -> FrameDisposition;

    /// The device detected a different input format.
    fn on_format_changed(&self, change: &FormatChange) -> FormatChangeAction;
}

/// What a callback did with a delivered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// Copied this many bytes into the display buffer.
    Copied(usize),
    /// Skipped: no input source.
    NoSignal,
    /// Skipped: frame height does not match the display buffer.
    WrongGeometry,
    /// Skipped: frame failed a fatal layout check.
    Dropped,
    /// The callback has already been destroyed.
    Released,
}

/// Enumerates capture devices.
pub trait CaptureDriver {
    /// The input type produced for each device.
    type Input: CaptureInput;

    /// Return the next device, or `None` once enumeration is exhausted.
    fn next_device(&mut self) -> Result<Option<Self::Input>>;
}

/// Abstraction over one capture device's input interface.
pub trait CaptureInput {
    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Whether the device can report input format changes.
    fn supports_format_detection(&self) -> Result<bool>;

    /// Display modes the device can capture.
    fn display_modes(&self) -> Result<Vec<DisplayMode>>;

    /// Register (or with `None`, unregister) the frame callback.
    ///
    /// The input takes its own reference on registration and releases it
    /// when the callback is replaced or unregistered.
    fn set_callback(&mut self, callback: Option<SharedCallback>);

    /// Enable video input in the given mode.
    fn enable_video_input(
        &mut self,
        mode: &DisplayMode,
        pixel_format: PixelFormat,
        flags: InputFlags,
    ) -> Result<()>;

    /// Start delivering frames to the registered callback.
    fn start_streams(&mut self) -> Result<()>;

    /// Stop delivering frames. No callback runs after this returns.
    fn stop_streams(&mut self) -> Result<()>;

    /// Disable audio input.
    fn disable_audio_input(&mut self) -> Result<()>;

    /// Disable video input.
    fn disable_video_input(&mut self) -> Result<()>;
}
