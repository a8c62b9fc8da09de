//! Capture session: enable, stream, block until woken, stop, disable.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::buffer::SharedTarget;
use crate::callback::{CaptureAndDisplay, FrameStatsSnapshot, SharedCallback};
use crate::config::CaptureConfig;
use crate::lifecycle::{Lifecycle, WakeReason};
use crate::traits::{CaptureDriver, CaptureError, CaptureInput, DisplayMode, InputFlags};

/// Where the session is in its enable/stream/stop cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not streaming; the device is disabled.
    Idle,
    /// Enabling video input and starting streams.
    Enabling,
    /// Frames are being delivered; the session thread is blocked.
    Streaming,
    /// Streams are being stopped and inputs disabled.
    Stopping,
    /// A fatal error ended the session.
    TerminalError,
}

/// Fatal session failures, each reported to the process boundary.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No capture device was found.
    #[error("could not find a capture device; is the capture driver installed?")]
    DeviceAbsent,
    /// The device lacks input format detection.
    #[error("input format detection is not supported on {0}")]
    CapabilityUnsupported(String),
    /// No display mode matches the display buffer.
    #[error("unable to get a {width}x{height} display mode")]
    ModeNegotiation {
        /// Configured width.
        width: u32,
        /// Configured height.
        height: u32,
    },
    /// Enabling video input failed.
    #[error("failed to enable video input, is another application using the device? ({0})")]
    EnableFailed(#[source] CaptureError),
    /// Starting streams failed.
    #[error("failed to start capture streams: {0}")]
    StartFailed(#[source] CaptureError),
    /// Shutdown was requested before streaming ever started.
    #[error("shutdown requested before capture started")]
    NeverStarted,
    /// Any other capture-subsystem failure during setup.
    #[error(transparent)]
    Device(#[from] CaptureError),
}

impl SessionError {
    /// Process exit status for this failure.
    pub const fn exit_code(&self) -> i32 {
        1
    }
}

/// Result of a cleanly shut down session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    /// Number of completed enable/stream/stop cycles.
    pub cycles: u32,
    /// Frame counters collected by the capture callback.
    pub frames: FrameStatsSnapshot,
}

/// Registers a callback with an input for the lifetime of the guard.
///
/// Dropping the guard unregisters the callback, which makes the input
/// release its reference, then drops the reference the session was handed
/// at construction.
struct CallbackRegistration<'a, I: CaptureInput> {
    input: &'a mut I,
    callback: SharedCallback,
}

impl<'a, I: CaptureInput> CallbackRegistration<'a, I> {
    fn new(input: &'a mut I, callback: SharedCallback) -> Self {
        input.set_callback(Some(callback.clone()));
        Self { input, callback }
    }

    fn input(&mut self) -> &mut I {
        self.input
    }
}

impl<I: CaptureInput> Drop for CallbackRegistration<'_, I> {
    fn drop(&mut self) {
        self.input.set_callback(None);
        self.callback.release();
    }
}

/// Runs the capture loop against one device until shutdown.
pub struct CaptureSession<D: CaptureDriver> {
    driver: D,
    config: CaptureConfig,
    target: SharedTarget,
    lifecycle: Lifecycle,
    state: SessionState,
}

impl<D: CaptureDriver> CaptureSession<D> {
    /// Create a session copying frames into `target`.
    pub fn new(
        driver: D,
        config: CaptureConfig,
        target: SharedTarget,
        lifecycle: Lifecycle,
    ) -> Self {
        Self {
            driver,
            config,
            target,
            lifecycle,
            state: SessionState::Idle,
        }
    }

    /// Current state.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Capture until shutdown is requested.
    ///
    /// Blocks the calling thread. Returns a summary once streams have been
    /// stopped after a shutdown request, or the fatal error that ended the
    /// session. The capture callback is destroyed before this returns.
    pub fn run(&mut self) -> Result<SessionSummary, SessionError> {
        let result = self.capture();
        if let Err(err) = &result {
            self.transition(SessionState::TerminalError);
            error!(%err, "capture session failed");
        }
        result
    }

    fn capture(&mut self) -> Result<SessionSummary, SessionError> {
        let mut input = self.driver.next_device()?.ok_or(SessionError::DeviceAbsent)?;
        info!(device = input.name(), "using capture device");

        if !input.supports_format_detection()? {
            return Err(SessionError::CapabilityUnsupported(input.name().to_owned()));
        }

        let mode = negotiate_mode(&input.display_modes()?, &self.config)?;
        info!(mode = %mode.name, pixel_format = ?self.config.pixel_format, "display mode selected");

        let consumer = CaptureAndDisplay::new(Arc::clone(&self.target));
        let stats = consumer.stats();
        let mut registration = CallbackRegistration::new(&mut input, SharedCallback::new(consumer));

        let mut cycles = 0;
        while !self.lifecycle.is_shutdown_requested() {
            self.stream_once(registration.input(), &mode)?;
            cycles += 1;
        }
        drop(registration);

        if cycles == 0 {
            return Err(SessionError::NeverStarted);
        }

        let frames = stats.snapshot();
        info!(
            cycles,
            accepted = frames.accepted,
            no_signal = frames.no_signal,
            wrong_geometry = frames.wrong_geometry,
            errors = frames.errors,
            "capture stopped"
        );
        Ok(SessionSummary { cycles, frames })
    }

    fn stream_once(
        &mut self,
        input: &mut D::Input,
        mode: &DisplayMode,
    ) -> Result<(), SessionError> {
        self.transition(SessionState::Enabling);
        let flags = InputFlags {
            format_detection: true,
        };
        input
            .enable_video_input(mode, self.config.pixel_format, flags)
            .map_err(SessionError::EnableFailed)?;

        if let Err(err) = input.start_streams() {
            if let Err(disable_err) = input.disable_video_input() {
                warn!(%disable_err, "failed to disable video input after start failure");
            }
            return Err(SessionError::StartFailed(err));
        }

        self.transition(SessionState::Streaming);
        let reason = self.lifecycle.wait();

        self.transition(SessionState::Stopping);
        match reason {
            WakeReason::Shutdown => info!("stopping capture"),
            WakeReason::Restart => info!("stopping capture for restart"),
        }
        stop_input(input);

        self.transition(SessionState::Idle);
        Ok(())
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }
}

/// Stop streams and disable inputs. Failures are logged and ignored.
fn stop_input<I: CaptureInput>(input: &mut I) {
    if let Err(err) = input.stop_streams() {
        error!(%err, "failed to stop streams");
    }
    if let Err(err) = input.disable_audio_input() {
        warn!(%err, "failed to disable audio input");
    }
    if let Err(err) = input.disable_video_input() {
        warn!(%err, "failed to disable video input");
    }
}

/// Pick the mode matching the configured geometry, preferring an exact
/// match and otherwise accepting a narrower mode with the configured height.
/// Wider modes are refused: their frames can never fit the display buffer.
fn negotiate_mode(
    modes: &[DisplayMode],
    config: &CaptureConfig,
) -> Result<DisplayMode, SessionError> {
    modes
        .iter()
        .find(|mode| mode.width == config.width && mode.height == config.height)
        .or_else(|| {
            modes
                .iter()
                .find(|mode| mode.height == config.height && mode.width <= config.width)
        })
        .cloned()
        .ok_or(SessionError::ModeNegotiation {
            width: config.width,
            height: config.height,
        })
}
