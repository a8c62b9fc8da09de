//! Mock capture device for testing without hardware.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::callback::SharedCallback;
use crate::lifecycle::Lifecycle;
use crate::traits::{
    CaptureDriver, CaptureError, CaptureInput, DisplayMode, FrameDisposition, FrameFlags,
    InputFlags, PixelFormat, Result, VideoFrame,
};

/// Subsystem calls recorded by [`MockInput`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `set_callback`, with whether a callback was registered.
    SetCallback(bool),
    /// `enable_video_input` with the requested mode.
    EnableVideoInput(DisplayMode),
    /// `start_streams`.
    StartStreams,
    /// `stop_streams`.
    StopStreams,
    /// `disable_audio_input`.
    DisableAudioInput,
    /// `disable_video_input`.
    DisableVideoInput,
}

/// What the delivery thread does to the lifecycle once its frames are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeAction {
    /// Request shutdown once.
    Shutdown,
    /// Request shutdown twice in a row.
    ShutdownTwice,
    /// Request a restart.
    Restart,
}

/// Owned frame data delivered by the mock.
#[derive(Debug, Clone)]
pub struct ScriptedFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in lines.
    pub height: u32,
    /// Bytes per line.
    pub row_bytes: u32,
    /// Frame flags.
    pub flags: FrameFlags,
    /// Frame bytes (`row_bytes × height`).
    pub bytes: Vec<u8>,
}

impl ScriptedFrame {
    /// A frame filled with a repeating byte ramp.
    #[allow(clippy::cast_possible_truncation)]
    pub fn ramp(width: u32, height: u32, row_bytes: u32) -> Self {
        let len = row_bytes as usize * height as usize;
        Self {
            width,
            height,
            row_bytes,
            flags: FrameFlags::default(),
            bytes: (0..len).map(|i| (i % 253) as u8).collect(),
        }
    }

    /// A frame flagged as having no input source.
    pub fn no_signal(width: u32, height: u32, row_bytes: u32) -> Self {
        Self {
            flags: FrameFlags {
                no_input_source: true,
            },
            ..Self::ramp(width, height, row_bytes)
        }
    }

    fn as_video_frame(&self) -> VideoFrame<'_> {
        VideoFrame {
            width: self.width,
            height: self.height,
            row_bytes: self.row_bytes,
            flags: self.flags,
            bytes: &self.bytes,
        }
    }
}

/// Mock driver handing out a fixed list of inputs.
pub struct MockDriver {
    inputs: VecDeque<MockInput>,
}

impl MockDriver {
    /// Create a driver that enumerates `inputs` in order.
    pub fn new(inputs: Vec<MockInput>) -> Self {
        Self {
            inputs: inputs.into(),
        }
    }
}

impl CaptureDriver for MockDriver {
    type Input = MockInput;

    fn next_device(&mut self) -> Result<Option<MockInput>> {
        Ok(self.inputs.pop_front())
    }
}

/// Mock input recording every call and delivering scripted frames from a
/// background thread.
pub struct MockInput {
    format_detection: bool,
    modes: Vec<DisplayMode>,
    busy: bool,
    fail_start: bool,
    fail_stop: bool,
    frames: Arc<Vec<ScriptedFrame>>,
    wake_actions: VecDeque<WakeAction>,
    lifecycle: Option<Lifecycle>,
    callback: Option<SharedCallback>,
    calls: Arc<Mutex<Vec<Call>>>,
    registered: Arc<Mutex<Option<SharedCallback>>>,
    dispositions: Arc<Mutex<Vec<FrameDisposition>>>,
    delivery: Option<JoinHandle<()>>,
}

impl Default for MockInput {
    fn default() -> Self {
        Self::new()
    }
}

impl MockInput {
    /// Create a mock input offering 1080p and 720p modes.
    pub fn new() -> Self {
        Self {
            format_detection: true,
            modes: vec![DisplayMode::new(1920, 1080), DisplayMode::new(1280, 720)],
            busy: false,
            fail_start: false,
            fail_stop: false,
            frames: Arc::new(Vec::new()),
            wake_actions: VecDeque::new(),
            lifecycle: None,
            callback: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            registered: Arc::new(Mutex::new(None)),
            dispositions: Arc::new(Mutex::new(Vec::new())),
            delivery: None,
        }
    }

    /// Lifecycle the delivery thread acts on.
    #[must_use]
    pub fn with_lifecycle(mut self, lifecycle: &Lifecycle) -> Self {
        self.lifecycle = Some(lifecycle.clone());
        self
    }

    /// Frames delivered on every `start_streams`.
    #[must_use]
    pub fn with_frames(mut self, frames: Vec<ScriptedFrame>) -> Self {
        self.frames = Arc::new(frames);
        self
    }

    /// One wake action per `start_streams`; shutdown once exhausted.
    #[must_use]
    pub fn with_wake_actions(mut self, actions: Vec<WakeAction>) -> Self {
        self.wake_actions = actions.into();
        self
    }

    /// Replace the offered display modes.
    #[must_use]
    pub fn with_modes(mut self, modes: Vec<DisplayMode>) -> Self {
        self.modes = modes;
        self
    }

    /// Report the device as busy on `enable_video_input`.
    #[must_use]
    pub const fn with_busy_device(mut self) -> Self {
        self.busy = true;
        self
    }

    /// Fail `start_streams`.
    #[must_use]
    pub const fn with_start_failure(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Fail `stop_streams` and both `disable_*` calls after recording them.
    #[must_use]
    pub const fn with_stop_failure(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    /// Report no input format detection.
    #[must_use]
    pub const fn without_format_detection(mut self) -> Self {
        self.format_detection = false;
        self
    }

    /// Shared log of subsystem calls.
    pub fn call_log(&self) -> Arc<Mutex<Vec<Call>>> {
        Arc::clone(&self.calls)
    }

    /// Slot holding the last callback registered with this input.
    pub fn registered_callback(&self) -> Arc<Mutex<Option<SharedCallback>>> {
        Arc::clone(&self.registered)
    }

    /// Dispositions returned for delivered frames.
    pub fn dispositions(&self) -> Arc<Mutex<Vec<FrameDisposition>>> {
        Arc::clone(&self.dispositions)
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn scripted_stop_result(&self) -> Result<()> {
        if self.fail_stop {
            return Err(CaptureError::StreamError("mock teardown failure".to_owned()));
        }
        Ok(())
    }
}

impl CaptureInput for MockInput {
    fn name(&self) -> &str {
        "Mock Capture"
    }

    fn supports_format_detection(&self) -> Result<bool> {
        Ok(self.format_detection)
    }

    fn display_modes(&self) -> Result<Vec<DisplayMode>> {
        Ok(self.modes.clone())
    }

    fn set_callback(&mut self, callback: Option<SharedCallback>) {
        self.record(Call::SetCallback(callback.is_some()));
        if let Some(new) = &callback {
            new.retain();
            *self.registered.lock() = Some(new.clone());
        }
        if let Some(old) = std::mem::replace(&mut self.callback, callback) {
            old.release();
        }
    }

    fn enable_video_input(
        &mut self,
        mode: &DisplayMode,
        _pixel_format: PixelFormat,
        _flags: InputFlags,
    ) -> Result<()> {
        self.record(Call::EnableVideoInput(mode.clone()));
        if self.busy {
            return Err(CaptureError::DeviceBusy("mock device in use".to_owned()));
        }
        Ok(())
    }

    fn start_streams(&mut self) -> Result<()> {
        self.record(Call::StartStreams);
        if self.fail_start {
            return Err(CaptureError::StreamError("mock start failure".to_owned()));
        }

        let callback = self.callback.clone();
        let frames = Arc::clone(&self.frames);
        let dispositions = Arc::clone(&self.dispositions);
        let lifecycle = self.lifecycle.clone();
        let action = self.wake_actions.pop_front().unwrap_or(WakeAction::Shutdown);

        self.delivery = Some(std::thread::spawn(move || {
            if let Some(callback) = callback {
                for frame in frames.iter() {
                    let disposition = callback.on_frame_arrived(&frame.as_video_frame());
                    dispositions.lock().push(disposition);
                }
            }
            if let Some(lifecycle) = lifecycle {
                match action {
                    WakeAction::Shutdown => {
                        lifecycle.request_shutdown();
                    }
                    WakeAction::ShutdownTwice => {
                        lifecycle.request_shutdown();
                        lifecycle.request_shutdown();
                    }
                    WakeAction::Restart => lifecycle.request_restart(),
                }
            }
        }));
        Ok(())
    }

    fn stop_streams(&mut self) -> Result<()> {
        self.record(Call::StopStreams);
        if let Some(delivery) = self.delivery.take() {
            delivery
                .join()
                .map_err(|_| CaptureError::StreamError("delivery thread panicked".to_owned()))?;
        }
        self.scripted_stop_result()
    }

    fn disable_audio_input(&mut self) -> Result<()> {
        self.record(Call::DisableAudioInput);
        self.scripted_stop_result()
    }

    fn disable_video_input(&mut self) -> Result<()> {
        self.record(Call::DisableVideoInput);
        self.scripted_stop_result()
    }
}

impl Drop for MockInput {
    fn drop(&mut self) {
        if let Some(delivery) = self.delivery.take() {
            let _ = delivery.join();
        }
        if let Some(callback) = self.callback.take() {
            callback.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{PixelBuffer, TargetGeometry};
    use crate::callback::CaptureAndDisplay;

    #[test]
    fn test_mock_input_holds_its_own_reference() {
        let target = PixelBuffer::new(TargetGeometry {
            width: 4,
            height: 4,
            row_bytes: 16,
        })
        .into_shared();
        let callback = SharedCallback::new(CaptureAndDisplay::new(target));
        let mut input = MockInput::new();

        input.set_callback(Some(callback.clone()));
        assert_eq!(callback.ref_count(), 2);

        assert_eq!(callback.release(), 1);
        assert!(!callback.is_destroyed());

        input.set_callback(None);
        assert!(callback.is_destroyed());
        assert_eq!(
            *input.call_log().lock(),
            vec![Call::SetCallback(true), Call::SetCallback(false)]
        );
    }

    #[test]
    fn test_ramp_frame_size() {
        let frame = ScriptedFrame::ramp(1280, 720, 1280 * 4);
        assert_eq!(frame.bytes.len(), 720 * 1280 * 4);
        assert_eq!(frame.as_video_frame().byte_len(), frame.bytes.len());
        assert!(ScriptedFrame::no_signal(8, 8, 32).flags.no_input_source);
    }
}
