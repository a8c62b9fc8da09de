//! V4L2 capture backend using the v4l crate.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use v4l::buffer::Type;
use v4l::framesize::FrameSizeEnum;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream as V4lCaptureStream;
use v4l::video::Capture;
use v4l::Device;

use crate::callback::SharedCallback;
use crate::traits::{
    CaptureDriver, CaptureError, CaptureInput, DisplayMode, FourCC, FrameFlags, InputFlags,
    PixelFormat, Result, VideoFrame,
};

/// Buffers queued for mmap streaming.
const BUFFER_COUNT: u32 = 4;

/// How long the delivery thread waits for a frame before re-checking the
/// stop flag.
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(200);

/// Sizes offered for devices that report a stepwise frame-size range.
const STEPWISE_CANDIDATES: [(u32, u32); 4] = [(640, 480), (1280, 720), (1920, 1080), (3840, 2160)];

fn map_io(err: io::Error) -> CaptureError {
    if err.kind() == io::ErrorKind::ResourceBusy {
        CaptureError::DeviceBusy(err.to_string())
    } else {
        CaptureError::StreamError(err.to_string())
    }
}

/// Enumerates `/dev/video*` capture nodes.
pub struct V4l2Driver {
    indices: Vec<u32>,
}

impl V4l2Driver {
    /// Enumerate capture nodes starting at `first_index`.
    pub fn new(first_index: u32) -> Self {
        let mut indices: Vec<u32> = v4l::context::enum_devices()
            .iter()
            .filter_map(|node| u32::try_from(node.index()).ok())
            .filter(|&index| index >= first_index)
            .collect();
        indices.sort_unstable();
        indices.reverse();
        Self { indices }
    }
}

impl CaptureDriver for V4l2Driver {
    type Input = V4l2Input;

    fn next_device(&mut self) -> Result<Option<V4l2Input>> {
        while let Some(index) = self.indices.pop() {
            match V4l2Input::open(index) {
                Ok(input) if input.can_capture => return Ok(Some(input)),
                Ok(input) => debug!(index, name = input.name(), "skipping non-capture node"),
                Err(err) => warn!(index, %err, "skipping unusable video node"),
            }
        }
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy)]
struct EnabledFormat {
    width: u32,
    height: u32,
    row_bytes: u32,
}

/// Capture input backed by a V4L2 device node.
pub struct V4l2Input {
    index: u32,
    name: String,
    device: Arc<Device>,
    can_capture: bool,
    can_stream: bool,
    callback: Option<SharedCallback>,
    enabled: Option<EnabledFormat>,
    running: Arc<AtomicBool>,
    delivery: Option<JoinHandle<()>>,
}

impl V4l2Input {
    /// Open a V4L2 device by index (e.g., 0 for /dev/video0).
    pub fn open(index: u32) -> Result<Self> {
        let device = Device::new(index as usize)
            .map_err(|err| CaptureError::DeviceOpenFailed(err.to_string()))?;

        let caps = device
            .query_caps()
            .map_err(|err| CaptureError::DeviceOpenFailed(err.to_string()))?;

        Ok(Self {
            index,
            name: caps.card,
            device: Arc::new(device),
            can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
            callback: None,
            enabled: None,
            running: Arc::new(AtomicBool::new(false)),
            delivery: None,
        })
    }

    fn is_streaming(&self) -> bool {
        self.delivery.is_some()
    }
}

impl CaptureInput for V4l2Input {
    fn name(&self) -> &str {
        &self.name
    }

    /// V4L2 renegotiates the format on every enable, so any node that can
    /// stream is treated as detecting its input format.
    fn supports_format_detection(&self) -> Result<bool> {
        Ok(self.can_capture && self.can_stream)
    }

    fn display_modes(&self) -> Result<Vec<DisplayMode>> {
        let mut modes: Vec<DisplayMode> = Vec::new();
        for description in self.device.enum_formats().map_err(map_io)? {
            for framesize in self
                .device
                .enum_framesizes(description.fourcc)
                .map_err(map_io)?
            {
                let sizes: Vec<(u32, u32)> = match framesize.size {
                    FrameSizeEnum::Discrete(size) => vec![(size.width, size.height)],
                    FrameSizeEnum::Stepwise(range) => STEPWISE_CANDIDATES
                        .into_iter()
                        .filter(|&(width, height)| {
                            (range.min_width..=range.max_width).contains(&width)
                                && (range.min_height..=range.max_height).contains(&height)
                        })
                        .collect(),
                };
                for (width, height) in sizes {
                    let mode = DisplayMode::new(width, height);
                    if !modes.contains(&mode) {
                        modes.push(mode);
                    }
                }
            }
        }
        Ok(modes)
    }

    fn set_callback(&mut self, callback: Option<SharedCallback>) {
        if let Some(new) = &callback {
            new.retain();
        }
        if let Some(old) = std::mem::replace(&mut self.callback, callback) {
            old.release();
        }
    }

    fn enable_video_input(
        &mut self,
        mode: &DisplayMode,
        pixel_format: PixelFormat,
        flags: InputFlags,
    ) -> Result<()> {
        if self.is_streaming() {
            return Err(CaptureError::InvalidState("cannot enable while streaming"));
        }

        let mut fmt = self.device.format().map_err(map_io)?;
        fmt.width = mode.width;
        fmt.height = mode.height;
        fmt.fourcc = pixel_format.fourcc().into();

        let fmt = self.device.set_format(&fmt).map_err(map_io)?;
        let fourcc = FourCC::from(fmt.fourcc);
        if fmt.width != mode.width || fmt.height != mode.height || fourcc != pixel_format.fourcc()
        {
            return Err(CaptureError::ModeNotSupported(format!(
                "requested {} {}, driver chose {}x{} {fourcc}",
                mode.name,
                pixel_format.fourcc(),
                fmt.width,
                fmt.height
            )));
        }

        debug!(
            index = self.index,
            mode = %mode.name,
            stride = fmt.stride,
            format_detection = flags.format_detection,
            "video input enabled"
        );
        self.enabled = Some(EnabledFormat {
            width: fmt.width,
            height: fmt.height,
            row_bytes: fmt.stride,
        });
        Ok(())
    }

    fn start_streams(&mut self) -> Result<()> {
        if self.is_streaming() {
            return Err(CaptureError::InvalidState("streams already started"));
        }
        let format = self
            .enabled
            .ok_or(CaptureError::InvalidState("video input not enabled"))?;
        let callback = self
            .callback
            .clone()
            .ok_or(CaptureError::InvalidState("no callback registered"))?;

        let index = self.index;
        let device = Arc::clone(&self.device);
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::Release);
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let delivery = std::thread::Builder::new()
            .name(format!("v4l2-capture-{index}"))
            .spawn(move || {
                deliver_frames(index, &device, format, &callback, &running, &ready_tx);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.delivery = Some(delivery);
                info!(index, "capture streams started");
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = delivery.join();
                Err(err)
            }
            Err(_) => {
                let _ = delivery.join();
                Err(CaptureError::StreamError(
                    "delivery thread exited during startup".to_owned(),
                ))
            }
        }
    }

    fn stop_streams(&mut self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        let Some(delivery) = self.delivery.take() else {
            return Ok(());
        };
        delivery
            .join()
            .map_err(|_| CaptureError::StreamError("delivery thread panicked".to_owned()))
    }

    fn disable_audio_input(&mut self) -> Result<()> {
        // Video nodes carry no audio.
        Ok(())
    }

    fn disable_video_input(&mut self) -> Result<()> {
        if self.is_streaming() {
            return Err(CaptureError::InvalidState("cannot disable while streaming"));
        }
        self.enabled = None;
        Ok(())
    }
}

impl Drop for V4l2Input {
    fn drop(&mut self) {
        if let Err(err) = self.stop_streams() {
            error!(%err, "failed to stop V4L2 streams on drop");
        }
        if let Some(callback) = self.callback.take() {
            callback.release();
        }
    }
}

/// Body of the delivery thread: dequeue buffers and hand them to the
/// callback until `running` is cleared.
///
/// Streams on the same handle `enable_video_input` configured, so the
/// buffers carry the format `format` describes.
fn deliver_frames(
    index: u32,
    device: &Device,
    format: EnabledFormat,
    callback: &SharedCallback,
    running: &AtomicBool,
    ready: &mpsc::SyncSender<Result<()>>,
) {
    let mut stream = match Stream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready.send(Err(map_io(err)));
            return;
        }
    };
    stream.set_timeout(DEQUEUE_TIMEOUT);
    let _ = ready.send(Ok(()));

    while running.load(Ordering::Acquire) {
        let (buf, meta) = match stream.next() {
            Ok(frame) => frame,
            Err(err) if err.kind() == io::ErrorKind::TimedOut => continue,
            Err(err) => {
                error!(index, %err, "V4L2 dequeue failed, delivery stopped");
                break;
            }
        };

        let used = buf.get(..meta.bytesused as usize).unwrap_or(buf);
        let frame = VideoFrame {
            width: format.width,
            height: format.height,
            row_bytes: format.row_bytes,
            flags: FrameFlags {
                no_input_source: meta.bytesused == 0,
            },
            bytes: used,
        };
        callback.on_frame_arrived(&frame);
    }
    debug!(index, "delivery thread exiting");
}
