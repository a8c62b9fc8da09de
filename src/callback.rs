//! Reference-counted frame callback and the validate-then-copy consumer.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, trace, warn};

use crate::buffer::SharedTarget;
use crate::traits::{
    FormatChange, FormatChangeAction, FrameDisposition, InputCallback, VideoFrame,
};
use crate::validation::{validate_frame, Verdict};

struct CallbackCell {
    ref_count: AtomicU32,
    callback: RwLock<Option<Box<dyn InputCallback>>>,
}

/// Handle to a callback whose lifetime is governed by an explicit
/// reference count.
///
/// The capture subsystem retains and releases independently of the session,
/// so the count (not handle ownership) decides when the wrapped callback is
/// destroyed: it is dropped exactly when the count goes from 1 to 0, on
/// whichever thread performs that release. Cloning a handle does not take a
/// reference; call [`SharedCallback::retain`] for that.
///
/// Destruction waits for any in-flight notification to return, so a callback
/// must not release its own handle from inside `on_frame_arrived`.
pub struct SharedCallback {
    cell: Arc<CallbackCell>,
}

impl SharedCallback {
    /// Wrap a callback. The count starts at 1, owned by the caller.
    pub fn new<C: InputCallback + 'static>(callback: C) -> Self {
        Self {
            cell: Arc::new(CallbackCell {
                ref_count: AtomicU32::new(1),
                callback: RwLock::new(Some(Box::new(callback))),
            }),
        }
    }

    /// Take a reference. Returns the new count, or 0 if the callback was
    /// already destroyed (it is never resurrected).
    pub fn retain(&self) -> u32 {
        let result = self
            .cell
            .ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count != 0).then(|| count.saturating_add(1))
            });

        if let Ok(previous) = result {
            previous.saturating_add(1)
        } else {
            warn!("retain on destroyed capture callback ignored");
            0
        }
    }

    /// Drop a reference. Returns the new count; 0 means the callback has just
    /// been destroyed (or already was).
    pub fn release(&self) -> u32 {
        let result = self
            .cell
            .ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            });

        match result {
            Ok(1) => {
                let callback = self.cell.callback.write().take();
                drop(callback);
                debug!("capture callback destroyed");
                0
            }
            Ok(previous) => previous - 1,
            Err(_) => {
                warn!("release on destroyed capture callback ignored");
                0
            }
        }
    }

    /// Current reference count.
    pub fn ref_count(&self) -> u32 {
        self.cell.ref_count.load(Ordering::Acquire)
    }

    /// Whether the count has reached zero and the callback was dropped.
    pub fn is_destroyed(&self) -> bool {
        self.cell.callback.read().is_none()
    }

    /// Forward a frame to the callback. Never panics into the caller.
    pub fn on_frame_arrived(&self, frame: &VideoFrame<'_>) -> FrameDisposition {
        let guard = self.cell.callback.read();
        let Some(callback) = guard.as_deref() else {
            return FrameDisposition::Released;
        };

        catch_unwind(AssertUnwindSafe(|| callback.on_frame_arrived(frame))).unwrap_or_else(|_| {
            error!("capture callback panicked; frame dropped");
            FrameDisposition::Dropped
        })
    }

    /// Forward a format change to the callback.
    pub fn on_format_changed(&self, change: &FormatChange) -> FormatChangeAction {
        let guard = self.cell.callback.read();
        let Some(callback) = guard.as_deref() else {
            return FormatChangeAction::Continue;
        };

        catch_unwind(AssertUnwindSafe(|| callback.on_format_changed(change)))
            .unwrap_or(FormatChangeAction::Continue)
    }
}

impl Clone for SharedCallback {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl std::fmt::Debug for SharedCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedCallback")
            .field("ref_count", &self.ref_count())
            .finish_non_exhaustive()
    }
}

/// Per-frame counters, written by the delivery thread.
#[derive(Debug, Default)]
pub struct FrameStats {
    accepted: AtomicU64,
    no_signal: AtomicU64,
    wrong_geometry: AtomicU64,
    errors: AtomicU64,
    bytes_copied: AtomicU64,
}

/// Point-in-time copy of [`FrameStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStatsSnapshot {
    /// Frames copied into the display buffer.
    pub accepted: u64,
    /// Frames skipped because no input source was present.
    pub no_signal: u64,
    /// Frames skipped because their height did not match.
    pub wrong_geometry: u64,
    /// Frames dropped by a fatal layout check.
    pub errors: u64,
    /// Total bytes copied.
    pub bytes_copied: u64,
}

impl FrameStats {
    /// Read all counters.
    pub fn snapshot(&self) -> FrameStatsSnapshot {
        FrameStatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            no_signal: self.no_signal.load(Ordering::Relaxed),
            wrong_geometry: self.wrong_geometry.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            bytes_copied: self.bytes_copied.load(Ordering::Relaxed),
        }
    }
}

/// Copies every valid captured frame into the display's frame buffer.
pub struct CaptureAndDisplay {
    target: SharedTarget,
    stats: Arc<FrameStats>,
    signal_lost: AtomicBool,
    geometry_mismatch: AtomicBool,
}

impl CaptureAndDisplay {
    /// Create a callback writing into `target`.
    pub fn new(target: SharedTarget) -> Self {
        Self {
            target,
            stats: Arc::new(FrameStats::default()),
            signal_lost: AtomicBool::new(false),
            geometry_mismatch: AtomicBool::new(false),
        }
    }

    /// Shared handle to the frame counters, valid after the callback is gone.
    pub fn stats(&self) -> Arc<FrameStats> {
        Arc::clone(&self.stats)
    }

    fn record_error(&self, message: &dyn std::fmt::Display) {
        if self.stats.errors.fetch_add(1, Ordering::Relaxed) == 0 {
            error!(%message, "dropping frame: display buffer does not match capture mode");
        } else {
            trace!(%message, "dropping frame");
        }
    }
}

impl InputCallback for CaptureAndDisplay {
    fn on_frame_arrived(&self, frame: &VideoFrame<'_>) -> FrameDisposition {
        let mut target = self.target.lock();
        let geometry = target.geometry();

        let len = match validate_frame(frame, &geometry) {
            Ok(Verdict::Accept { len }) => len,
            Ok(Verdict::RejectNoSignal) => {
                self.stats.no_signal.fetch_add(1, Ordering::Relaxed);
                if !self.signal_lost.swap(true, Ordering::Relaxed) {
                    warn!("no input signal detected");
                }
                return FrameDisposition::NoSignal;
            }
            Ok(Verdict::RejectWrongGeometry) => {
                self.stats.wrong_geometry.fetch_add(1, Ordering::Relaxed);
                if !self.geometry_mismatch.swap(true, Ordering::Relaxed) {
                    warn!(
                        frame_height = frame.height,
                        target_height = geometry.height,
                        "frame height does not match display buffer"
                    );
                }
                return FrameDisposition::WrongGeometry;
            }
            Err(err) => {
                self.record_error(&err);
                return FrameDisposition::Dropped;
            }
        };

        let region = target.write_region();
        let region_len = region.len();
        let (Some(dst), Some(src)) = (region.get_mut(..len), frame.bytes.get(..len)) else {
            self.record_error(&format_args!(
                "write region of {region_len} bytes is smaller than its declared capacity"
            ));
            return FrameDisposition::Dropped;
        };
        dst.copy_from_slice(src);

        if self.signal_lost.swap(false, Ordering::Relaxed) {
            info!("input signal restored");
        }
        self.geometry_mismatch.store(false, Ordering::Relaxed);
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes_copied.fetch_add(len as u64, Ordering::Relaxed);
        debug!(bytes = len, row_bytes = frame.row_bytes, "frame copied");

        FrameDisposition::Copied(len)
    }

    fn on_format_changed(&self, change: &FormatChange) -> FormatChangeAction {
        debug!(mode = %change.mode.name, "input format change ignored");
        FormatChangeAction::Continue
    }
}
