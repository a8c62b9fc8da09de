//! Capture configuration shared by the session and the entry point.

use crate::buffer::TargetGeometry;
use crate::traits::PixelFormat;

/// Largest width or height accepted for the display buffer.
pub const MAX_DIMENSION: u32 = 16_384;

/// A configuration the display buffer cannot be laid out for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Width or height is zero.
    #[error("display geometry {width}x{height} is empty")]
    Empty {
        /// Configured width.
        width: u32,
        /// Configured height.
        height: u32,
    },
    /// Width or height exceeds [`MAX_DIMENSION`].
    #[error("display geometry {width}x{height} exceeds {MAX_DIMENSION} pixels per side")]
    TooLarge {
        /// Configured width.
        width: u32,
        /// Configured height.
        height: u32,
    },
}

/// The fixed capture mode the display buffer is laid out for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Index of the capture device to open.
    pub device_index: u32,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in lines.
    pub height: u32,
    /// Pixel layout requested from the device.
    pub pixel_format: PixelFormat,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 1280,
            height: 720,
            pixel_format: PixelFormat::Argb8,
        }
    }
}

impl CaptureConfig {
    /// Check that the display buffer geometry is non-empty and bounded, so
    /// `row_bytes × height` fits in a `u32`.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        let (width, height) = (self.width, self.height);
        if width == 0 || height == 0 {
            return Err(ConfigError::Empty { width, height });
        }
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(ConfigError::TooLarge { width, height });
        }
        Ok(())
    }

    /// Bytes per line of the display buffer. Saturates for configurations
    /// that fail [`CaptureConfig::validate`].
    #[must_use]
    pub const fn row_bytes(&self) -> u32 {
        self.width.saturating_mul(self.pixel_format.bytes_per_pixel())
    }

    /// Layout of the display buffer for this mode.
    #[must_use]
    pub const fn target_geometry(&self) -> TargetGeometry {
        TargetGeometry {
            width: self.width,
            height: self.height,
            row_bytes: self.row_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_720p_argb() {
        let config = CaptureConfig::default();
        assert_eq!(config.row_bytes(), 1280 * 4);
        assert_eq!(config.target_geometry().capacity(), 720 * 1280 * 4);
    }

    #[test]
    fn test_yuyv_row_bytes() {
        let config = CaptureConfig {
            pixel_format: PixelFormat::Yuyv,
            ..CaptureConfig::default()
        };
        assert_eq!(config.row_bytes(), 1280 * 2);
    }

    #[test]
    fn test_oversized_width_is_rejected() {
        let config = CaptureConfig {
            width: 1_500_000_000,
            ..CaptureConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::TooLarge {
                width: 1_500_000_000,
                height: 720
            })
        );
        assert_eq!(config.row_bytes(), u32::MAX);
    }

    #[test]
    fn test_empty_and_largest_geometry() {
        let empty = CaptureConfig {
            height: 0,
            ..CaptureConfig::default()
        };
        assert!(matches!(empty.validate(), Err(ConfigError::Empty { .. })));

        let largest = CaptureConfig {
            width: MAX_DIMENSION,
            height: MAX_DIMENSION,
            ..CaptureConfig::default()
        };
        assert_eq!(largest.validate(), Ok(()));
        assert!(largest
            .row_bytes()
            .checked_mul(largest.height)
            .is_some());
        assert!(CaptureConfig::default().validate().is_ok());
    }
}
