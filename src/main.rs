//! Capture-view binary: stream a capture device into a display buffer.

use capture_view::{
    install_signal_handlers, CaptureConfig, CaptureSession, Lifecycle, PixelBuffer, PixelFormat,
    V4l2Driver, MAX_DIMENSION,
};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Capture frames from a video device into a fixed-size display buffer.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Index of the first capture device to try (/dev/videoN).
    #[arg(long, default_value_t = CaptureConfig::default().device_index)]
    device: u32,

    /// Frame width in pixels.
    #[arg(
        long,
        default_value_t = CaptureConfig::default().width,
        value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_DIMENSION)),
    )]
    width: u32,

    /// Frame height in lines.
    #[arg(
        long,
        default_value_t = CaptureConfig::default().height,
        value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_DIMENSION)),
    )]
    height: u32,

    /// Pixel layout to request from the device.
    #[arg(long, value_enum, default_value_t = PixelFormat::default())]
    pixel_format: PixelFormat,
}

impl From<Args> for CaptureConfig {
    fn from(args: Args) -> Self {
        Self {
            device_index: args.device,
            width: args.width,
            height: args.height,
            pixel_format: args.pixel_format,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = CaptureConfig::from(Args::parse());
    std::process::exit(run(config));
}

fn run(config: CaptureConfig) -> i32 {
    if let Err(err) = config.validate() {
        eprintln!("Error: {err}");
        return 1;
    }

    let lifecycle = Lifecycle::new();
    let _signals = match install_signal_handlers(&lifecycle) {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, "failed to register signal handlers");
            return 1;
        }
    };

    let target = PixelBuffer::new(config.target_geometry()).into_shared();
    let driver = V4l2Driver::new(config.device_index);
    let mut session = CaptureSession::new(driver, config, target, lifecycle);

    match session.run() {
        Ok(summary) => {
            info!(cycles = summary.cycles, frames = summary.frames.accepted, "capture finished");
            0
        }
        Err(err) => {
            eprintln!("Error: {err}");
            err.exit_code()
        }
    }
}
