pub mod data;
pub mod device;
pub mod dispatcher;
pub mod fakenect;
pub mod frame;
pub mod packet;
pub mod processor;
pub mod settings;

use std::path::PathBuf;

use thiserror::Error;

pub use data::{Calibration, RegInfo, RegPadInfo, ZeroPlaneInfo};
pub use device::DeviceContext;
pub use dispatcher::{DispatchStats, FrameCallback, FrameDispatcher, FrameSlot};
pub use frame::{DecodedFrame, FrameBuffer};
pub use packet::parser::{PacketStream, StreamKind, StreamState, StreamStats};
pub use processor::registration::{apply_registration, build_registration, RegistrationTable};
pub use settings::{DepthFormat, FrameFormat, FrameMode, Resolution, VideoFormat};

/// Default frame width.
pub const FRAME_WIDTH: usize = 640;
/// Default frame height.
pub const FRAME_HEIGHT: usize = 480;
/// Pixel count of a default frame.
pub const FRAME_PIXELS: usize = FRAME_WIDTH * FRAME_HEIGHT;
/// Height of an IR frame at medium resolution.
pub const IR_FRAME_HEIGHT: usize = 488;

#[derive(Error, Debug)]
pub enum Error {
    #[error("USB error: {0}")]
    Usb(#[source] nusb::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Unsupported frame mode {format} at {resolution:?} resolution")]
    UnsupportedMode {
        resolution: Resolution,
        format: FrameFormat,
    },
    #[error("Unknown format value {0}")]
    UnknownFormat(u32),
    #[error("Unknown resolution value {0}")]
    UnknownResolution(u32),
    #[error("{0} is not allowed while the stream is running")]
    StreamRunning(&'static str),
    #[error("{0} requires a running stream")]
    StreamNotRunning(&'static str),
    #[error("{what} buffer holds {actual} elements, {expected} required")]
    BufferSize {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("Bit width {0} is not in 1..=16")]
    UnsupportedBitWidth(u32),
    #[error("Invalid image dimensions {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },
    #[error("Calibration blob is {actual} bytes, {expected} expected")]
    CalibrationBlob { expected: usize, actual: usize },
    #[error("Calibration has no zero plane information, registration is unavailable")]
    RegistrationUnavailable,
    #[error("Index already exists at {0}, use a different directory")]
    IndexExists(PathBuf),
    #[error("Invalid index line {0:?}")]
    InvalidIndexLine(String),
    #[error("Invalid PGM/PPM header in {0}")]
    InvalidImageHeader(PathBuf),
}

/// Configuration of frame delivery and registration.
#[derive(Debug, Clone)]
pub struct Config {
    // Also write north, north-west and west neighbours when registering depth
    pub dense_registration: bool,
    // Deliver end-marked frames even if fewer bytes than a full frame arrived
    pub deliver_incomplete_frames: bool,
    // Rewind recordings when the index is exhausted
    pub loop_playback: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dense_registration: true,
            deliver_incomplete_frames: true,
            loop_playback: true,
        }
    }
}

/// Little-endian decoding of fixed-width values from a byte buffer.
pub trait FromBuffer: Sized {
    const SIZE: usize;

    fn from_buffer(buffer: &[u8]) -> Self;
}

macro_rules! impl_from_buffer {
    ($($ty:ty),*) => {
        $(
            impl FromBuffer for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn from_buffer(buffer: &[u8]) -> Self {
                    let mut bytes = [0; std::mem::size_of::<$ty>()];
                    bytes.copy_from_slice(&buffer[..std::mem::size_of::<$ty>()]);
                    <$ty>::from_le_bytes(bytes)
                }
            }
        )*
    };
}

impl_from_buffer!(u16, i32, u32, f32);
