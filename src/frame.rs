use std::fmt::{self, Debug};

use crate::settings::{DepthFormat, FrameFormat, FrameMode, VideoFormat};

/// Pixel storage of a decoded frame.
#[derive(Clone, PartialEq, Eq)]
pub enum FrameBuffer {
    /// One sample per pixel: depth, millimeters or 10 bit IR
    U16(Vec<u16>),
    /// RGB triplets, Bayer mosaic, 8 bit IR, UYVY or packed samples
    U8(Vec<u8>),
}

impl FrameBuffer {
    /// Zeroed storage for frames of `mode`.
    pub fn for_mode(mode: &FrameMode) -> Self {
        if Self::is_u16(mode.format) {
            Self::U16(vec![0; mode.pixels()])
        } else {
            Self::U8(vec![0; mode.bytes])
        }
    }

    fn is_u16(format: FrameFormat) -> bool {
        matches!(
            format,
            FrameFormat::Depth(
                DepthFormat::Depth11Bit
                    | DepthFormat::Depth10Bit
                    | DepthFormat::Registered
                    | DepthFormat::Mm
            ) | FrameFormat::Video(VideoFormat::Ir10Bit)
        )
    }

    pub fn as_u16(&self) -> Option<&[u16]> {
        match self {
            Self::U16(buffer) => Some(buffer),
            Self::U8(_) => None,
        }
    }

    pub fn as_u8(&self) -> Option<&[u8]> {
        match self {
            Self::U8(buffer) => Some(buffer),
            Self::U16(_) => None,
        }
    }

    /// Size in bytes.
    pub fn byte_len(&self) -> usize {
        match self {
            Self::U16(buffer) => buffer.len() * 2,
            Self::U8(buffer) => buffer.len(),
        }
    }

    /// Little-endian byte image, as stored in recordings.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            Self::U16(buffer) => buffer.iter().flat_map(|value| value.to_le_bytes()).collect(),
            Self::U8(buffer) => buffer.clone(),
        }
    }

    pub fn fill_zero(&mut self) {
        match self {
            Self::U16(buffer) => buffer.fill(0),
            Self::U8(buffer) => buffer.fill(0),
        }
    }
}

/// Frame as handed to the consumer.
#[derive(Clone)]
pub struct DecodedFrame {
    pub mode: FrameMode,
    /// Device clock of the packet that completed the frame
    pub timestamp: u32,
    /// Number of frames published on the stream before this one
    pub sequence: u64,
    pub buffer: FrameBuffer,
}

impl DecodedFrame {
    pub fn new(mode: FrameMode) -> Self {
        Self {
            mode,
            timestamp: 0,
            sequence: 0,
            buffer: FrameBuffer::for_mode(&mode),
        }
    }

    pub fn width(&self) -> usize {
        self.mode.width
    }

    pub fn height(&self) -> usize {
        self.mode.height
    }

    pub fn format(&self) -> FrameFormat {
        self.mode.format
    }
}

impl Debug for DecodedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedFrame")
            .field("format", &self.mode.format)
            .field("width", &self.mode.width)
            .field("height", &self.mode.height)
            .field("timestamp", &self.timestamp)
            .field("sequence", &self.sequence)
            .field("buffer_length", &self.buffer.byte_len())
            .finish()
    }
}
