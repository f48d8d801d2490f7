use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum Resolution {
    /// 320x240
    Low = 0,
    /// 640x480
    Medium = 1,
    /// 1280x1024
    High = 2,
}

impl Resolution {
    pub fn dimensions(self) -> (usize, usize) {
        match self {
            Self::Low => (320, 240),
            Self::Medium => (640, 480),
            Self::High => (1280, 1024),
        }
    }
}

impl TryFrom<u32> for Resolution {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Low),
            1 => Ok(Self::Medium),
            2 => Ok(Self::High),
            _ => Err(Error::UnknownResolution(value)),
        }
    }
}

// Values are shared with recordings, they must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum DepthFormat {
    /// 11 bit depth information in one u16 per pixel
    Depth11Bit = 0,
    /// 10 bit depth information in one u16 per pixel
    Depth10Bit = 1,
    /// 11 bit packed depth information
    Depth11BitPacked = 2,
    /// 10 bit packed depth information
    Depth10BitPacked = 3,
    /// Depth in mm, aligned to the color camera
    Registered = 4,
    /// Depth in mm, unaligned
    Mm = 5,
}

impl DepthFormat {
    pub const ALL: [DepthFormat; 6] = [
        Self::Depth11Bit,
        Self::Depth10Bit,
        Self::Depth11BitPacked,
        Self::Depth10BitPacked,
        Self::Registered,
        Self::Mm,
    ];

    /// Bit width of the samples coming over the wire.
    pub fn wire_bits(self) -> u32 {
        match self {
            Self::Depth10Bit | Self::Depth10BitPacked => 10,
            _ => 11,
        }
    }

    /// Whether this format needs zero plane calibration.
    pub fn needs_registration(self) -> bool {
        matches!(self, Self::Registered | Self::Mm)
    }
}

impl TryFrom<u32> for DepthFormat {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|format| *format as u32 == value)
            .ok_or(Error::UnknownFormat(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum VideoFormat {
    /// Decompressed RGB mode (demosaicing done by the library)
    Rgb = 0,
    /// Bayer compressed mode (raw information from camera)
    Bayer = 1,
    /// 8 bit IR mode
    Ir8Bit = 2,
    /// 10 bit IR mode in one u16 per pixel
    Ir10Bit = 3,
    /// 10 bit packed IR mode
    Ir10BitPacked = 4,
    /// YUV RGB mode
    YuvRgb = 5,
    /// YUV raw mode
    YuvRaw = 6,
}

impl VideoFormat {
    pub const ALL: [VideoFormat; 7] = [
        Self::Rgb,
        Self::Bayer,
        Self::Ir8Bit,
        Self::Ir10Bit,
        Self::Ir10BitPacked,
        Self::YuvRgb,
        Self::YuvRaw,
    ];

    pub fn is_ir(self) -> bool {
        matches!(self, Self::Ir8Bit | Self::Ir10Bit | Self::Ir10BitPacked)
    }

    pub fn is_yuv(self) -> bool {
        matches!(self, Self::YuvRgb | Self::YuvRaw)
    }
}

impl TryFrom<u32> for VideoFormat {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|format| *format as u32 == value)
            .ok_or(Error::UnknownFormat(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameFormat {
    Depth(DepthFormat),
    Video(VideoFormat),
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Depth(format) => write!(f, "depth {format:?}"),
            Self::Video(format) => write!(f, "video {format:?}"),
        }
    }
}

/// Geometry and sizes of one supported stream mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMode {
    pub resolution: Resolution,
    pub format: FrameFormat,
    pub width: usize,
    pub height: usize,
    /// Bytes of a decoded frame
    pub bytes: usize,
    /// Bytes of a frame as it arrives over the wire
    pub raw_bytes: usize,
    pub data_bits_per_pixel: u8,
    pub padding_bits_per_pixel: u8,
    pub framerate: u8,
}

impl FrameMode {
    pub fn pixels(&self) -> usize {
        self.width * self.height
    }

    /// Packed `(resolution, format)` identifier used by recordings.
    pub fn reserved(&self) -> u32 {
        let format = match self.format {
            FrameFormat::Depth(format) => format as u32,
            FrameFormat::Video(format) => format as u32,
        };

        ((self.resolution as u32 & 0xff) << 8) | (format & 0xff)
    }
}

fn depth_mode(format: DepthFormat) -> FrameMode {
    let (width, height) = Resolution::Medium.dimensions();
    let pixels = width * height;
    let packed = pixels * format.wire_bits() as usize / 8;

    let (bytes, data_bits, padding_bits) = match format {
        DepthFormat::Depth11Bit => (pixels * 2, 11, 5),
        DepthFormat::Depth10Bit => (pixels * 2, 10, 6),
        DepthFormat::Depth11BitPacked => (packed, 11, 0),
        DepthFormat::Depth10BitPacked => (packed, 10, 0),
        DepthFormat::Registered | DepthFormat::Mm => (pixels * 2, 16, 0),
    };

    FrameMode {
        resolution: Resolution::Medium,
        format: FrameFormat::Depth(format),
        width,
        height,
        bytes,
        raw_bytes: packed,
        data_bits_per_pixel: data_bits,
        padding_bits_per_pixel: padding_bits,
        framerate: 30,
    }
}

fn video_mode(resolution: Resolution, format: VideoFormat) -> FrameMode {
    let (width, mut height) = resolution.dimensions();
    if format.is_ir() && resolution == Resolution::Medium {
        height = crate::IR_FRAME_HEIGHT;
    }
    let pixels = width * height;

    let (bytes, data_bits, padding_bits) = match format {
        VideoFormat::Rgb | VideoFormat::YuvRgb => (pixels * 3, 24, 0),
        VideoFormat::Bayer | VideoFormat::Ir8Bit => (pixels, 8, 0),
        VideoFormat::Ir10Bit => (pixels * 2, 10, 6),
        VideoFormat::Ir10BitPacked => (pixels * 10 / 8, 10, 0),
        VideoFormat::YuvRaw => (pixels * 2, 16, 0),
    };
    let raw_bytes = match format {
        VideoFormat::Rgb | VideoFormat::Bayer => pixels,
        VideoFormat::Ir8Bit | VideoFormat::Ir10Bit | VideoFormat::Ir10BitPacked => {
            pixels * 10 / 8
        }
        VideoFormat::YuvRgb | VideoFormat::YuvRaw => pixels * 2,
    };
    let framerate = match (resolution, format.is_yuv()) {
        (Resolution::High, _) => 10,
        (_, true) => 15,
        _ => 30,
    };

    FrameMode {
        resolution,
        format: FrameFormat::Video(format),
        width,
        height,
        bytes,
        raw_bytes,
        data_bits_per_pixel: data_bits,
        padding_bits_per_pixel: padding_bits,
        framerate,
    }
}

/// Find the depth mode for `(resolution, format)`.
/// Only medium resolution is supported by the depth camera.
pub fn find_depth_mode(resolution: Resolution, format: DepthFormat) -> Result<FrameMode, Error> {
    if resolution != Resolution::Medium {
        return Err(Error::UnsupportedMode {
            resolution,
            format: FrameFormat::Depth(format),
        });
    }

    Ok(depth_mode(format))
}

/// Find the video mode for `(resolution, format)`.
pub fn find_video_mode(resolution: Resolution, format: VideoFormat) -> Result<FrameMode, Error> {
    let supported = match resolution {
        Resolution::Low => false,
        Resolution::Medium => true,
        Resolution::High => !format.is_yuv(),
    };

    if !supported {
        return Err(Error::UnsupportedMode {
            resolution,
            format: FrameFormat::Video(format),
        });
    }

    Ok(video_mode(resolution, format))
}

/// Every supported video mode followed by every supported depth mode.
pub fn supported_modes() -> Vec<FrameMode> {
    let video = VideoFormat::ALL.into_iter().flat_map(|format| {
        [Resolution::High, Resolution::Medium]
            .into_iter()
            .filter_map(move |resolution| find_video_mode(resolution, format).ok())
    });
    let depth = DepthFormat::ALL.into_iter().map(depth_mode);

    video.chain(depth).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_table_matches_device_capabilities() {
        let modes = supported_modes();
        assert_eq!(modes.len(), 18);

        let ir = find_video_mode(Resolution::Medium, VideoFormat::Ir10BitPacked).unwrap();
        assert_eq!((ir.width, ir.height), (640, 488));
        assert_eq!(ir.bytes, 390400);

        let depth = find_depth_mode(Resolution::Medium, DepthFormat::Depth11Bit).unwrap();
        assert_eq!(depth.raw_bytes, 422400);
        assert_eq!(depth.bytes, 640 * 480 * 2);

        let depth10 = find_depth_mode(Resolution::Medium, DepthFormat::Depth10BitPacked).unwrap();
        assert_eq!(depth10.raw_bytes, 384000);
        assert_eq!(depth10.bytes, 384000);
    }

    #[test]
    fn unsupported_modes_are_rejected() {
        assert!(matches!(
            find_video_mode(Resolution::High, VideoFormat::YuvRgb),
            Err(Error::UnsupportedMode { .. })
        ));
        assert!(matches!(
            find_depth_mode(Resolution::High, DepthFormat::Depth11Bit),
            Err(Error::UnsupportedMode { .. })
        ));
        assert!(find_video_mode(Resolution::Low, VideoFormat::Rgb).is_err());
    }

    #[test]
    fn format_values_are_stable() {
        assert_eq!(DepthFormat::try_from(4).unwrap(), DepthFormat::Registered);
        assert_eq!(VideoFormat::try_from(6).unwrap(), VideoFormat::YuvRaw);
        assert!(matches!(DepthFormat::try_from(6), Err(Error::UnknownFormat(6))));
        assert!(matches!(Resolution::try_from(3), Err(Error::UnknownResolution(3))));
    }

    #[test]
    fn reserved_packs_resolution_and_format() {
        let mode = find_video_mode(Resolution::High, VideoFormat::Bayer).unwrap();
        assert_eq!(mode.reserved(), 0x0201);
    }
}
