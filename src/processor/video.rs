use crate::{
    frame::FrameBuffer,
    settings::{FrameFormat, FrameMode, VideoFormat},
    Error,
};

use super::{
    color::{bayer_to_rgb_into, uyvy_to_rgb_into},
    output_u16, output_u8,
    unpack::{unpack_to_16bit, unpack_to_8bit},
    PassthroughProcessor, ProcessorTrait,
};

// IR samples are always 10 bits on the wire
const IR_BITS: u32 = 10;

/// Turns raw video frames into the requested video format.
pub struct VideoProcessor {
    format: VideoFormat,
    width: usize,
    height: usize,
}

impl VideoProcessor {
    pub fn new(mode: &FrameMode) -> Result<Self, Error> {
        let FrameFormat::Video(format) = mode.format else {
            return Err(Error::UnsupportedMode {
                resolution: mode.resolution,
                format: mode.format,
            });
        };

        Ok(Self {
            format,
            width: mode.width,
            height: mode.height,
        })
    }

    pub fn format(&self) -> VideoFormat {
        self.format
    }
}

impl ProcessorTrait<[u8], FrameBuffer> for VideoProcessor {
    fn process(&mut self, input: &[u8], output: &mut FrameBuffer) -> Result<(), Error> {
        match self.format {
            VideoFormat::Rgb => {
                let output = output_u8(output, "rgb output")?;
                bayer_to_rgb_into(input, self.width, self.height, output)
            }
            VideoFormat::YuvRgb => {
                let output = output_u8(output, "rgb output")?;
                uyvy_to_rgb_into(input, self.width, self.height, output)
            }
            VideoFormat::Ir8Bit => {
                let output = output_u8(output, "ir output")?;
                unpack_to_8bit(input, IR_BITS, output)
            }
            VideoFormat::Ir10Bit => {
                let output = output_u16(output, "ir output")?;
                unpack_to_16bit(input, IR_BITS, output)
            }
            VideoFormat::Bayer | VideoFormat::Ir10BitPacked | VideoFormat::YuvRaw => {
                PassthroughProcessor.process(input, output)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        processor::unpack::pack_from_16bit,
        settings::{find_video_mode, Resolution},
    };

    fn setup(format: VideoFormat) -> (VideoProcessor, FrameBuffer, FrameMode) {
        let mode = find_video_mode(Resolution::Medium, format).unwrap();
        (
            VideoProcessor::new(&mode).unwrap(),
            FrameBuffer::for_mode(&mode),
            mode,
        )
    }

    #[test]
    fn bayer_is_demosaiced() {
        let (mut processor, mut output, mode) = setup(VideoFormat::Rgb);
        let raw = vec![77; mode.raw_bytes];

        processor.process(&raw, &mut output).unwrap();
        assert!(output.as_u8().unwrap().iter().all(|&value| value == 77));
    }

    #[test]
    fn ir_keeps_top_bits() {
        let (mut processor, mut output, mode) = setup(VideoFormat::Ir8Bit);
        let raw = pack_from_16bit(&vec![0x2a5; mode.pixels()], 10).unwrap();
        assert_eq!(raw.len(), mode.raw_bytes);

        processor.process(&raw, &mut output).unwrap();
        assert!(output.as_u8().unwrap().iter().all(|&value| value == 0xa9));

        let (mut processor, mut output, _) = setup(VideoFormat::Ir10Bit);
        processor.process(&raw, &mut output).unwrap();
        assert!(output.as_u16().unwrap().iter().all(|&value| value == 0x2a5));
    }

    #[test]
    fn yuv_raw_is_copied() {
        let (mut processor, mut output, mode) = setup(VideoFormat::YuvRaw);
        let raw: Vec<u8> = (0..mode.raw_bytes).map(|index| index as u8).collect();

        processor.process(&raw, &mut output).unwrap();
        assert_eq!(output.as_u8(), Some(&raw[..]));
    }

    #[test]
    fn depth_modes_are_rejected() {
        let mode = crate::settings::find_depth_mode(
            Resolution::Medium,
            crate::settings::DepthFormat::Depth11Bit,
        )
        .unwrap();
        assert!(VideoProcessor::new(&mode).is_err());
    }
}
