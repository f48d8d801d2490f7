pub mod color;
pub mod depth;
pub mod registration;
pub mod unpack;
pub mod video;

use crate::{frame::FrameBuffer, Error};

pub use depth::DepthProcessor;
pub use video::VideoProcessor;

/// Decoding step turning one input into a caller-owned output.
pub trait ProcessorTrait<I: ?Sized, O: ?Sized> {
    fn process(&mut self, input: &I, output: &mut O) -> Result<(), Error>;
}

/// Processor turning a reassembled raw frame into consumer pixels.
pub type FrameProcessor = Box<dyn ProcessorTrait<[u8], FrameBuffer> + Send>;

/// Copies the raw frame, for formats sent exactly as consumed.
pub struct PassthroughProcessor;

impl ProcessorTrait<[u8], FrameBuffer> for PassthroughProcessor {
    fn process(&mut self, input: &[u8], output: &mut FrameBuffer) -> Result<(), Error> {
        match output {
            FrameBuffer::U8(buffer) => {
                let count = input.len().min(buffer.len());
                buffer[..count].copy_from_slice(&input[..count]);
                buffer[count..].fill(0);
                Ok(())
            }
            FrameBuffer::U16(buffer) => Err(Error::BufferSize {
                what: "passthrough output",
                expected: input.len(),
                actual: buffer.len() * 2,
            }),
        }
    }
}

pub(crate) fn output_u16<'a>(output: &'a mut FrameBuffer, what: &'static str) -> Result<&'a mut [u16], Error> {
    match output {
        FrameBuffer::U16(buffer) => Ok(buffer),
        FrameBuffer::U8(buffer) => Err(Error::BufferSize {
            what,
            expected: buffer.len() / 2,
            actual: 0,
        }),
    }
}

pub(crate) fn output_u8<'a>(output: &'a mut FrameBuffer, what: &'static str) -> Result<&'a mut [u8], Error> {
    match output {
        FrameBuffer::U8(buffer) => Ok(buffer),
        FrameBuffer::U16(buffer) => Err(Error::BufferSize {
            what,
            expected: buffer.len() * 2,
            actual: 0,
        }),
    }
}
