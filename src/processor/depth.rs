use std::sync::Arc;

use crate::{
    frame::FrameBuffer,
    settings::{DepthFormat, FrameFormat, FrameMode},
    Error,
};

use super::{
    output_u16, registration::RegistrationTable, unpack::unpack_to_16bit, PassthroughProcessor,
    ProcessorTrait,
};

/// Turns raw depth frames into the requested depth format.
pub struct DepthProcessor {
    format: DepthFormat,
    registration: Option<Arc<RegistrationTable>>,
    dense_registration: bool,
    // Unpacked shift values, only used by the millimeter formats
    scratch: Vec<u16>,
}

impl DepthProcessor {
    /// `registration` is required by [`DepthFormat::Registered`] and [`DepthFormat::Mm`].
    pub fn new(
        mode: &FrameMode,
        registration: Option<Arc<RegistrationTable>>,
        dense_registration: bool,
    ) -> Result<Self, Error> {
        let FrameFormat::Depth(format) = mode.format else {
            return Err(Error::UnsupportedMode {
                resolution: mode.resolution,
                format: mode.format,
            });
        };

        if format.needs_registration() && registration.is_none() {
            return Err(Error::RegistrationUnavailable);
        }

        let scratch = if format.needs_registration() {
            vec![0; mode.pixels()]
        } else {
            Vec::new()
        };

        Ok(Self {
            format,
            registration,
            dense_registration,
            scratch,
        })
    }

    pub fn format(&self) -> DepthFormat {
        self.format
    }

    fn registration(&self) -> Result<&RegistrationTable, Error> {
        self.registration
            .as_deref()
            .ok_or(Error::RegistrationUnavailable)
    }
}

impl ProcessorTrait<[u8], FrameBuffer> for DepthProcessor {
    fn process(&mut self, input: &[u8], output: &mut FrameBuffer) -> Result<(), Error> {
        match self.format {
            DepthFormat::Depth11Bit | DepthFormat::Depth10Bit => {
                let output = output_u16(output, "depth output")?;
                unpack_to_16bit(input, self.format.wire_bits(), output)
            }
            DepthFormat::Depth11BitPacked | DepthFormat::Depth10BitPacked => {
                PassthroughProcessor.process(input, output)
            }
            DepthFormat::Registered => {
                unpack_to_16bit(input, 11, &mut self.scratch)?;
                let output = output_u16(output, "registered output")?;
                self.registration()?
                    .apply(&self.scratch, output, self.dense_registration)
            }
            DepthFormat::Mm => {
                unpack_to_16bit(input, 11, &mut self.scratch)?;
                let output = output_u16(output, "millimeter output")?;
                self.registration()?.raw_to_mm(&self.scratch, output)
            }
        }
    }
}
