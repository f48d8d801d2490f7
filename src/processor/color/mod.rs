mod bayer;
mod yuv;

pub use bayer::*;
pub use yuv::*;

use crate::Error;

fn check_buffer(what: &'static str, expected: usize, actual: usize) -> Result<(), Error> {
    if actual < expected {
        return Err(Error::BufferSize {
            what,
            expected,
            actual,
        });
    }

    Ok(())
}
