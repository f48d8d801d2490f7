#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::check_buffer;
use crate::Error;

/// Demosaic a GRBG Bayer image into RGB triplets.
pub fn bayer_to_rgb(raw: &[u8], width: usize, height: usize) -> Result<Vec<u8>, Error> {
    let mut rgb = vec![0; width * height * 3];
    bayer_to_rgb_into(raw, width, height, &mut rgb)?;
    Ok(rgb)
}

/// Demosaic into a caller-owned buffer of at least `width * height * 3` bytes.
///
/// Pixel arrangement:
/// ```text
/// G R G R
/// B G B G
/// G R G R
/// ```
/// Missing neighbours at the image border are mirrored from the second
/// (or second last) row and column.
pub fn bayer_to_rgb_into(
    raw: &[u8],
    width: usize,
    height: usize,
    rgb: &mut [u8],
) -> Result<(), Error> {
    if width < 2 || height < 2 {
        return Err(Error::InvalidDimensions { width, height });
    }
    check_buffer("bayer input", width * height, raw.len())?;
    check_buffer("rgb output", width * height * 3, rgb.len())?;

    let row = move |y: usize| &raw[y * width..(y + 1) * width];
    let demosaic = move |(y, out): (usize, &mut [u8])| {
        let prev = if y == 0 { row(1) } else { row(y - 1) };
        let next = if y == height - 1 { row(height - 2) } else { row(y + 1) };
        demosaic_row(prev, row(y), next, y & 1 == 1, out);
    };

    let rgb = &mut rgb[..width * height * 3];

    #[cfg(feature = "parallel")]
    rgb.par_chunks_mut(width * 3).enumerate().for_each(demosaic);
    #[cfg(not(feature = "parallel"))]
    rgb.chunks_mut(width * 3).enumerate().for_each(demosaic);

    Ok(())
}

fn demosaic_row(prev: &[u8], cur: &[u8], next: &[u8], odd_row: bool, out: &mut [u8]) {
    let width = cur.len();
    let vertical = |x: usize| (prev[x] as u16 + next[x] as u16) >> 1;

    for (x, pixel) in out.chunks_exact_mut(3).enumerate() {
        let left = if x == 0 { 1 } else { x - 1 };
        let right = if x == width - 1 { width - 2 } else { x + 1 };

        let center = cur[x] as u16;
        let horizontal = (cur[left] as u16 + cur[right] as u16) >> 1;
        let diagonal = (vertical(left) + vertical(right)) >> 1;
        let cross = (horizontal + vertical(x)) >> 1;

        let (r, g, b) = match (odd_row, x & 1 == 1) {
            // green on a red row
            (false, false) => (horizontal, center, vertical(x)),
            (false, true) => (center, cross, diagonal),
            (true, false) => (diagonal, cross, center),
            // green on a blue row
            (true, true) => (vertical(x), center, horizontal),
        };

        pixel[0] = r as u8;
        pixel[1] = g as u8;
        pixel[2] = b as u8;
    }
}
