//! Bit-packed sample streams.
//!
//! The camera sends samples as one big-endian bit stream, most significant
//! bit first, with no padding between samples.

use std::iter;

use crate::Error;

fn check_width(bit_width: u32, min: u32) -> Result<(), Error> {
    if (min..=16).contains(&bit_width) {
        Ok(())
    } else {
        Err(Error::UnsupportedBitWidth(bit_width))
    }
}

/// Unpack `count` samples of `bit_width` bits into a new vector.
pub fn unpack(src: &[u8], bit_width: u32, count: usize) -> Result<Vec<u16>, Error> {
    let mut dst = vec![0; count];
    unpack_to_16bit(src, bit_width, &mut dst)?;
    Ok(dst)
}

/// Unpack `dst.len()` samples, each zero padded to 16 bits.
/// Bytes missing at the end of `src` read as zero.
pub fn unpack_to_16bit(src: &[u8], bit_width: u32, dst: &mut [u16]) -> Result<(), Error> {
    check_width(bit_width, 1)?;

    let (done, consumed) = if bit_width == 11 {
        unpack_11bit_blocks(src, dst)
    } else {
        (0, 0)
    };

    let mask = (1u32 << bit_width) - 1;
    let mut bytes = src[consumed..].iter().copied().chain(iter::repeat(0));
    let mut buffer = 0u32;
    let mut bits_in = 0;

    for value in &mut dst[done..] {
        while bits_in < bit_width {
            buffer = (buffer << 8) | bytes.next().unwrap_or(0) as u32;
            bits_in += 8;
        }
        bits_in -= bit_width;
        *value = ((buffer >> bits_in) & mask) as u16;
    }

    Ok(())
}

// 8 samples of 11 bits fill exactly 11 bytes.
fn unpack_11bit_blocks(src: &[u8], dst: &mut [u16]) -> (usize, usize) {
    const MASK: u32 = (1 << 11) - 1;

    let blocks = (dst.len() / 8).min(src.len() / 11);

    for (raw, frame) in src.chunks_exact(11).zip(dst.chunks_exact_mut(8)).take(blocks) {
        let r: [u32; 11] = std::array::from_fn(|i| raw[i] as u32);

        frame[0] = ((r[0] << 3) | (r[1] >> 5)) as u16;
        frame[1] = (((r[1] << 6) | (r[2] >> 2)) & MASK) as u16;
        frame[2] = (((r[2] << 9) | (r[3] << 1) | (r[4] >> 7)) & MASK) as u16;
        frame[3] = (((r[4] << 4) | (r[5] >> 4)) & MASK) as u16;
        frame[4] = (((r[5] << 7) | (r[6] >> 1)) & MASK) as u16;
        frame[5] = (((r[6] << 10) | (r[7] << 2) | (r[8] >> 6)) & MASK) as u16;
        frame[6] = (((r[8] << 5) | (r[9] >> 3)) & MASK) as u16;
        frame[7] = (((r[9] << 8) | r[10]) & MASK) as u16;
    }

    (blocks * 8, blocks * 11)
}

/// Unpack `dst.len()` samples keeping their 8 most significant bits.
pub fn unpack_to_8bit(src: &[u8], bit_width: u32, dst: &mut [u8]) -> Result<(), Error> {
    check_width(bit_width, 8)?;

    let mut bytes = src.iter().copied().chain(iter::repeat(0));
    let mut buffer = 0u32;
    let mut bits_in = 0;

    for value in dst.iter_mut() {
        while bits_in < bit_width {
            buffer = (buffer << 8) | bytes.next().unwrap_or(0) as u32;
            bits_in += 8;
        }
        bits_in -= bit_width;
        *value = (buffer >> (bits_in + bit_width - 8)) as u8;
    }

    Ok(())
}

/// Pack the low `bit_width` bits of every sample into a bit stream.
/// The last byte is zero padded.
pub fn pack_from_16bit(src: &[u16], bit_width: u32) -> Result<Vec<u8>, Error> {
    check_width(bit_width, 1)?;

    let mask = (1u32 << bit_width) - 1;
    let mut dst = Vec::with_capacity((src.len() * bit_width as usize).div_ceil(8));
    let mut buffer = 0u32;
    let mut bits_in = 0;

    for &value in src {
        buffer = (buffer << bit_width) | (value as u32 & mask);
        bits_in += bit_width;

        while bits_in >= 8 {
            bits_in -= 8;
            dst.push((buffer >> bits_in) as u8);
        }
        buffer &= (1 << bits_in) - 1;
    }

    if bits_in > 0 {
        dst.push((buffer << (8 - bits_in)) as u8);
    }

    Ok(dst)
}
