use super::check_buffer;
use crate::Error;

fn check_uyvy_dimensions(width: usize, height: usize) -> Result<(), Error> {
    if width == 0 || height == 0 || width % 2 != 0 {
        return Err(Error::InvalidDimensions { width, height });
    }

    Ok(())
}

/// Convert UYVY (two pixels sharing chroma) to RGB triplets.
pub fn uyvy_to_rgb(raw: &[u8], width: usize, height: usize) -> Result<Vec<u8>, Error> {
    let mut rgb = vec![0; width * height * 3];
    uyvy_to_rgb_into(raw, width, height, &mut rgb)?;
    Ok(rgb)
}

/// Fixed point conversion, divisions truncate toward zero.
pub fn uyvy_to_rgb_into(
    raw: &[u8],
    width: usize,
    height: usize,
    rgb: &mut [u8],
) -> Result<(), Error> {
    check_uyvy_dimensions(width, height)?;
    check_buffer("uyvy input", width * height * 2, raw.len())?;
    check_buffer("rgb output", width * height * 3, rgb.len())?;

    let pairs = width * height / 2;

    for (uyvy, out) in raw
        .chunks_exact(4)
        .zip(rgb.chunks_exact_mut(6))
        .take(pairs)
    {
        let u = uyvy[0] as i32 - 128;
        let v = uyvy[2] as i32 - 128;

        for (y, pixel) in [uyvy[1], uyvy[3]].into_iter().zip(out.chunks_exact_mut(3)) {
            let luma = (y as i32 - 16) * 1164 / 1000;

            let r = luma + v * 1596 / 1000;
            let g = luma - v * 813 / 1000 - u * 391 / 1000;
            let b = luma + u * 2018 / 1000;

            pixel[0] = r.clamp(0, 255) as u8;
            pixel[1] = g.clamp(0, 255) as u8;
            pixel[2] = b.clamp(0, 255) as u8;
        }
    }

    Ok(())
}

/// Convert RGB triplets to UYVY, chroma averaged over each pixel pair.
pub fn rgb_to_uyvy(rgb: &[u8], width: usize, height: usize) -> Result<Vec<u8>, Error> {
    check_uyvy_dimensions(width, height)?;
    check_buffer("rgb input", width * height * 3, rgb.len())?;

    let yuv = |pixel: &[u8]| {
        let (r, g, b) = (pixel[0] as f32, pixel[1] as f32, pixel[2] as f32);
        (
            0.257 * r + 0.504 * g + 0.098 * b + 16.0,
            -(0.148 * r) - 0.291 * g + 0.439 * b + 128.0,
            0.439 * r - 0.368 * g - 0.071 * b + 128.0,
        )
    };

    let uyvy = rgb[..width * height * 3]
        .chunks_exact(6)
        .flat_map(|pair| {
            let (y0, u0, v0) = yuv(&pair[..3]);
            let (y1, u1, v1) = yuv(&pair[3..]);

            [
                ((u0 + u1) / 2.0) as u8,
                y0 as u8,
                ((v0 + v1) / 2.0) as u8,
                y1 as u8,
            ]
        })
        .collect();

    Ok(uyvy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uyvy_matches_fixed_point_reference() {
        let raw = [128, 16, 128, 235, 0, 100, 255, 200];
        let rgb = uyvy_to_rgb(&raw, 4, 1).unwrap();

        // neutral chroma: black and white
        assert_eq!(&rgb[0..6], &[0, 0, 0, 254, 254, 254]);

        // y 100: luma 97; u -128, v 127
        // r = 97 + 202 = 299 -> 255, g = 97 - 103 + 50 = 44, b = 97 - 258 -> 0
        assert_eq!(&rgb[6..9], &[255, 44, 0]);
        // y 200: luma 214
        // g = 214 - 103 + 50 = 161
        assert_eq!(&rgb[9..12], &[255, 161, 0]);
    }

    #[test]
    fn rgb_pairs_share_averaged_chroma() {
        // black next to pure red
        let rgb = [0, 0, 0, 255, 0, 0];
        let uyvy = rgb_to_uyvy(&rgb, 2, 1).unwrap();

        // u = (128 + 90.26) / 2, v = (128 + 239.94) / 2
        assert_eq!(uyvy, vec![109, 16, 183, 81]);
    }

    #[test]
    fn odd_width_is_rejected() {
        assert!(matches!(
            uyvy_to_rgb(&[0; 6], 3, 1),
            Err(Error::InvalidDimensions { .. })
        ));
    }
}
