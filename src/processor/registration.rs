use log::info;
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::{
    data::{Calibration, RegInfo, RegPadInfo, ZeroPlaneInfo},
    Error, FRAME_HEIGHT, FRAME_PIXELS, FRAME_WIDTH,
};

pub const DEPTH_MAX_METRIC_VALUE: usize = 10000;
pub const DEPTH_MAX_RAW_VALUE: usize = 2048;
pub const DEPTH_NO_RAW_VALUE: usize = 2047;
pub const DEPTH_NO_MM_VALUE: u16 = 0;

// Fixed point precision of the x coordinates in the remap table
const REG_X_VAL_SCALE: i32 = 16;
const S2D_PEL_CONST: f64 = 10.0;
const S2D_CONST_OFFSET: f64 = 0.375;
const CMOS_VGA_OUTPUT_X_RES: usize = 1280;
const SENSOR_WIN_OFFSET_X: f64 = 1.0;
const SENSOR_WIN_OFFSET_Y: f64 = 1.0;
const PARAM_COEFF: i32 = 4;
const SHIFT_SCALE: f64 = 10.0;

// Remap entries set to this x are never inside the image
const ILLEGAL_X: i32 = (FRAME_WIDTH as i32 * 4) * REG_X_VAL_SCALE;

/// Lookup tables mapping raw depth onto the color camera.
/// Built once from calibration and immutable afterwards.
pub struct RegistrationTable {
    zero_plane: ZeroPlaneInfo,
    pad_info: RegPadInfo,
    /// Millimeters per raw 11 bit value
    raw_to_mm: Vec<u16>,
    /// Horizontal shift per metric depth, scaled by 16
    depth_to_rgb_shift: Vec<i32>,
    /// Per depth pixel `[x * 16, y]` in color space
    remap: Vec<[i32; 2]>,
}

impl RegistrationTable {
    pub fn new(calibration: &Calibration) -> Self {
        let table = Self {
            zero_plane: calibration.zero_plane,
            pad_info: calibration.pad_info,
            raw_to_mm: raw_to_mm_table(&calibration.zero_plane, calibration.const_shift),
            depth_to_rgb_shift: depth_to_rgb_table(&calibration.zero_plane),
            remap: remap_table(&calibration.reg_info),
        };

        info!(
            "Registration table built (reference distance {} mm)",
            calibration.zero_plane.reference_distance
        );

        table
    }

    /// Millimeters for one raw value, 0 when unknown.
    pub fn raw_to_mm_value(&self, raw: u16) -> u16 {
        self.raw_to_mm
            .get(raw as usize)
            .copied()
            .unwrap_or(DEPTH_NO_MM_VALUE)
    }

    /// Horizontal shift in color space for a metric depth, scaled by 16.
    pub fn depth_to_rgb_shift(&self, metric_mm: u16) -> Option<i32> {
        self.depth_to_rgb_shift.get(metric_mm as usize).copied()
    }

    /// Remap table entry `[x * 16, y]` of a depth pixel.
    pub fn remap(&self, x: usize, y: usize) -> Option<[i32; 2]> {
        if x >= FRAME_WIDTH || y >= FRAME_HEIGHT {
            return None;
        }

        Some(self.remap[y * FRAME_WIDTH + x])
    }

    /// Output index a depth pixel with the given metric depth lands on,
    /// `None` when it falls outside the image.
    pub fn target_index(&self, x: usize, y: usize, metric_mm: u16) -> Option<usize> {
        self.project(x, y, metric_mm).map(|(target, _, _)| target)
    }

    // (target index, color x, color y)
    fn project(&self, x: usize, y: usize, metric_mm: u16) -> Option<(usize, usize, usize)> {
        if metric_mm == DEPTH_NO_MM_VALUE {
            return None;
        }

        let [table_x, table_y] = self.remap(x, y)?;
        let shift = self.depth_to_rgb_shift(metric_mm)?;

        let nx = table_x as i64 + shift as i64;
        if nx < 0 || table_y < 0 {
            return None;
        }

        let nx = (nx / REG_X_VAL_SCALE as i64) as usize;
        let ny = table_y as usize;
        if nx >= FRAME_WIDTH {
            return None;
        }

        let offset = FRAME_HEIGHT * self.pad_info.start_lines as usize;
        let target = (ny * FRAME_WIDTH + nx).checked_sub(offset)?;
        if target >= FRAME_PIXELS {
            return None;
        }

        Some((target, nx, ny))
    }

    /// Reproject a raw 11 bit frame into color space, in millimeters.
    ///
    /// The closest depth wins when several pixels land on the same target.
    /// With `dense` the north, north-west and west neighbours of every
    /// written target receive the same value to close holes.
    pub fn apply(&self, input_raw: &[u16], output_mm: &mut [u16], dense: bool) -> Result<(), Error> {
        check_frame("registration input", input_raw.len())?;
        check_frame("registration output", output_mm.len())?;

        let output_mm = &mut output_mm[..FRAME_PIXELS];
        output_mm.fill(DEPTH_NO_MM_VALUE);

        for (index, &raw) in input_raw[..FRAME_PIXELS].iter().enumerate() {
            let metric = self.raw_to_mm_value(raw);
            let (x, y) = (index % FRAME_WIDTH, index / FRAME_WIDTH);

            let Some((target, nx, ny)) = self.project(x, y, metric) else {
                continue;
            };

            let current = output_mm[target];
            if current != DEPTH_NO_MM_VALUE && current <= metric {
                continue;
            }
            output_mm[target] = metric;

            if !dense {
                continue;
            }

            let mut fill = |index: Option<usize>| {
                if let Some(value) = index.and_then(|index| output_mm.get_mut(index)) {
                    *value = metric;
                }
            };

            let north = target.checked_sub(FRAME_WIDTH);
            let west = target.checked_sub(1);

            if nx > 0 && ny > 0 {
                fill(north);
                fill(target.checked_sub(FRAME_WIDTH + 1));
                fill(west);
            } else if ny > 0 {
                fill(north);
            } else if nx > 0 {
                fill(west);
            }
        }

        Ok(())
    }

    /// Convert a raw 11 bit frame to millimeters without reprojection.
    pub fn raw_to_mm(&self, input_raw: &[u16], output_mm: &mut [u16]) -> Result<(), Error> {
        if output_mm.len() < input_raw.len() {
            return Err(Error::BufferSize {
                what: "millimeter output",
                expected: input_raw.len(),
                actual: output_mm.len(),
            });
        }

        let convert = |(mm, &raw): (&mut u16, &u16)| *mm = self.raw_to_mm_value(raw);

        #[cfg(feature = "parallel")]
        output_mm.par_iter_mut().zip(input_raw).for_each(convert);
        #[cfg(not(feature = "parallel"))]
        output_mm.iter_mut().zip(input_raw).for_each(convert);

        Ok(())
    }

    /// World coordinates in millimeters of a depth pixel at `z` mm.
    pub fn camera_to_world(&self, x: f64, y: f64, z: f64) -> (f64, f64) {
        let reference_pixel_size = self.zero_plane.reference_pixel_size as f64;
        let reference_distance = self.zero_plane.reference_distance as f64;

        // Twice the pixel size since the depth image is half the sensor width
        let factor = 2.0 * reference_pixel_size * z / reference_distance;

        (
            (x - (FRAME_WIDTH / 2) as f64) * factor,
            (y - (FRAME_HEIGHT / 2) as f64) * factor,
        )
    }

    pub fn zero_plane(&self) -> &ZeroPlaneInfo {
        &self.zero_plane
    }
}

fn check_frame(what: &'static str, actual: usize) -> Result<(), Error> {
    if actual < FRAME_PIXELS {
        return Err(Error::BufferSize {
            what,
            expected: FRAME_PIXELS,
            actual,
        });
    }

    Ok(())
}

/// Build the registration tables from a binary calibration blob.
pub fn build_registration(blob: &[u8]) -> Result<RegistrationTable, Error> {
    let calibration = Calibration::try_from(blob)?;
    Ok(RegistrationTable::new(&calibration))
}

/// Register a raw 11 bit frame with dense fill enabled.
pub fn apply_registration(
    table: &RegistrationTable,
    input: &[u16],
    output: &mut [u16],
) -> Result<(), Error> {
    table.apply(input, output, true)
}

/// Millimeters for a raw shift value.
fn raw_to_mm(raw: u16, zero_plane: &ZeroPlaneInfo, const_shift: i32) -> u16 {
    let reference_pixel_size = zero_plane.reference_pixel_size as f64;
    let reference_distance = zero_plane.reference_distance as f64;
    let emitter_distance = zero_plane.dcmos_emitter_dist as f64;

    let shift = (raw as i32).wrapping_sub(PARAM_COEFF.wrapping_mul(const_shift));
    let fixed_ref_x = (shift / PARAM_COEFF) as f64 - S2D_CONST_OFFSET;
    let metric = fixed_ref_x * reference_pixel_size;

    (SHIFT_SCALE
        * ((metric * reference_distance / (emitter_distance - metric)) + reference_distance))
        as u16
}

fn raw_to_mm_table(zero_plane: &ZeroPlaneInfo, const_shift: i32) -> Vec<u16> {
    let mut table: Vec<u16> = (0..DEPTH_MAX_RAW_VALUE as u16)
        .map(|raw| raw_to_mm(raw, zero_plane, const_shift))
        .collect();
    table[DEPTH_NO_RAW_VALUE] = DEPTH_NO_MM_VALUE;

    table
}

fn depth_to_rgb_table(zero_plane: &ZeroPlaneInfo) -> Vec<i32> {
    let x_scale = (CMOS_VGA_OUTPUT_X_RES / FRAME_WIDTH) as f32;

    // Single precision product, widened before the division
    let pel_area = zero_plane.reference_pixel_size * x_scale * S2D_PEL_CONST as f32;
    let pel_size = 1.0 / pel_area as f64;
    let pel_dcc = zero_plane.dcmos_rcmos_dist as f64 * pel_size * S2D_PEL_CONST;
    let pel_dsr = zero_plane.reference_distance as f64 * pel_size * S2D_PEL_CONST;

    (0..DEPTH_MAX_METRIC_VALUE)
        .map(|metric| {
            let depth = metric as f64 * pel_size;
            (((pel_dcc * (depth - pel_dsr) / depth) + S2D_CONST_OFFSET) * REG_X_VAL_SCALE as f64)
                as i32
        })
        .collect()
}

/// Evaluate the calibration polynomial incrementally.
/// Returns per pixel x and y offsets in pixels.
fn create_dxdy_tables(reg: &RegInfo, res_x: usize, res_y: usize) -> (Vec<f64>, Vec<f64>) {
    let mut table_x = Vec::with_capacity(res_x * res_y);
    let mut table_y = Vec::with_capacity(res_x * res_y);

    let ax6 = reg.ax as i64;
    let bx6 = reg.bx as i64;
    let cx2 = reg.cx as i64;
    let dx2 = reg.dx as i64;

    let ay6 = reg.ay as i64;
    let by6 = reg.by as i64;
    let cy2 = reg.cy as i64;
    let dy2 = reg.dy as i64;

    // The shifts happen on 32 bits before widening, the values depend on it
    let mut dx0 = ((reg.dx_start << 13) >> 4) as i64;
    let mut dy0 = ((reg.dy_start << 13) >> 4) as i64;

    let mut dxdx0 = ((reg.dxdx_start << 11) >> 3) as i64;
    let mut dxdy0 = ((reg.dxdy_start << 11) >> 3) as i64;
    let mut dydx0 = ((reg.dydx_start << 11) >> 3) as i64;
    let mut dydy0 = ((reg.dydy_start << 11) >> 3) as i64;

    let mut dxdxdx0 = ((reg.dxdxdx_start << 5) << 3) as i64;
    let mut dydxdx0 = ((reg.dydxdx_start << 5) << 3) as i64;
    let mut dydxdy0 = ((reg.dydxdy_start << 5) << 3) as i64;
    let mut dxdxdy0 = ((reg.dxdxdy_start << 5) << 3) as i64;
    let mut dydydx0 = ((reg.dydydx_start << 5) << 3) as i64;
    let mut dydydy0 = ((reg.dydydy_start << 5) << 3) as i64;

    let scale = 1.0 / (1u64 << 17) as f64;

    for _ in 0..res_y {
        dxdxdx0 = dxdxdx0.wrapping_add(cx2);

        dxdx0 = dxdx0.wrapping_add(dydxdx0 >> 8);
        dydxdx0 = dydxdx0.wrapping_add(dx2);

        dx0 = dx0.wrapping_add(dydx0 >> 6);
        dydx0 = dydx0.wrapping_add(dydydx0 >> 8);
        dydydx0 = dydydx0.wrapping_add(bx6);

        dxdxdy0 = dxdxdy0.wrapping_add(cy2);

        dxdy0 = dxdy0.wrapping_add(dydxdy0 >> 8);
        dydxdy0 = dydxdy0.wrapping_add(dy2);

        dy0 = dy0.wrapping_add(dydy0 >> 6);
        dydy0 = dydy0.wrapping_add(dydydy0 >> 8);
        dydydy0 = dydydy0.wrapping_add(by6);

        let (mut col_dxdxdx0, mut col_dxdx0, mut col_dx0) = (dxdxdx0, dxdx0, dx0);
        let (mut col_dxdxdy0, mut col_dxdy0, mut col_dy0) = (dxdxdy0, dxdy0, dy0);

        for _ in 0..res_x {
            table_x.push(col_dx0 as f64 * scale);
            table_y.push(col_dy0 as f64 * scale);

            col_dx0 = col_dx0.wrapping_add(col_dxdx0 >> 6);
            col_dxdx0 = col_dxdx0.wrapping_add(col_dxdxdx0 >> 8);
            col_dxdxdx0 = col_dxdxdx0.wrapping_add(ax6);

            col_dy0 = col_dy0.wrapping_add(col_dxdy0 >> 6);
            col_dxdy0 = col_dxdy0.wrapping_add(col_dxdxdy0 >> 8);
            col_dxdxdy0 = col_dxdxdy0.wrapping_add(ay6);
        }
    }

    (table_x, table_y)
}

fn remap_table(reg: &RegInfo) -> Vec<[i32; 2]> {
    let (table_dx, table_dy) = create_dxdy_tables(reg, FRAME_WIDTH, FRAME_HEIGHT);
    let mut remap = vec![[ILLEGAL_X, FRAME_HEIGHT as i32]; FRAME_PIXELS];

    for (index, entry) in remap.iter_mut().enumerate() {
        let (x, y) = ((index % FRAME_WIDTH) as f64, (index / FRAME_WIDTH) as f64);

        let mut new_x = (x + table_dx[index] + SENSOR_WIN_OFFSET_X) * REG_X_VAL_SCALE as f64;
        let mut new_y = y + table_dy[index] + SENSOR_WIN_OFFSET_Y;

        if new_y < 1.0 {
            new_y = 1.0;
            new_x = ILLEGAL_X as f64;
        }

        if new_x < 1.0 {
            new_x = ILLEGAL_X as f64;
        }

        // Rows below this point stay off-image
        if new_y > FRAME_HEIGHT as f64 {
            break;
        }

        *entry = [new_x as i32, new_y as i32];
    }

    remap
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_calibration() -> Calibration {
        Calibration {
            reg_info: RegInfo::default(),
            ..Calibration::default()
        }
    }

    #[test]
    fn raw_to_mm_follows_zero_plane() {
        let table = RegistrationTable::new(&Calibration::default());

        assert_eq!(table.raw_to_mm_value(600), 705);
        assert_eq!(table.raw_to_mm_value(800), 1193);
        assert_eq!(table.raw_to_mm_value(1000), 3864);
        assert_eq!(table.raw_to_mm_value(2047), DEPTH_NO_MM_VALUE);
        assert_eq!(table.raw_to_mm_value(4000), DEPTH_NO_MM_VALUE);

        let mut output = [0u16; 3];
        table.raw_to_mm(&[600, 2047, 1000], &mut output).unwrap();
        assert_eq!(output, [705, 0, 3864]);
    }

    #[test]
    fn shift_table_uses_single_precision_pixel_area() {
        for pixel_size in [0.1042f32, 0.10417, 0.1039, 0.10503] {
            let mut calibration = Calibration::default();
            calibration.zero_plane.reference_pixel_size = pixel_size;
            let zero_plane = calibration.zero_plane;
            let table = RegistrationTable::new(&calibration);

            let pel_size = 1.0 / (pixel_size * 2.0 * 10.0) as f64;
            let pel_dcc = zero_plane.dcmos_rcmos_dist as f64 * pel_size * 10.0;
            let pel_dsr = zero_plane.reference_distance as f64 * pel_size * 10.0;

            for metric in [1u16, 400, 750, 1193, 2500, 5000, 9999] {
                let depth = metric as f64 * pel_size;
                let expected = ((pel_dcc * (depth - pel_dsr) / depth + 0.375) * 16.0) as i32;
                assert_eq!(table.depth_to_rgb_shift(metric), Some(expected), "{pixel_size} {metric}");
            }
        }
    }

    #[test]
    fn zero_coefficients_give_shifted_identity() {
        let table = RegistrationTable::new(&flat_calibration());

        assert_eq!(table.remap(0, 0), Some([16, 1]));
        assert_eq!(table.remap(10, 20), Some([11 * 16, 21]));
        assert_eq!(table.remap(639, 479), Some([640 * 16, 480]));
        assert_eq!(table.remap(640, 0), None);
    }

    #[test]
    fn factory_table_stays_near_identity() {
        let table = RegistrationTable::new(&Calibration::default());
        let [x, y] = table.remap(320, 240).unwrap();

        assert!((x / 16 - 320).abs() < 80, "x {}", x / 16);
        assert!((y - 240).abs() < 80, "y {y}");
    }

    #[test]
    fn projection_rejects_off_image_pixels() {
        let table = RegistrationTable::new(&flat_calibration());

        assert_eq!(table.target_index(0, 0, 0), None);
        assert_eq!(table.target_index(700, 0, 1000), None);
        assert_eq!(table.target_index(0, 0, 10000), None);
        // last row lands on y 480
        assert_eq!(table.target_index(5, 479, 1000), None);
    }

    #[test]
    fn dense_fill_writes_neighbours() {
        let table = RegistrationTable::new(&flat_calibration());
        let raw = 800;
        let metric = table.raw_to_mm_value(raw);

        let mut input = vec![2047u16; FRAME_PIXELS];
        input[100 * FRAME_WIDTH + 100] = raw;
        let target = table.target_index(100, 100, metric).unwrap();

        let mut sparse = vec![0u16; FRAME_PIXELS];
        table.apply(&input, &mut sparse, false).unwrap();
        assert_eq!(sparse.iter().filter(|&&value| value != 0).count(), 1);
        assert_eq!(sparse[target], metric);

        let mut dense = vec![0u16; FRAME_PIXELS];
        apply_registration(&table, &input, &mut dense).unwrap();
        assert_eq!(dense.iter().filter(|&&value| value != 0).count(), 4);
        for index in [target, target - 1, target - FRAME_WIDTH, target - FRAME_WIDTH - 1] {
            assert_eq!(dense[index], metric);
        }
    }

    #[test]
    fn short_buffers_are_rejected() {
        let table = RegistrationTable::new(&Calibration::default());
        let input = vec![0u16; 10];
        let mut output = vec![0u16; FRAME_PIXELS];

        assert!(matches!(
            table.apply(&input, &mut output, true),
            Err(Error::BufferSize { .. })
        ));
    }

    #[test]
    fn world_coordinates_scale_with_depth() {
        let table = RegistrationTable::new(&Calibration::default());
        let (x, y) = table.camera_to_world(320.0, 240.0, 1000.0);
        assert_eq!((x, y), (0.0, 0.0));

        let (x, _) = table.camera_to_world(420.0, 240.0, 1200.0);
        let factor = 2.0 * 0.1042f32 as f64 * 1200.0 / 120.0;
        assert!((x - 100.0 * factor).abs() < 1e-9);
    }

    #[test]
    fn blob_builds_table() {
        let blob = Calibration::default().to_bytes();
        let table = build_registration(&blob).unwrap();
        assert_eq!(table.raw_to_mm_value(800), 1193);

        assert!(build_registration(&blob[..100]).is_err());
    }
}
