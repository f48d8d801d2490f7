use serde::{Deserialize, Serialize};

use crate::{Error, FromBuffer};

/// Polynomial registration coefficients.
/// Kinect v1 includes factory preset values for these parameters.
/// They are used to build the depth to color remap table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegInfo {
    pub dx_center: i32,

    pub ax: i32,
    pub bx: i32,
    pub cx: i32,
    pub dx: i32,
    pub dx_start: i32,

    pub ay: i32,
    pub by: i32,
    pub cy: i32,
    pub dy: i32,
    pub dy_start: i32,

    pub dx_beta_start: i32,
    pub dy_beta_start: i32,

    pub rollout_blank: i32,
    pub rollout_size: i32,

    pub dx_beta_inc: i32,
    pub dy_beta_inc: i32,

    pub dxdx_start: i32,
    pub dxdy_start: i32,
    pub dydx_start: i32,
    pub dydy_start: i32,

    pub dxdxdx_start: i32,
    pub dydxdx_start: i32,
    pub dxdxdy_start: i32,
    pub dydxdy_start: i32,

    pub back_comp1: i32,

    pub dydydx_start: i32,

    pub back_comp2: i32,

    pub dydydy_start: i32,
}

impl RegInfo {
    pub const FIELD_COUNT: usize = 29;

    /// Values of a retail unit, used when the device can't be asked.
    pub fn factory() -> Self {
        Self::from_array([
            2048330528, 1964, 56, -26, 600, 6161, -13, 2825, 684, 5, 6434, 10062, 130801, 0, 0,
            170, 136, 2095986, 890, 763, 2096378, 134215474, 134217093, 134216989, 134216925, 0,
            134216984, 0, 134214659,
        ])
    }

    fn from_array(v: [i32; Self::FIELD_COUNT]) -> Self {
        Self {
            dx_center: v[0],
            ax: v[1],
            bx: v[2],
            cx: v[3],
            dx: v[4],
            dx_start: v[5],
            ay: v[6],
            by: v[7],
            cy: v[8],
            dy: v[9],
            dy_start: v[10],
            dx_beta_start: v[11],
            dy_beta_start: v[12],
            rollout_blank: v[13],
            rollout_size: v[14],
            dx_beta_inc: v[15],
            dy_beta_inc: v[16],
            dxdx_start: v[17],
            dxdy_start: v[18],
            dydx_start: v[19],
            dydy_start: v[20],
            dxdxdx_start: v[21],
            dydxdx_start: v[22],
            dxdxdy_start: v[23],
            dydxdy_start: v[24],
            back_comp1: v[25],
            dydydx_start: v[26],
            back_comp2: v[27],
            dydydy_start: v[28],
        }
    }

    fn to_array(self) -> [i32; Self::FIELD_COUNT] {
        [
            self.dx_center,
            self.ax,
            self.bx,
            self.cx,
            self.dx,
            self.dx_start,
            self.ay,
            self.by,
            self.cy,
            self.dy,
            self.dy_start,
            self.dx_beta_start,
            self.dy_beta_start,
            self.rollout_blank,
            self.rollout_size,
            self.dx_beta_inc,
            self.dy_beta_inc,
            self.dxdx_start,
            self.dxdy_start,
            self.dydx_start,
            self.dydy_start,
            self.dxdxdx_start,
            self.dydxdx_start,
            self.dxdxdy_start,
            self.dydxdy_start,
            self.back_comp1,
            self.dydydx_start,
            self.back_comp2,
            self.dydydy_start,
        ]
    }
}

/// Padding of the depth image relative to the color image.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegPadInfo {
    pub start_lines: u16,
    pub end_lines: u16,
    pub cropping_lines: u16,
}

/// Geometry of the IR emitter and both cameras.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZeroPlaneInfo {
    /// Distance between IR camera and emitter (cm)
    #[serde(rename = "dcmos_emitter_distance")]
    pub dcmos_emitter_dist: f32,
    /// Distance between IR and color camera (cm)
    #[serde(rename = "dcmos_rcmos_distance")]
    pub dcmos_rcmos_dist: f32,
    /// Distance of the reference plane (mm)
    pub reference_distance: f32,
    /// Size of one IR pixel at the reference distance (mm)
    pub reference_pixel_size: f32,
}

impl ZeroPlaneInfo {
    pub fn factory() -> Self {
        Self {
            dcmos_emitter_dist: 7.5,
            dcmos_rcmos_dist: 2.3,
            reference_distance: 120.0,
            reference_pixel_size: 0.1042,
        }
    }
}

/// Everything needed to register depth onto the color image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub reg_info: RegInfo,
    pub pad_info: RegPadInfo,
    pub zero_plane: ZeroPlaneInfo,
    pub const_shift: i32,
}

impl Calibration {
    /// Size of the binary calibration blob.
    pub const BLOB_SIZE: usize = RegInfo::FIELD_COUNT * 4 + 3 * 2 + 4 * 4 + 4;

    pub fn has_zero_plane(&self) -> bool {
        self.zero_plane.reference_distance != 0.0
    }

    /// Encode into the binary blob layout, all values little-endian.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(Self::BLOB_SIZE);

        for value in self.reg_info.to_array() {
            buffer.extend_from_slice(&value.to_le_bytes());
        }
        for value in [
            self.pad_info.start_lines,
            self.pad_info.end_lines,
            self.pad_info.cropping_lines,
        ] {
            buffer.extend_from_slice(&value.to_le_bytes());
        }
        for value in [
            self.zero_plane.dcmos_emitter_dist,
            self.zero_plane.dcmos_rcmos_dist,
            self.zero_plane.reference_distance,
            self.zero_plane.reference_pixel_size,
        ] {
            buffer.extend_from_slice(&value.to_le_bytes());
        }
        buffer.extend_from_slice(&self.const_shift.to_le_bytes());

        buffer
    }

    /// Parse the `device.json` written next to a recording.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let file: DeviceFile = serde_json::from_str(json)?;
        Ok(file.into())
    }

    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(&DeviceFile::from(*self))?)
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            reg_info: RegInfo::factory(),
            pad_info: RegPadInfo::default(),
            zero_plane: ZeroPlaneInfo::factory(),
            const_shift: 200,
        }
    }
}

impl TryFrom<&[u8]> for Calibration {
    type Error = Error;

    fn try_from(buffer: &[u8]) -> Result<Self, Self::Error> {
        if buffer.len() < Self::BLOB_SIZE {
            return Err(Error::CalibrationBlob {
                expected: Self::BLOB_SIZE,
                actual: buffer.len(),
            });
        }

        let mut offset = 0;
        let mut next = move |size: usize| {
            let field = &buffer[offset..offset + size];
            offset += size;
            field
        };

        let mut reg = [0i32; RegInfo::FIELD_COUNT];
        for value in reg.iter_mut() {
            *value = i32::from_buffer(next(i32::SIZE));
        }

        let pad_info = RegPadInfo {
            start_lines: u16::from_buffer(next(u16::SIZE)),
            end_lines: u16::from_buffer(next(u16::SIZE)),
            cropping_lines: u16::from_buffer(next(u16::SIZE)),
        };

        let zero_plane = ZeroPlaneInfo {
            dcmos_emitter_dist: f32::from_buffer(next(f32::SIZE)),
            dcmos_rcmos_dist: f32::from_buffer(next(f32::SIZE)),
            reference_distance: f32::from_buffer(next(f32::SIZE)),
            reference_pixel_size: f32::from_buffer(next(f32::SIZE)),
        };

        let const_shift = i32::from_buffer(next(i32::SIZE));

        Ok(Self {
            reg_info: RegInfo::from_array(reg),
            pad_info,
            zero_plane,
            const_shift,
        })
    }
}

// Layout of device.json: pad and zero plane info live inside reg_info.
#[derive(Serialize, Deserialize)]
struct DeviceFile {
    reg_info: RegInfoFile,
    #[serde(default)]
    const_shift: i32,
}

#[derive(Serialize, Deserialize)]
struct RegInfoFile {
    #[serde(flatten)]
    reg: RegInfo,
    #[serde(default)]
    pad_info: RegPadInfo,
    #[serde(default)]
    zero_plane_info: ZeroPlaneInfo,
}

impl From<DeviceFile> for Calibration {
    fn from(file: DeviceFile) -> Self {
        Self {
            reg_info: file.reg_info.reg,
            pad_info: file.reg_info.pad_info,
            zero_plane: file.reg_info.zero_plane_info,
            const_shift: file.const_shift,
        }
    }
}

impl From<Calibration> for DeviceFile {
    fn from(calibration: Calibration) -> Self {
        Self {
            reg_info: RegInfoFile {
                reg: calibration.reg_info,
                pad_info: calibration.pad_info,
                zero_plane_info: calibration.zero_plane,
            },
            const_shift: calibration.const_shift,
        }
    }
}
