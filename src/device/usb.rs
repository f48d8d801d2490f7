use std::fmt;

use nusb::list_devices;

use crate::Error;

pub const VENDOR_ID: u16 = 0x045E;
pub const PRODUCT_ID_CAMERA: u16 = 0x02AE;
/// Camera of the Kinect for Windows and later Xbox 360 models
pub const PRODUCT_ID_CAMERA_K4W: u16 = 0x02BF;
pub const PRODUCT_ID_MOTOR: u16 = 0x02B0;
pub const PRODUCT_ID_AUDIO: u16 = 0x02AD;

/// Sub-device of a Kinect, each one shows up as its own USB device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KinectKind {
    Camera,
    Motor,
    Audio,
}

impl KinectKind {
    pub fn from_product_id(product_id: u16) -> Option<Self> {
        match product_id {
            PRODUCT_ID_CAMERA | PRODUCT_ID_CAMERA_K4W => Some(Self::Camera),
            PRODUCT_ID_MOTOR => Some(Self::Motor),
            PRODUCT_ID_AUDIO => Some(Self::Audio),
            _ => None,
        }
    }
}

impl fmt::Display for KinectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Camera => f.write_str("camera"),
            Self::Motor => f.write_str("motor"),
            Self::Audio => f.write_str("audio"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KinectInfo {
    pub kind: KinectKind,
    pub bus: u8,
    pub address: u8,
    pub product_id: u16,
    pub serial_number: Option<String>,
}

impl fmt::Display for KinectInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:03}:{:03} {} ({:04x}:{:04x})",
            self.bus, self.address, self.kind, VENDOR_ID, self.product_id
        )?;

        if let Some(serial_number) = &self.serial_number {
            write!(f, " serial {serial_number}")?;
        }

        Ok(())
    }
}

/// List the Kinect sub-devices attached to the system.
pub fn enumerate_devices() -> Result<Vec<KinectInfo>, Error> {
    let devices = list_devices().map_err(Error::Usb)?;

    Ok(devices
        .filter(|device_info| device_info.vendor_id() == VENDOR_ID)
        .filter_map(|device_info| {
            KinectKind::from_product_id(device_info.product_id()).map(|kind| KinectInfo {
                kind,
                bus: device_info.bus_number(),
                address: device_info.device_address(),
                product_id: device_info.product_id(),
                serial_number: device_info.serial_number().map(str::to_owned),
            })
        })
        .collect())
}
