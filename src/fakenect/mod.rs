//! Recordings of raw camera frames.
//!
//! A recording is a directory holding one PGM (depth) or PPM (video) file
//! per frame, an `INDEX.txt` listing the files in arrival order and an
//! optional `device.json` with the calibration of the recorded device.
//! File names encode the stream, the host time and the device timestamp:
//! `d-1294183257.012345-1234567.pgm`.

mod playback;
mod record;

use std::path::Path;

pub use playback::{Playback, PlaybackEvent};
pub use record::Recorder;

use crate::Error;

pub const INDEX_FILE: &str = "INDEX.txt";
pub const DEVICE_FILE: &str = "device.json";

/// Stream an index entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Depth,
    Video,
    Accelerometer,
}

impl EntryKind {
    pub fn from_char(kind: char) -> Option<Self> {
        match kind {
            'd' => Some(Self::Depth),
            'r' => Some(Self::Video),
            'a' => Some(Self::Accelerometer),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::Depth => 'd',
            Self::Video => 'r',
            Self::Accelerometer => 'a',
        }
    }
}

/// One line of `INDEX.txt`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub kind: EntryKind,
    /// Host time of the recording in seconds
    pub time: f64,
    pub timestamp: u32,
    pub file_name: String,
}

impl IndexEntry {
    pub fn new(kind: EntryKind, time: f64, timestamp: u32, extension: &str) -> Self {
        Self {
            kind,
            time,
            timestamp,
            file_name: format!("{}-{time:.6}-{timestamp}.{extension}", kind.as_char()),
        }
    }

    pub fn parse(line: &str) -> Result<Self, Error> {
        let invalid = || Error::InvalidIndexLine(line.to_owned());

        let kind = line
            .chars()
            .next()
            .and_then(EntryKind::from_char)
            .ok_or_else(invalid)?;

        let rest = line
            .get(1..)
            .and_then(|rest| rest.strip_prefix('-'))
            .ok_or_else(invalid)?;
        let (time, rest) = rest.split_once('-').ok_or_else(invalid)?;
        let time = time.parse::<f64>().map_err(|_| invalid())?;

        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let timestamp = rest[..digits].parse::<u32>().map_err(|_| invalid())?;

        Ok(Self {
            kind,
            time,
            timestamp,
            file_name: line.to_owned(),
        })
    }
}

/// Split a PGM/PPM file into its header line and pixel data.
pub(crate) fn split_image<'a>(bytes: &'a [u8], path: &Path) -> Result<(&'a [u8], &'a [u8]), Error> {
    let invalid = || Error::InvalidImageHeader(path.to_owned());

    let end = bytes
        .iter()
        .position(|&byte| byte == b'\n')
        .ok_or_else(invalid)?;
    let header = &bytes[..end];

    if !(header.starts_with(b"P5") || header.starts_with(b"P6")) {
        return Err(invalid());
    }

    Ok((header, &bytes[end + 1..]))
}
