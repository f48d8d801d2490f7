use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use log::info;

use crate::{
    data::Calibration,
    frame::{DecodedFrame, FrameBuffer},
    settings::{DepthFormat, FrameFormat, VideoFormat},
    Error, FRAME_HEIGHT, FRAME_PIXELS, FRAME_WIDTH,
};

use super::{EntryKind, IndexEntry, DEVICE_FILE, INDEX_FILE};

/// Writes frames into a recording directory.
pub struct Recorder {
    dir: PathBuf,
    index: BufWriter<File>,
    frames: u64,
}

impl Recorder {
    /// Create the directory if needed. An existing index is never overwritten.
    pub fn create(dir: impl AsRef<Path>) -> Result<Self, Error> {
        let dir = dir.as_ref().to_owned();
        fs::create_dir_all(&dir)?;

        let index_path = dir.join(INDEX_FILE);
        if index_path.exists() {
            return Err(Error::IndexExists(index_path));
        }

        let index = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&index_path)?;

        info!("Recording to {}", dir.display());

        Ok(Self {
            dir,
            index: BufWriter::new(index),
            frames: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Frames written so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Store the device calibration so playback can register depth.
    pub fn write_calibration(&self, calibration: &Calibration) -> Result<(), Error> {
        fs::write(self.dir.join(DEVICE_FILE), calibration.to_json()?)?;
        Ok(())
    }

    /// Record 11 bit depth samples, one per pixel.
    pub fn record_depth(&mut self, timestamp: u32, samples: &[u16]) -> Result<IndexEntry, Error> {
        self.record_depth_at(unix_time(), timestamp, samples)
    }

    pub fn record_depth_at(
        &mut self,
        time: f64,
        timestamp: u32,
        samples: &[u16],
    ) -> Result<IndexEntry, Error> {
        check_len("recorded depth", FRAME_PIXELS, samples.len())?;

        let data: Vec<u8> = samples
            .iter()
            .flat_map(|sample| sample.to_le_bytes())
            .collect();
        let header = format!("P5 {FRAME_WIDTH} {FRAME_HEIGHT} 65535\n");

        self.write_entry(IndexEntry::new(EntryKind::Depth, time, timestamp, "pgm"), &header, &data)
    }

    /// Record RGB triplets.
    pub fn record_video(&mut self, timestamp: u32, rgb: &[u8]) -> Result<IndexEntry, Error> {
        self.record_video_at(unix_time(), timestamp, rgb)
    }

    pub fn record_video_at(
        &mut self,
        time: f64,
        timestamp: u32,
        rgb: &[u8],
    ) -> Result<IndexEntry, Error> {
        check_len("recorded video", FRAME_PIXELS * 3, rgb.len())?;

        let header = format!("P6 {FRAME_WIDTH} {FRAME_HEIGHT} 255\n");

        self.write_entry(IndexEntry::new(EntryKind::Video, time, timestamp, "ppm"), &header, rgb)
    }

    /// Record a decoded frame. Only 11 bit depth and RGB frames can be stored.
    pub fn record_frame(&mut self, frame: &DecodedFrame) -> Result<IndexEntry, Error> {
        match (frame.format(), &frame.buffer) {
            (FrameFormat::Depth(DepthFormat::Depth11Bit), FrameBuffer::U16(samples)) => {
                self.record_depth(frame.timestamp, samples)
            }
            (FrameFormat::Video(VideoFormat::Rgb), FrameBuffer::U8(rgb)) => {
                self.record_video(frame.timestamp, rgb)
            }
            _ => Err(Error::UnsupportedMode {
                resolution: frame.mode.resolution,
                format: frame.mode.format,
            }),
        }
    }

    fn write_entry(
        &mut self,
        entry: IndexEntry,
        header: &str,
        data: &[u8],
    ) -> Result<IndexEntry, Error> {
        let mut file = BufWriter::new(File::create(self.dir.join(&entry.file_name))?);
        file.write_all(header.as_bytes())?;
        file.write_all(data)?;
        file.flush()?;

        writeln!(self.index, "{}", entry.file_name)?;
        self.index.flush()?;
        self.frames += 1;

        Ok(entry)
    }
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<(), Error> {
    if actual != expected {
        return Err(Error::BufferSize {
            what,
            expected,
            actual,
        });
    }

    Ok(())
}

fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|time| time.as_secs_f64())
        .unwrap_or_default()
}
