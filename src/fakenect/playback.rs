use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use crate::{
    data::Calibration,
    dispatcher::{FrameDispatcher, FrameSlot},
    frame::{DecodedFrame, FrameBuffer},
    processor::{
        color::rgb_to_uyvy, output_u8, registration::RegistrationTable, unpack::pack_from_16bit,
        DepthProcessor, PassthroughProcessor, ProcessorTrait,
    },
    settings::{find_depth_mode, find_video_mode, DepthFormat, FrameMode, Resolution, VideoFormat},
    Config, Error, FRAME_HEIGHT, FRAME_WIDTH,
};

use super::{split_image, EntryKind, IndexEntry, DEVICE_FILE, INDEX_FILE};

/// What one call to [`Playback::process_next`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    Depth { timestamp: u32 },
    Video { timestamp: u32 },
    /// Line of a stream that is not running, or accelerometer data
    Skipped,
    /// End of the index reached, the next call starts over
    Rewound,
}

// Recorded RGB to UYVY for the raw YUV format
struct UyvyProcessor;

impl ProcessorTrait<[u8], FrameBuffer> for UyvyProcessor {
    fn process(&mut self, input: &[u8], output: &mut FrameBuffer) -> Result<(), Error> {
        let uyvy = rgb_to_uyvy(input, FRAME_WIDTH, FRAME_HEIGHT)?;
        let output = output_u8(output, "uyvy output")?;

        let count = uyvy.len().min(output.len());
        output[..count].copy_from_slice(&uyvy[..count]);

        Ok(())
    }
}

/// Replays a recording directory through the regular frame dispatch.
///
/// Depth files hold unpacked 11 bit samples and video files hold RGB,
/// other formats are derived from those.
pub struct Playback {
    dir: PathBuf,
    entries: Vec<String>,
    position: usize,
    loop_playback: bool,
    calibration: Option<Calibration>,
    depth: Option<FrameDispatcher>,
    video: Option<FrameDispatcher>,
    depth_slot: Arc<FrameSlot>,
    video_slot: Arc<FrameSlot>,
    // Host time of the previous line in the recording
    record_prev: Option<f64>,
    playback_prev: Option<Instant>,
}

impl Playback {
    /// Open a recording. Streams left as `None` skip their lines.
    pub fn open(
        dir: impl AsRef<Path>,
        depth_format: Option<DepthFormat>,
        video_format: Option<VideoFormat>,
        config: &Config,
    ) -> Result<Self, Error> {
        let dir = dir.as_ref().to_owned();

        let entries: Vec<String> = fs::read_to_string(dir.join(INDEX_FILE))?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();

        let device_path = dir.join(DEVICE_FILE);
        let calibration = if device_path.exists() {
            Some(Calibration::from_json(&fs::read_to_string(&device_path)?)?)
        } else {
            warn!(
                "{} has no {DEVICE_FILE}, millimeter depth is unavailable",
                dir.display()
            );
            None
        };

        let mut playback = Self {
            dir,
            entries,
            position: 0,
            loop_playback: config.loop_playback,
            calibration,
            depth: None,
            video: None,
            depth_slot: Arc::new(FrameSlot::new()),
            video_slot: Arc::new(FrameSlot::new()),
            record_prev: None,
            playback_prev: None,
        };

        if let Some(format) = depth_format {
            playback.depth = Some(playback.depth_dispatcher(format, config)?);
        }
        if let Some(format) = video_format {
            playback.video = Some(playback.video_dispatcher(format, config)?);
        }

        info!(
            "Playing {} ({} index entries)",
            playback.dir.display(),
            playback.entries.len()
        );

        Ok(playback)
    }

    fn depth_dispatcher(&self, format: DepthFormat, config: &Config) -> Result<FrameDispatcher, Error> {
        let mode = find_depth_mode(Resolution::Medium, format)?;

        let registration = match format {
            DepthFormat::Depth11Bit | DepthFormat::Depth11BitPacked => None,
            DepthFormat::Registered | DepthFormat::Mm => {
                let calibration = self
                    .calibration
                    .filter(Calibration::has_zero_plane)
                    .ok_or(Error::RegistrationUnavailable)?;
                Some(Arc::new(RegistrationTable::new(&calibration)))
            }
            // Recordings only hold 11 bit depth
            DepthFormat::Depth10Bit | DepthFormat::Depth10BitPacked => {
                return Err(unsupported(&mode));
            }
        };

        let processor = DepthProcessor::new(&mode, registration, config.dense_registration)?;

        Ok(
            FrameDispatcher::new(mode, Box::new(processor), Arc::clone(&self.depth_slot))
                .with_incomplete_frames(config.deliver_incomplete_frames),
        )
    }

    fn video_dispatcher(&self, format: VideoFormat, config: &Config) -> Result<FrameDispatcher, Error> {
        let mode = find_video_mode(Resolution::Medium, format)?;

        let dispatcher = match format {
            VideoFormat::Rgb | VideoFormat::YuvRgb => {
                FrameDispatcher::new(mode, Box::new(PassthroughProcessor), Arc::clone(&self.video_slot))
            }
            VideoFormat::YuvRaw => {
                FrameDispatcher::new(mode, Box::new(UyvyProcessor), Arc::clone(&self.video_slot))
            }
            _ => return Err(unsupported(&mode)),
        };

        Ok(dispatcher
            .with_input_len(FRAME_WIDTH * FRAME_HEIGHT * 3)
            .with_incomplete_frames(config.deliver_incomplete_frames))
    }

    pub fn calibration(&self) -> Option<&Calibration> {
        self.calibration.as_ref()
    }

    pub fn depth_slot(&self) -> Arc<FrameSlot> {
        Arc::clone(&self.depth_slot)
    }

    pub fn video_slot(&self) -> Arc<FrameSlot> {
        Arc::clone(&self.video_slot)
    }

    pub fn set_depth_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&DecodedFrame) + Send + 'static,
    {
        if let Some(dispatcher) = self.depth.as_mut() {
            dispatcher.set_callback(Some(Box::new(callback)));
        }
    }

    pub fn set_video_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&DecodedFrame) + Send + 'static,
    {
        if let Some(dispatcher) = self.video.as_mut() {
            dispatcher.set_callback(Some(Box::new(callback)));
        }
    }

    /// Index entries in the recording.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// How long to wait before the next line so playback keeps the
    /// recorded pace. Time spent since the previous line is deducted.
    pub fn next_delay(&self) -> Result<Duration, Error> {
        let (Some(record_prev), Some(playback_prev)) = (self.record_prev, self.playback_prev)
        else {
            return Ok(Duration::ZERO);
        };
        let Some(line) = self.entries.get(self.position) else {
            return Ok(Duration::ZERO);
        };

        let entry = IndexEntry::parse(line)?;
        let delay = (entry.time - record_prev) - playback_prev.elapsed().as_secs_f64();

        Ok(Duration::try_from_secs_f64(delay).unwrap_or(Duration::ZERO))
    }

    /// Wait for [`Self::next_delay`], then process the next line.
    pub async fn play_next(&mut self) -> Result<Option<PlaybackEvent>, Error> {
        let delay = self.next_delay()?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.process_next()
    }

    /// Handle one index line without waiting.
    /// Returns `None` at the end of the index when not looping.
    pub fn process_next(&mut self) -> Result<Option<PlaybackEvent>, Error> {
        let Some(line) = self.entries.get(self.position) else {
            if !self.loop_playback {
                return Ok(None);
            }

            debug!("End of {}, rewinding", self.dir.display());
            self.position = 0;
            self.record_prev = None;
            self.playback_prev = None;
            return Ok(Some(PlaybackEvent::Rewound));
        };

        let entry = IndexEntry::parse(line)?;
        self.position += 1;
        self.record_prev = Some(entry.time);

        let event = match entry.kind {
            EntryKind::Depth => match self.depth.as_mut() {
                Some(dispatcher) => {
                    let samples = read_depth(&self.dir.join(&entry.file_name))?;
                    let raw = pack_from_16bit(&samples, 11)?;
                    dispatcher.dispatch(&raw, entry.timestamp)?;
                    PlaybackEvent::Depth {
                        timestamp: entry.timestamp,
                    }
                }
                None => PlaybackEvent::Skipped,
            },
            EntryKind::Video => match self.video.as_mut() {
                Some(dispatcher) => {
                    let path = self.dir.join(&entry.file_name);
                    let bytes = fs::read(&path)?;
                    let (_, rgb) = split_image(&bytes, &path)?;
                    dispatcher.dispatch(rgb, entry.timestamp)?;
                    PlaybackEvent::Video {
                        timestamp: entry.timestamp,
                    }
                }
                None => PlaybackEvent::Skipped,
            },
            EntryKind::Accelerometer => PlaybackEvent::Skipped,
        };

        self.playback_prev = Some(Instant::now());

        Ok(Some(event))
    }
}

fn unsupported(mode: &FrameMode) -> Error {
    Error::UnsupportedMode {
        resolution: mode.resolution,
        format: mode.format,
    }
}

// Little-endian samples after the PGM header
fn read_depth(path: &Path) -> Result<Vec<u16>, Error> {
    let bytes = fs::read(path)?;
    let (_, data) = split_image(&bytes, path)?;

    Ok(data
        .chunks_exact(2)
        .map(|sample| u16::from_le_bytes([sample[0], sample[1]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fakenect::Recorder, FRAME_PIXELS};

    #[test]
    fn accelerometer_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(INDEX_FILE), "a-1.000000-5-acc.dump\n").unwrap();

        let config = Config {
            loop_playback: false,
            ..Config::default()
        };
        let mut playback = Playback::open(dir.path(), None, None, &config).unwrap();

        assert_eq!(playback.process_next().unwrap(), Some(PlaybackEvent::Skipped));
        assert_eq!(playback.process_next().unwrap(), None);
    }

    #[test]
    fn delay_follows_recorded_times() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::create(dir.path()).unwrap();
        recorder
            .record_depth_at(100.0, 1, &vec![0; FRAME_PIXELS])
            .unwrap();
        recorder
            .record_depth_at(160.0, 2, &vec![0; FRAME_PIXELS])
            .unwrap();

        let mut playback =
            Playback::open(dir.path(), None, None, &Config::default()).unwrap();

        assert_eq!(playback.next_delay().unwrap(), Duration::ZERO);
        playback.process_next().unwrap();

        let delay = playback.next_delay().unwrap();
        assert!(delay > Duration::from_secs(59) && delay <= Duration::from_secs(60));

        playback.process_next().unwrap();
        assert_eq!(playback.process_next().unwrap(), Some(PlaybackEvent::Rewound));
        assert_eq!(playback.next_delay().unwrap(), Duration::ZERO);
    }

    #[test]
    fn formats_outside_recordings_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(INDEX_FILE), "").unwrap();

        assert!(matches!(
            Playback::open(dir.path(), Some(DepthFormat::Depth10Bit), None, &Config::default()),
            Err(Error::UnsupportedMode { .. })
        ));
        assert!(matches!(
            Playback::open(dir.path(), None, Some(VideoFormat::Bayer), &Config::default()),
            Err(Error::UnsupportedMode { .. })
        ));
        assert!(matches!(
            Playback::open(dir.path(), Some(DepthFormat::Mm), None, &Config::default()),
            Err(Error::RegistrationUnavailable)
        ));
    }
}
