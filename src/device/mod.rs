pub mod usb;

use std::sync::Arc;

use log::{debug, info};

use crate::{
    data::Calibration,
    dispatcher::{DispatchStats, FrameCallback, FrameDispatcher, FrameSlot},
    frame::DecodedFrame,
    packet::{compact_iso_transfer, IsoPacket},
    packet::parser::{PacketStream, StreamKind, StreamStats},
    processor::{registration::RegistrationTable, DepthProcessor, FrameProcessor, VideoProcessor},
    settings::{find_depth_mode, find_video_mode, DepthFormat, FrameMode, Resolution, VideoFormat},
    Config, Error,
};

pub use usb::{enumerate_devices, KinectInfo, KinectKind};

// Buffers of a running stream, dropped as a whole on stop
struct RunningStream {
    kind: StreamKind,
    packets: PacketStream,
    dispatcher: FrameDispatcher,
}

impl RunningStream {
    fn feed(&mut self, chunk: &[u8]) -> Result<usize, Error> {
        let Self {
            kind,
            packets,
            dispatcher,
        } = self;
        let kind = *kind;

        let mut delivered = 0;
        let mut result = Ok(());

        packets.feed(chunk, |frame| {
            if frame.lost_packets > 0 {
                debug!(
                    "{} frame {} completed with {} lost packets",
                    kind,
                    frame.timestamp,
                    frame.lost_packets
                );
            }

            match dispatcher.dispatch(frame.data, frame.timestamp) {
                Ok(true) => delivered += 1,
                Ok(false) => {}
                Err(error) => {
                    if result.is_ok() {
                        result = Err(error);
                    }
                }
            }
        });

        result.map(|()| delivered)
    }
}

struct StreamHandle {
    kind: StreamKind,
    slot: Arc<FrameSlot>,
    // Kept here while the stream is stopped
    callback: Option<FrameCallback>,
    running: Option<RunningStream>,
}

impl StreamHandle {
    fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            slot: Arc::new(FrameSlot::new()),
            callback: None,
            running: None,
        }
    }

    fn start(
        &mut self,
        mode: FrameMode,
        processor: FrameProcessor,
        config: &Config,
    ) -> Result<(), Error> {
        if self.running.is_some() {
            return Err(Error::StreamRunning("starting a stream"));
        }

        self.slot.reopen();

        let mut dispatcher = FrameDispatcher::new(mode, processor, Arc::clone(&self.slot))
            .with_incomplete_frames(config.deliver_incomplete_frames);
        dispatcher.set_callback(self.callback.take());

        self.running = Some(RunningStream {
            kind: self.kind,
            packets: PacketStream::new(self.kind, mode.raw_bytes),
            dispatcher,
        });

        info!(
            "Started {} stream: {} {}x{}",
            self.kind, mode.format, mode.width, mode.height
        );

        Ok(())
    }

    fn stop(&mut self) -> Result<(), Error> {
        let mut running = self
            .running
            .take()
            .ok_or(Error::StreamNotRunning("stopping a stream"))?;

        self.callback = running.dispatcher.take_callback();
        self.slot.close();

        let stats = running.packets.stats();
        info!(
            "Stopped {} stream after {} frames ({} packets lost)",
            self.kind, stats.frames, stats.lost_packets
        );

        Ok(())
    }

    fn set_callback(&mut self, callback: Option<FrameCallback>) {
        match self.running.as_mut() {
            Some(running) => running.dispatcher.set_callback(callback),
            None => self.callback = callback,
        }
    }

    fn running(&mut self) -> Result<&mut RunningStream, Error> {
        self.running
            .as_mut()
            .ok_or(Error::StreamNotRunning("feeding a stream"))
    }

    fn feed_chunk(&mut self, chunk: &[u8]) -> Result<usize, Error> {
        self.running()?.feed(chunk)
    }

    fn feed_transfer(&mut self, buffer: &mut [u8], packets: &[IsoPacket]) -> Result<usize, Error> {
        let packet_size = self.kind.packet_size();
        let running = self.running()?;

        let count = compact_iso_transfer(buffer, packet_size, packets);
        running.feed(&buffer[..count])
    }

    fn mode(&self) -> Option<FrameMode> {
        self.running
            .as_ref()
            .map(|running| *running.dispatcher.mode())
    }

    fn stats(&self) -> Option<(StreamStats, DispatchStats)> {
        self.running
            .as_ref()
            .map(|running| (running.packets.stats(), running.dispatcher.stats()))
    }
}

/// All per-device state of one Kinect camera.
///
/// The transport feeds received data through `feed_*`; completed frames
/// are decoded on the calling thread, published to the stream's
/// [`FrameSlot`] and handed to the stream callback.
pub struct DeviceContext {
    config: Config,
    calibration: Calibration,
    registration: Option<Arc<RegistrationTable>>,
    depth: StreamHandle,
    video: StreamHandle,
}

impl DeviceContext {
    pub fn new(config: Config, calibration: Calibration) -> Self {
        Self {
            config,
            calibration,
            registration: None,
            depth: StreamHandle::new(StreamKind::Depth),
            video: StreamHandle::new(StreamKind::Video),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Replace the calibration, only while the depth stream is stopped.
    pub fn set_calibration(&mut self, calibration: Calibration) -> Result<(), Error> {
        if self.depth.running.is_some() {
            return Err(Error::StreamRunning("changing the calibration"));
        }

        self.calibration = calibration;
        self.registration = None;

        Ok(())
    }

    /// Registration tables of this device, built on first use.
    pub fn registration(&mut self) -> Result<Arc<RegistrationTable>, Error> {
        if let Some(table) = &self.registration {
            return Ok(Arc::clone(table));
        }

        if !self.calibration.has_zero_plane() {
            return Err(Error::RegistrationUnavailable);
        }

        let table = Arc::new(RegistrationTable::new(&self.calibration));
        self.registration = Some(Arc::clone(&table));

        Ok(table)
    }

    pub fn start_depth_stream(
        &mut self,
        format: DepthFormat,
        resolution: Resolution,
    ) -> Result<(), Error> {
        if self.depth.running.is_some() {
            return Err(Error::StreamRunning("starting the depth stream"));
        }

        let mode = find_depth_mode(resolution, format)?;
        let registration = if format.needs_registration() {
            Some(self.registration()?)
        } else {
            None
        };

        let processor =
            DepthProcessor::new(&mode, registration, self.config.dense_registration)?;
        self.depth.start(mode, Box::new(processor), &self.config)
    }

    pub fn start_video_stream(
        &mut self,
        format: VideoFormat,
        resolution: Resolution,
    ) -> Result<(), Error> {
        if self.video.running.is_some() {
            return Err(Error::StreamRunning("starting the video stream"));
        }

        let mode = find_video_mode(resolution, format)?;
        let processor = VideoProcessor::new(&mode)?;
        self.video.start(mode, Box::new(processor), &self.config)
    }

    pub fn stop_depth_stream(&mut self) -> Result<(), Error> {
        self.depth.stop()
    }

    pub fn stop_video_stream(&mut self) -> Result<(), Error> {
        self.video.stop()
    }

    pub fn is_depth_running(&self) -> bool {
        self.depth.running.is_some()
    }

    pub fn is_video_running(&self) -> bool {
        self.video.running.is_some()
    }

    pub fn set_depth_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&DecodedFrame) + Send + 'static,
    {
        self.depth.set_callback(Some(Box::new(callback)));
    }

    pub fn set_video_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&DecodedFrame) + Send + 'static,
    {
        self.video.set_callback(Some(Box::new(callback)));
    }

    pub fn clear_depth_callback(&mut self) {
        self.depth.set_callback(None);
    }

    pub fn clear_video_callback(&mut self) {
        self.video.set_callback(None);
    }

    /// Feed received depth data. Returns the number of frames delivered.
    pub fn feed_depth_chunk(&mut self, chunk: &[u8]) -> Result<usize, Error> {
        self.depth.feed_chunk(chunk)
    }

    /// Feed received video data. Returns the number of frames delivered.
    pub fn feed_video_chunk(&mut self, chunk: &[u8]) -> Result<usize, Error> {
        self.video.feed_chunk(chunk)
    }

    /// Feed a whole isochronous depth transfer, see [`compact_iso_transfer`].
    pub fn feed_depth_transfer(
        &mut self,
        buffer: &mut [u8],
        packets: &[IsoPacket],
    ) -> Result<usize, Error> {
        self.depth.feed_transfer(buffer, packets)
    }

    /// Feed a whole isochronous video transfer, see [`compact_iso_transfer`].
    pub fn feed_video_transfer(
        &mut self,
        buffer: &mut [u8],
        packets: &[IsoPacket],
    ) -> Result<usize, Error> {
        self.video.feed_transfer(buffer, packets)
    }

    /// Shared handle on the latest depth frame, valid across restarts.
    pub fn depth_slot(&self) -> Arc<FrameSlot> {
        Arc::clone(&self.depth.slot)
    }

    /// Shared handle on the latest video frame, valid across restarts.
    pub fn video_slot(&self) -> Arc<FrameSlot> {
        Arc::clone(&self.video.slot)
    }

    pub fn depth_mode(&self) -> Option<FrameMode> {
        self.depth.mode()
    }

    pub fn video_mode(&self) -> Option<FrameMode> {
        self.video.mode()
    }

    pub fn depth_stats(&self) -> Option<(StreamStats, DispatchStats)> {
        self.depth.stats()
    }

    pub fn video_stats(&self) -> Option<(StreamStats, DispatchStats)> {
        self.video.stats()
    }
}
