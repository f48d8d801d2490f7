//! Hand-off of decoded frames from the transport thread to consumers.
//!
//! The producer decodes into a back buffer it owns, then swaps it into the
//! [`FrameSlot`] as the new front frame. Consumers either poll the slot,
//! block on it, await it, or get called back synchronously after the swap.

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use log::{debug, warn};
use tokio::sync::Notify;

use crate::{
    frame::DecodedFrame,
    processor::FrameProcessor,
    settings::FrameMode,
    Error,
};

/// Consumer hook, called from the thread feeding the stream.
/// The frame is only borrowed, clone it to keep it.
pub type FrameCallback = Box<dyn FnMut(&DecodedFrame) + Send>;

#[derive(Default)]
struct SlotState {
    front: Option<Arc<DecodedFrame>>,
    // Incremented on every publish
    generation: u64,
    closed: bool,
}

/// Latest frame of one stream, shared between producer and consumers.
#[derive(Default)]
pub struct FrameSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
    notify: Notify,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Swap in a new front frame, returning the previous one.
    pub fn publish(&self, frame: Arc<DecodedFrame>) -> Option<Arc<DecodedFrame>> {
        let previous = {
            let mut state = self.lock();
            state.generation += 1;
            state.front.replace(frame)
        };

        self.ready.notify_all();
        self.notify.notify_waiters();

        previous
    }

    /// Most recent frame, if any was published since the slot was opened.
    pub fn latest(&self) -> Option<Arc<DecodedFrame>> {
        self.lock().front.clone()
    }

    /// Number of frames published so far.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Block until a frame newer than generation `after` is published.
    /// Returns `None` on timeout or when the slot gets closed.
    pub fn wait_next(&self, after: u64, timeout: Duration) -> Option<Arc<DecodedFrame>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();

        loop {
            if state.closed {
                return None;
            }
            // A reopened slot has no front until the next publish
            if state.generation > after && state.front.is_some() {
                return state.front.clone();
            }

            let remaining = deadline.checked_duration_since(Instant::now())?;
            state = self
                .ready
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Wait for a frame newer than generation `after`.
    /// Resolves to `None` once the slot is closed.
    pub async fn next(&self, after: u64) -> Option<Arc<DecodedFrame>> {
        loop {
            let notified = self.notify.notified();
            let mut notified = std::pin::pin!(notified);
            notified.as_mut().enable();

            {
                let state = self.lock();
                if state.closed {
                    return None;
                }
                if state.generation > after && state.front.is_some() {
                    return state.front.clone();
                }
            }

            notified.await;
        }
    }

    /// Drop the front frame and wake every waiter.
    /// Frames already handed out stay valid.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.front = None;
        }

        self.ready.notify_all();
        self.notify.notify_waiters();
    }

    pub fn reopen(&self) {
        self.lock().closed = false;
    }
}

/// Frame counters of a dispatcher.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    /// Short frames that were zero padded and delivered
    pub incomplete: u64,
    /// Short frames that were dropped
    pub dropped: u64,
    /// Frames the processor failed on
    pub failed: u64,
}

/// Decodes completed raw frames and publishes them.
pub struct FrameDispatcher {
    mode: FrameMode,
    input_len: usize,
    processor: FrameProcessor,
    slot: Arc<FrameSlot>,
    callback: Option<FrameCallback>,
    deliver_incomplete: bool,
    // Decode target, recycled from the previous front when nobody holds it
    back: Option<DecodedFrame>,
    padded: Vec<u8>,
    stats: DispatchStats,
}

impl FrameDispatcher {
    /// Dispatcher for raw frames of `mode.raw_bytes` bytes.
    pub fn new(mode: FrameMode, processor: FrameProcessor, slot: Arc<FrameSlot>) -> Self {
        Self {
            mode,
            input_len: mode.raw_bytes,
            processor,
            slot,
            callback: None,
            deliver_incomplete: true,
            back: None,
            padded: Vec::new(),
            stats: DispatchStats::default(),
        }
    }

    /// Override the expected input size, for inputs that are not wire data.
    pub fn with_input_len(mut self, input_len: usize) -> Self {
        self.input_len = input_len;
        self
    }

    pub fn with_incomplete_frames(mut self, deliver: bool) -> Self {
        self.deliver_incomplete = deliver;
        self
    }

    pub fn mode(&self) -> &FrameMode {
        &self.mode
    }

    pub fn slot(&self) -> &Arc<FrameSlot> {
        &self.slot
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn set_callback(&mut self, callback: Option<FrameCallback>) {
        self.callback = callback;
    }

    pub fn take_callback(&mut self) -> Option<FrameCallback> {
        self.callback.take()
    }

    /// Decode one raw frame, publish it and run the callback.
    /// Returns `false` when a short frame was dropped.
    pub fn dispatch(&mut self, data: &[u8], timestamp: u32) -> Result<bool, Error> {
        let input = if data.len() >= self.input_len {
            &data[..self.input_len]
        } else if self.deliver_incomplete {
            warn!(
                "Incomplete {} frame: {} of {} bytes, padding with zeros",
                self.mode.format,
                data.len(),
                self.input_len
            );
            self.stats.incomplete += 1;

            self.padded.clear();
            self.padded.extend_from_slice(data);
            self.padded.resize(self.input_len, 0);
            &self.padded[..]
        } else {
            debug!(
                "Dropping incomplete {} frame: {} of {} bytes",
                self.mode.format,
                data.len(),
                self.input_len
            );
            self.stats.dropped += 1;
            return Ok(false);
        };

        let mut frame = self
            .back
            .take()
            .unwrap_or_else(|| DecodedFrame::new(self.mode));

        if let Err(error) = self.processor.process(input, &mut frame.buffer) {
            self.stats.failed += 1;
            self.back = Some(frame);
            return Err(error);
        }

        frame.timestamp = timestamp;
        frame.sequence = self.stats.delivered;

        let frame = Arc::new(frame);
        let previous = self.slot.publish(Arc::clone(&frame));
        self.stats.delivered += 1;

        if let Some(callback) = self.callback.as_mut() {
            callback(frame.as_ref());
        }

        self.back = previous.and_then(|previous| Arc::try_unwrap(previous).ok());

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::{AtomicU32, Ordering}, thread};

    use super::*;
    use crate::{
        processor::PassthroughProcessor,
        settings::{find_video_mode, Resolution, VideoFormat},
    };

    fn dispatcher() -> FrameDispatcher {
        let mode = find_video_mode(Resolution::Medium, VideoFormat::Bayer).unwrap();
        FrameDispatcher::new(mode, Box::new(PassthroughProcessor), Arc::new(FrameSlot::new()))
    }

    #[test]
    fn publishes_then_calls_back() {
        let mut dispatcher = dispatcher();
        let slot = Arc::clone(dispatcher.slot());
        let seen = Arc::new(AtomicU32::new(0));

        let callback_slot = Arc::clone(&slot);
        let callback_seen = Arc::clone(&seen);
        dispatcher.set_callback(Some(Box::new(move |frame: &DecodedFrame| {
            // The slot already holds the frame
            let latest = callback_slot.latest().unwrap();
            assert_eq!(latest.timestamp, frame.timestamp);
            callback_seen.store(frame.timestamp, Ordering::SeqCst);
        })));

        let raw = vec![3; 640 * 480];
        assert!(dispatcher.dispatch(&raw, 42).unwrap());
        assert_eq!(seen.load(Ordering::SeqCst), 42);
        assert_eq!(slot.generation(), 1);
        assert_eq!(slot.latest().unwrap().buffer.as_u8(), Some(&raw[..]));
    }

    #[test]
    fn held_frames_are_not_overwritten() {
        let mut dispatcher = dispatcher();
        let slot = Arc::clone(dispatcher.slot());

        dispatcher.dispatch(&vec![1; 640 * 480], 1).unwrap();
        let held = slot.latest().unwrap();

        dispatcher.dispatch(&vec![2; 640 * 480], 2).unwrap();
        dispatcher.dispatch(&vec![3; 640 * 480], 3).unwrap();

        assert_eq!(held.timestamp, 1);
        assert!(held.buffer.as_u8().unwrap().iter().all(|&value| value == 1));
        assert_eq!(slot.latest().unwrap().sequence, 2);
    }

    #[test]
    fn short_frames_follow_config() {
        let mut dispatcher = dispatcher();
        assert!(dispatcher.dispatch(&[9; 100], 1).unwrap());
        let frame = dispatcher.slot().latest().unwrap();
        let buffer = frame.buffer.as_u8().unwrap();
        assert!(buffer[..100].iter().all(|&value| value == 9));
        assert!(buffer[100..].iter().all(|&value| value == 0));

        let mut dispatcher = dispatcher.with_incomplete_frames(false);
        assert!(!dispatcher.dispatch(&[9; 100], 2).unwrap());
        assert_eq!(dispatcher.stats().dropped, 1);
        assert_eq!(dispatcher.stats().incomplete, 1);
    }

    #[test]
    fn waiters_wake_on_publish_and_close() {
        let slot = Arc::new(FrameSlot::new());
        let mode = find_video_mode(Resolution::Medium, VideoFormat::Bayer).unwrap();

        let waiter = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.wait_next(0, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        slot.publish(Arc::new(DecodedFrame::new(mode)));
        assert!(waiter.join().unwrap().is_some());

        assert!(slot.wait_next(1, Duration::from_millis(10)).is_none());

        let waiter = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.wait_next(1, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        slot.close();
        assert!(waiter.join().unwrap().is_none());
        assert!(slot.latest().is_none());
    }

    #[tokio::test]
    async fn async_waiters_see_new_frames() {
        let slot = Arc::new(FrameSlot::new());
        let mode = find_video_mode(Resolution::Medium, VideoFormat::Bayer).unwrap();

        let publisher = {
            let slot = Arc::clone(&slot);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                slot.publish(Arc::new(DecodedFrame::new(mode)));
            })
        };

        let frame = slot.next(0).await;
        assert!(frame.is_some());
        publisher.await.unwrap();

        slot.close();
        assert!(slot.next(1).await.is_none());
    }

    #[test]
    fn reopened_slot_waits_for_a_new_frame() {
        let slot = Arc::new(FrameSlot::new());
        let mode = find_video_mode(Resolution::Medium, VideoFormat::Bayer).unwrap();

        slot.publish(Arc::new(DecodedFrame::new(mode)));
        slot.close();
        slot.reopen();

        let timeout = Duration::from_millis(50);
        let start = Instant::now();
        assert!(slot.wait_next(0, timeout).is_none());
        assert!(start.elapsed() >= timeout);

        let waiter = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.wait_next(0, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        let mut frame = DecodedFrame::new(mode);
        frame.timestamp = 7;
        slot.publish(Arc::new(frame));
        assert_eq!(waiter.join().unwrap().map(|frame| frame.timestamp), Some(7));
    }

    #[tokio::test]
    async fn reopened_slot_pends_until_published() {
        let slot = FrameSlot::new();
        let mode = find_video_mode(Resolution::Medium, VideoFormat::Bayer).unwrap();

        slot.publish(Arc::new(DecodedFrame::new(mode)));
        slot.close();
        slot.reopen();

        let waited = tokio::time::timeout(Duration::from_millis(50), slot.next(0)).await;
        assert!(waited.is_err());
    }
}
