//! Whole frames pushed through a device context the way a transport would.

mod common;

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use common::{frame_packets, pattern};
use freenect_core::{
    packet::{IsoPacket, IsoStatus},
    processor::{color::bayer_to_rgb, unpack::pack_from_16bit},
    Calibration, Config, DepthFormat, DeviceContext, Resolution, StreamKind, VideoFormat,
    FRAME_HEIGHT, FRAME_PIXELS, FRAME_WIDTH,
};

fn context() -> DeviceContext {
    DeviceContext::new(Config::default(), Calibration::default())
}

fn depth_frame(seed: u16) -> (Vec<u16>, Vec<u8>) {
    let samples: Vec<u16> = (0..FRAME_PIXELS)
        .map(|index| (index as u16).wrapping_add(seed) % 2047)
        .collect();
    let raw = pack_from_16bit(&samples, 11).unwrap();
    (samples, raw)
}

#[test]
fn depth_frame_in_small_chunks() {
    let mut device = context();
    device
        .start_depth_stream(DepthFormat::Depth11Bit, Resolution::Medium)
        .unwrap();

    let timestamps = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&timestamps);
    device.set_depth_callback(move |frame| seen.lock().unwrap().push(frame.timestamp));

    let (samples, raw) = depth_frame(3);
    let bytes = frame_packets(StreamKind::Depth, &raw, 0, 9000).concat();

    let delivered: usize = bytes
        .chunks(1000)
        .map(|chunk| device.feed_depth_chunk(chunk).unwrap())
        .sum();
    assert_eq!(delivered, 1);

    let frame = device.depth_slot().latest().unwrap();
    assert_eq!(frame.buffer.as_u16(), Some(&samples[..]));
    assert_eq!(frame.timestamp, 9000);
    assert_eq!(*timestamps.lock().unwrap(), vec![9000]);

    let (stream, dispatch) = device.depth_stats().unwrap();
    assert_eq!(stream.frames, 1);
    assert_eq!(stream.lost_packets, 0);
    assert_eq!(dispatch.delivered, 1);
}

#[test]
fn depth_frame_from_iso_transfers() {
    let mut device = context();
    device
        .start_depth_stream(DepthFormat::Mm, Resolution::Medium)
        .unwrap();

    let (samples, raw) = depth_frame(0);
    let packets = frame_packets(StreamKind::Depth, &raw, 100, 1);
    let packet_size = StreamKind::Depth.packet_size();

    // 32 packet slots per transfer, like the isochronous endpoint
    let mut delivered = 0;
    for group in packets.chunks(32) {
        let mut buffer = vec![0; packet_size * group.len()];
        let mut iso = Vec::new();
        for (slot, bytes) in group.iter().enumerate() {
            buffer[slot * packet_size..slot * packet_size + bytes.len()].copy_from_slice(bytes);
            iso.push(IsoPacket {
                status: IsoStatus::Completed,
                actual_length: bytes.len(),
            });
        }
        delivered += device.feed_depth_transfer(&mut buffer, &iso).unwrap();
    }
    assert_eq!(delivered, 1);

    let table = device.registration().unwrap();
    let mut expected = vec![0; FRAME_PIXELS];
    table.raw_to_mm(&samples, &mut expected).unwrap();

    let frame = device.depth_slot().latest().unwrap();
    assert_eq!(frame.buffer.as_u16(), Some(&expected[..]));
}

#[test]
fn bayer_video_is_demosaiced() {
    let mut device = context();
    device
        .start_video_stream(VideoFormat::Rgb, Resolution::Medium)
        .unwrap();

    let bayer = pattern(FRAME_PIXELS, 17);
    let bytes = frame_packets(StreamKind::Video, &bayer, 0, 33).concat();
    assert_eq!(device.feed_video_chunk(&bytes).unwrap(), 1);

    let expected = bayer_to_rgb(&bayer, FRAME_WIDTH, FRAME_HEIGHT).unwrap();
    let frame = device.video_slot().latest().unwrap();
    assert_eq!(frame.buffer.as_u8(), Some(&expected[..]));
    assert!(device.depth_slot().latest().is_none());
}

#[test]
fn stop_mid_frame_keeps_held_frames() {
    let mut device = context();
    let slot = device.depth_slot();
    device
        .start_depth_stream(DepthFormat::Depth11Bit, Resolution::Medium)
        .unwrap();

    let (first, raw) = depth_frame(1);
    device
        .feed_depth_chunk(&frame_packets(StreamKind::Depth, &raw, 0, 1).concat())
        .unwrap();
    let held = slot.latest().unwrap();

    // half of the next frame, then stop
    let (_, raw) = depth_frame(2);
    let packets = frame_packets(StreamKind::Depth, &raw, 0, 2);
    let half = packets[..packets.len() / 2].concat();
    assert_eq!(device.feed_depth_chunk(&half).unwrap(), 0);

    device.stop_depth_stream().unwrap();
    assert!(slot.is_closed());
    assert!(slot.latest().is_none());
    assert!(slot.wait_next(slot.generation(), Duration::from_millis(10)).is_none());
    assert_eq!(held.buffer.as_u16(), Some(&first[..]));

    assert!(device.feed_depth_chunk(&half).is_err());
    assert!(device.stop_depth_stream().is_err());
    assert!(device.depth_stats().is_none());

    // the earlier half frame is gone after a restart
    device
        .start_depth_stream(DepthFormat::Depth11Bit, Resolution::Medium)
        .unwrap();
    assert!(!slot.is_closed());

    let (third, raw) = depth_frame(3);
    let mut bytes = packets[packets.len() / 2..].concat();
    bytes.extend(frame_packets(StreamKind::Depth, &raw, 0, 3).concat());
    assert_eq!(device.feed_depth_chunk(&bytes).unwrap(), 1);

    let frame = slot.latest().unwrap();
    assert_eq!(frame.timestamp, 3);
    assert_eq!(frame.sequence, 0);
    assert_eq!(frame.buffer.as_u16(), Some(&third[..]));
}

#[test]
fn callbacks_survive_restarts() {
    let mut device = context();
    let count = Arc::new(Mutex::new(0));
    let seen = Arc::clone(&count);
    device.set_video_callback(move |_| *seen.lock().unwrap() += 1);

    let bayer = pattern(FRAME_PIXELS, 5);
    let bytes = frame_packets(StreamKind::Video, &bayer, 0, 1).concat();

    for _ in 0..2 {
        device
            .start_video_stream(VideoFormat::Bayer, Resolution::Medium)
            .unwrap();
        device.feed_video_chunk(&bytes).unwrap();
        device.stop_video_stream().unwrap();
    }
    assert_eq!(*count.lock().unwrap(), 2);

    device.clear_video_callback();
    device
        .start_video_stream(VideoFormat::Bayer, Resolution::Medium)
        .unwrap();
    device.feed_video_chunk(&bytes).unwrap();
    assert_eq!(*count.lock().unwrap(), 2);
}

#[test]
fn contexts_are_independent() {
    let mut first = context();
    let mut second = context();
    first
        .start_depth_stream(DepthFormat::Depth11Bit, Resolution::Medium)
        .unwrap();
    second
        .start_depth_stream(DepthFormat::Depth11Bit, Resolution::Medium)
        .unwrap();

    let (samples, raw) = depth_frame(8);
    first
        .feed_depth_chunk(&frame_packets(StreamKind::Depth, &raw, 0, 8).concat())
        .unwrap();

    assert_eq!(
        first.depth_slot().latest().unwrap().buffer.as_u16(),
        Some(&samples[..])
    );
    assert!(second.depth_slot().latest().is_none());

    first.stop_depth_stream().unwrap();
    assert!(second.is_depth_running());
    assert!(!second.depth_slot().is_closed());
}
