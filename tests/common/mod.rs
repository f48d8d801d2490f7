//! Synthetic packet streams shared by the integration tests.

#![allow(dead_code)]

use freenect_core::{
    packet::{PacketFlag, PacketHeader, HEADER_SIZE},
    StreamKind,
};

/// One packet: header followed by `payload`.
pub fn packet(
    kind: StreamKind,
    flag: PacketFlag,
    sequence: u8,
    timestamp: u32,
    payload: &[u8],
) -> Vec<u8> {
    let header = PacketHeader {
        flag: kind.flag_base() | flag.nibble(),
        sequence,
        size: (HEADER_SIZE + payload.len()) as u16,
        timestamp,
    };

    let mut bytes = header.to_bytes().to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

/// Split a raw frame into full-size packets of `kind`.
/// Every packet carries `timestamp`, sequence numbers start at `sequence`.
pub fn frame_packets(kind: StreamKind, frame: &[u8], sequence: u8, timestamp: u32) -> Vec<Vec<u8>> {
    let payload_size = kind.packet_size() - HEADER_SIZE;
    let chunks: Vec<&[u8]> = frame.chunks(payload_size).collect();
    assert!(chunks.len() >= 2, "frames need a begin and an end packet");

    chunks
        .iter()
        .enumerate()
        .map(|(index, chunk)| {
            let flag = if index == 0 {
                PacketFlag::Begin
            } else if index == chunks.len() - 1 {
                PacketFlag::End
            } else {
                PacketFlag::Middle
            };
            packet(kind, flag, sequence.wrapping_add(index as u8), timestamp, chunk)
        })
        .collect()
}

/// Deterministic bytes sprinkled with magic bytes and false magics.
///
/// Fed right before a real packet, no false header formed here ever
/// validates, so every real packet survives.
pub fn garbage(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(747796405).wrapping_add(2891336453);
    let mut bytes = Vec::with_capacity(len + 1);

    while bytes.len() < len {
        state = state.wrapping_mul(1664525).wrapping_add(1013904223);
        match (state >> 24) as u8 {
            0..=7 => bytes.extend_from_slice(b"RB"),
            8..=15 => bytes.push(b'R'),
            byte => bytes.push(byte),
        }
    }
    bytes.truncate(len);

    for index in 0..len.saturating_sub(1) {
        if &bytes[index..index + 2] != b"RB" {
            continue;
        }

        if index + 3 < len {
            // No valid low nibble, the flag byte is rejected
            bytes[index + 3] &= 0xf0;
        } else if index + 2 == len {
            // The flag would be the 'B' of the real magic
            bytes[index + 1] = b'b';
        }
        // With one byte left the size comes from the real flag byte and
        // is always too large
    }

    bytes
}

/// Deterministic frame content.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|index| (index as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
