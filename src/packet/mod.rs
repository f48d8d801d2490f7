use std::fmt::{self, Debug};

use bytemuck::{Pod, Zeroable};

pub mod parser;

/// Size of the header at the start of every isochronous packet.
pub const HEADER_SIZE: usize = 12;
/// Largest packet, header included, either stream can send.
pub const MAX_PACKET_SIZE: usize = 1920;
/// Packet size, header included, of the depth stream.
pub const DEPTH_PACKET_SIZE: usize = 1760;
/// Packet size, header included, of the video stream.
pub const VIDEO_PACKET_SIZE: usize = 1920;

pub const MAGIC: [u8; 2] = *b"RB";

/// Header as laid out on the wire.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RawHeader {
    magic: [u8; 2],
    pad: u8,
    flag: u8,
    unknown: u8,
    sequence: u8,
    size: [u8; 2],
    timestamp: [u8; 4],
}

const _: () = assert!(std::mem::size_of::<RawHeader>() == HEADER_SIZE);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketFlag {
    Begin,
    Middle,
    End,
}

impl PacketFlag {
    pub fn from_flag(flag: u8) -> Option<Self> {
        match flag & 0x0f {
            0x1 => Some(Self::Begin),
            0x2 => Some(Self::Middle),
            0x5 => Some(Self::End),
            _ => None,
        }
    }

    pub fn nibble(self) -> u8 {
        match self {
            Self::Begin => 0x1,
            Self::Middle => 0x2,
            Self::End => 0x5,
        }
    }
}

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Raw flag byte, the high nibble identifies the stream.
    pub flag: u8,
    pub sequence: u8,
    /// Packet size including this header.
    pub size: u16,
    pub timestamp: u32,
}

impl PacketHeader {
    /// Parse and validate a header. Returns `None` on a wrong magic,
    /// an unknown flag or an impossible size.
    pub fn parse(bytes: &[u8; HEADER_SIZE]) -> Option<Self> {
        let raw: RawHeader = bytemuck::cast(*bytes);

        if raw.magic != MAGIC {
            return None;
        }

        let header = Self {
            flag: raw.flag,
            sequence: raw.sequence,
            size: u16::from_be_bytes(raw.size),
            timestamp: u32::from_le_bytes(raw.timestamp),
        };

        header.packet_flag()?;

        if (header.size as usize) < HEADER_SIZE || header.size as usize > MAX_PACKET_SIZE {
            return None;
        }

        Some(header)
    }

    pub fn packet_flag(&self) -> Option<PacketFlag> {
        PacketFlag::from_flag(self.flag)
    }

    pub fn payload_len(&self) -> usize {
        (self.size as usize).saturating_sub(HEADER_SIZE)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        bytemuck::cast(RawHeader {
            magic: MAGIC,
            pad: 0,
            flag: self.flag,
            unknown: 0,
            sequence: self.sequence,
            size: self.size.to_be_bytes(),
            timestamp: self.timestamp.to_le_bytes(),
        })
    }
}

/// Raw frame handed out by a packet stream once its end packet arrived.
/// The data borrows the stream buffer and is only valid during the callback.
#[derive(Clone, Copy)]
pub struct CompletedFrame<'a> {
    pub timestamp: u32,
    pub data: &'a [u8],
    /// Packets copied into this frame
    pub packets: u32,
    /// Sequence gap observed while this frame was assembled
    pub lost_packets: u32,
}

impl Debug for CompletedFrame<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletedFrame")
            .field("timestamp", &self.timestamp)
            .field("packets", &self.packets)
            .field("lost_packets", &self.lost_packets)
            .field("buffer_length", &self.data.len())
            .finish()
    }
}

/// Completion status of one isochronous packet within a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsoStatus {
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsoPacket {
    pub status: IsoStatus,
    pub actual_length: usize,
}

/// Move the data of every completed, non-empty packet to the front of the
/// transfer buffer. Packet `i` starts at `i * packet_size`.
/// Returns the number of bytes to feed.
pub fn compact_iso_transfer(buffer: &mut [u8], packet_size: usize, packets: &[IsoPacket]) -> usize {
    let mut count = 0;

    for (index, packet) in packets.iter().enumerate() {
        if packet.status != IsoStatus::Completed || packet.actual_length == 0 {
            continue;
        }

        let start = index * packet_size;
        if start >= buffer.len() {
            break;
        }
        let length = packet
            .actual_length
            .min(packet_size)
            .min(buffer.len() - start);

        if start != count {
            buffer.copy_within(start..start + length, count);
        }
        count += length;
    }

    count
}
