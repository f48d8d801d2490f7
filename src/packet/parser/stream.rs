use std::fmt;

use log::{debug, trace, warn};

use crate::packet::{
    CompletedFrame, PacketFlag, PacketHeader, DEPTH_PACKET_SIZE, HEADER_SIZE, MAGIC,
    VIDEO_PACKET_SIZE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Depth,
    Video,
}

impl StreamKind {
    /// High nibble of the flag byte sent by this stream.
    pub fn flag_base(self) -> u8 {
        match self {
            Self::Depth => 0x70,
            Self::Video => 0x80,
        }
    }

    /// Size of a full packet, header included.
    pub fn packet_size(self) -> usize {
        match self {
            Self::Depth => DEPTH_PACKET_SIZE,
            Self::Video => VIDEO_PACKET_SIZE,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Depth => f.write_str("depth"),
            Self::Video => f.write_str("video"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    SeekingMagic,
    ReadingHeader,
    CopyingPayload,
}

/// Counters kept by a packet stream since creation or the last reset.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamStats {
    /// Valid headers accepted
    pub packets: u64,
    /// Frames handed out
    pub frames: u64,
    /// Sum of all sequence gaps
    pub lost_packets: u64,
    /// Bytes discarded while looking for a header
    pub skipped_bytes: u64,
    /// Payload bytes that did not fit into the frame buffer
    pub truncated_bytes: u64,
    /// Partial frames discarded by a new begin packet
    pub dropped_frames: u64,
    /// Headers rejected after the magic matched
    pub invalid_headers: u64,
}

/// Resumable reassembly of one isochronous stream.
///
/// Bytes are fed in chunks of any size. Every packet starts with a
/// [`PacketHeader`], frames start with a begin packet and end with an end
/// packet. Loss is never reported as an error: a frame whose begin packet
/// went missing is silently skipped and garbage between packets is ignored.
pub struct PacketStream {
    kind: StreamKind,
    state: StreamState,
    // First magic byte seen as the last byte of the previous chunk
    magic_matched: bool,
    header: [u8; HEADER_SIZE],
    header_len: usize,
    packet: Option<PacketHeader>,
    remaining: usize,
    sequence_expected: Option<u8>,
    synced: bool,
    buffer: Box<[u8]>,
    cursor: usize,
    frame_packets: u32,
    frame_lost: u32,
    overflowed: bool,
    stats: StreamStats,
}

impl PacketStream {
    /// Create a stream whose frames hold at most `capacity` bytes.
    pub fn new(kind: StreamKind, capacity: usize) -> Self {
        Self {
            kind,
            state: StreamState::SeekingMagic,
            magic_matched: false,
            header: [0; HEADER_SIZE],
            header_len: 0,
            packet: None,
            remaining: 0,
            sequence_expected: None,
            synced: false,
            buffer: vec![0; capacity].into_boxed_slice(),
            cursor: 0,
            frame_packets: 0,
            frame_lost: 0,
            overflowed: false,
            stats: StreamStats::default(),
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes of the frame assembled so far.
    pub fn write_cursor(&self) -> usize {
        self.cursor
    }

    /// Flag of the packet whose payload is being consumed.
    pub fn flag(&self) -> Option<PacketFlag> {
        self.packet.and_then(|packet| packet.packet_flag())
    }

    /// Forget any partial packet or frame, keep the counters.
    pub fn reset(&mut self) {
        self.state = StreamState::SeekingMagic;
        self.magic_matched = false;
        self.header_len = 0;
        self.packet = None;
        self.remaining = 0;
        self.sequence_expected = None;
        self.synced = false;
        self.cursor = 0;
        self.frame_packets = 0;
        self.frame_lost = 0;
        self.overflowed = false;
    }

    /// Consume a chunk of transport data.
    /// `on_frame` is called for every frame completed by this chunk, the
    /// frame data is only valid during the call.
    /// Returns the number of completed frames.
    pub fn feed<F>(&mut self, mut chunk: &[u8], mut on_frame: F) -> usize
    where
        F: FnMut(CompletedFrame<'_>),
    {
        let mut completed = 0;

        loop {
            if self.state == StreamState::CopyingPayload && self.remaining == 0 {
                if self.finish_packet(&mut on_frame) {
                    completed += 1;
                }
                continue;
            }

            if chunk.is_empty() {
                break;
            }

            chunk = match self.state {
                StreamState::SeekingMagic => self.seek_magic(chunk),
                StreamState::ReadingHeader => self.read_header(chunk),
                StreamState::CopyingPayload => {
                    let take = self.remaining.min(chunk.len());
                    self.copy_payload(&chunk[..take]);
                    &chunk[take..]
                }
            };
        }

        completed
    }

    fn seek_magic<'c>(&mut self, chunk: &'c [u8]) -> &'c [u8] {
        if self.magic_matched {
            self.magic_matched = false;

            if chunk[0] == MAGIC[1] {
                self.start_header(&MAGIC);
                return &chunk[1..];
            }

            self.skip(1);
        }

        if let Some(position) = chunk.windows(2).position(|window| window == MAGIC) {
            self.skip(position);
            self.start_header(&MAGIC);
            return &chunk[position + 2..];
        }

        if chunk.last() == Some(&MAGIC[0]) {
            self.magic_matched = true;
            self.skip(chunk.len() - 1);
        } else {
            self.skip(chunk.len());
        }

        &[]
    }

    fn read_header<'c>(&mut self, chunk: &'c [u8]) -> &'c [u8] {
        let take = (HEADER_SIZE - self.header_len).min(chunk.len());
        self.header[self.header_len..self.header_len + take].copy_from_slice(&chunk[..take]);
        self.header_len += take;

        if self.header_len == HEADER_SIZE {
            match PacketHeader::parse(&self.header) {
                Some(header) => self.start_packet(header),
                None => self.reject_header(),
            }
        }

        &chunk[take..]
    }

    fn start_header(&mut self, bytes: &[u8]) {
        self.header[..bytes.len()].copy_from_slice(bytes);
        self.header_len = bytes.len();
        self.state = StreamState::ReadingHeader;
    }

    fn skip(&mut self, count: usize) {
        if count > 0 {
            trace!("[{}] skipped {} bytes", self.kind, count);
            self.stats.skipped_bytes += count as u64;
        }
    }

    // A false magic inside garbage must not swallow a real header that
    // starts within the rejected bytes.
    fn reject_header(&mut self) {
        self.stats.invalid_headers += 1;
        debug!("[{}] invalid header {:02x?}", self.kind, self.header);

        let header = self.header;
        let tail = &header[1..];
        self.header_len = 0;
        self.state = StreamState::SeekingMagic;

        match tail.windows(2).position(|window| window == MAGIC) {
            Some(position) => {
                self.skip(1 + position);
                self.start_header(&tail[position..]);
            }
            None if tail.last() == Some(&MAGIC[0]) => {
                self.skip(tail.len());
                self.magic_matched = true;
            }
            None => self.skip(header.len()),
        }
    }

    fn start_packet(&mut self, header: PacketHeader) {
        self.stats.packets += 1;
        self.header_len = 0;

        trace!(
            "[{}] flag {:02x} seq {} size {} ts {:08x}",
            self.kind,
            header.flag,
            header.sequence,
            header.size,
            header.timestamp
        );

        if let Some(expected) = self.sequence_expected {
            if header.sequence != expected {
                let lost = header.sequence.wrapping_sub(expected);
                debug!("[{}] lost {} packets", self.kind, lost);
                self.stats.lost_packets += lost as u64;
                if self.synced {
                    self.frame_lost += lost as u32;
                }
            }
        }
        self.sequence_expected = Some(header.sequence.wrapping_add(1));

        if header.packet_flag() == Some(PacketFlag::Begin) {
            if self.synced {
                self.stats.dropped_frames += 1;
                debug!(
                    "[{}] discarding partial frame of {} bytes",
                    self.kind, self.cursor
                );
            }

            self.cursor = 0;
            self.synced = true;
            self.frame_packets = 0;
            self.frame_lost = 0;
            self.overflowed = false;
        }

        if self.synced {
            self.frame_packets += 1;
        }

        self.packet = Some(header);
        self.remaining = header.payload_len();
        self.state = StreamState::CopyingPayload;
    }

    fn copy_payload(&mut self, data: &[u8]) {
        self.remaining -= data.len();

        // Payload of packets outside a frame is consumed, not copied
        if !self.synced {
            return;
        }

        let count = data.len().min(self.buffer.len() - self.cursor);
        self.buffer[self.cursor..self.cursor + count].copy_from_slice(&data[..count]);
        self.cursor += count;

        if count < data.len() {
            self.stats.truncated_bytes += (data.len() - count) as u64;

            if !self.overflowed {
                self.overflowed = true;
                warn!(
                    "[{}] frame exceeds {} bytes, truncating",
                    self.kind,
                    self.buffer.len()
                );
            }
        }
    }

    fn finish_packet<F>(&mut self, on_frame: &mut F) -> bool
    where
        F: FnMut(CompletedFrame<'_>),
    {
        self.state = StreamState::SeekingMagic;

        let Some(header) = self.packet.take() else {
            return false;
        };

        if header.packet_flag() != Some(PacketFlag::End) || !self.synced {
            return false;
        }

        self.stats.frames += 1;
        debug!(
            "[{}] frame complete, {} packets, {} lost, {} bytes, ts {:08x}",
            self.kind, self.frame_packets, self.frame_lost, self.cursor, header.timestamp
        );

        on_frame(CompletedFrame {
            timestamp: header.timestamp,
            data: &self.buffer[..self.cursor],
            packets: self.frame_packets,
            lost_packets: self.frame_lost,
        });

        self.cursor = 0;
        self.synced = false;

        true
    }
}
