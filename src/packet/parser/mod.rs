mod stream;

pub use stream::{PacketStream, StreamKind, StreamState, StreamStats};
