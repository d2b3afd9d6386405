//! In-memory connections, both ends live in this process.

use tokio::io::{duplex, DuplexStream, ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};

use cinder_wire::{MessageCodec, MAX_MESSAGE_SIZE};

use super::frame;

pub type MemoryStream = FramedRead<ReadHalf<DuplexStream>, MessageCodec>;
pub type MemorySink = FramedWrite<WriteHalf<DuplexStream>, MessageCodec>;

/// Creates a connected pair of in-memory connections.
pub fn memory_pair() -> ((MemoryStream, MemorySink), (MemoryStream, MemorySink)) {
    let (a, b) = duplex(MAX_MESSAGE_SIZE);
    (frame(a), frame(b))
}
