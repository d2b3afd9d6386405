//! Turning byte streams into [`Message`](cinder_wire::Message) streams and sinks.

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};

use cinder_wire::MessageCodec;

mod memory;
mod tcp;

pub use memory::{memory_pair, MemoryStream, MemorySink};
pub use tcp::{connect_tcp, TcpInboundListener, TcpSink, TcpStream};

/// Frames any duplex byte stream with the [`MessageCodec`].
pub fn frame<T>(io: T) -> (FramedRead<ReadHalf<T>, MessageCodec>, FramedWrite<WriteHalf<T>, MessageCodec>)
where
    T: AsyncRead + AsyncWrite,
{
    let (read, write) = tokio::io::split(io);
    (
        FramedRead::new(read, MessageCodec::default()),
        FramedWrite::new(write, MessageCodec::default()),
    )
}
