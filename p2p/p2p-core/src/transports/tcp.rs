//! TCP Transport

use std::net::SocketAddr;

use tokio::net::{
    tcp::{OwnedReadHalf, OwnedWriteHalf},
    TcpListener,
};
use tokio_util::codec::{FramedRead, FramedWrite};

use cinder_wire::MessageCodec;

pub type TcpStream = FramedRead<OwnedReadHalf, MessageCodec>;
pub type TcpSink = FramedWrite<OwnedWriteHalf, MessageCodec>;

fn split(stream: tokio::net::TcpStream) -> (TcpStream, TcpSink) {
    let (read, write) = stream.into_split();
    (
        FramedRead::new(read, MessageCodec::default()),
        FramedWrite::new(write, MessageCodec::default()),
    )
}

/// Opens a TCP connection to `addr`.
///
/// This does not complete a handshake with the peer, see [`Handshaker`](crate::client::Handshaker).
pub async fn connect_tcp(addr: SocketAddr) -> Result<(TcpStream, TcpSink), std::io::Error> {
    let stream = tokio::net::TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(split(stream))
}

/// A listener for inbound TCP connections.
pub struct TcpInboundListener {
    listener: TcpListener,
}

impl TcpInboundListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self, std::io::Error> {
        Ok(Self {
            listener: TcpListener::bind(addr).await?,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Waits for the next inbound connection.
    pub async fn accept(&self) -> Result<(SocketAddr, TcpStream, TcpSink), std::io::Error> {
        let (stream, mut addr) = self.listener.accept().await?;
        addr.set_ip(addr.ip().to_canonical());
        stream.set_nodelay(true)?;

        let (stream, sink) = split(stream);
        Ok((addr, stream, sink))
    }
}
