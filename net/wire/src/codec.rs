//! A tokio-codec for [`Message`]s.

use borsh::BorshDeserialize;
use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::{Message, WireError};

/// The maximum size of an encoded message.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Frames [`Message`]s with a length prefix.
#[derive(Debug)]
pub struct MessageCodec {
    inner: LengthDelimitedCodec,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(MAX_MESSAGE_SIZE)
    }
}

impl MessageCodec {
    /// Create a codec that refuses messages bigger than `max_size`.
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(max_size)
                .new_codec(),
        }
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(frame) = self.inner.decode(src).map_err(map_frame_error)? else {
            return Ok(None);
        };

        Message::try_from_slice(&frame)
            .map(Some)
            .map_err(|_| WireError::Decode)
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = WireError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = borsh::to_vec(&item)?;
        self.inner
            .encode(Bytes::from(bytes), dst)
            .map_err(map_frame_error)
    }
}

/// The length delimited codec reports oversized frames as [`std::io::ErrorKind::InvalidData`].
fn map_frame_error(e: std::io::Error) -> WireError {
    if e.kind() == std::io::ErrorKind::InvalidData {
        WireError::TooLarge
    } else {
        WireError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use cinder_types::{HashOrNumber, HeadInfo};

    use super::*;
    use crate::{
        PeerCapabilities, PeerRequest, ProtocolRequest, ProtocolVersion, Status,
    };

    fn status() -> Message {
        Message::Status(Status {
            version: ProtocolVersion::V2,
            network_id: 1,
            genesis: [1; 32],
            head: HeadInfo {
                hash: [2; 32],
                number: 10,
                weight: 20,
            },
            capabilities: PeerCapabilities::FULL_SERVER | PeerCapabilities::LIGHT_SERVER,
        })
    }

    #[test]
    fn partial_frames() {
        let mut codec = MessageCodec::default();
        let mut buf = BytesMut::new();

        codec.encode(status(), &mut buf).unwrap();
        codec
            .encode(
                Message::Request(PeerRequest {
                    id: 7,
                    request: ProtocolRequest::GetBlockHeaders {
                        origin: HashOrNumber::Number(3),
                        amount: 4,
                        skip: 0,
                        reverse: false,
                    },
                }),
                &mut buf,
            )
            .unwrap();

        let mut rest = buf.split_off(5);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.unsplit(rest.split());
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(status()));
        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(Message::Request(PeerRequest { id: 7, .. }))
        ));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn oversized_frame() {
        let mut small = MessageCodec::new(8);
        let mut buf = BytesMut::new();

        MessageCodec::default().encode(status(), &mut buf).unwrap();
        assert!(matches!(small.decode(&mut buf), Err(WireError::TooLarge)));
    }

    #[test]
    fn garbage_frame() {
        let mut codec = MessageCodec::default();
        let mut buf = BytesMut::from(&[0, 0, 0, 2, 0xff, 0xff][..]);

        assert!(matches!(codec.decode(&mut buf), Err(WireError::Decode)));
    }

    proptest! {
        #[test]
        fn arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let mut codec = MessageCodec::new(1024);
            let mut buf = BytesMut::from(&bytes[..]);
            while let Ok(Some(_)) = codec.decode(&mut buf) {}
        }

        #[test]
        fn frames_survive_any_split(split in 0_usize..128) {
            let mut codec = MessageCodec::default();
            let mut buf = BytesMut::new();
            codec.encode(status(), &mut buf).unwrap();

            let rest = buf.split_off(split.min(buf.len()));
            let first = codec.decode(&mut buf).unwrap();
            buf.unsplit(rest);

            match first {
                Some(message) => prop_assert_eq!(message, status()),
                None => prop_assert_eq!(codec.decode(&mut buf).unwrap(), Some(status())),
            }
        }
    }
}
