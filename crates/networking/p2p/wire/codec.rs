use crate::wire::message::Message;
use bytes::{Buf, BufMut, BytesMut};
use koorde_common::Space;
use tokio_util::codec::{Decoder, Encoder};

/// Hard cap on a single frame. Store batches are chunked well below this;
/// anything larger is a corrupt or hostile stream.
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

const LENGTH_PREFIX: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("unexpected end of frame")]
    UnexpectedEof,
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("unknown message code {0:#04x}")]
    UnknownCode(u8),
    #[error("frame of {0} bytes exceeds the size limit")]
    OversizedFrame(usize),
    #[error("identifier has the wrong width for this ring")]
    InvalidId,
    #[error("string field is not valid utf-8")]
    InvalidUtf8,
}

/// Length-prefixed framing for [`Message`]: a `u32` big-endian payload
/// length followed by the encoded message. The codec carries the ring
/// parameters because identifier fields are fixed-width.
#[derive(Debug, Clone)]
pub struct KoordeCodec {
    space: Space,
}

impl KoordeCodec {
    pub fn new(space: Space) -> Self {
        Self { space }
    }
}

impl Decoder for KoordeCodec {
    type Item = Message;
    type Error = super::WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, Self::Error> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }
        let length = u32::from_be_bytes(src[..LENGTH_PREFIX].try_into().expect("4 bytes")) as usize;
        if length > MAX_FRAME_SIZE {
            return Err(CodecError::OversizedFrame(length).into());
        }
        if src.len() < LENGTH_PREFIX + length {
            src.reserve(LENGTH_PREFIX + length - src.len());
            return Ok(None);
        }
        src.advance(LENGTH_PREFIX);
        let frame = src.split_to(length);
        let message = Message::decode(&frame, &self.space)?;
        Ok(Some(message))
    }
}

impl Encoder<Message> for KoordeCodec {
    type Error = super::WireError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut payload = BytesMut::new();
        message.encode(&mut payload);
        if payload.len() > MAX_FRAME_SIZE {
            return Err(CodecError::OversizedFrame(payload.len()).into());
        }
        dst.reserve(LENGTH_PREFIX + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::message::{Ping, Pong};

    #[test]
    fn frames_and_reassembles() {
        let space = Space::new(32, 4, 4).unwrap();
        let mut codec = KoordeCodec::new(space);
        let mut buf = BytesMut::new();
        codec.encode(Message::Ping(Ping { id: 1 }), &mut buf).unwrap();
        codec.encode(Message::Pong(Pong { id: 2 }), &mut buf).unwrap();

        // Feed the stream one byte at a time to exercise partial reads.
        let mut incoming = BytesMut::new();
        let mut decoded = Vec::new();
        for byte in buf {
            incoming.put_u8(byte);
            if let Some(message) = codec.decode(&mut incoming).unwrap() {
                decoded.push(message);
            }
        }
        assert_eq!(
            decoded,
            vec![Message::Ping(Ping { id: 1 }), Message::Pong(Pong { id: 2 })]
        );
    }

    #[test]
    fn rejects_oversized_frame() {
        let space = Space::new(32, 4, 4).unwrap();
        let mut codec = KoordeCodec::new(space);
        let mut incoming = BytesMut::new();
        incoming.put_u32(MAX_FRAME_SIZE as u32 + 1);
        assert!(codec.decode(&mut incoming).is_err());
    }
}
