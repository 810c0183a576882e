//! Binary frame encoding/decoding
//!
//! NDT control frame format:
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ Byte 0:     Message type (0-11)                      │
//! │ Byte 1-2:   Payload length (uint16 big-endian)       │
//! ├──────────────────────────────────────────────────────┤
//! │ Payload (UTF-8 JSON object)                          │
//! └──────────────────────────────────────────────────────┘
//! ```

use crate::{FrameError, MessageType, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Frame header size
pub const HEADER_SIZE: usize = 3;

/// Maximum payload size
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// An NDT control frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: MessageType,
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame with payload
    pub fn new(msg_type: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            msg_type,
            payload: payload.into(),
        }
    }

    /// Total encoded size
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Encode frame to bytes
    pub fn encode(&self) -> Result<Bytes> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(FrameError::BodyTooLarge(self.payload.len()));
        }

        let mut buf = BytesMut::with_capacity(self.size());
        buf.put_u8(self.msg_type.code());
        buf.put_u16(self.payload.len() as u16);
        buf.extend_from_slice(&self.payload);

        Ok(buf.freeze())
    }

    /// Decode one complete frame.
    ///
    /// The buffer must hold exactly one frame: trailing or missing payload
    /// bytes are a length mismatch, not something to resynchronise on.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.is_empty() {
            return Err(FrameError::MissingInput);
        }
        if buf.len() < HEADER_SIZE {
            return Err(FrameError::TruncatedHeader { have: buf.len() });
        }

        let declared = u16::from_be_bytes([buf[1], buf[2]]) as usize;
        let actual = buf.len() - HEADER_SIZE;
        if declared != actual {
            return Err(FrameError::LengthMismatch { declared, actual });
        }

        let msg_type = MessageType::from_u8(buf[0]).ok_or(FrameError::UnknownType(buf[0]))?;

        Ok(Self {
            msg_type,
            payload: Bytes::copy_from_slice(&buf[HEADER_SIZE..]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_encode_decode() {
        let frame = Frame::new(MessageType::SrvQueue, b"{\"msg\":\"0\"}".as_slice());
        let encoded = frame.encode().unwrap();

        assert_eq!(&encoded[..3], &[1, 0, 11]);

        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_length_checked_before_type() {
        // Bad type and bad length: the length is reported
        let buf = [200u8, 0, 5, b'{', b'}'];
        assert_eq!(
            Frame::decode(&buf),
            Err(FrameError::LengthMismatch {
                declared: 5,
                actual: 2
            })
        );
    }

    #[test]
    fn test_short_buffers() {
        assert_eq!(Frame::decode(&[]), Err(FrameError::MissingInput));
        assert_eq!(
            Frame::decode(&[2, 0]),
            Err(FrameError::TruncatedHeader { have: 2 })
        );
    }

    #[test]
    fn test_empty_payload() {
        let encoded = Frame::new(MessageType::Waiting, Bytes::new()).encode().unwrap();
        assert_eq!(encoded.as_ref(), &[10, 0, 0]);
        assert!(Frame::decode(&encoded).unwrap().payload.is_empty());
    }

    #[test]
    fn test_payload_too_large() {
        let frame = Frame::new(MessageType::TestMsg, vec![b'a'; MAX_PAYLOAD_SIZE + 1]);
        assert_eq!(
            frame.encode(),
            Err(FrameError::BodyTooLarge(MAX_PAYLOAD_SIZE + 1))
        );
    }
}
