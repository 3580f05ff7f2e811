//! Length-prefixed frame codec
//!
//! Pure byte-level transformation: no I/O, no side effects. The decoder is
//! incremental so callers can feed it whatever chunk sizes the transport
//! produces; a frame split across reads simply waits for more bytes, and two
//! frames delivered in one read decode back-to-back.

use crate::WireMessage;
use thiserror::Error;

/// Size of the big-endian length prefix on every frame.
pub const LEN_PREFIX_BYTES: usize = 4;

/// Upper bound on a frame body. A length header above this is treated as
/// corruption rather than an allocation request.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Frame-level corruption. Not locally recoverable: once a length header or
/// body fails to parse, the stream's message boundary is lost and the caller
/// must close the connection.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame length {0} exceeds maximum of {MAX_FRAME_BYTES} bytes")]
    FrameTooLarge(usize),

    #[error("zero-length frame")]
    EmptyFrame,

    #[error("frame body is not a valid message: {0}")]
    InvalidBody(#[from] serde_json::Error),
}

/// Encode a message into a single length-prefixed frame.
pub fn encode(message: &WireMessage) -> Result<Vec<u8>, CodecError> {
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(CodecError::FrameTooLarge(body.len()));
    }

    let mut frame = Vec::with_capacity(LEN_PREFIX_BYTES + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Incremental frame decoder.
///
/// Feed raw transport bytes with [`extend`](Self::extend), then drain
/// complete messages with [`next_message`](Self::next_message). `Ok(None)`
/// means the buffer holds no complete frame yet; decoding resumes correctly
/// once the remaining bytes arrive.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append raw bytes from the transport.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Try to decode the next complete message out of the buffer.
    pub fn next_message(&mut self) -> Result<Option<WireMessage>, CodecError> {
        if self.buf.len() < LEN_PREFIX_BYTES {
            return Ok(None);
        }

        let mut len_bytes = [0u8; LEN_PREFIX_BYTES];
        len_bytes.copy_from_slice(&self.buf[..LEN_PREFIX_BYTES]);
        let body_len = u32::from_be_bytes(len_bytes) as usize;

        if body_len == 0 {
            return Err(CodecError::EmptyFrame);
        }
        if body_len > MAX_FRAME_BYTES {
            return Err(CodecError::FrameTooLarge(body_len));
        }
        if self.buf.len() < LEN_PREFIX_BYTES + body_len {
            return Ok(None);
        }

        let message =
            serde_json::from_slice(&self.buf[LEN_PREFIX_BYTES..LEN_PREFIX_BYTES + body_len])?;
        self.buf.drain(..LEN_PREFIX_BYTES + body_len);
        Ok(Some(message))
    }

    /// Number of bytes currently buffered without forming a complete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ModelDescriptor, ResourceSnapshot, ResponseStatus};

    fn sample_messages() -> Vec<WireMessage> {
        vec![
            WireMessage::Register {
                resources: ResourceSnapshot {
                    total_ram: 32 << 30,
                    free_ram: 16 << 30,
                    total_vram: 8 << 30,
                    free_vram: 8 << 30,
                },
                models: vec![ModelDescriptor {
                    id: "m1".to_string(),
                    context_window: 4096,
                    coding: 0.5,
                    reasoning: 0.5,
                    creativity: 0.5,
                    speed: 5.0,
                }],
            },
            WireMessage::ResourceUpdate {
                resources: ResourceSnapshot::default(),
            },
            WireMessage::Dispatch {
                id: 42,
                model: "m1".to_string(),
                prompt: "write a haiku".to_string(),
                context: "previous turns".to_string(),
                n: 50,
                temp: 0.7,
            },
            WireMessage::Response {
                id: 42,
                status: ResponseStatus::Ok,
                text: "hi".to_string(),
            },
        ]
    }

    #[test]
    fn test_round_trip_every_message_type() {
        for message in sample_messages() {
            let frame = encode(&message).unwrap();

            let mut decoder = FrameDecoder::new();
            decoder.extend(&frame);

            let decoded = decoder.next_message().unwrap().unwrap();
            assert_eq!(decoded, message);
            assert_eq!(decoder.buffered(), 0);
        }
    }

    #[test]
    fn test_truncated_frame_needs_more_data_then_resumes() {
        let message = WireMessage::Response {
            id: 9,
            status: ResponseStatus::Ok,
            text: "partial delivery".to_string(),
        };
        let frame = encode(&message).unwrap();

        let mut decoder = FrameDecoder::new();

        // Byte-at-a-time delivery: never corrupt, just incomplete.
        for byte in &frame[..frame.len() - 1] {
            decoder.extend(std::slice::from_ref(byte));
            assert!(decoder.next_message().unwrap().is_none());
        }

        decoder.extend(&frame[frame.len() - 1..]);
        assert_eq!(decoder.next_message().unwrap().unwrap(), message);
    }

    #[test]
    fn test_two_frames_in_one_chunk() {
        let first = WireMessage::ResourceUpdate {
            resources: ResourceSnapshot::default(),
        };
        let second = WireMessage::Response {
            id: 1,
            status: ResponseStatus::Error,
            text: "boom".to_string(),
        };

        let mut chunk = encode(&first).unwrap();
        chunk.extend_from_slice(&encode(&second).unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.extend(&chunk);

        assert_eq!(decoder.next_message().unwrap().unwrap(), first);
        assert_eq!(decoder.next_message().unwrap().unwrap(), second);
        assert!(decoder.next_message().unwrap().is_none());
    }

    #[test]
    fn test_oversized_length_header_is_corrupt() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&(u32::MAX).to_be_bytes());
        decoder.extend(b"garbage");

        assert!(matches!(
            decoder.next_message(),
            Err(CodecError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_invalid_json_body_is_corrupt() {
        let body = b"{not json";
        let mut decoder = FrameDecoder::new();
        decoder.extend(&(body.len() as u32).to_be_bytes());
        decoder.extend(body);

        assert!(matches!(
            decoder.next_message(),
            Err(CodecError::InvalidBody(_))
        ));
    }

    #[test]
    fn test_zero_length_frame_is_corrupt() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&0u32.to_be_bytes());

        assert!(matches!(decoder.next_message(), Err(CodecError::EmptyFrame)));
    }
}
