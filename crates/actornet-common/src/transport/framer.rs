//! Length-prefixed message framing.
//!
//! Every message on the wire is a fixed-width length prefix followed by
//! exactly that many payload bytes. The prefix is 1, 2 or 4 bytes wide and
//! may be big- or little-endian. Payload lengths outside
//! `[min_msg_len, max_msg_len]` are refused in both directions.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::config::{max_len_for_width, TransportConfig};

/// Framing violation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("message too long: {len} bytes (max {max})")]
    TooLarge { len: usize, max: u32 },

    #[error("message too short: {len} bytes (min {min})")]
    TooSmall { len: usize, min: u32 },

    #[error("truncated frame: expected {expected} bytes, {available} available")]
    Truncated { expected: usize, available: usize },
}

/// Encodes and validates frames for one connection.
///
/// Built once from a normalized [`TransportConfig`]; the maximum length is
/// always clamped to what the prefix width can express.
///
/// # Example
///
/// ```
/// use actornet_common::transport::MsgParser;
///
/// let parser = MsgParser::new(2, 2, 1024, false);
/// let frame = parser.encode(b"hello").unwrap();
/// assert_eq!(&frame[..2], &[0, 5]);
///
/// let payload = parser.decode(&frame).unwrap();
/// assert_eq!(&payload[..], b"hello");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgParser {
    len_msg_len: usize,
    min_msg_len: u32,
    max_msg_len: u32,
    little_endian: bool,
}

impl MsgParser {
    /// Creates a parser.
    ///
    /// An unsupported prefix width falls back to 2 bytes. `max_msg_len` is
    /// clamped to the width's maximum and `min_msg_len` to `max_msg_len`.
    pub fn new(len_msg_len: usize, min_msg_len: u32, max_msg_len: u32, little_endian: bool) -> Self {
        let (len_msg_len, width_max) = match max_len_for_width(len_msg_len) {
            Some(max) => (len_msg_len, max),
            None => (2, u16::MAX as u32),
        };
        let max_msg_len = max_msg_len.min(width_max);

        Self {
            len_msg_len,
            min_msg_len: min_msg_len.min(max_msg_len),
            max_msg_len,
            little_endian,
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(
            config.len_msg_len,
            config.min_msg_len,
            config.max_msg_len,
            config.little_endian,
        )
    }

    pub fn len_msg_len(&self) -> usize {
        self.len_msg_len
    }

    pub fn min_msg_len(&self) -> u32 {
        self.min_msg_len
    }

    pub fn max_msg_len(&self) -> u32 {
        self.max_msg_len
    }

    pub fn little_endian(&self) -> bool {
        self.little_endian
    }

    /// Checks a payload length against the configured bounds.
    pub fn check_len(&self, len: usize) -> Result<(), FrameError> {
        if len > self.max_msg_len as usize {
            return Err(FrameError::TooLarge {
                len,
                max: self.max_msg_len,
            });
        }
        if len < self.min_msg_len as usize {
            return Err(FrameError::TooSmall {
                len,
                min: self.min_msg_len,
            });
        }
        Ok(())
    }

    /// Prefixes `payload` with its length.
    ///
    /// # Arguments
    ///
    /// * `payload` - Message bytes; must fit within the configured bounds
    ///
    /// # Returns
    ///
    /// The complete frame, ready to be written in one piece
    pub fn encode(&self, payload: &[u8]) -> Result<Bytes, FrameError> {
        self.check_len(payload.len())?;

        let mut frame = BytesMut::with_capacity(self.len_msg_len + payload.len());
        self.put_len(&mut frame, payload.len());
        frame.put_slice(payload);
        Ok(frame.freeze())
    }

    /// Decodes a single complete frame held in `frame`.
    ///
    /// Bytes after the first frame are ignored.
    pub fn decode(&self, frame: &[u8]) -> Result<Bytes, FrameError> {
        if frame.len() < self.len_msg_len {
            return Err(FrameError::Truncated {
                expected: self.len_msg_len,
                available: frame.len(),
            });
        }

        let len = self.read_len(&frame[..self.len_msg_len]);
        self.check_len(len)?;

        let body = &frame[self.len_msg_len..];
        if body.len() < len {
            return Err(FrameError::Truncated {
                expected: len,
                available: body.len(),
            });
        }

        Ok(Bytes::copy_from_slice(&body[..len]))
    }

    /// Returns a streaming decoder for a connection's read side.
    pub fn decoder(&self) -> FrameDecoder {
        FrameDecoder {
            parser: *self,
            discarding: 0,
        }
    }

    fn put_len(&self, dst: &mut BytesMut, len: usize) {
        match (self.len_msg_len, self.little_endian) {
            (1, _) => dst.put_u8(len as u8),
            (2, true) => dst.put_u16_le(len as u16),
            (2, false) => dst.put_u16(len as u16),
            (_, true) => dst.put_u32_le(len as u32),
            (_, false) => dst.put_u32(len as u32),
        }
    }

    fn read_len(&self, mut prefix: &[u8]) -> usize {
        match (self.len_msg_len, self.little_endian) {
            (1, _) => prefix.get_u8() as usize,
            (2, true) => prefix.get_u16_le() as usize,
            (2, false) => prefix.get_u16() as usize,
            (_, true) => prefix.get_u32_le() as usize,
            (_, false) => prefix.get_u32() as usize,
        }
    }
}

impl Default for MsgParser {
    fn default() -> Self {
        Self::from_config(&TransportConfig::default())
    }
}

/// Incremental frame decoder over a read buffer.
///
/// Partial frames stay in the buffer until enough bytes arrive. When a
/// prefix announces an out-of-range length the error is returned once and
/// the announced payload is skipped as it arrives, so the following frame
/// decodes normally.
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    parser: MsgParser,
    discarding: usize,
}

impl FrameDecoder {
    pub fn parser(&self) -> &MsgParser {
        &self.parser
    }

    /// Takes the next complete payload out of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        if self.discarding > 0 {
            let skip = self.discarding.min(buf.len());
            buf.advance(skip);
            self.discarding -= skip;
            if self.discarding > 0 {
                return Ok(None);
            }
        }

        let prefix_len = self.parser.len_msg_len;
        if buf.len() < prefix_len {
            return Ok(None);
        }

        let len = self.parser.read_len(&buf[..prefix_len]);
        if let Err(err) = self.parser.check_len(len) {
            buf.advance(prefix_len);
            let skip = len.min(buf.len());
            buf.advance(skip);
            self.discarding = len - skip;
            return Err(err);
        }

        if buf.len() < prefix_len + len {
            buf.reserve(prefix_len + len - buf.len());
            return Ok(None);
        }

        buf.advance(prefix_len);
        Ok(Some(buf.split_to(len).freeze()))
    }

    /// Like [`decode`](Self::decode), for when the peer has finished sending.
    ///
    /// Leftover bytes that do not form a full frame are reported as
    /// [`FrameError::Truncated`].
    pub fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() && self.discarding == 0 => Ok(None),
            None => {
                let expected = if buf.len() >= self.parser.len_msg_len {
                    self.parser.read_len(&buf[..self.parser.len_msg_len]) + self.parser.len_msg_len
                } else if self.discarding > 0 {
                    self.discarding
                } else {
                    self.parser.len_msg_len
                };
                let available = buf.len();
                buf.clear();
                self.discarding = 0;
                Err(FrameError::Truncated {
                    expected,
                    available,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_big_endian_prefix() {
        let parser = MsgParser::new(2, 2, 1024, false);
        let frame = parser.encode(&[7u8; 300]).unwrap();
        assert_eq!(frame.len(), 302);
        assert_eq!(&frame[..2], &[0x01, 0x2C]);
    }

    #[test]
    fn test_encode_little_endian_prefix() {
        let parser = MsgParser::new(4, 1, 1024, true);
        let frame = parser.encode(&[1u8; 3]).unwrap();
        assert_eq!(&frame[..4], &[3, 0, 0, 0]);
        assert_eq!(&frame[4..], &[1, 1, 1]);
    }

    #[test]
    fn test_one_byte_prefix() {
        let parser = MsgParser::new(1, 1, 10_000, false);
        assert_eq!(parser.max_msg_len(), 255);

        let frame = parser.encode(b"abc").unwrap();
        assert_eq!(&frame[..], &[3, b'a', b'b', b'c']);
        assert_eq!(&parser.decode(&frame).unwrap()[..], b"abc");
    }

    #[test]
    fn test_encode_too_large() {
        let parser = MsgParser::new(2, 2, 16, false);
        let err = parser.encode(&[0u8; 17]).unwrap_err();
        assert_eq!(err, FrameError::TooLarge { len: 17, max: 16 });
    }

    #[test]
    fn test_encode_too_small() {
        let parser = MsgParser::new(2, 2, 16, false);
        let err = parser.encode(&[0u8; 1]).unwrap_err();
        assert_eq!(err, FrameError::TooSmall { len: 1, min: 2 });
    }

    #[test]
    fn test_encode_at_bounds() {
        let parser = MsgParser::new(2, 2, 16, false);
        assert!(parser.encode(&[0u8; 2]).is_ok());
        assert!(parser.encode(&[0u8; 16]).is_ok());
    }

    #[test]
    fn test_one_shot_decode_truncated() {
        let parser = MsgParser::new(2, 2, 64, false);
        let err = parser.decode(&[0, 10, 1, 2, 3]).unwrap_err();
        assert_eq!(
            err,
            FrameError::Truncated {
                expected: 10,
                available: 3
            }
        );

        let err = parser.decode(&[0]).unwrap_err();
        assert!(matches!(err, FrameError::Truncated { .. }));
    }

    #[test]
    fn test_one_shot_decode_rejects_announced_length() {
        let parser = MsgParser::new(2, 2, 64, false);
        let err = parser.decode(&[0x01, 0x00]).unwrap_err();
        assert_eq!(err, FrameError::TooLarge { len: 256, max: 64 });
    }

    #[test]
    fn test_invalid_width_falls_back() {
        let parser = MsgParser::new(3, 2, 100_000, false);
        assert_eq!(parser.len_msg_len(), 2);
        assert_eq!(parser.max_msg_len(), 65_535);
    }

    #[test]
    fn test_streaming_partial_reads() {
        let parser = MsgParser::new(2, 2, 1024, false);
        let mut decoder = parser.decoder();
        let frame = parser.encode(b"partial payload").unwrap();

        let mut buf = BytesMut::new();
        for byte in &frame[..frame.len() - 1] {
            buf.put_u8(*byte);
            assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        }

        buf.put_u8(frame[frame.len() - 1]);
        let payload = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&payload[..], b"partial payload");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_streaming_multiple_frames_in_one_read() {
        let parser = MsgParser::new(2, 2, 1024, true);
        let mut decoder = parser.decoder();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&parser.encode(b"first").unwrap());
        buf.extend_from_slice(&parser.encode(b"second").unwrap());

        assert_eq!(&decoder.decode(&mut buf).unwrap().unwrap()[..], b"first");
        assert_eq!(&decoder.decode(&mut buf).unwrap().unwrap()[..], b"second");
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_streaming_skips_oversized_frame() {
        let parser = MsgParser::new(2, 2, 8, false);
        let mut decoder = parser.decoder();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0, 12]);
        buf.extend_from_slice(&[9u8; 5]);

        let err = decoder.decode(&mut buf).unwrap_err();
        assert_eq!(err, FrameError::TooLarge { len: 12, max: 8 });
        assert!(buf.is_empty());

        // Rest of the oversized payload, then a valid frame.
        buf.extend_from_slice(&[9u8; 7]);
        buf.extend_from_slice(&parser.encode(b"ok").unwrap());

        assert_eq!(&decoder.decode(&mut buf).unwrap().unwrap()[..], b"ok");
    }

    #[test]
    fn test_streaming_too_small() {
        let parser = MsgParser::new(2, 4, 64, false);
        let mut decoder = parser.decoder();

        let mut buf = BytesMut::from(&[0u8, 1, 0xAA][..]);
        let err = decoder.decode(&mut buf).unwrap_err();
        assert_eq!(err, FrameError::TooSmall { len: 1, min: 4 });
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_eof() {
        let parser = MsgParser::new(2, 2, 64, false);
        let mut decoder = parser.decoder();

        let mut buf = BytesMut::new();
        assert_eq!(decoder.decode_eof(&mut buf).unwrap(), None);

        buf.extend_from_slice(&[0, 6, 1, 2]);
        let err = decoder.decode_eof(&mut buf).unwrap_err();
        assert_eq!(
            err,
            FrameError::Truncated {
                expected: 8,
                available: 4
            }
        );
        assert!(buf.is_empty());
    }
}
