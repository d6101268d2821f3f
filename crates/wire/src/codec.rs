//! Length-prefixed frame codec
//!
//! Frames are `<decimal byte length>#<body>`. TCP delivers the stream in
//! arbitrary chunks, so the decoder must cope with a chunk ending inside the
//! length digits, inside the body, or carrying several frames at once. The
//! codec keeps the declared length of the frame in progress between calls;
//! `FramedRead` keeps the buffered bytes. Both are owned by one connection.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::error::FramingError;

/// A length prefix longer than this cannot describe a sane frame
const MAX_LENGTH_DIGITS: usize = 10;

/// Default upper bound on a single frame body
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// Codec for drachtio length-prefixed frames
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_length: usize,
    // declared length of a frame whose prefix has been consumed
    pending_length: Option<usize>,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self {
            max_frame_length,
            pending_length: None,
        }
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    /// Whether a frame body is partially buffered
    pub fn is_mid_frame(&self) -> bool {
        self.pending_length.is_some()
    }

    fn invalid_prefix(bytes: &[u8]) -> FramingError {
        FramingError::InvalidLengthPrefix {
            prefix: String::from_utf8_lossy(&bytes[..bytes.len().min(64)]).into_owned(),
        }
    }

    fn read_prefix(&self, src: &BytesMut) -> Result<Option<(usize, usize)>, FramingError> {
        let hash = match src.iter().position(|b| *b == b'#') {
            Some(pos) => pos,
            None => {
                // a chunk may end between the length digits and the '#'
                if src.len() <= MAX_LENGTH_DIGITS && src.iter().all(u8::is_ascii_digit) {
                    return Ok(None);
                }
                return Err(Self::invalid_prefix(src));
            }
        };

        let digits = &src[..hash];
        if digits.is_empty() || digits.len() > MAX_LENGTH_DIGITS || !digits.iter().all(u8::is_ascii_digit) {
            return Err(Self::invalid_prefix(src));
        }

        let length = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .ok_or_else(|| Self::invalid_prefix(src))?;

        if length > self.max_frame_length {
            return Err(FramingError::FrameTooLarge {
                length,
                max: self.max_frame_length,
            });
        }

        Ok(Some((hash + 1, length)))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, FramingError> {
        let length = match self.pending_length {
            Some(length) => length,
            None => match self.read_prefix(src)? {
                Some((prefix_len, length)) => {
                    src.advance(prefix_len);
                    self.pending_length = Some(length);
                    length
                }
                None => return Ok(None),
            },
        };

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let body = src.split_to(length);
        self.pending_length = None;
        trace!("decoded frame of {} bytes", length);

        String::from_utf8(body.to_vec())
            .map(Some)
            .map_err(|_| FramingError::InvalidUtf8)
    }
}

impl Encoder<String> for FrameCodec {
    type Error = FramingError;

    fn encode(&mut self, body: String, dst: &mut BytesMut) -> Result<(), FramingError> {
        let prefix = format!("{}#", body.len());
        dst.reserve(prefix.len() + body.len());
        dst.put_slice(prefix.as_bytes());
        dst.put_slice(body.as_bytes());
        Ok(())
    }
}

/// Frame a body as it appears on the wire
pub fn frame(body: &str) -> String {
    format!("{}#{}", body.len(), body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut FrameCodec, buf: &mut BytesMut) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(body) = codec.decode(buf).unwrap() {
            out.push(body);
        }
        out
    }

    #[test]
    fn test_single_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from("5#hello");
        assert_eq!(decode_all(&mut codec, &mut buf), vec!["hello"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_several_frames_in_one_chunk() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from("3#abc2#de0#4#wxyz");
        assert_eq!(decode_all(&mut codec, &mut buf), vec!["abc", "de", "", "wxyz"]);
    }

    #[test]
    fn test_split_inside_length_prefix() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from("1");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(!codec.is_mid_frame());

        buf.extend_from_slice(b"2#hello");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(codec.is_mid_frame());

        buf.extend_from_slice(b" world!");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("hello world!"));
        assert!(!codec.is_mid_frame());
    }

    #[test]
    fn test_body_containing_hash_and_digits() {
        let mut codec = FrameCodec::new();
        let body = "id|sip|12#34";
        let mut buf = BytesMut::from(frame(body).as_str());
        assert_eq!(decode_all(&mut codec, &mut buf), vec![body]);
    }

    #[test]
    fn test_length_counts_bytes_not_chars() {
        let mut codec = FrameCodec::new();
        let body = "héllo";
        let mut buf = BytesMut::new();
        codec.encode(body.to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..2], b"6#");
        assert_eq!(decode_all(&mut codec, &mut buf), vec![body]);
    }

    #[test]
    fn test_non_numeric_prefix_is_fatal() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from("abc#hello");
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FramingError::InvalidLengthPrefix { .. })
        ));

        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from("12x");
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FramingError::InvalidLengthPrefix { .. })
        ));

        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from("#hello");
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_frame_too_large() {
        let mut codec = FrameCodec::with_max_frame_length(4);
        let mut buf = BytesMut::from("5#hello");
        assert!(matches!(
            codec.decode(&mut buf),
            Err(FramingError::FrameTooLarge { length: 5, max: 4 })
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&b"2#\xff\xfe"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(FramingError::InvalidUtf8)));
    }
}
