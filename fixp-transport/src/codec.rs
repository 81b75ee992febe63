/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Tokio codec for Simple Open Framing Header framing.
//!
//! This module provides a codec that splits a TCP byte stream into complete
//! FIXP frames, validating the framing header's length and encoding type.
//! Frames are yielded whole, header included, so they can be decoded with
//! [`Frame::decode`] or logged verbatim.

use bytes::{BufMut, Bytes, BytesMut};
use fixp_core::error::{DecodeError, EncodeError};
use fixp_core::frame::{Frame, SOFH_LEN, Sofh};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Errors that can occur during codec operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Framing header is invalid.
    #[error("framing error: {0}")]
    Framing(#[from] DecodeError),

    /// Frame could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Frame exceeds maximum size.
    #[error("frame too large: {size} bytes exceeds maximum {max_size}")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max_size: usize,
    },

    /// I/O error.
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CodecError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Tokio codec for FIXP frames.
///
/// Handles splitting frames out of a byte stream using the two-byte length
/// in the framing header.
#[derive(Debug, Clone)]
pub struct FixpCodec {
    /// Maximum frame size in bytes.
    max_message_size: usize,
}

impl FixpCodec {
    /// Creates a new codec with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_message_size: fixp_core::frame::MAX_FRAME_LEN,
        }
    }

    /// Sets the maximum frame size.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Returns the maximum frame size.
    #[must_use]
    pub const fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}

impl Default for FixpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FixpCodec {
    type Item = Bytes;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(sofh) = Sofh::read(src) else {
            return Ok(None);
        };
        if sofh.length > self.max_message_size {
            return Err(CodecError::FrameTooLarge {
                size: sofh.length,
                max_size: self.max_message_size,
            });
        }
        sofh.validate(self.max_message_size)?;

        if src.len() < sofh.length {
            src.reserve(sofh.length - src.len());
            return Ok(None);
        }

        Ok(Some(src.split_to(sofh.length).freeze()))
    }
}

impl Encoder<Bytes> for FixpCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() < SOFH_LEN {
            return Err(DecodeError::Incomplete.into());
        }
        dst.reserve(item.len());
        dst.put_slice(&item);
        Ok(())
    }
}

impl Encoder<&Frame> for FixpCodec {
    type Error = CodecError;

    fn encode(&mut self, item: &Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let start = dst.len();
        item.encode(dst)?;
        let size = dst.len() - start;
        if size > self.max_message_size {
            dst.truncate(start);
            return Err(CodecError::FrameTooLarge {
                size,
                max_size: self.max_message_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fixp_core::frame::ENCODING_TYPE;

    fn sequence(next: u64) -> Bytes {
        Frame::Sequence { next_seq_no: next }.to_bytes().unwrap()
    }

    #[test]
    fn test_codec_decode_complete_frame() {
        let mut codec = FixpCodec::new();
        let frame = sequence(3);
        let mut buf = BytesMut::from(&frame[..]);

        let result = codec.decode(&mut buf).unwrap();
        assert_eq!(result, Some(frame));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_decode_incomplete() {
        let mut codec = FixpCodec::new();
        let frame = sequence(3);
        let mut buf = BytesMut::from(&frame[..frame.len() - 3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        let mut buf = BytesMut::from(&frame[..2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_codec_splits_back_to_back_frames() {
        let mut codec = FixpCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&sequence(1));
        buf.extend_from_slice(&sequence(2));

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(sequence(1)));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(sequence(2)));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_codec_rejects_wrong_encoding_type() {
        let mut codec = FixpCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u16(14);
        buf.put_u16(0x5BE0);
        buf.put_bytes(0, 10);

        let result = codec.decode(&mut buf);
        assert_eq!(
            result,
            Err(CodecError::Framing(DecodeError::InvalidEncodingType(0x5BE0)))
        );
    }

    #[test]
    fn test_codec_rejects_short_length() {
        let mut codec = FixpCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u16(3);
        buf.put_u16(ENCODING_TYPE);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::Framing(DecodeError::InvalidLength { length: 3, .. }))
        ));
    }

    #[test]
    fn test_codec_rejects_oversized_frame() {
        let mut codec = FixpCodec::new().with_max_message_size(32);
        let mut buf = BytesMut::new();
        buf.put_u16(64);
        buf.put_u16(ENCODING_TYPE);

        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::FrameTooLarge { size: 64, .. })
        ));
    }

    #[test]
    fn test_codec_encode_frame() {
        let mut codec = FixpCodec::new();
        let mut dst = BytesMut::new();
        codec
            .encode(&Frame::Sequence { next_seq_no: 9 }, &mut dst)
            .unwrap();
        assert_eq!(dst.freeze(), sequence(9));
    }
}
