//! Frame layout: a 32-bit length prefix, a 32-bit type tag, then the payload.
//! Each UDP-style datagram carries exactly one frame; `DsmeCodec` still
//! implements the stream-oriented `Decode`/`SinkEncode` traits from
//! `mce-runtime` so the same parsing logic works whether frames arrive one
//! per `recv` or concatenated in a test buffer.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use mce_runtime::codec::{Decode, SinkEncode, SinkEncodeLen};
use thiserror::Error;

const HEADER_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("frame length {0} exceeds maximum datagram size")]
    TooLarge(u32),
    #[error("frame declared length {0} is shorter than the type-tag header")]
    Truncated(u32),
}

/// A parsed wire frame: the raw type tag and whatever payload followed it.
/// Unknown type tags are represented here rather than rejected; the layer
/// above (`message.rs`) decides whether to log-and-ignore them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub ty: u32,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(ty: u32, payload: Bytes) -> Self {
        Self { ty, payload }
    }
}

impl SinkEncodeLen for Frame {
    fn sink_encode_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }
}

impl SinkEncode for Frame {
    type Error = ProtoError;
    fn sink_encode(&self, dst: &mut BytesMut) -> Result<(), ProtoError> {
        let body_len = (self.payload.len() + 4) as u32;
        dst.reserve(self.sink_encode_len());
        dst.put_u32(body_len);
        dst.put_u32(self.ty);
        dst.extend_from_slice(&self.payload);
        Ok(())
    }
}

/// Maximum payload we will ever parse out of a single datagram. The real
/// protocol's frames are tiny (pid + a handful of enum tags); this guards
/// against a corrupt peer claiming an enormous length.
const MAX_FRAME_LEN: u32 = 4096;

#[derive(Debug, Default)]
pub struct DsmeCodec;

impl Decode for DsmeCodec {
    type Item = Frame;
    type Error = ProtoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtoError> {
        if src.len() < 4 {
            return Ok(None);
        }
        let body_len = u32::from_be_bytes(src[0..4].try_into().unwrap());
        if body_len > MAX_FRAME_LEN {
            return Err(ProtoError::TooLarge(body_len));
        }
        if body_len < 4 {
            return Err(ProtoError::Truncated(body_len));
        }
        if src.len() < 4 + body_len as usize {
            return Ok(None);
        }
        src.advance(4);
        let ty = src.get_u32();
        let payload = src.split_to(body_len as usize - 4).freeze();
        Ok(Some(Frame::new(ty, payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_frame() {
        let frame = Frame::new(7, Bytes::from_static(b"abc"));
        let mut buf = BytesMut::new();
        frame.sink_encode(&mut buf).unwrap();

        let mut codec = DsmeCodec::default();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_returns_none() {
        let frame = Frame::new(1, Bytes::from_static(b"hello"));
        let mut buf = BytesMut::new();
        frame.sink_encode(&mut buf).unwrap();
        buf.truncate(buf.len() - 2);

        let mut codec = DsmeCodec::default();
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_FRAME_LEN + 1);
        let mut codec = DsmeCodec::default();
        assert!(matches!(codec.decode(&mut buf), Err(ProtoError::TooLarge(_))));
    }
}
