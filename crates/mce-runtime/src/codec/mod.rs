//! Framing traits used by the lifecycle socket protocol (`mce-proto`).

/// Decode a typed item out of a byte buffer.
///
/// 1. Buffer holds less than a full frame: return `Ok(None)`, leave buffer
///    untouched.
/// 2./3. Buffer holds exactly/more than a full frame: consume the frame with
///    `BytesMut::split_to`/`advance` and return `Ok(Some(item))`.
pub trait Decode {
    type Item;
    type Error: std::error::Error;

    fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error>;
}

/// Something that can be encoded into an outgoing byte buffer.
pub trait SinkEncode {
    type Error: std::error::Error;
    fn sink_encode(&self, dst: &mut bytes::BytesMut) -> Result<(), Self::Error>;
}

/// Something that knows how many bytes are needed to encode itself, so a
/// caller can reserve capacity up front.
pub trait SinkEncodeLen {
    fn sink_encode_len(&self) -> usize;
}
