//! Tokio codec for the panel bus

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use super::frame::{encode, Frame, FrameDecoder};
use super::ProtocolError;

/// Framing codec for use with `tokio_util::codec::Framed`
///
/// Decoding never fails on content: noise and bad checksums are skipped and
/// only I/O errors reach the caller.
#[derive(Debug, Default)]
pub struct FrameCodec {
    decoder: FrameDecoder,
}

impl FrameCodec {
    /// Create a codec that starts out hunting for a frame start
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut consumed = 0;
        let mut result = None;
        for &byte in src.iter() {
            consumed += 1;
            if let Some(frame) = self.decoder.push(byte) {
                result = Some(frame);
                break;
            }
        }
        src.advance(consumed);

        if let Some(frame) = &result {
            trace!(frame = %frame, "RX");
        }
        Ok(result)
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        trace!(frame = %item, "TX");
        dst.extend_from_slice(&encode(&item));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_across_reads() {
        let frame = Frame::new(0x41, 0x04, vec![0x01; 17]);
        let bytes = encode(&frame);
        let (head, tail) = bytes.split_at(7);

        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(head);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());

        buf.extend_from_slice(tail);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(frame));
    }

    #[test]
    fn test_decode_leaves_following_frame() {
        let a = Frame::new(0x09, 0x00, vec![]);
        let b = Frame::new(0x09, 0x02, vec![0, 0, 0, 0, 1]);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode(&a));
        buf.extend_from_slice(&encode(&b));

        let mut codec = FrameCodec::new();
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(a));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(b));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_encoder_writes_wire_bytes() {
        let frame = Frame::new(0x00, 0x01, vec![0x00, 0x10]);
        let mut codec = FrameCodec::new();
        let mut dst = BytesMut::new();
        codec.encode(frame.clone(), &mut dst).unwrap();
        assert_eq!(&dst[..], &encode(&frame)[..]);
    }
}
