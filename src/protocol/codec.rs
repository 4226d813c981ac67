use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::Error;
use super::message::{Frame, Inbound};

/// Fixed-width big-endian integer encoding
pub struct WireCodec;

impl WireCodec {
    pub fn encode_i32(value: i32) -> [u8; 4] {
        value.to_be_bytes()
    }

    pub fn decode_i32(bytes: [u8; 4]) -> i32 {
        i32::from_be_bytes(bytes)
    }

    pub fn encode_i16(value: i16) -> [u8; 2] {
        value.to_be_bytes()
    }

    pub fn decode_i16(bytes: [u8; 2]) -> i16 {
        i16::from_be_bytes(bytes)
    }
}

/// Length-driven frame codec for a CWP stream
///
/// Inbound frames are 4 bytes unless the previous frame was a positive
/// 4-byte line-up, in which case the peer owes a 2-byte line-down next.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    expected: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        FrameCodec::new()
    }
}

impl FrameCodec {
    /// Creates a codec expecting a 4-byte frame first
    pub fn new() -> Self {
        FrameCodec { expected: 4 }
    }

    /// Width of the next inbound frame
    pub fn expected_len(&self) -> usize {
        self.expected
    }
}

impl Decoder for FrameCodec {
    type Item = Inbound;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < self.expected {
            // Partial frame, keep accumulating
            src.reserve(self.expected - src.len());
            return Ok(None);
        }

        let inbound = if self.expected == 2 {
            let value = src.get_i16();
            self.expected = 4;
            Inbound::from_int16(value)
        } else {
            let value = src.get_i32();
            let inbound = Inbound::from_int32(value);
            if matches!(inbound, Inbound::LineUp(_)) {
                self.expected = 2;
            }
            inbound
        };

        tracing::trace!(?inbound, next_len = self.expected, "Decoded frame");
        Ok(Some(inbound))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len());
        match item {
            Frame::Int32(value) => dst.put_slice(&WireCodec::encode_i32(value)),
            Frame::Int16(value) => dst.put_slice(&WireCodec::encode_i16(value)),
        }
        Ok(())
    }
}
