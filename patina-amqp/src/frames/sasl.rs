//! SASL frames

use bytes::BytesMut;
use patina_amqp_types::{definitions::MIN_MAX_FRAME_SIZE, scan};
use tokio_util::codec::{Decoder, Encoder};

use super::{split_frame, write_frame, Error, FRAME_TYPE_SASL};

pub use patina_amqp_types::sasl::SaslFrameBody as Frame;

/// Encoder and decoder of SASL frames.
///
/// SASL frames are always sent on channel 0 and may not be larger than 512 bytes.
#[derive(Debug, Clone, Default)]
pub struct FrameCodec {}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_amqp::to_vec(&item)?;
        write_frame(dst, FRAME_TYPE_SASL, 0, &body, MIN_MAX_FRAME_SIZE as usize)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let (_channel, body) =
            match split_frame(src, MIN_MAX_FRAME_SIZE as usize, FRAME_TYPE_SASL)? {
                Some(frame) => frame,
                None => return Ok(None),
            };
        if body.is_empty() {
            return Err(Error::malformed("empty SASL frame"));
        }
        let len = scan::value_len(&body)?;
        let descriptor = scan::peek_descriptor(&body)?
            .ok_or_else(|| Error::malformed("SASL frame body is not a described type"))?;
        if !Frame::recognizes(&descriptor) {
            return Err(Error::UnsupportedPerformative(descriptor));
        }
        serde_amqp::from_slice(&body[..len])
            .map(Some)
            .map_err(Into::into)
    }
}
