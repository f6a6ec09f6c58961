//! AMQP frame type and corresponding encoder and decoder

use std::fmt::Debug;

use bytes::{Bytes, BytesMut};
use patina_amqp_types::{
    performatives::{
        Attach, Begin, Close, Detach, Disposition, End, Flow, Open, Performative, Transfer,
    },
    scan,
};
use tokio_util::codec::{Decoder, Encoder};

use crate::Payload;

use super::{split_frame, write_frame, Error, FRAME_HEADER_SIZE, FRAME_TYPE_AMQP};

/// A performative with its channel, plus the payload of a transfer
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub channel: u16,
    pub body: FrameBody,
}

impl Frame {
    pub fn new(channel: impl Into<u16>, body: FrameBody) -> Self {
        Self {
            channel: channel.into(),
            body,
        }
    }

    pub fn channel(&self) -> u16 {
        self.channel
    }

    pub fn body(&self) -> &FrameBody {
        &self.body
    }

    pub fn into_body(self) -> FrameBody {
        self.body
    }

    /// Heartbeat frame, keeps the peer's idle timer from firing
    pub fn empty() -> Self {
        Self::new(0u16, FrameBody::Empty)
    }
}

/// Frame body
#[derive(Clone, PartialEq)]
pub enum FrameBody {
    /// Performative: Attach
    Attach(Attach),

    /// Performative: Flow
    Flow(Flow),

    /// Performative: Transfer
    Transfer {
        /// Transfer performative
        performative: Transfer,

        /// Encoded message
        payload: Payload,
    },

    /// Performative: Disposition
    Disposition(Disposition),

    /// Performative: Detach
    Detach(Detach),

    /// Performative: Begin
    Begin(Begin),

    /// Performative: End
    End(End),

    /// Performative: Open
    Open(Open),

    /// Performative: Close
    Close(Close),

    /// Empty frame used as a heartbeat
    Empty,
}

impl Debug for FrameBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Attach(arg0) => f.debug_tuple("Attach").field(arg0).finish(),
            Self::Flow(arg0) => f.debug_tuple("Flow").field(arg0).finish(),
            Self::Transfer {
                performative,
                payload,
            } => f
                .debug_struct("Transfer")
                .field("performative", performative)
                .field("payload.len", &payload.len())
                .finish(),
            Self::Disposition(arg0) => f.debug_tuple("Disposition").field(arg0).finish(),
            Self::Detach(arg0) => f.debug_tuple("Detach").field(arg0).finish(),
            Self::Begin(arg0) => f.debug_tuple("Begin").field(arg0).finish(),
            Self::End(arg0) => f.debug_tuple("End").field(arg0).finish(),
            Self::Open(arg0) => f.debug_tuple("Open").field(arg0).finish(),
            Self::Close(arg0) => f.debug_tuple("Close").field(arg0).finish(),
            Self::Empty => write!(f, "Empty"),
        }
    }
}

impl FrameBody {
    /// Name of the performative carried by the body
    pub fn name(&self) -> &'static str {
        match self {
            FrameBody::Attach(_) => "attach",
            FrameBody::Flow(_) => "flow",
            FrameBody::Transfer { .. } => "transfer",
            FrameBody::Disposition(_) => "disposition",
            FrameBody::Detach(_) => "detach",
            FrameBody::Begin(_) => "begin",
            FrameBody::End(_) => "end",
            FrameBody::Open(_) => "open",
            FrameBody::Close(_) => "close",
            FrameBody::Empty => "empty",
        }
    }

    fn into_parts(self) -> (Option<Performative>, Option<Payload>) {
        match self {
            FrameBody::Attach(p) => (Some(Performative::Attach(p)), None),
            FrameBody::Flow(p) => (Some(Performative::Flow(p)), None),
            FrameBody::Transfer {
                performative,
                payload,
            } => (Some(Performative::Transfer(performative)), Some(payload)),
            FrameBody::Disposition(p) => (Some(Performative::Disposition(p)), None),
            FrameBody::Detach(p) => (Some(Performative::Detach(p)), None),
            FrameBody::Begin(p) => (Some(Performative::Begin(p)), None),
            FrameBody::End(p) => (Some(Performative::End(p)), None),
            FrameBody::Open(p) => (Some(Performative::Open(p)), None),
            FrameBody::Close(p) => (Some(Performative::Close(p)), None),
            FrameBody::Empty => (None, None),
        }
    }

    fn from_performative(performative: Performative, payload: Bytes) -> Self {
        match performative {
            Performative::Open(p) => FrameBody::Open(p),
            Performative::Begin(p) => FrameBody::Begin(p),
            Performative::Attach(p) => FrameBody::Attach(p),
            Performative::Flow(p) => FrameBody::Flow(p),
            Performative::Transfer(performative) => FrameBody::Transfer {
                performative,
                payload,
            },
            Performative::Disposition(p) => FrameBody::Disposition(p),
            Performative::Detach(p) => FrameBody::Detach(p),
            Performative::End(p) => FrameBody::End(p),
            Performative::Close(p) => FrameBody::Close(p),
        }
    }
}

/// Number of bytes a transfer frame takes in addition to its payload
pub(crate) fn transfer_overhead(
    performative: &Transfer,
) -> Result<usize, patina_amqp_types::Error> {
    let buf = serde_amqp::to_vec(performative)?;
    Ok(FRAME_HEADER_SIZE + buf.len())
}

/// Encoder and decoder of AMQP frames.
///
/// Frames larger than `max_frame_size` are rejected in both directions.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Creates a codec with the given max frame size
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Max frame size
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Changes the max frame size, eg. after the open exchange
    pub fn set_max_frame_size(&mut self, max_frame_size: usize) -> &mut Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut body = BytesMut::new();
        let (performative, payload) = item.body.into_parts();
        if let Some(performative) = performative {
            body.extend_from_slice(&serde_amqp::to_vec(&performative)?);
        }
        if let Some(payload) = payload {
            body.extend_from_slice(&payload);
        }
        write_frame(
            dst,
            FRAME_TYPE_AMQP,
            item.channel,
            &body,
            self.max_frame_size,
        )
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let (channel, body) = match split_frame(src, self.max_frame_size, FRAME_TYPE_AMQP)? {
            Some(frame) => frame,
            None => return Ok(None),
        };

        if body.is_empty() {
            return Ok(Some(Frame::new(channel, FrameBody::Empty)));
        }

        let len = scan::value_len(&body)?;
        let descriptor = scan::peek_descriptor(&body)?
            .ok_or_else(|| Error::malformed("frame body is not a described type"))?;
        if !Performative::recognizes(&descriptor) {
            return Err(Error::UnsupportedPerformative(descriptor));
        }
        let performative: Performative = serde_amqp::from_slice(&body[..len])?;
        // Only a transfer carries anything after the performative
        let payload = body.slice(len..);
        Ok(Some(Frame::new(
            channel,
            FrameBody::from_performative(performative, payload),
        )))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None => Err(Error::malformed(format!(
                "stream ended with {} bytes of an incomplete frame",
                buf.len()
            ))),
        }
    }
}
