use std::{io, sync::Arc};

use bytes::Bytes;
use patina_amqp_types::sasl::SaslCode;

use crate::frames;

/// Error of the framed transport
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Reading or writing a frame failed
    #[error(transparent)]
    Frame(#[from] frames::Error),

    /// Nothing was received within the local idle timeout
    #[error("Idle timeout")]
    IdleTimeout,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Frame(frames::Error::Io(Arc::new(err)))
    }
}

/// Error of the protocol header exchange and the SASL negotiation
#[derive(Debug, thiserror::Error)]
pub enum NegotiationError {
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The peer answered with a different protocol header
    #[error("Protocol header mismatch: {0:?}")]
    ProtocolHeaderMismatch([u8; 8]),

    /// The SASL outcome was not ok
    #[error("SASL error code {code:?}, additional data: {additional_data:?}")]
    SaslError {
        code: SaslCode,
        additional_data: Option<Bytes>,
    },

    /// A SASL frame could not be read or written
    #[error(transparent)]
    Frame(#[from] frames::Error),

    /// The peer asked for something the client does not support
    #[error("Not implemented: {0:?}")]
    NotImplemented(Option<String>),

    /// A frame arrived that does not fit the negotiation
    #[error("Illegal state")]
    IllegalState,
}
