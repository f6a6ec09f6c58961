//! Implements errors associated with the connection

use std::{io, sync::Arc};

use bytes::Bytes;
use patina_amqp_types::{
    definitions::{self, AmqpError, ConnectionError, ErrorCondition},
    sasl::SaslCode,
};
use tokio::task::JoinError;

use crate::{
    frames,
    transport::{self, NegotiationError},
};

/// Errors that stop the connection engine
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The peer sent something that is not allowed. The connection was closed with the
    /// given error.
    #[error("Protocol violation {0}")]
    ProtocolViolation(definitions::Error),

    /// The remote peer closed the connection with the provided error
    #[error("Remote error {0}")]
    Remote(definitions::Error),

    /// IO error
    #[error("IO Error {0:?}")]
    Io(Arc<io::Error>),

    /// An incoming frame could not be decoded
    #[error(transparent)]
    Frame(frames::Error),

    /// Nothing was received within the local idle timeout
    #[error("Idle timeout")]
    IdleTimeout,
}

impl Error {
    pub(crate) fn violation(
        condition: impl Into<ErrorCondition>,
        description: impl Into<String>,
    ) -> Self {
        Self::ProtocolViolation(definitions::Error::new(
            condition,
            Some(description.into()),
            None,
        ))
    }

    pub(crate) fn illegal_state(description: impl Into<String>) -> Self {
        Self::violation(AmqpError::IllegalState, description)
    }

    /// The error condition sent to the peer in a close frame, if any
    pub(crate) fn close_condition(&self) -> Option<definitions::Error> {
        match self {
            Error::ProtocolViolation(error) => Some(error.clone()),
            Error::Frame(frames::Error::MalformedFrame(description)) => Some(
                definitions::Error::new(
                    ConnectionError::FramingError,
                    Some(description.clone()),
                    None,
                ),
            ),
            Error::Frame(frames::Error::UnsupportedPerformative(descriptor)) => {
                Some(definitions::Error::new(
                    AmqpError::NotImplemented,
                    Some(format!("unsupported performative {:?}", descriptor)),
                    None,
                ))
            }
            Error::IdleTimeout => Some(definitions::Error::new(
                ConnectionError::ConnectionForced,
                Some("Idle timeout".to_string()),
                None,
            )),
            Error::Frame(frames::Error::Io(_)) | Error::Io(_) | Error::Remote(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<frames::Error> for Error {
    fn from(err: frames::Error) -> Self {
        match err {
            frames::Error::Io(err) => Self::Io(err),
            err => Self::Frame(err),
        }
    }
}

impl From<transport::Error> for Error {
    fn from(err: transport::Error) -> Self {
        match err {
            transport::Error::Frame(err) => err.into(),
            transport::Error::IdleTimeout => Self::IdleTimeout,
        }
    }
}

impl From<JoinError> for Error {
    fn from(err: JoinError) -> Self {
        Self::Io(Arc::new(io::Error::new(io::ErrorKind::Other, err)))
    }
}

/// Error associated with opening a connection
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    /// Nothing is listening at the address
    #[error("Connection refused {0:?}")]
    ConnectionRefused(io::Error),

    /// The connection was not open within the connect timeout
    #[error("Timed out opening the connection")]
    Timeout,

    /// Error parsing the url
    #[error(transparent)]
    UrlError(#[from] url::ParseError),

    /// Only "amqp" is supported
    #[error(r#"Invalid scheme {0:?}. Only "amqp" is supported."#)]
    InvalidScheme(String),

    /// Protocol negotiation failed due to protocol header mismatch
    #[error("Protocol header mismatch. Found {0:?}")]
    ProtocolHeaderMismatch([u8; 8]),

    /// SASL negotiation failed
    #[error("SASL error code {:?}, additional data: {:?}", .code, .additional_data)]
    SaslError {
        /// SASL outcome code
        code: SaslCode,
        /// Additional information for the failed negotiation
        additional_data: Option<Bytes>,
    },

    /// IO error
    #[error("IO Error {0:?}")]
    Io(#[from] io::Error),

    /// A local error
    #[error("Local error {0}")]
    Local(definitions::Error),

    /// The remote peer closed the connection, optionally with an error
    #[error("Remote error {0:?}")]
    Remote(Option<definitions::Error>),
}

impl From<NegotiationError> for OpenError {
    fn from(err: NegotiationError) -> Self {
        match err {
            NegotiationError::Io(err) => Self::Io(err),
            NegotiationError::ProtocolHeaderMismatch(buf) => Self::ProtocolHeaderMismatch(buf),
            NegotiationError::SaslError {
                code,
                additional_data,
            } => Self::SaslError {
                code,
                additional_data,
            },
            NegotiationError::Frame(err) => Self::Local(definitions::Error::new(
                AmqpError::DecodeError,
                Some(err.to_string()),
                None,
            )),
            NegotiationError::NotImplemented(description) => Self::Local(
                definitions::Error::new(AmqpError::NotImplemented, description, None),
            ),
            NegotiationError::IllegalState => {
                Self::Local(definitions::Error::new(AmqpError::IllegalState, None, None))
            }
        }
    }
}

impl From<Error> for OpenError {
    fn from(err: Error) -> Self {
        match err {
            Error::ProtocolViolation(error) => Self::Local(error),
            Error::Remote(error) => Self::Remote(Some(error)),
            Error::Io(err) => Self::Io(io::Error::new(err.kind(), err.to_string())),
            Error::Frame(err) => Self::Local(definitions::Error::new(
                ConnectionError::FramingError,
                Some(err.to_string()),
                None,
            )),
            Error::IdleTimeout => Self::Timeout,
        }
    }
}
