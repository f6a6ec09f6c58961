use std::{io, sync::Arc};

use patina_amqp_types::Descriptor;

/// Frame error
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("IO Error {0:?}")]
    Io(Arc<io::Error>),

    /// The frame header or body cannot be parsed
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// The frame body carries a descriptor that is not a known performative
    #[error("Unsupported performative {0:?}")]
    UnsupportedPerformative(Descriptor),
}

impl Error {
    pub(crate) fn malformed(description: impl ToString) -> Self {
        Self::MalformedFrame(description.to_string())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_amqp::Error> for Error {
    fn from(err: serde_amqp::Error) -> Self {
        Self::MalformedFrame(err.to_string())
    }
}

impl From<patina_amqp_types::Error> for Error {
    fn from(err: patina_amqp_types::Error) -> Self {
        match err {
            patina_amqp_types::Error::UnknownDescriptor(descriptor) => {
                Self::UnsupportedPerformative(descriptor)
            }
            err => Self::MalformedFrame(err.to_string()),
        }
    }
}
