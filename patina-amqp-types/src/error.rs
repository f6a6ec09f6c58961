//! Errors of encoding and decoding AMQP values

use crate::Descriptor;

/// Errors that may occur when encoding or decoding AMQP values
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The buffer ended in the middle of a value
    #[error("Unexpected end of input")]
    UnexpectedEof,

    /// Unknown or unsupported format code
    #[error("Invalid format code 0x{0:02x}")]
    InvalidFormatCode(u8),

    /// A size or count does not agree with the bytes it describes
    #[error("Invalid length: {0}")]
    InvalidLength(&'static str),

    /// Compound and described values are nested deeper than [`crate::scan::MAX_NESTING`]
    #[error("Values nested deeper than {} levels", crate::scan::MAX_NESTING)]
    TooDeep,

    /// A value does not have the expected shape
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// The descriptor does not match any known composite
    #[error("Unknown descriptor {0:?}")]
    UnknownDescriptor(Descriptor),

    /// Error reported by the serializer or deserializer
    #[error("{0}")]
    Codec(String),
}

impl From<serde_amqp::Error> for Error {
    fn from(err: serde_amqp::Error) -> Self {
        Self::Codec(err.to_string())
    }
}
