//! The 8 byte header exchanged before any frame: `"AMQP"`, a protocol id and the version

use patina_amqp_types::definitions::{MAJOR, MINOR, REVISION};

const PREFIX: &[u8; 4] = b"AMQP";

/// Protocol header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolHeader {
    pub id: ProtocolId,
    pub major: u8,
    pub minor: u8,
    pub revision: u8,
}

impl ProtocolHeader {
    fn with_id(id: ProtocolId) -> Self {
        Self {
            id,
            major: MAJOR,
            minor: MINOR,
            revision: REVISION,
        }
    }

    /// Header of the AMQP 1.0.0 protocol
    pub fn amqp() -> Self {
        Self::with_id(ProtocolId::Amqp)
    }

    /// Header that starts the SASL layer
    pub fn sasl() -> Self {
        Self::with_id(ProtocolId::Sasl)
    }
}

impl From<ProtocolHeader> for [u8; 8] {
    fn from(header: ProtocolHeader) -> Self {
        let mut buf = [0u8; 8];
        buf[..4].copy_from_slice(PREFIX);
        buf[4] = header.id as u8;
        buf[5] = header.major;
        buf[6] = header.minor;
        buf[7] = header.revision;
        buf
    }
}

/// Fails with the raw bytes if they are not an AMQP or SASL header
impl TryFrom<[u8; 8]> for ProtocolHeader {
    type Error = [u8; 8];

    fn try_from(buf: [u8; 8]) -> Result<Self, Self::Error> {
        if &buf[..4] != PREFIX {
            return Err(buf);
        }
        let id = match buf[4] {
            0x0 => ProtocolId::Amqp,
            0x3 => ProtocolId::Sasl,
            // TLS (0x2) is never offered
            _ => return Err(buf),
        };
        Ok(Self {
            id,
            major: buf[5],
            minor: buf[6],
            revision: buf[7],
        })
    }
}

/// Protocol id carried in the fifth byte of the header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProtocolId {
    Amqp = 0x0,
    Sasl = 0x3,
}
