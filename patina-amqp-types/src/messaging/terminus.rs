//! 3.5.5 Terminus Durability and 3.5.6 Terminus Expiry Policy

use std::convert::{TryFrom, TryInto};

use serde::{de, ser};
use serde_amqp::primitives::Symbol;
use serde_repr::{Deserialize_repr, Serialize_repr};

/// 3.5.5 Terminus Durability
/// Durability policy for a terminus.
/// <type name="terminus-durability" class="restricted" source="uint">
/// </type>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize_repr, Deserialize_repr)]
#[repr(u32)]
pub enum TerminusDurability {
    /// <choice name="none" value="0"/>
    #[default]
    None = 0,

    /// <choice name="configuration" value="1"/>
    Configuration = 1,

    /// <choice name="unsettled-state" value="2"/>
    UnsettledState = 2,
}

/// 3.5.6 Terminus Expiry Policy
/// <type name="terminus-expiry-policy" class="restricted" source="symbol">
/// </type>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminusExpiryPolicy {
    /// <choice name="link-detach" value="link-detach"/>
    LinkDetach,

    /// <choice name="session-end" value="session-end"/>
    #[default]
    SessionEnd,

    /// <choice name="connection-close" value="connection-close"/>
    ConnectionClose,

    /// <choice name="never" value="never"/>
    Never,
}

impl TerminusExpiryPolicy {
    /// The symbol this policy is encoded as
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminusExpiryPolicy::LinkDetach => "link-detach",
            TerminusExpiryPolicy::SessionEnd => "session-end",
            TerminusExpiryPolicy::ConnectionClose => "connection-close",
            TerminusExpiryPolicy::Never => "never",
        }
    }
}

impl<'a> TryFrom<&'a str> for TerminusExpiryPolicy {
    type Error = &'a str;

    fn try_from(value: &'a str) -> Result<Self, Self::Error> {
        let val = match value {
            "link-detach" => TerminusExpiryPolicy::LinkDetach,
            "session-end" => TerminusExpiryPolicy::SessionEnd,
            "connection-close" => TerminusExpiryPolicy::ConnectionClose,
            "never" => TerminusExpiryPolicy::Never,
            _ => return Err(value),
        };
        Ok(val)
    }
}

impl ser::Serialize for TerminusExpiryPolicy {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        Symbol::from(self.as_str()).serialize(serializer)
    }
}

impl<'de> de::Deserialize<'de> for TerminusExpiryPolicy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let symbol = Symbol::deserialize(deserializer)?;
        symbol
            .as_str()
            .try_into()
            .map_err(|_| de::Error::custom("Invalid symbol value for TerminusExpiryPolicy"))
    }
}
