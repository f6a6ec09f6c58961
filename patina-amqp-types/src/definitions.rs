//! Definitions shared by the transport performatives

use std::{convert::TryFrom, fmt::Display};

use serde::{de, ser, Deserialize, Serialize};
use serde_amqp::{
    macros::{DeserializeComposite, SerializeComposite},
    primitives::{OrderedMap, Symbol},
    Value,
};
use serde_bytes::ByteBuf;

/// Major protocol version
pub const MAJOR: u8 = 1;

/// Minor protocol version
pub const MINOR: u8 = 0;

/// Protocol revision
pub const REVISION: u8 = 0;

/// The IANA assigned port number for AMQP
pub const PORT: u16 = 5672;

/// The smallest max-frame-size a peer may announce
pub const MIN_MAX_FRAME_SIZE: u32 = 512;

/// The name of a link endpoint, unique per session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle(pub u32);

/// `handle-max` of a begin defaults to the largest handle
impl Default for Handle {
    fn default() -> Self {
        Handle(u32::MAX)
    }
}

impl From<u32> for Handle {
    fn from(val: u32) -> Self {
        Self(val)
    }
}

impl From<Handle> for u32 {
    fn from(val: Handle) -> Self {
        val.0
    }
}

/// 32-bit RFC-1982 serial number
pub type SequenceNo = u32;

/// Delivery number, assigned by the sending session
pub type DeliveryNumber = SequenceNo;

/// Transfer number
pub type TransferNumber = SequenceNo;

/// A duration in milliseconds
pub type Milliseconds = u32;

/// Message format code, 0 for the standard format
pub type MessageFormat = u32;

/// Delivery tag, unique per link
pub type DeliveryTag = ByteBuf;

/// Symbol keyed map of extra properties
pub type Fields = OrderedMap<Symbol, Value>;

/// Link endpoint role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Sending end of a link, encoded as `false`
    Sender,

    /// Receiving end of a link, encoded as `true`
    Receiver,
}

impl ser::Serialize for Role {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bool(matches!(self, Role::Receiver))
    }
}

impl<'de> de::Deserialize<'de> for Role {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        match bool::deserialize(deserializer)? {
            false => Ok(Role::Sender),
            true => Ok(Role::Receiver),
        }
    }
}

/// Settlement policy for a sender
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderSettleMode {
    /// The sender sends all deliveries unsettled
    Unsettled,

    /// The sender sends all deliveries settled
    Settled,

    /// The sender may send a mixture of settled and unsettled deliveries
    Mixed,
}

impl Default for SenderSettleMode {
    fn default() -> Self {
        SenderSettleMode::Mixed
    }
}

impl From<SenderSettleMode> for u8 {
    fn from(mode: SenderSettleMode) -> Self {
        match mode {
            SenderSettleMode::Unsettled => 0,
            SenderSettleMode::Settled => 1,
            SenderSettleMode::Mixed => 2,
        }
    }
}

impl ser::Serialize for SenderSettleMode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        u8::from(*self).serialize(serializer)
    }
}

struct SenderSettleModeVisitor {}

impl de::Visitor<'_> for SenderSettleModeVisitor {
    type Value = SenderSettleMode;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("enum SenderSettleMode")
    }

    fn visit_u8<E>(self, v: u8) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        let val = match v {
            0 => SenderSettleMode::Unsettled,
            1 => SenderSettleMode::Settled,
            2 => SenderSettleMode::Mixed,
            _ => return Err(de::Error::custom("Invalid value for SenderSettleMode")),
        };
        Ok(val)
    }
}

impl<'de> de::Deserialize<'de> for SenderSettleMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_u8(SenderSettleModeVisitor {})
    }
}

/// Settlement policy for a receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverSettleMode {
    /// The receiver settles spontaneously
    First,

    /// The receiver only settles after the sender settled
    Second,
}

impl Default for ReceiverSettleMode {
    fn default() -> Self {
        ReceiverSettleMode::First
    }
}

impl ser::Serialize for ReceiverSettleMode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let code: u8 = match self {
            ReceiverSettleMode::First => 0,
            ReceiverSettleMode::Second => 1,
        };
        code.serialize(serializer)
    }
}

struct ReceiverSettleModeVisitor {}

impl de::Visitor<'_> for ReceiverSettleModeVisitor {
    type Value = ReceiverSettleMode;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("enum ReceiverSettleMode")
    }

    fn visit_u8<E>(self, v: u8) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            0 => Ok(ReceiverSettleMode::First),
            1 => Ok(ReceiverSettleMode::Second),
            _ => Err(de::Error::custom("Invalid value for ReceiverSettleMode")),
        }
    }
}

impl<'de> de::Deserialize<'de> for ReceiverSettleMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_u8(ReceiverSettleModeVisitor {})
    }
}

macro_rules! symbol_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident => $symbol:literal
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $(
                $(#[$variant_meta])*
                $variant,
            )*
        }

        impl $name {
            /// The symbol carried on the wire
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $symbol,)*
                }
            }
        }

        impl<'a> TryFrom<&'a str> for $name {
            type Error = &'a str;

            fn try_from(value: &'a str) -> Result<Self, Self::Error> {
                match value {
                    $($symbol => Ok($name::$variant),)*
                    other => Err(other),
                }
            }
        }

        impl ser::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                Symbol::from(self.as_str()).serialize(serializer)
            }
        }

        impl<'de> de::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let symbol = Symbol::deserialize(deserializer)?;
                $name::try_from(symbol.as_str()).map_err(|_| {
                    de::Error::custom(concat!("Invalid symbol value for ", stringify!($name)))
                })
            }
        }
    };
}

symbol_enum! {
    /// Shared error conditions
    pub enum AmqpError {
        /// An internal error occurred
        InternalError => "amqp:internal-error",
        /// A peer attempted to work with a remote entity that does not exist
        NotFound => "amqp:not-found",
        /// A peer attempted to work with a remote entity to which it has no access
        UnauthorizedAccess => "amqp:unauthorized-access",
        /// Data could not be decoded
        DecodeError => "amqp:decode-error",
        /// A peer exceeded its resource allocation
        ResourceLimitExceeded => "amqp:resource-limit-exceeded",
        /// The peer tried to use a frame in a manner that is inconsistent with the semantics
        NotAllowed => "amqp:not-allowed",
        /// An invalid field was passed in a frame body
        InvalidField => "amqp:invalid-field",
        /// The peer tried to use functionality that is not implemented
        NotImplemented => "amqp:not-implemented",
        /// The client attempted to work with a locked resource
        ResourceLocked => "amqp:resource-locked",
        /// The client made a request that was not allowed because a precondition failed
        PreconditionFailed => "amqp:precondition-failed",
        /// A server entity the client is working with has been deleted
        ResourceDeleted => "amqp:resource-deleted",
        /// The peer sent a frame that is not permitted in the current state
        IllegalState => "amqp:illegal-state",
        /// The peer cannot send a frame because the smallest encoding does not fit
        FrameSizeTooSmall => "amqp:frame-size-too-small",
    }
}

symbol_enum! {
    /// Symbols used to indicate connection error conditions
    pub enum ConnectionError {
        /// An operator intervened to close the connection
        ConnectionForced => "amqp:connection:forced",
        /// A valid frame header cannot be formed from the incoming byte stream
        FramingError => "amqp:connection:framing-error",
        /// The container is no longer available on the current connection
        Redirect => "amqp:connection:redirect",
    }
}

symbol_enum! {
    /// Symbols used to indicate session error conditions
    pub enum SessionError {
        /// The peer violated incoming window for the session
        WindowViolation => "amqp:session:window-violation",
        /// Input was received for a link that was detached with an error
        ErrantLink => "amqp:session:errant-link",
        /// An attach was received using a handle that is already in use
        HandleInUse => "amqp:session:handle-in-use",
        /// A frame other than attach was received referencing an unattached handle
        UnattachedHandle => "amqp:session:unattached-handle",
    }
}

symbol_enum! {
    /// Symbols used to indicate link error conditions
    pub enum LinkError {
        /// An operator intervened to detach for some reason
        DetachForced => "amqp:link:detach-forced",
        /// The peer sent more message transfers than currently allowed on the link
        TransferLimitExceeded => "amqp:link:transfer-limit-exceeded",
        /// The peer sent a larger message than is supported on the link
        MessageSizeExceeded => "amqp:link:message-size-exceeded",
        /// The address provided cannot be resolved to a terminus at the current container
        Redirect => "amqp:link:redirect",
        /// The link has been attached elsewhere, causing the existing attachment to be
        /// forcibly closed
        Stolen => "amqp:link:stolen",
    }
}

/// The condition of an [`Error`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCondition {
    /// Shared error conditions
    AmqpError(AmqpError),

    /// Connection error conditions
    ConnectionError(ConnectionError),

    /// Session error conditions
    SessionError(SessionError),

    /// Link error conditions
    LinkError(LinkError),

    /// Any other condition
    Custom(Symbol),
}

impl ErrorCondition {
    /// The symbol carried on the wire
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCondition::AmqpError(e) => e.as_str(),
            ErrorCondition::ConnectionError(e) => e.as_str(),
            ErrorCondition::SessionError(e) => e.as_str(),
            ErrorCondition::LinkError(e) => e.as_str(),
            ErrorCondition::Custom(s) => s.as_str(),
        }
    }
}

impl From<AmqpError> for ErrorCondition {
    fn from(err: AmqpError) -> Self {
        Self::AmqpError(err)
    }
}

impl From<ConnectionError> for ErrorCondition {
    fn from(err: ConnectionError) -> Self {
        Self::ConnectionError(err)
    }
}

impl From<SessionError> for ErrorCondition {
    fn from(err: SessionError) -> Self {
        Self::SessionError(err)
    }
}

impl From<LinkError> for ErrorCondition {
    fn from(err: LinkError) -> Self {
        Self::LinkError(err)
    }
}

impl From<Symbol> for ErrorCondition {
    fn from(symbol: Symbol) -> Self {
        let s = symbol.as_str();
        if let Ok(e) = AmqpError::try_from(s) {
            Self::AmqpError(e)
        } else if let Ok(e) = ConnectionError::try_from(s) {
            Self::ConnectionError(e)
        } else if let Ok(e) = SessionError::try_from(s) {
            Self::SessionError(e)
        } else if let Ok(e) = LinkError::try_from(s) {
            Self::LinkError(e)
        } else {
            Self::Custom(symbol)
        }
    }
}

impl Display for ErrorCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ser::Serialize for ErrorCondition {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::AmqpError(err) => err.serialize(serializer),
            Self::ConnectionError(err) => err.serialize(serializer),
            Self::SessionError(err) => err.serialize(serializer),
            Self::LinkError(err) => err.serialize(serializer),
            Self::Custom(err) => err.serialize(serializer),
        }
    }
}

impl<'de> de::Deserialize<'de> for ErrorCondition {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Symbol::deserialize(deserializer).map(ErrorCondition::from)
    }
}

/// Details of an error
/// <type name="error" class="composite" source="list">
///     <descriptor name="amqp:error:list" code="0x00000000:0x0000001d"/>
/// </type>
#[derive(Debug, Clone, PartialEq, SerializeComposite, DeserializeComposite)]
#[amqp_contract(
    name = "amqp:error:list",
    code = "0x0000_0000_0000_001d",
    encoding = "list",
    rename_all = "kebab-case"
)]
pub struct Error {
    /// Error condition
    pub condition: ErrorCondition,

    /// Descriptive text about the error condition
    pub description: Option<String>,

    /// Map carrying information about the error condition
    pub info: Option<Fields>,
}

impl Error {
    /// Creates a new error
    pub fn new(
        condition: impl Into<ErrorCondition>,
        description: Option<String>,
        info: Option<Fields>,
    ) -> Self {
        Self {
            condition: condition.into(),
            description,
            info,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {}", self.condition, description),
            None => write!(f, "{}", self.condition),
        }
    }
}

impl std::error::Error for Error {}
