//! Performatives defined in AMQP 1.0 specification Part 2.7

mod attach;
mod begin;
mod close;
mod detach;
mod disposition;
mod end;
mod flow;
mod open;
mod transfer;

pub use attach::*;
pub use begin::*;
pub use close::*;
pub use detach::*;
pub use disposition::*;
pub use end::*;
pub use flow::*;
pub use open::*;
pub use transfer::*;

use serde::{
    de::{self, VariantAccess},
    ser::{self, Serialize},
};

use crate::Descriptor;

/// AMQP 1.0 Performatives
#[derive(Debug, Clone, PartialEq)]
pub enum Performative {
    /// Open
    Open(Open),

    /// Begin
    Begin(Begin),

    /// Attach
    Attach(Attach),

    /// Flow
    Flow(Flow),

    /// Transfer
    Transfer(Transfer),

    /// Disposition
    Disposition(Disposition),

    /// Detach
    Detach(Detach),

    /// End
    End(End),

    /// Close
    Close(Close),
}

impl Performative {
    /// Name of the performative, used in logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            Performative::Open(_) => "open",
            Performative::Begin(_) => "begin",
            Performative::Attach(_) => "attach",
            Performative::Flow(_) => "flow",
            Performative::Transfer(_) => "transfer",
            Performative::Disposition(_) => "disposition",
            Performative::Detach(_) => "detach",
            Performative::End(_) => "end",
            Performative::Close(_) => "close",
        }
    }

    /// Numeric descriptor of the performative
    pub fn descriptor_code(&self) -> u64 {
        match self {
            Performative::Open(_) => 0x10,
            Performative::Begin(_) => 0x11,
            Performative::Attach(_) => 0x12,
            Performative::Flow(_) => 0x13,
            Performative::Transfer(_) => 0x14,
            Performative::Disposition(_) => 0x15,
            Performative::Detach(_) => 0x16,
            Performative::End(_) => 0x17,
            Performative::Close(_) => 0x18,
        }
    }

    /// Whether the descriptor names one of the performatives
    pub fn recognizes(descriptor: &Descriptor) -> bool {
        match descriptor {
            Descriptor::Code(code) => Field::from_code(*code).is_some(),
            Descriptor::Name(name) => Field::from_name(name.as_str()).is_some(),
        }
    }
}

impl ser::Serialize for Performative {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Performative::Open(value) => value.serialize(serializer),
            Performative::Begin(value) => value.serialize(serializer),
            Performative::Attach(value) => value.serialize(serializer),
            Performative::Flow(value) => value.serialize(serializer),
            Performative::Transfer(value) => value.serialize(serializer),
            Performative::Disposition(value) => value.serialize(serializer),
            Performative::Detach(value) => value.serialize(serializer),
            Performative::End(value) => value.serialize(serializer),
            Performative::Close(value) => value.serialize(serializer),
        }
    }
}

enum Field {
    Open,
    Begin,
    Attach,
    Flow,
    Transfer,
    Disposition,
    Detach,
    End,
    Close,
}

impl Field {
    fn from_name(name: &str) -> Option<Self> {
        let field = match name {
            "amqp:open:list" => Field::Open,
            "amqp:begin:list" => Field::Begin,
            "amqp:attach:list" => Field::Attach,
            "amqp:flow:list" => Field::Flow,
            "amqp:transfer:list" => Field::Transfer,
            "amqp:disposition:list" => Field::Disposition,
            "amqp:detach:list" => Field::Detach,
            "amqp:end:list" => Field::End,
            "amqp:close:list" => Field::Close,
            _ => return None,
        };
        Some(field)
    }

    fn from_code(code: u64) -> Option<Self> {
        let field = match code {
            0x0000_0000_0000_0010 => Field::Open,
            0x0000_0000_0000_0011 => Field::Begin,
            0x0000_0000_0000_0012 => Field::Attach,
            0x0000_0000_0000_0013 => Field::Flow,
            0x0000_0000_0000_0014 => Field::Transfer,
            0x0000_0000_0000_0015 => Field::Disposition,
            0x0000_0000_0000_0016 => Field::Detach,
            0x0000_0000_0000_0017 => Field::End,
            0x0000_0000_0000_0018 => Field::Close,
            _ => return None,
        };
        Some(field)
    }
}

struct FieldVisitor {}

impl<'de> de::Visitor<'de> for FieldVisitor {
    type Value = Field;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("performative descriptor")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Field::from_name(v).ok_or_else(|| de::Error::custom("Wrong symbol value for descriptor"))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Field::from_code(v).ok_or_else(|| {
            de::Error::custom(format!("Wrong code value for descriptor, found {:#x?}", v))
        })
    }
}

impl<'de> de::Deserialize<'de> for Field {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_identifier(FieldVisitor {})
    }
}

struct Visitor {}

impl<'de> de::Visitor<'de> for Visitor {
    type Value = Performative;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("enum Performative")
    }

    fn visit_enum<A>(self, data: A) -> Result<Self::Value, A::Error>
    where
        A: de::EnumAccess<'de>,
    {
        let (val, variant) = data.variant()?;

        let performative = match val {
            Field::Open => Performative::Open(variant.newtype_variant()?),
            Field::Begin => Performative::Begin(variant.newtype_variant()?),
            Field::Attach => Performative::Attach(variant.newtype_variant()?),
            Field::Flow => Performative::Flow(variant.newtype_variant()?),
            Field::Transfer => Performative::Transfer(variant.newtype_variant()?),
            Field::Disposition => Performative::Disposition(variant.newtype_variant()?),
            Field::Detach => Performative::Detach(variant.newtype_variant()?),
            Field::End => Performative::End(variant.newtype_variant()?),
            Field::Close => Performative::Close(variant.newtype_variant()?),
        };
        Ok(performative)
    }
}

impl<'de> de::Deserialize<'de> for Performative {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        const VARIANTS: &[&str] = &[
            "amqp:open:list",
            "amqp:begin:list",
            "amqp:attach:list",
            "amqp:flow:list",
            "amqp:transfer:list",
            "amqp:disposition:list",
            "amqp:detach:list",
            "amqp:end:list",
            "amqp:close:list",
        ];
        deserializer.deserialize_enum("Performative", VARIANTS, Visitor {})
    }
}

macro_rules! impl_from_for_performative {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for Performative {
                fn from(value: $variant) -> Self {
                    Performative::$variant(value)
                }
            }
        )*
    };
}

impl_from_for_performative!(Open, Begin, Attach, Flow, Transfer, Disposition, Detach, End, Close);
