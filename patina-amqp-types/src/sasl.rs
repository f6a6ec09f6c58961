//! Part 5.3 SASL frame bodies

use serde::{
    de::{self, VariantAccess},
    ser::{self, Serialize},
};
use serde_amqp::{
    macros::{DeserializeComposite, SerializeComposite},
    primitives::{Binary, Symbol},
};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::Descriptor;

/// 5.3.3.1 SASL Mechanisms
/// Advertise available sasl mechanisms.
/// <type name="sasl-mechanisms" class="composite" source="list" provides="sasl-frame">
///     <descriptor name="amqp:sasl-mechanisms:list" code="0x00000000:0x00000040"/>
/// </type>
#[derive(Debug, Clone, PartialEq, SerializeComposite, DeserializeComposite)]
#[amqp_contract(
    name = "amqp:sasl-mechanisms:list",
    code = "0x0000_0000_0000_0040",
    encoding = "list",
    rename_all = "kebab-case"
)]
pub struct SaslMechanisms {
    /// <field name="sasl-server-mechanisms" type="symbol" multiple="true" mandatory="true"/>
    pub sasl_server_mechanisms: Vec<Symbol>,
}

/// 5.3.3.2 SASL Init
/// Initiate sasl exchange.
/// <type name="sasl-init" class="composite" source="list" provides="sasl-frame">
///     <descriptor name="amqp:sasl-init:list" code="0x00000000:0x00000041"/>
/// </type>
#[derive(Debug, Clone, PartialEq, SerializeComposite, DeserializeComposite)]
#[amqp_contract(
    name = "amqp:sasl-init:list",
    code = "0x0000_0000_0000_0041",
    encoding = "list",
    rename_all = "kebab-case"
)]
pub struct SaslInit {
    /// <field name="mechanism" type="symbol" mandatory="true"/>
    pub mechanism: Symbol,

    /// <field name="initial-response" type="binary"/>
    pub initial_response: Option<Binary>,

    /// <field name="hostname" type="string"/>
    pub hostname: Option<String>,
}

/// 5.3.3.3 SASL Challenge
#[derive(Debug, Clone, PartialEq, SerializeComposite, DeserializeComposite)]
#[amqp_contract(
    name = "amqp:sasl-challenge:list",
    code = "0x0000_0000_0000_0042",
    encoding = "list",
    rename_all = "kebab-case"
)]
pub struct SaslChallenge {
    /// <field name="challenge" type="binary" mandatory="true"/>
    pub challenge: Binary,
}

/// 5.3.3.4 SASL Response
#[derive(Debug, Clone, PartialEq, SerializeComposite, DeserializeComposite)]
#[amqp_contract(
    name = "amqp:sasl-response:list",
    code = "0x0000_0000_0000_0043",
    encoding = "list",
    rename_all = "kebab-case"
)]
pub struct SaslResponse {
    /// <field name="response" type="binary" mandatory="true"/>
    pub response: Binary,
}

/// 5.3.3.6 SASL Code
/// Codes to indicate the outcome of the sasl dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum SaslCode {
    /// 0 Connection authentication succeeded.
    Ok = 0,
    /// 1 Connection authentication failed due to an unspecified problem with the supplied
    /// credentials.
    Auth = 1,
    /// 2 Connection authentication failed due to a system error.
    Sys = 2,
    /// 3 Connection authentication failed due to a system error that is unlikely to be
    /// corrected without intervention.
    SysPerm = 3,
    /// 4 Connection authentication failed due to a transient system error.
    SysTemp = 4,
}

/// 5.3.3.5 SASL Outcome
/// Indicates the outcome of the sasl dialog.
/// <type name="sasl-outcome" class="composite" source="list" provides="sasl-frame">
///     <descriptor name="amqp:sasl-outcome:list" code="0x00000000:0x00000044"/>
/// </type>
#[derive(Debug, Clone, PartialEq, SerializeComposite, DeserializeComposite)]
#[amqp_contract(
    name = "amqp:sasl-outcome:list",
    code = "0x0000_0000_0000_0044",
    encoding = "list",
    rename_all = "kebab-case"
)]
pub struct SaslOutcome {
    /// <field name="code" type="sasl-code" mandatory="true"/>
    pub code: SaslCode,

    /// <field name="additional-data" type="binary"/>
    pub additional_data: Option<Binary>,
}

/// Body of a SASL frame.
///
/// Challenge and response are decoded only to be refused by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum SaslFrameBody {
    /// sasl-mechanisms
    Mechanisms(SaslMechanisms),

    /// sasl-init
    Init(SaslInit),

    /// sasl-challenge
    Challenge(SaslChallenge),

    /// sasl-response
    Response(SaslResponse),

    /// sasl-outcome
    Outcome(SaslOutcome),
}

impl SaslFrameBody {
    /// Whether the descriptor names one of the SASL frame bodies
    pub fn recognizes(descriptor: &Descriptor) -> bool {
        match descriptor {
            Descriptor::Code(code) => Field::from_code(*code).is_some(),
            Descriptor::Name(name) => Field::from_name(name.as_str()).is_some(),
        }
    }
}

impl ser::Serialize for SaslFrameBody {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            SaslFrameBody::Mechanisms(value) => value.serialize(serializer),
            SaslFrameBody::Init(value) => value.serialize(serializer),
            SaslFrameBody::Challenge(value) => value.serialize(serializer),
            SaslFrameBody::Response(value) => value.serialize(serializer),
            SaslFrameBody::Outcome(value) => value.serialize(serializer),
        }
    }
}

enum Field {
    Mechanisms,
    Init,
    Challenge,
    Response,
    Outcome,
}

impl Field {
    fn from_name(name: &str) -> Option<Self> {
        let field = match name {
            "amqp:sasl-mechanisms:list" => Field::Mechanisms,
            "amqp:sasl-init:list" => Field::Init,
            "amqp:sasl-challenge:list" => Field::Challenge,
            "amqp:sasl-response:list" => Field::Response,
            "amqp:sasl-outcome:list" => Field::Outcome,
            _ => return None,
        };
        Some(field)
    }

    fn from_code(code: u64) -> Option<Self> {
        let field = match code {
            0x0000_0000_0000_0040 => Field::Mechanisms,
            0x0000_0000_0000_0041 => Field::Init,
            0x0000_0000_0000_0042 => Field::Challenge,
            0x0000_0000_0000_0043 => Field::Response,
            0x0000_0000_0000_0044 => Field::Outcome,
            _ => return None,
        };
        Some(field)
    }
}

struct FieldVisitor {}

impl<'de> de::Visitor<'de> for FieldVisitor {
    type Value = Field;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("SASL FrameBody variant identifier")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Field::from_name(v)
            .ok_or_else(|| de::Error::custom("Wrong symbol value for SASL frame body descriptor"))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Field::from_code(v)
            .ok_or_else(|| de::Error::custom("Wrong code value for SASL frame body descriptor"))
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
    type Value = SaslFrameBody;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("enum SASL FrameBody")
    }

    fn visit_enum<A>(self, data: A) -> Result<Self::Value, A::Error>
    where
        A: de::EnumAccess<'de>,
    {
        let (val, variant) = data.variant()?;

        match val {
            Field::Mechanisms => variant.newtype_variant().map(SaslFrameBody::Mechanisms),
            Field::Init => variant.newtype_variant().map(SaslFrameBody::Init),
            Field::Challenge => variant.newtype_variant().map(SaslFrameBody::Challenge),
            Field::Response => variant.newtype_variant().map(SaslFrameBody::Response),
            Field::Outcome => variant.newtype_variant().map(SaslFrameBody::Outcome),
        }
    }
}

impl<'de> de::Deserialize<'de> for SaslFrameBody {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        const VARIANTS: &[&str] = &[
            "amqp:sasl-mechanisms:list",
            "amqp:sasl-init:list",
            "amqp:sasl-challenge:list",
            "amqp:sasl-response:list",
            "amqp:sasl-outcome:list",
        ];
        deserializer.deserialize_enum("SaslFrameBody", VARIANTS, Visitor {})
    }
}
