//! 3.5.3 Source

use serde_amqp::macros::{DeserializeComposite, SerializeComposite};

use crate::{definitions::Fields, primitives::Symbol, Value};

use super::terminus::{TerminusDurability, TerminusExpiryPolicy};

/// 3.5.3 Source
/// <type name="source" class="composite" source="list" provides="source">
///     <descriptor name="amqp:source:list" code="0x00000000:0x00000028"/>
/// </type>
#[derive(Debug, Clone, Default, PartialEq, SerializeComposite, DeserializeComposite)]
#[amqp_contract(
    name = "amqp:source:list",
    code = "0x0000_0000_0000_0028",
    encoding = "list",
    rename_all = "kebab-case"
)]
pub struct Source {
    /// <field name="address" type="*" requires="address"/>
    pub address: Option<String>,

    /// <field name="durable" type="terminus-durability" default="none"/>
    #[amqp_contract(default)]
    pub durable: TerminusDurability,

    /// <field name="expiry-policy" type="terminus-expiry-policy" default="session-end"/>
    #[amqp_contract(default)]
    pub expiry_policy: TerminusExpiryPolicy,

    /// <field name="timeout" type="seconds" default="0"/>
    #[amqp_contract(default)]
    pub timeout: u32,

    /// <field name="dynamic" type="boolean" default="false"/>
    #[amqp_contract(default)]
    pub dynamic: bool,

    /// <field name="dynamic-node-properties" type="node-properties"/>
    pub dynamic_node_properties: Option<Fields>,

    /// <field name="distribution-mode" type="symbol" requires="distribution-mode"/>
    pub distribution_mode: Option<Symbol>,

    /// <field name="filter" type="filter-set"/>
    pub filter: Option<Value>,

    /// <field name="default-outcome" type="*" requires="outcome"/>
    pub default_outcome: Option<Value>,

    /// <field name="outcomes" type="symbol" multiple="true"/>
    pub outcomes: Option<Vec<Symbol>>,

    /// <field name="capabilities" type="symbol" multiple="true"/>
    pub capabilities: Option<Vec<Symbol>>,
}

impl Source {
    /// A source with only the address set
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Default::default()
        }
    }
}

impl<T: Into<String>> From<T> for Source {
    fn from(address: T) -> Self {
        Self::with_address(address)
    }
}
