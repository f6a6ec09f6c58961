use serde_amqp::{
    macros::{DeserializeComposite, SerializeComposite},
    primitives::{Binary, OrderedMap, Symbol, Timestamp},
    Value,
};

use crate::{definitions::SequenceNo, Descriptor};

/// 3.2.1 Header
pub const HEADER_CODE: u64 = 0x0000_0000_0000_0070;

/// 3.2.2 Delivery Annotations
pub const DELIVERY_ANNOTATIONS_CODE: u64 = 0x0000_0000_0000_0071;

/// 3.2.3 Message Annotations
pub const MESSAGE_ANNOTATIONS_CODE: u64 = 0x0000_0000_0000_0072;

/// 3.2.4 Properties
pub const PROPERTIES_CODE: u64 = 0x0000_0000_0000_0073;

/// 3.2.5 Application Properties
pub const APPLICATION_PROPERTIES_CODE: u64 = 0x0000_0000_0000_0074;

/// 3.2.6 Data
pub const DATA_CODE: u64 = 0x0000_0000_0000_0075;

/// 3.2.7 AMQP Sequence
pub const AMQP_SEQUENCE_CODE: u64 = 0x0000_0000_0000_0076;

/// 3.2.8 AMQP Value
pub const AMQP_VALUE_CODE: u64 = 0x0000_0000_0000_0077;

/// 3.2.9 Footer
pub const FOOTER_CODE: u64 = 0x0000_0000_0000_0078;

/// Numeric code of the message section named by a descriptor
pub(crate) fn section_code(descriptor: &Descriptor) -> Option<u64> {
    let name = match descriptor {
        Descriptor::Code(code @ HEADER_CODE..=FOOTER_CODE) => return Some(*code),
        Descriptor::Code(_) => return None,
        Descriptor::Name(name) => name.as_str(),
    };
    let code = match name {
        "amqp:header:list" => HEADER_CODE,
        "amqp:delivery-annotations:map" => DELIVERY_ANNOTATIONS_CODE,
        "amqp:message-annotations:map" => MESSAGE_ANNOTATIONS_CODE,
        "amqp:properties:list" => PROPERTIES_CODE,
        "amqp:application-properties:map" => APPLICATION_PROPERTIES_CODE,
        "amqp:data:binary" => DATA_CODE,
        "amqp:amqp-sequence:list" => AMQP_SEQUENCE_CODE,
        "amqp:amqp-value:*" => AMQP_VALUE_CODE,
        "amqp:footer:map" => FOOTER_CODE,
        _ => return None,
    };
    Some(code)
}

/// 3.2.4 Properties
/// Immutable properties of the message.
/// <type name="properties" class="composite" source="list" provides="section">
///     <descriptor name="amqp:properties:list" code="0x00000000:0x00000073"/>
/// </type>
#[derive(Debug, Clone, PartialEq, Default, SerializeComposite, DeserializeComposite)]
#[amqp_contract(
    name = "amqp:properties:list",
    code = "0x0000_0000_0000_0073",
    encoding = "list",
    rename_all = "kebab-case"
)]
pub struct Properties {
    /// <field name="message-id" type="*" requires="message-id"/>
    pub message_id: Option<Value>,

    /// <field name="user-id" type="binary"/>
    pub user_id: Option<Binary>,

    /// <field name="to" type="*" requires="address"/>
    pub to: Option<String>,

    /// <field name="subject" type="string"/>
    pub subject: Option<String>,

    /// <field name="reply-to" type="*" requires="address"/>
    pub reply_to: Option<String>,

    /// <field name="correlation-id" type="*" requires="message-id"/>
    pub correlation_id: Option<Value>,

    /// <field name="content-type" type="symbol"/>
    pub content_type: Option<Symbol>,

    /// <field name="content-encoding" type="symbol"/>
    pub content_encoding: Option<Symbol>,

    /// <field name="absolute-expiry-time" type="timestamp"/>
    pub absolute_expiry_time: Option<Timestamp>,

    /// <field name="creation-time" type="timestamp"/>
    pub creation_time: Option<Timestamp>,

    /// <field name="group-id" type="string"/>
    pub group_id: Option<String>,

    /// <field name="group-sequence" type="sequence-no"/>
    pub group_sequence: Option<SequenceNo>,

    /// <field name="reply-to-group-id" type="string"/>
    pub reply_to_group_id: Option<String>,
}

/// 3.2.5 Application Properties
/// <type name="application-properties" class="restricted" source="map" provides="section">
///     <descriptor name="amqp:application-properties:map" code="0x00000000:0x00000074"/>
/// </type>
///
/// The insertion order of the keys is kept.
#[derive(Debug, Clone, Default, PartialEq, SerializeComposite, DeserializeComposite)]
#[amqp_contract(
    name = "amqp:application-properties:map",
    code = "0x0000_0000_0000_0074",
    encoding = "basic"
)]
pub struct ApplicationProperties(pub OrderedMap<String, Value>);

impl ApplicationProperties {
    /// Creates an empty map
    pub fn new() -> Self {
        Self(OrderedMap::new())
    }

    /// Looks up a property by key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Inserts a property, replacing any previous value under the same key
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Number of properties
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// 3.2.6 Data
/// <type name="data" class="restricted" source="binary" provides="section">
///     <descriptor name="amqp:data:binary" code="0x00000000:0x00000075"/>
/// </type>
#[derive(Debug, Clone, PartialEq, SerializeComposite, DeserializeComposite)]
#[amqp_contract(
    name = "amqp:data:binary",
    code = "0x0000_0000_0000_0075",
    encoding = "basic"
)]
pub struct Data(pub Binary);

/// 3.2.7 AMQP Sequence
/// <type name="amqp-sequence" class="restricted" source="list" provides="section">
///     <descriptor name="amqp:amqp-sequence:list" code="0x00000000:0x00000076"/>
/// </type>
#[derive(Debug, Clone, Default, PartialEq, SerializeComposite, DeserializeComposite)]
#[amqp_contract(
    name = "amqp:amqp-sequence:list",
    code = "0x0000_0000_0000_0076",
    encoding = "basic"
)]
pub struct AmqpSequence(pub Vec<Value>);

/// 3.2.8 AMQP Value
/// <type name="amqp-value" class="restricted" source="*" provides="section">
///     <descriptor name="amqp:amqp-value:*" code="0x00000000:0x00000077"/>
/// </type>
#[derive(Debug, Clone, PartialEq, SerializeComposite, DeserializeComposite)]
#[amqp_contract(
    name = "amqp:amqp-value:*",
    code = "0x0000_0000_0000_0077",
    encoding = "basic"
)]
pub struct AmqpValue(pub Value);

#[cfg(test)]
mod tests {
    use serde_amqp::{from_slice, primitives::Binary, to_vec, Value};

    use crate::{primitives::Symbol, Descriptor};

    use super::{section_code, ApplicationProperties, Data, DATA_CODE, FOOTER_CODE};

    #[test]
    fn data_is_a_described_binary() {
        let data = Data(Binary::from(vec![0xaa, 0xbb]));
        let buf = to_vec(&data).unwrap();
        assert_eq!(buf, vec![0x00, 0x53, 0x75, 0xa0, 0x02, 0xaa, 0xbb]);
        assert_eq!(from_slice::<Data>(&buf).unwrap(), data);
    }

    #[test]
    fn application_properties_keep_insertion_order() {
        let mut props = ApplicationProperties::new();
        props.insert("z", 1i32);
        props.insert("a", "x");
        props.insert("z", 2i32);
        let keys: Vec<&String> = props.0.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["z", "a"]);
        assert_eq!(props.get("z"), Some(&Value::Int(2)));
        assert_eq!(props.len(), 2);
    }

    #[test]
    fn section_codes() {
        assert_eq!(section_code(&Descriptor::Code(0x75)), Some(DATA_CODE));
        assert_eq!(
            section_code(&Descriptor::Name(Symbol::from("amqp:footer:map"))),
            Some(FOOTER_CODE)
        );
        assert_eq!(section_code(&Descriptor::Code(0x24)), None);
    }
}
