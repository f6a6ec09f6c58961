//! An AMQP 1.0 message and its body

use std::fmt::Display;

use bytes::{Bytes, BytesMut};
use serde_amqp::{from_slice, primitives::Binary, to_vec, Value};

use crate::{error::Error, scan};

use super::format::{
    section_code, AmqpSequence, AmqpValue, ApplicationProperties, Data, Properties,
    AMQP_SEQUENCE_CODE, AMQP_VALUE_CODE, APPLICATION_PROPERTIES_CODE, DATA_CODE,
    DELIVERY_ANNOTATIONS_CODE, FOOTER_CODE, HEADER_CODE, MESSAGE_ANNOTATIONS_CODE,
    PROPERTIES_CODE,
};

/// The body of a message
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// One or more `data` sections, concatenated
    Data(Bytes),

    /// One or more `amqp-sequence` sections, concatenated
    Sequence(Vec<Value>),

    /// A single `amqp-value` section
    Value(Value),

    /// No body section. Encoded as an `amqp-value` holding null
    Empty,
}

impl Default for Body {
    fn default() -> Self {
        Body::Empty
    }
}

impl Body {
    /// The bytes of a `data` body
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Body::Data(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// The string of an `amqp-value` body holding a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Body::Value(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    fn encode(self, dst: &mut BytesMut) -> Result<(), Error> {
        let section = match self {
            Body::Data(bytes) => to_vec(&Data(Binary::from(bytes.to_vec())))?,
            Body::Sequence(items) => to_vec(&AmqpSequence(items))?,
            Body::Value(value) => to_vec(&AmqpValue(value))?,
            Body::Empty => to_vec(&AmqpValue(Value::Null))?,
        };
        dst.extend_from_slice(&section);
        Ok(())
    }
}

impl Display for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Data(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
            Body::Value(Value::String(s)) => f.write_str(s),
            Body::Value(value) => write!(f, "{:?}", value),
            Body::Sequence(items) => write!(f, "{:?}", items),
            Body::Empty => Ok(()),
        }
    }
}

/// An AMQP message.
///
/// Only the properties, application-properties and body sections are kept. The header,
/// annotations and footer are skipped when a message is decoded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    properties: Option<Properties>,
    application_properties: Option<ApplicationProperties>,
    body: Body,
}

impl Message {
    /// Creates a message with the given body
    pub fn new(body: Body) -> Self {
        Self {
            properties: None,
            application_properties: None,
            body,
        }
    }

    /// Creates a builder for [`Message`]
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// The properties section
    pub fn properties(&self) -> Option<&Properties> {
        self.properties.as_ref()
    }

    /// The application-properties section
    pub fn application_properties(&self) -> Option<&ApplicationProperties> {
        self.application_properties.as_ref()
    }

    /// The body
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Consumes the message and returns the body
    pub fn into_body(self) -> Body {
        self.body
    }

    /// Encodes the message sections in order
    pub fn encode(self) -> Result<Bytes, Error> {
        let mut buf = BytesMut::new();
        if let Some(properties) = self.properties {
            buf.extend_from_slice(&to_vec(&properties)?);
        }
        if let Some(application_properties) = self.application_properties {
            buf.extend_from_slice(&to_vec(&application_properties)?);
        }
        self.body.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decodes a message from the payload of a transfer
    pub fn decode(src: Bytes) -> Result<Self, Error> {
        let mut message = Message::default();
        let mut data: Option<BytesMut> = None;
        let mut sequence: Option<Vec<Value>> = None;

        let mut rest = &src[..];
        while !rest.is_empty() {
            let len = scan::value_len(rest)?;
            let (section, tail) = rest.split_at(len);
            rest = tail;

            let descriptor = scan::peek_descriptor(section)?.ok_or_else(|| {
                Error::InvalidValue("message section is not a described type".to_string())
            })?;
            let code = section_code(&descriptor).ok_or(Error::UnknownDescriptor(descriptor))?;

            match code {
                HEADER_CODE | DELIVERY_ANNOTATIONS_CODE | MESSAGE_ANNOTATIONS_CODE
                | FOOTER_CODE => {}
                PROPERTIES_CODE => message.properties = Some(from_slice(section)?),
                APPLICATION_PROPERTIES_CODE => {
                    message.application_properties = Some(from_slice(section)?)
                }
                DATA_CODE => {
                    let Data(bytes) = from_slice(section)?;
                    data.get_or_insert_with(BytesMut::new)
                        .extend_from_slice(&bytes);
                }
                AMQP_SEQUENCE_CODE => {
                    let AmqpSequence(items) = from_slice(section)?;
                    sequence.get_or_insert_with(Vec::new).extend(items);
                }
                AMQP_VALUE_CODE => {
                    let AmqpValue(value) = from_slice(section)?;
                    message.body = Body::Value(value);
                }
                other => return Err(Error::UnknownDescriptor(crate::Descriptor::Code(other))),
            }
        }

        if let Some(data) = data {
            message.body = Body::Data(data.freeze());
        } else if let Some(sequence) = sequence {
            message.body = Body::Sequence(sequence);
        }
        Ok(message)
    }
}

impl From<&str> for Message {
    fn from(value: &str) -> Self {
        Message::new(Body::Value(Value::String(value.to_string())))
    }
}

impl From<String> for Message {
    fn from(value: String) -> Self {
        Message::new(Body::Value(Value::String(value)))
    }
}

impl From<Bytes> for Message {
    fn from(value: Bytes) -> Self {
        Message::new(Body::Data(value))
    }
}

impl From<Vec<u8>> for Message {
    fn from(value: Vec<u8>) -> Self {
        Message::new(Body::Data(Bytes::from(value)))
    }
}

impl From<Body> for Message {
    fn from(body: Body) -> Self {
        Message::new(body)
    }
}

/// Builder for [`Message`]
#[derive(Debug, Clone, Default)]
pub struct Builder {
    properties: Option<Properties>,
    application_properties: Option<ApplicationProperties>,
    body: Body,
}

impl Builder {
    /// Sets the properties section
    pub fn properties(mut self, properties: Properties) -> Self {
        self.properties = Some(properties);
        self
    }

    /// Adds one application property
    pub fn application_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.application_properties
            .get_or_insert_with(ApplicationProperties::new)
            .insert(key, value);
        self
    }

    /// Sets the body to a single `data` section
    pub fn data(mut self, data: impl Into<Bytes>) -> Self {
        self.body = Body::Data(data.into());
        self
    }

    /// Sets the body to a single `amqp-value` section
    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.body = Body::Value(value.into());
        self
    }

    /// Sets the body to a single `amqp-sequence` section
    pub fn sequence(mut self, items: Vec<Value>) -> Self {
        self.body = Body::Sequence(items);
        self
    }

    /// Builds the message
    pub fn build(self) -> Message {
        Message {
            properties: self.properties,
            application_properties: self.application_properties,
            body: self.body,
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_amqp::{primitives::Binary, to_vec, Value};

    use crate::{
        error::Error,
        messaging::{Data, Properties},
    };

    use super::{Body, Message};

    #[test]
    fn hello_world_is_an_amqp_value() {
        let encoded = Message::from("Hello World!").encode().unwrap();
        let mut expected = vec![0x00, 0x53, 0x77, 0xa1, 12];
        expected.extend_from_slice(b"Hello World!");
        assert_eq!(&encoded[..], &expected[..]);

        let decoded = Message::decode(encoded).unwrap();
        assert_eq!(decoded.body().as_str(), Some("Hello World!"));
    }

    #[test]
    fn all_kept_sections() {
        let message = Message::builder()
            .properties(Properties {
                message_id: Some(Value::Ulong(1)),
                subject: Some("greeting".into()),
                ..Default::default()
            })
            .application_property("lang", "en")
            .application_property("count", 3i32)
            .data(Bytes::from_static(b"payload"))
            .build();
        let decoded = Message::decode(message.clone().encode().unwrap()).unwrap();
        assert_eq!(decoded, message);
        let app = decoded.application_properties().unwrap();
        assert_eq!(app.get("count"), Some(&Value::Int(3)));
        assert_eq!(decoded.body().as_bytes(), Some(&b"payload"[..]));
    }

    #[test]
    fn header_and_annotations_are_skipped() {
        // header with durable = true, then empty message annotations
        let mut buf = vec![0x00, 0x53, 0x70, 0xc0, 0x02, 0x01, 0x41];
        buf.extend_from_slice(&[0x00, 0x53, 0x72, 0xc1, 0x01, 0x00]);
        buf.extend(to_vec(&Data(Binary::from(b"ab".to_vec()))).unwrap());
        buf.extend(to_vec(&Data(Binary::from(b"cd".to_vec()))).unwrap());
        // empty footer
        buf.extend_from_slice(&[0x00, 0x53, 0x78, 0xc1, 0x01, 0x00]);

        let message = Message::decode(Bytes::from(buf)).unwrap();
        assert_eq!(message.body(), &Body::Data(Bytes::from_static(b"abcd")));
        assert!(message.properties().is_none());
    }

    #[test]
    fn undescribed_section_is_rejected() {
        assert!(matches!(
            Message::decode(Bytes::from_static(&[0x41])),
            Err(Error::InvalidValue(_))
        ));
    }

    #[test]
    fn unknown_section_is_rejected() {
        assert!(matches!(
            Message::decode(Bytes::from_static(&[0x00, 0x53, 0x24, 0x45])),
            Err(Error::UnknownDescriptor(_))
        ));
    }

    #[test]
    fn nested_section_is_rejected() {
        let mut buf = vec![0x00; 100];
        buf.extend_from_slice(&[0x53, 0x77, 0x40]);
        assert_eq!(Message::decode(Bytes::from(buf)), Err(Error::TooDeep));
    }

    #[test]
    fn empty_body_is_null_value() {
        let encoded = Message::default().encode().unwrap();
        assert_eq!(&encoded[..], &[0x00, 0x53, 0x77, 0x40]);
        assert_eq!(
            Message::decode(encoded).unwrap().body(),
            &Body::Value(Value::Null)
        );
    }
}
