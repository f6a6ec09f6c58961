use serde::{Deserialize, Serialize};
use serde_amqp::macros::{DeserializeComposite, SerializeComposite};

use crate::{
    definitions::{Fields, Milliseconds},
    primitives::Symbol,
};

/// Negotiate connection parameters.
/// <type name="open" class="composite" source="list" provides="frame">
///     <descriptor name="amqp:open:list" code="0x00000000:0x00000010"/>
/// </type>
#[derive(Debug, Clone, PartialEq, SerializeComposite, DeserializeComposite)]
#[amqp_contract(
    name = "amqp:open:list",
    code = "0x0000_0000_0000_0010",
    encoding = "list",
    rename_all = "kebab-case"
)]
pub struct Open {
    /// <field name="container-id" type="string" mandatory="true"/>
    pub container_id: String,

    /// <field name="hostname" type="string"/>
    pub hostname: Option<String>,

    /// <field name="max-frame-size" type="uint" default="4294967295"/>
    #[amqp_contract(default)]
    pub max_frame_size: MaxFrameSize,

    /// <field name="channel-max" type="ushort" default="65535"/>
    #[amqp_contract(default)]
    pub channel_max: ChannelMax,

    /// <field name="idle-time-out" type="milliseconds"/>
    pub idle_time_out: Option<Milliseconds>,

    /// <field name="outgoing-locales" type="ietf-language-tag" multiple="true"/>
    pub outgoing_locales: Option<Vec<Symbol>>,

    /// <field name="incoming-locales" type="ietf-language-tag" multiple="true"/>
    pub incoming_locales: Option<Vec<Symbol>>,

    /// <field name="offered-capabilities" type="symbol" multiple="true"/>
    pub offered_capabilities: Option<Vec<Symbol>>,

    /// <field name="desired-capabilities" type="symbol" multiple="true"/>
    pub desired_capabilities: Option<Vec<Symbol>>,

    /// <field name="properties" type="fields"/>
    pub properties: Option<Fields>,
}

/// Proposed maximum frame size
///
/// A simple wrapper over u32 with a default value set to `u32::MAX`, which means the peer
/// does not impose any limit. Both peers MUST accept frames of up to 512 (MIN-MAX-FRAME-SIZE)
/// octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MaxFrameSize(pub u32);

impl Default for MaxFrameSize {
    fn default() -> Self {
        MaxFrameSize(u32::MAX)
    }
}

impl From<u32> for MaxFrameSize {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<MaxFrameSize> for u32 {
    fn from(value: MaxFrameSize) -> Self {
        value.0
    }
}

/// The maximum channel number that can be used on the connection
///
/// A simple wrapper over u16 with a default value set to `u16::MAX`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelMax(pub u16);

impl Default for ChannelMax {
    fn default() -> Self {
        ChannelMax(u16::MAX)
    }
}

impl From<u16> for ChannelMax {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<ChannelMax> for u16 {
    fn from(value: ChannelMax) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use serde_amqp::{from_slice, to_vec};

    use super::{ChannelMax, MaxFrameSize, Open};

    #[test]
    fn defaults_when_absent() {
        // open with only the container-id "container"
        let mut buf = vec![0x00, 0x53, 0x10, 0xc0, 0x0c, 0x01, 0xa1, 0x09];
        buf.extend_from_slice(b"container");
        let open: Open = from_slice(&buf).unwrap();
        assert_eq!(open.container_id, "container");
        assert_eq!(open.max_frame_size, MaxFrameSize(u32::MAX));
        assert_eq!(open.channel_max, ChannelMax(u16::MAX));
        assert_eq!(open.idle_time_out, None);
    }

    #[test]
    fn trailing_defaults_are_not_encoded() {
        let open = Open {
            container_id: "c".into(),
            hostname: None,
            max_frame_size: MaxFrameSize::default(),
            channel_max: ChannelMax(0),
            idle_time_out: None,
            outgoing_locales: None,
            incoming_locales: None,
            offered_capabilities: None,
            desired_capabilities: None,
            properties: None,
        };
        // container-id, two nulls, channel-max
        let expected = [
            0x00, 0x53, 0x10, 0xc0, 0x09, 0x04, 0xa1, 0x01, b'c', 0x40, 0x40, 0x60, 0x00, 0x00,
        ];
        assert_eq!(to_vec(&open).unwrap(), expected);
    }
}
