use serde_amqp::macros::{DeserializeComposite, SerializeComposite};

use crate::definitions::Error;

/// End the session.
/// <type name="end" class="composite" source="list" provides="frame">
///     <descriptor name="amqp:end:list" code="0x00000000:0x00000017"/>
/// </type>
#[derive(Debug, Clone, PartialEq, SerializeComposite, DeserializeComposite)]
#[amqp_contract(
    name = "amqp:end:list",
    code = "0x0000_0000_0000_0017",
    encoding = "list",
    rename_all = "kebab-case"
)]
pub struct End {
    /// <field name="error" type="error"/>
    pub error: Option<Error>,
}
