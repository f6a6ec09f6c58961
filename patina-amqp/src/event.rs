//! Notifications published by the connection engine

use patina_amqp_types::{
    definitions::{self, DeliveryNumber, Handle, Role},
    messaging::{DeliveryState, Message},
};

use crate::connection;

/// Something observable that happened on the connection.
///
/// Events are broadcast, a subscriber that falls behind misses the oldest ones.
#[derive(Debug, Clone)]
pub enum Event {
    /// The peer's open was received
    ConnectionOpened { container_id: String },

    /// A link attach completed
    LinkAttached {
        handle: Handle,
        name: String,
        role: Role,
        address: String,
    },

    /// The receiver granted credit to one of our sending links
    CreditGranted { handle: Handle, credit: u32 },

    /// A message arrived on one of our receiving links
    MessageArrived { handle: Handle, message: Message },

    /// The peer settled a delivery we sent
    Settled {
        handle: Handle,
        delivery_id: DeliveryNumber,
        state: DeliveryState,
    },

    /// A link was detached, by either side
    LinkDetached {
        handle: Handle,
        error: Option<definitions::Error>,
    },

    /// The connection is closed. Carries the error the peer or this end closed with.
    ConnectionClosed { error: Option<definitions::Error> },

    /// The engine stopped because of an error
    Error(connection::Error),
}
