use patina_amqp_types::{
    definitions::{DeliveryNumber, DeliveryTag, Handle},
    messaging::DeliveryState,
};
use tokio::sync::oneshot;

use super::SendError;

/// A message that was transferred to the peer and whose outcome is still pending
#[derive(Debug)]
pub struct Delivery {
    pub(crate) handle: Handle,
    pub(crate) delivery_id: DeliveryNumber,
    pub(crate) delivery_tag: DeliveryTag,
    pub(crate) outcome: oneshot::Receiver<Result<DeliveryState, SendError>>,
}

impl Delivery {
    /// Output handle of the link that sent the message
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn delivery_id(&self) -> DeliveryNumber {
        self.delivery_id
    }

    pub fn delivery_tag(&self) -> &DeliveryTag {
        &self.delivery_tag
    }

    /// Waits until the peer settles the delivery.
    ///
    /// Resolves with the terminal delivery state, or with an error if the link or the
    /// connection goes away first.
    pub async fn settled(self) -> Result<DeliveryState, SendError> {
        match self.outcome.await {
            Ok(outcome) => outcome,
            Err(_) => Err(SendError::ConnectionClosed),
        }
    }
}

/// Sender side record of a delivery waiting for its disposition
#[derive(Debug)]
pub(crate) struct UnsettledDelivery {
    pub handle: Handle,
    pub outcome: oneshot::Sender<Result<DeliveryState, SendError>>,
}
