use patina_amqp_types::{definitions::Handle, messaging::Message};
use tokio::sync::{mpsc, oneshot};

use crate::control::{AttachRole, ConnectionControl};

use super::{AttachError, Delivery, DetachError, SendError};

/// The sending end of a link.
///
/// Obtained from [`Client::sender`](crate::Client::sender). Dropping a `Sender` that was not
/// closed detaches the link in the background.
#[derive(Debug)]
pub struct Sender {
    control: mpsc::Sender<ConnectionControl>,
    channel: u16,
    handle: Handle,
    name: String,
    address: String,
    detached: bool,
}

impl Sender {
    pub(crate) async fn attach(
        control: &mpsc::Sender<ConnectionControl>,
        channel: u16,
        address: String,
    ) -> Result<Self, AttachError> {
        let (responder, resp_rx) = oneshot::channel();
        let request = ConnectionControl::Attach {
            channel,
            address: address.clone(),
            role: AttachRole::Sender,
            responder,
        };
        control
            .send(request)
            .await
            .map_err(|_| AttachError::ConnectionClosed)?;
        let info = resp_rx
            .await
            .map_err(|_| AttachError::ConnectionClosed)??;

        Ok(Self {
            control: control.clone(),
            channel,
            handle: info.handle,
            name: info.name,
            address,
            detached: false,
        })
    }

    /// Output handle of the link
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address of the target node
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Sends a message.
    ///
    /// Resolves once the transfer has been handed to the transport, which means it waits for
    /// link credit. The returned [`Delivery`] resolves when the peer settles the message.
    pub async fn send(&mut self, message: impl Into<Message>) -> Result<Delivery, SendError> {
        let payload = message.into().encode()?;
        let (responder, resp_rx) = oneshot::channel();
        let request = ConnectionControl::Send {
            channel: self.channel,
            handle: self.handle,
            payload,
            responder,
        };
        self.control
            .send(request)
            .await
            .map_err(|_| SendError::ConnectionClosed)?;
        match resp_rx.await {
            Ok(result) => result,
            Err(_) => Err(SendError::LinkDetached(None)),
        }
    }

    /// Link credit currently granted by the receiver
    pub async fn credit(&self) -> Result<u32, SendError> {
        let (responder, resp_rx) = oneshot::channel();
        let request = ConnectionControl::Credit {
            channel: self.channel,
            handle: self.handle,
            responder,
        };
        self.control
            .send(request)
            .await
            .map_err(|_| SendError::ConnectionClosed)?;
        resp_rx.await.map_err(|_| SendError::ConnectionClosed)?
    }

    /// Detaches the link with `closed` set and waits for the peer's detach
    pub async fn close(mut self) -> Result<(), DetachError> {
        self.detached = true;
        detach(&self.control, self.channel, self.handle).await
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        if !self.detached {
            let _ = self.control.try_send(ConnectionControl::Detach {
                channel: self.channel,
                handle: self.handle,
                responder: None,
            });
        }
    }
}

pub(super) async fn detach(
    control: &mpsc::Sender<ConnectionControl>,
    channel: u16,
    handle: Handle,
) -> Result<(), DetachError> {
    let (responder, resp_rx) = oneshot::channel();
    let request = ConnectionControl::Detach {
        channel,
        handle,
        responder: Some(responder),
    };
    control
        .send(request)
        .await
        .map_err(|_| DetachError::ConnectionClosed)?;
    resp_rx.await.map_err(|_| DetachError::ConnectionClosed)?
}
