use patina_amqp_types::{definitions::Handle, messaging::Message};
use tokio::sync::{mpsc, oneshot};

use crate::control::{AttachRole, ConnectionControl};

use super::{sender::detach, AttachError, CreditMode, DetachError, RecvError};

/// The receiving end of a link.
///
/// Incoming messages are accepted as soon as they are decoded and queued here until
/// [`receive`](Receiver::receive) is called.
#[derive(Debug)]
pub struct Receiver {
    control: mpsc::Sender<ConnectionControl>,
    incoming: mpsc::UnboundedReceiver<Result<Message, RecvError>>,
    channel: u16,
    handle: Handle,
    name: String,
    address: String,
    credit_mode: CreditMode,
    detached: bool,
    terminal: Option<RecvError>,
}

impl Receiver {
    pub(crate) async fn attach(
        control: &mpsc::Sender<ConnectionControl>,
        channel: u16,
        address: String,
        credit_mode: CreditMode,
    ) -> Result<Self, AttachError> {
        let (incoming_tx, incoming) = mpsc::unbounded_channel();
        let (responder, resp_rx) = oneshot::channel();
        let request = ConnectionControl::Attach {
            channel,
            address: address.clone(),
            role: AttachRole::Receiver {
                credit_mode,
                incoming: incoming_tx,
            },
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
            incoming,
            channel,
            handle: info.handle,
            name: info.name,
            address,
            credit_mode,
            detached: false,
            terminal: None,
        })
    }

    /// Output handle of the link
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address of the source node
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn credit_mode(&self) -> CreditMode {
        self.credit_mode
    }

    /// Waits for the next message.
    ///
    /// Once the link is detached or the connection is closed every call returns the same
    /// error.
    pub async fn receive(&mut self) -> Result<Message, RecvError> {
        if let Some(err) = &self.terminal {
            return Err(err.clone());
        }
        let result = match self.incoming.recv().await {
            Some(result) => result,
            None => Err(RecvError::ConnectionClosed),
        };
        if let Err(err) = &result {
            self.terminal = Some(err.clone());
        }
        result
    }

    /// Replaces the link credit and sends a flow to the sender.
    ///
    /// Mostly useful with [`CreditMode::Manual`].
    pub async fn set_credit(&self, credit: u32) -> Result<(), RecvError> {
        let (responder, resp_rx) = oneshot::channel();
        let request = ConnectionControl::SetCredit {
            channel: self.channel,
            handle: self.handle,
            credit,
            responder,
        };
        self.control
            .send(request)
            .await
            .map_err(|_| RecvError::ConnectionClosed)?;
        resp_rx.await.map_err(|_| RecvError::ConnectionClosed)?
    }

    /// Detaches the link with `closed` set and waits for the peer's detach
    pub async fn close(mut self) -> Result<(), DetachError> {
        self.detached = true;
        detach(&self.control, self.channel, self.handle).await
    }
}

impl Drop for Receiver {
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
