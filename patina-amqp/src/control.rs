//! Requests sent from the handles to the connection event loop

use patina_amqp_types::{definitions, definitions::Handle, messaging::Message};
use tokio::sync::{mpsc, oneshot};

use crate::{
    link::{
        AttachError, CreditMode, Delivery, DetachError, LinkInfo, RecvError, SendError,
    },
    Payload,
};

/// Role specific part of an attach request
#[derive(Debug)]
pub(crate) enum AttachRole {
    Sender,
    Receiver {
        credit_mode: CreditMode,
        incoming: mpsc::UnboundedSender<Result<Message, RecvError>>,
    },
}

#[derive(Debug)]
pub(crate) enum ConnectionControl {
    Close(Option<definitions::Error>),
    Attach {
        channel: u16,
        address: String,
        role: AttachRole,
        responder: oneshot::Sender<Result<LinkInfo, AttachError>>,
    },
    Send {
        channel: u16,
        handle: Handle,
        payload: Payload,
        responder: oneshot::Sender<Result<Delivery, SendError>>,
    },
    Credit {
        channel: u16,
        handle: Handle,
        responder: oneshot::Sender<Result<u32, SendError>>,
    },
    SetCredit {
        channel: u16,
        handle: Handle,
        credit: u32,
        responder: oneshot::Sender<Result<(), RecvError>>,
    },
    Detach {
        channel: u16,
        handle: Handle,
        responder: Option<oneshot::Sender<Result<(), DetachError>>>,
    },
}
