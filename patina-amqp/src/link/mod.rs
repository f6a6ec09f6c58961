//! Links: the [`Sender`] and [`Receiver`] handles and the link endpoint state kept by the
//! session

use patina_amqp_types::{
    definitions::{self, Handle, ReceiverSettleMode, Role, SenderSettleMode},
    messaging::{Message, Source, Target},
    performatives::Attach,
};
use tokio::sync::{mpsc, oneshot};

mod delivery;
mod error;
mod receiver;
mod sender;
pub(crate) mod state;

pub use delivery::Delivery;
pub use error::{AttachError, DetachError, RecvError, SendError};
pub use receiver::Receiver;
pub use sender::Sender;
pub use state::LinkState;

pub(crate) use delivery::UnsettledDelivery;

use crate::{control::AttachRole, Payload};

use state::{ReceiverFlow, SenderFlow};

/// Credit granted to a receiver by default
pub const DEFAULT_CREDIT: u32 = 10;

/// How a receiver hands out link credit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditMode {
    /// Credit is only granted with [`Receiver::set_credit`]
    Manual,

    /// The given credit is granted on attach and granted again whenever half of it is used
    Auto(u32),
}

impl Default for CreditMode {
    fn default() -> Self {
        CreditMode::Auto(DEFAULT_CREDIT)
    }
}

/// Identity of an attached link
#[derive(Debug, Clone)]
pub(crate) struct LinkInfo {
    pub name: String,
    pub handle: Handle,
}

/// A message waiting for credit
#[derive(Debug)]
pub(crate) struct PendingSend {
    pub payload: Payload,
    pub responder: oneshot::Sender<Result<Delivery, SendError>>,
}

#[derive(Debug)]
pub(crate) enum LinkKind {
    Sender {
        flow: SenderFlow<PendingSend>,
        next_tag: u32,
    },
    Receiver {
        flow: ReceiverFlow,
        incoming: mpsc::UnboundedSender<Result<Message, RecvError>>,
    },
}

/// Link endpoint owned by a session
#[derive(Debug)]
pub(crate) struct Link {
    pub name: String,
    pub output_handle: Handle,
    pub input_handle: Option<Handle>,
    pub address: String,
    pub state: LinkState,
    pub kind: LinkKind,

    /// Limit announced by the peer, 0 or null means no limit
    pub max_message_size: Option<u64>,

    /// Error this end detached with
    pub local_error: Option<definitions::Error>,

    pub attach_responder: Option<oneshot::Sender<Result<LinkInfo, AttachError>>>,
    pub detach_responder: Option<oneshot::Sender<Result<(), DetachError>>>,
}

impl Link {
    pub fn new(
        name: String,
        output_handle: Handle,
        address: String,
        role: AttachRole,
        attach_responder: oneshot::Sender<Result<LinkInfo, AttachError>>,
    ) -> Self {
        let kind = match role {
            AttachRole::Sender => LinkKind::Sender {
                flow: SenderFlow::new(0),
                next_tag: 0,
            },
            AttachRole::Receiver {
                credit_mode,
                incoming,
            } => LinkKind::Receiver {
                flow: ReceiverFlow::new(credit_mode),
                incoming,
            },
        };
        Self {
            name,
            output_handle,
            input_handle: None,
            address,
            state: LinkState::Detached,
            kind,
            max_message_size: None,
            local_error: None,
            attach_responder: Some(attach_responder),
            detach_responder: None,
        }
    }

    pub fn role(&self) -> Role {
        match self.kind {
            LinkKind::Sender { .. } => Role::Sender,
            LinkKind::Receiver { .. } => Role::Receiver,
        }
    }

    pub fn info(&self) -> LinkInfo {
        LinkInfo {
            name: self.name.clone(),
            handle: self.output_handle,
        }
    }

    /// The attach frame sent for this link. Only the address of the terminus is set.
    pub fn attach_frame(&self) -> Attach {
        let (source, target, initial_delivery_count) = match &self.kind {
            LinkKind::Sender { flow, .. } => (
                Source::default(),
                Target::with_address(self.address.clone()),
                Some(flow.initial_delivery_count()),
            ),
            LinkKind::Receiver { .. } => (
                Source::with_address(self.address.clone()),
                Target::default(),
                None,
            ),
        };
        Attach {
            name: self.name.clone(),
            handle: self.output_handle,
            role: self.role(),
            snd_settle_mode: SenderSettleMode::default(),
            rcv_settle_mode: ReceiverSettleMode::First,
            source: Some(source),
            target: Some(target),
            unsettled: None,
            incomplete_unsettled: false,
            initial_delivery_count,
            max_message_size: None,
            offered_capabilities: None,
            desired_capabilities: None,
            properties: None,
        }
    }

    /// Fails everything waiting on this link
    pub fn fail_waiters(&mut self, error: Option<definitions::Error>, connection_closed: bool) {
        if let Some(responder) = self.attach_responder.take() {
            let err = match connection_closed {
                true => AttachError::ConnectionClosed,
                false => AttachError::Refused(error.clone()),
            };
            let _ = responder.send(Err(err));
        }
        match &mut self.kind {
            LinkKind::Sender { flow, .. } => {
                for pending in flow.take_pending() {
                    let _ = pending
                        .responder
                        .send(Err(SendError::LinkDetached(error.clone())));
                }
            }
            LinkKind::Receiver { incoming, .. } => {
                let err = match connection_closed {
                    true => RecvError::ConnectionClosed,
                    false => RecvError::LinkDetached(error),
                };
                let _ = incoming.send(Err(err));
            }
        }
    }
}
