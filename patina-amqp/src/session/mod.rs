//! Session endpoint: transfer windows, delivery ids, unsettled deliveries and the links
//! attached to the session

use std::collections::{BTreeMap, HashMap};

use patina_amqp_types::{
    definitions::{
        self, AmqpError, DeliveryNumber, DeliveryTag, Handle, Role, SessionError,
        TransferNumber,
    },
    messaging::{DeliveryState, Message, Rejected},
    performatives::{Attach, Begin, Detach, Disposition, End, Flow, Transfer},
    states::SessionState,
};
use slab::Slab;
use tokio::sync::oneshot;
use tracing::debug;

use crate::{
    connection::{Error, Outbox},
    control::AttachRole,
    event::Event,
    frames::amqp::{transfer_overhead, FrameBody},
    link::{
        state::serial_difference, AttachError, Delivery, DetachError, Link, LinkInfo, LinkKind,
        LinkState, PendingSend, RecvError, SendError, UnsettledDelivery,
    },
    Payload,
};

/// Incoming and outgoing window of a session
pub(crate) const DEFAULT_WINDOW: u32 = 2048;

#[derive(Debug)]
pub(crate) struct Session {
    outgoing_channel: u16,
    local_state: SessionState,

    // local amqp states
    next_outgoing_id: TransferNumber,
    incoming_window: u32,
    outgoing_window: u32,
    handle_max: Handle,

    // remote amqp states
    incoming_channel: Option<u16>,
    next_incoming_id: TransferNumber,
    remote_incoming_window: u32,
    remote_outgoing_window: u32,

    links: Slab<Link>,
    link_by_name: HashMap<String, usize>,
    link_by_output_handle: HashMap<Handle, usize>,
    link_by_input_handle: HashMap<Handle, usize>,
    next_handle: u32,
    link_counter: u64,

    /// Deliveries sent by this end and not yet settled by the peer
    unsettled: BTreeMap<DeliveryNumber, UnsettledDelivery>,
}

impl Session {
    pub fn new(outgoing_channel: u16) -> Self {
        Self {
            outgoing_channel,
            local_state: SessionState::Unmapped,
            next_outgoing_id: 0,
            incoming_window: DEFAULT_WINDOW,
            outgoing_window: DEFAULT_WINDOW,
            handle_max: Handle(u32::MAX),
            incoming_channel: None,
            next_incoming_id: 0,
            remote_incoming_window: 0,
            remote_outgoing_window: 0,
            links: Slab::new(),
            link_by_name: HashMap::new(),
            link_by_output_handle: HashMap::new(),
            link_by_input_handle: HashMap::new(),
            next_handle: 0,
            link_counter: 0,
            unsettled: BTreeMap::new(),
        }
    }

    pub fn local_state(&self) -> SessionState {
        self.local_state
    }

    pub fn begin(&mut self, outbox: &mut Outbox) -> Result<(), Error> {
        match self.local_state {
            SessionState::Unmapped => {}
            _ => return Err(Error::illegal_state("session already began")),
        }
        let begin = Begin {
            remote_channel: None,
            next_outgoing_id: self.next_outgoing_id,
            incoming_window: self.incoming_window,
            outgoing_window: self.outgoing_window,
            handle_max: self.handle_max,
            offered_capabilities: None,
            desired_capabilities: None,
            properties: None,
        };
        outbox.frame(self.outgoing_channel, FrameBody::Begin(begin));
        self.local_state = SessionState::BeginSent;
        Ok(())
    }

    pub fn on_begin(&mut self, incoming_channel: u16, begin: Begin) -> Result<(), Error> {
        match self.local_state {
            SessionState::BeginSent => {}
            _ => return Err(Error::illegal_state("begin on a session that is not beginning")),
        }
        self.incoming_channel = Some(incoming_channel);
        self.next_incoming_id = begin.next_outgoing_id;
        self.remote_incoming_window = begin.incoming_window;
        self.remote_outgoing_window = begin.outgoing_window;
        self.handle_max = std::cmp::min(self.handle_max, begin.handle_max);
        self.local_state = SessionState::Mapped;
        debug!(channel = self.outgoing_channel, incoming_channel, "session mapped");
        Ok(())
    }

    /// The peer ended the session. The end is answered and every link is released.
    pub fn on_end(&mut self, end: End, outbox: &mut Outbox) -> Result<(), Error> {
        match self.local_state {
            SessionState::Mapped => {
                self.local_state = SessionState::EndReceived;
                outbox.frame(self.outgoing_channel, FrameBody::End(End { error: None }));
            }
            SessionState::EndSent => {}
            _ => return Err(Error::illegal_state("end on a session that is not mapped")),
        }
        self.local_state = SessionState::Ended;
        debug!(channel = self.outgoing_channel, error = ?end.error, "session ended");
        self.release(end.error, false, outbox);
        Ok(())
    }

    fn allocate_handle(&mut self) -> Option<Handle> {
        if self.links.len() as u64 > u64::from(self.handle_max.0) {
            return None;
        }
        loop {
            let handle = Handle(self.next_handle);
            self.next_handle = match self.next_handle >= self.handle_max.0 {
                true => 0,
                false => self.next_handle + 1,
            };
            if !self.link_by_output_handle.contains_key(&handle) {
                return Some(handle);
            }
        }
    }

    pub fn attach(
        &mut self,
        address: String,
        role: AttachRole,
        responder: oneshot::Sender<Result<LinkInfo, AttachError>>,
        outbox: &mut Outbox,
    ) {
        if self.local_state != SessionState::Mapped {
            let _ = responder.send(Err(AttachError::IllegalSessionState));
            return;
        }
        let handle = match self.allocate_handle() {
            Some(handle) => handle,
            None => {
                let _ = responder.send(Err(AttachError::HandleMaxReached));
                return;
            }
        };

        self.link_counter += 1;
        let prefix = match &role {
            AttachRole::Sender => "sender",
            AttachRole::Receiver { .. } => "receiver",
        };
        let name = format!("{}-{}-{}", prefix, address, self.link_counter);
        if self.link_by_name.contains_key(&name) {
            let _ = responder.send(Err(AttachError::DuplicatedLinkName));
            return;
        }

        let mut link = Link::new(name.clone(), handle, address, role, responder);
        let attach = link.attach_frame();
        link.state = LinkState::AttachSent;
        let key = self.links.insert(link);
        self.link_by_name.insert(name, key);
        self.link_by_output_handle.insert(handle, key);
        outbox.frame(self.outgoing_channel, FrameBody::Attach(attach));
    }

    pub fn on_attach(
        &mut self,
        attach: Attach,
        outbox: &mut Outbox,
    ) -> Result<(), Error> {
        let key = match self.link_by_name.get(&attach.name) {
            Some(key) => *key,
            None => {
                return Err(Error::violation(
                    AmqpError::NotImplemented,
                    "attach initiated by the peer",
                ))
            }
        };
        if self.link_by_input_handle.contains_key(&attach.handle) {
            return Err(Error::violation(
                SessionError::HandleInUse,
                format!("handle {} is already in use", attach.handle.0),
            ));
        }
        let link = self
            .links
            .get_mut(key)
            .ok_or_else(|| Error::illegal_state("unknown link"))?;
        if attach.role == link.role() {
            return Err(Error::violation(
                AmqpError::InvalidField,
                "attach with the same role as the local end",
            ));
        }
        link.input_handle = Some(attach.handle);
        self.link_by_input_handle.insert(attach.handle, key);

        match link.state {
            LinkState::AttachSent => {}
            // Detached before the peer answered, its detach follows
            LinkState::DetachSent => return Ok(()),
            _ => return Err(Error::illegal_state("attach on a link that is not attaching")),
        }
        link.state = LinkState::Attached;
        link.max_message_size = attach.max_message_size.filter(|size| *size > 0);

        // A null terminus means the peer refused the link and detaches it right away
        let refused = match link.kind {
            LinkKind::Sender { .. } => attach.target.is_none(),
            LinkKind::Receiver { .. } => attach.source.is_none(),
        };
        if refused {
            debug!(name = %link.name, "attach refused by the peer");
            return Ok(());
        }

        let mut grant = None;
        if let LinkKind::Receiver { flow, .. } = &mut link.kind {
            flow.on_attach(attach.initial_delivery_count.unwrap_or(0));
            grant = flow.initial_credit();
        }
        if let Some(responder) = link.attach_responder.take() {
            let _ = responder.send(Ok(link.info()));
        }
        outbox.event(Event::LinkAttached {
            handle: link.output_handle,
            name: link.name.clone(),
            role: link.role(),
            address: link.address.clone(),
        });
        debug!(name = %link.name, handle = link.output_handle.0, "link attached");

        if grant.is_some() {
            self.push_link_flow(key, false, outbox);
        }
        Ok(())
    }

    fn session_flow(&self) -> Flow {
        Flow {
            next_incoming_id: self.incoming_channel.map(|_| self.next_incoming_id),
            incoming_window: self.incoming_window,
            next_outgoing_id: self.next_outgoing_id,
            outgoing_window: self.outgoing_window,
            handle: None,
            delivery_count: None,
            link_credit: None,
            available: None,
            drain: false,
            echo: false,
            properties: None,
        }
    }

    fn link_flow(&self, key: usize, echo: bool) -> Option<Flow> {
        let link = self.links.get(key)?;
        let (delivery_count, link_credit, available, drain) = match &link.kind {
            LinkKind::Sender { flow, .. } => (
                flow.delivery_count(),
                flow.link_credit(),
                Some(flow.available()),
                flow.drain(),
            ),
            LinkKind::Receiver { flow, .. } => {
                (flow.delivery_count(), flow.link_credit(), None, false)
            }
        };
        Some(Flow {
            handle: Some(link.output_handle),
            delivery_count: Some(delivery_count),
            link_credit: Some(link_credit),
            available,
            drain,
            echo,
            ..self.session_flow()
        })
    }

    fn push_link_flow(&mut self, key: usize, echo: bool, outbox: &mut Outbox) {
        if let Some(flow) = self.link_flow(key, echo) {
            outbox.frame(self.outgoing_channel, FrameBody::Flow(flow));
        }
    }

    pub fn on_flow(&mut self, flow: Flow, outbox: &mut Outbox) -> Result<(), Error> {
        // remote-incoming-window = next-incoming-id(peer) + incoming-window(peer) - next-outgoing-id
        let next_incoming_id = flow.next_incoming_id.unwrap_or(0);
        let limit = next_incoming_id.wrapping_add(flow.incoming_window);
        self.remote_incoming_window = serial_difference(limit, self.next_outgoing_id);
        self.remote_outgoing_window = flow.outgoing_window;

        let input_handle = match flow.handle {
            Some(handle) => handle,
            None => {
                if flow.echo {
                    let reply = self.session_flow();
                    outbox.frame(self.outgoing_channel, FrameBody::Flow(reply));
                }
                self.pump_all(outbox);
                return Ok(());
            }
        };

        let key = self.key_by_input_handle(input_handle)?;
        let mut echo = flow.echo;
        if let Some(link) = self.links.get_mut(key) {
            match &mut link.kind {
                LinkKind::Sender { flow: state, .. } => {
                    state.on_flow(
                        flow.delivery_count,
                        flow.link_credit.unwrap_or(0),
                        flow.drain,
                    );
                    let credit = state.link_credit();
                    if credit > 0 {
                        outbox.event(Event::CreditGranted {
                            handle: link.output_handle,
                            credit,
                        });
                    }
                }
                LinkKind::Receiver { flow: state, .. } => state.on_flow(flow.delivery_count),
            }
        }

        self.pump_all(outbox);

        if let Some(Link {
            kind: LinkKind::Sender { flow: state, .. },
            ..
        }) = self.links.get_mut(key)
        {
            if state.try_drain() {
                echo = true;
            }
        }
        if echo {
            self.push_link_flow(key, false, outbox);
        }
        Ok(())
    }

    fn key_by_input_handle(&self, handle: Handle) -> Result<usize, Error> {
        self.link_by_input_handle
            .get(&handle)
            .copied()
            .ok_or_else(|| {
                Error::violation(
                    SessionError::UnattachedHandle,
                    format!("handle {} is not attached", handle.0),
                )
            })
    }

    fn pump_all(&mut self, outbox: &mut Outbox) {
        let keys: Vec<usize> = self.links.iter().map(|(key, _)| key).collect();
        for key in keys {
            self.pump(key, outbox);
        }
    }

    /// Transfers as many pending messages of a sending link as credit and the peer's
    /// incoming window allow
    fn pump(&mut self, key: usize, outbox: &mut Outbox) {
        let channel = self.outgoing_channel;
        while self.remote_incoming_window > 0 {
            let link = match self.links.get_mut(key) {
                Some(link) if link.state == LinkState::Attached => link,
                _ => return,
            };
            let handle = link.output_handle;
            let (flow, next_tag) = match &mut link.kind {
                LinkKind::Sender { flow, next_tag } => (flow, next_tag),
                LinkKind::Receiver { .. } => return,
            };
            // The caller stopped waiting for these
            flow.retain(|pending| !pending.responder.is_closed());
            let pending = match flow.next_sendable() {
                Some(pending) => pending,
                None => return,
            };

            let delivery_tag = DeliveryTag::from(next_tag.to_be_bytes().to_vec());
            *next_tag = next_tag.wrapping_add(1);
            let delivery_id = self.next_outgoing_id;
            self.next_outgoing_id = delivery_id.wrapping_add(1);
            self.remote_incoming_window -= 1;

            let performative = transfer(handle, delivery_id, delivery_tag.clone());
            let (outcome_tx, outcome) = oneshot::channel();
            self.unsettled.insert(
                delivery_id,
                UnsettledDelivery {
                    handle,
                    outcome: outcome_tx,
                },
            );
            outbox.frame(
                channel,
                FrameBody::Transfer {
                    performative,
                    payload: pending.payload,
                },
            );
            let _ = pending.responder.send(Ok(Delivery {
                handle,
                delivery_id,
                delivery_tag,
                outcome,
            }));
        }
    }

    pub fn send(
        &mut self,
        handle: Handle,
        payload: Payload,
        responder: oneshot::Sender<Result<Delivery, SendError>>,
        max_frame_size: usize,
        outbox: &mut Outbox,
    ) {
        let key = match self.link_by_output_handle.get(&handle) {
            Some(key) => *key,
            None => {
                let _ = responder.send(Err(SendError::LinkDetached(None)));
                return;
            }
        };
        let link = match self.links.get_mut(key) {
            Some(link) => link,
            None => {
                let _ = responder.send(Err(SendError::LinkDetached(None)));
                return;
            }
        };
        match link.state {
            LinkState::Attached => {}
            LinkState::AttachSent => {
                let _ = responder.send(Err(SendError::IllegalState));
                return;
            }
            LinkState::DetachSent | LinkState::Detached => {
                let _ = responder.send(Err(SendError::LinkDetached(link.local_error.clone())));
                return;
            }
        }

        // The largest delivery id and a four byte tag give the largest transfer header
        let widest = transfer(handle, u32::MAX, DeliveryTag::from(vec![0; 4]));
        let overhead = match transfer_overhead(&widest) {
            Ok(overhead) => overhead,
            Err(err) => {
                let _ = responder.send(Err(SendError::Encode(err)));
                return;
            }
        };
        let size = payload.len();
        if let Some(max) = link.max_message_size {
            if size as u64 > max {
                let max = usize::try_from(max).unwrap_or(usize::MAX);
                let _ = responder.send(Err(SendError::MessageTooLarge { size, max }));
                return;
            }
        }
        if overhead + size > max_frame_size {
            let max = max_frame_size.saturating_sub(overhead);
            let _ = responder.send(Err(SendError::MessageTooLarge { size, max }));
            return;
        }

        match &mut link.kind {
            LinkKind::Sender { flow, .. } => flow.enqueue(PendingSend { payload, responder }),
            LinkKind::Receiver { .. } => {
                let _ = responder.send(Err(SendError::IllegalState));
                return;
            }
        }
        self.pump(key, outbox);
    }

    pub fn link_credit(&self, handle: Handle) -> Result<u32, SendError> {
        let link = self
            .link_by_output_handle
            .get(&handle)
            .and_then(|key| self.links.get(*key))
            .ok_or(SendError::LinkDetached(None))?;
        match &link.kind {
            LinkKind::Sender { flow, .. } => Ok(flow.link_credit()),
            LinkKind::Receiver { .. } => Err(SendError::IllegalState),
        }
    }

    pub fn set_credit(
        &mut self,
        handle: Handle,
        credit: u32,
        outbox: &mut Outbox,
    ) -> Result<(), RecvError> {
        let key = self
            .link_by_output_handle
            .get(&handle)
            .copied()
            .ok_or(RecvError::LinkDetached(None))?;
        let link = self
            .links
            .get_mut(key)
            .ok_or(RecvError::LinkDetached(None))?;
        if link.state != LinkState::Attached {
            return Err(RecvError::LinkDetached(link.local_error.clone()));
        }
        match &mut link.kind {
            LinkKind::Receiver { flow, .. } => flow.set_credit(credit),
            LinkKind::Sender { .. } => return Err(RecvError::LinkDetached(None)),
        }
        self.push_link_flow(key, false, outbox);
        Ok(())
    }

    pub fn on_transfer(
        &mut self,
        transfer: Transfer,
        payload: Payload,
        outbox: &mut Outbox,
    ) -> Result<(), Error> {
        if self.incoming_window == 0 {
            return Err(Error::violation(
                SessionError::WindowViolation,
                "transfer beyond the incoming window",
            ));
        }
        self.incoming_window -= 1;
        self.next_incoming_id = match transfer.delivery_id {
            Some(delivery_id) => delivery_id.wrapping_add(1),
            None => self.next_incoming_id.wrapping_add(1),
        };
        self.remote_outgoing_window = self.remote_outgoing_window.saturating_sub(1);
        if self.incoming_window <= DEFAULT_WINDOW / 2 {
            self.incoming_window = DEFAULT_WINDOW;
            let flow = self.session_flow();
            outbox.frame(self.outgoing_channel, FrameBody::Flow(flow));
        }

        if transfer.more {
            return Err(Error::violation(
                AmqpError::NotImplemented,
                "multi-frame transfers are not supported",
            ));
        }

        let key = self.key_by_input_handle(transfer.handle)?;
        let link = self
            .links
            .get_mut(key)
            .ok_or_else(|| Error::illegal_state("unknown link"))?;
        if link.state == LinkState::DetachSent {
            return Ok(());
        }
        let regrant = match &mut link.kind {
            LinkKind::Receiver { flow, .. } => flow.on_transfer(),
            LinkKind::Sender { .. } => {
                return Err(Error::illegal_state("transfer on a sending link"))
            }
        };
        let regrant = match regrant {
            Ok(regrant) => regrant,
            Err(condition) => {
                let error = definitions::Error::new(
                    condition,
                    Some("transfer without link credit".to_string()),
                    None,
                );
                self.detach_with_error(key, error, outbox);
                return Ok(());
            }
        };

        let handle = link.output_handle;
        let state = match Message::decode(payload) {
            Ok(message) => {
                if let LinkKind::Receiver { incoming, .. } = &link.kind {
                    let _ = incoming.send(Ok(message.clone()));
                }
                outbox.event(Event::MessageArrived { handle, message });
                DeliveryState::accepted()
            }
            Err(err) => DeliveryState::Rejected(Rejected {
                error: Some(definitions::Error::new(
                    AmqpError::DecodeError,
                    Some(err.to_string()),
                    None,
                )),
            }),
        };

        // Received messages are settled right away
        if !transfer.settled.unwrap_or(false) {
            if let Some(delivery_id) = transfer.delivery_id {
                let disposition = Disposition {
                    role: Role::Receiver,
                    first: delivery_id,
                    last: None,
                    settled: true,
                    state: Some(state),
                    batchable: false,
                };
                outbox.frame(self.outgoing_channel, FrameBody::Disposition(disposition));
            }
        }

        if regrant.is_some() {
            self.push_link_flow(key, false, outbox);
        }
        Ok(())
    }

    pub fn on_disposition(
        &mut self,
        disposition: Disposition,
        outbox: &mut Outbox,
    ) -> Result<(), Error> {
        // Only deliveries sent by this end can be unsettled
        if disposition.role != Role::Receiver {
            return Ok(());
        }
        let first = disposition.first;
        let last = disposition.last.unwrap_or(first);
        let ids: Vec<DeliveryNumber> = match first <= last {
            true => self.unsettled.range(first..=last).map(|(id, _)| *id).collect(),
            false => self
                .unsettled
                .range(first..)
                .chain(self.unsettled.range(..=last))
                .map(|(id, _)| *id)
                .collect(),
        };

        // Deliveries this end settles in reply, kept in the order of the range
        let mut settled_here = Vec::new();
        for delivery_id in ids {
            // A settled disposition without a state counts as accepted
            let state = match (disposition.settled, &disposition.state) {
                (true, state) => state.clone().unwrap_or_else(DeliveryState::accepted),
                (false, Some(state)) if state.is_terminal() => state.clone(),
                (false, _) => continue,
            };
            if let Some(delivery) = self.unsettled.remove(&delivery_id) {
                if !disposition.settled {
                    settled_here.push(delivery_id);
                }
                let _ = delivery.outcome.send(Ok(state.clone()));
                outbox.event(Event::Settled {
                    handle: delivery.handle,
                    delivery_id,
                    state,
                });
            }
        }

        for (first, last) in contiguous_runs(&settled_here) {
            let reply = Disposition {
                role: Role::Sender,
                first,
                last: (last != first).then_some(last),
                settled: true,
                state: disposition.state.clone(),
                batchable: false,
            };
            outbox.frame(self.outgoing_channel, FrameBody::Disposition(reply));
        }
        Ok(())
    }

    /// Detaches a link on request of the local end
    pub fn detach(
        &mut self,
        handle: Handle,
        responder: Option<oneshot::Sender<Result<(), DetachError>>>,
        outbox: &mut Outbox,
    ) {
        let link = match self.link_by_output_handle.get(&handle) {
            Some(key) => self.links.get_mut(*key),
            None => None,
        };
        let link = match link {
            Some(link) => link,
            // Already detached by the peer
            None => {
                if let Some(responder) = responder {
                    let _ = responder.send(Ok(()));
                }
                return;
            }
        };
        match link.state {
            LinkState::AttachSent | LinkState::Attached => {
                link.state = LinkState::DetachSent;
                link.detach_responder = responder;
                let detach = Detach {
                    handle: link.output_handle,
                    closed: true,
                    error: None,
                };
                outbox.frame(self.outgoing_channel, FrameBody::Detach(detach));
            }
            LinkState::DetachSent | LinkState::Detached => {
                if let Some(responder) = responder {
                    let _ = responder.send(Err(DetachError::IllegalState));
                }
            }
        }
    }

    fn detach_with_error(&mut self, key: usize, error: definitions::Error, outbox: &mut Outbox) {
        let link = match self.links.get_mut(key) {
            Some(link) => link,
            None => return,
        };
        debug!(name = %link.name, %error, "detaching link");
        link.state = LinkState::DetachSent;
        link.local_error = Some(error.clone());
        if let LinkKind::Receiver { incoming, .. } = &link.kind {
            let _ = incoming.send(Err(RecvError::LinkDetached(Some(error.clone()))));
        }
        let detach = Detach {
            handle: link.output_handle,
            closed: true,
            error: Some(error),
        };
        outbox.frame(self.outgoing_channel, FrameBody::Detach(detach));
    }

    pub fn on_detach(&mut self, detach: Detach, outbox: &mut Outbox) -> Result<(), Error> {
        let key = self.key_by_input_handle(detach.handle)?;
        let link = self
            .links
            .get_mut(key)
            .ok_or_else(|| Error::illegal_state("unknown link"))?;
        match link.state {
            LinkState::DetachSent => {}
            _ => {
                let reply = Detach {
                    handle: link.output_handle,
                    closed: detach.closed,
                    error: None,
                };
                outbox.frame(self.outgoing_channel, FrameBody::Detach(reply));
            }
        }
        self.remove_link(key, detach.error, outbox);
        Ok(())
    }

    fn remove_link(
        &mut self,
        key: usize,
        remote_error: Option<definitions::Error>,
        outbox: &mut Outbox,
    ) {
        if !self.links.contains(key) {
            return;
        }
        let mut link = self.links.remove(key);
        link.state = LinkState::Detached;
        self.link_by_name.remove(&link.name);
        self.link_by_output_handle.remove(&link.output_handle);
        if let Some(input_handle) = link.input_handle {
            self.link_by_input_handle.remove(&input_handle);
        }

        let ids: Vec<DeliveryNumber> = self
            .unsettled
            .iter()
            .filter(|(_, delivery)| delivery.handle == link.output_handle)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            if let Some(delivery) = self.unsettled.remove(&id) {
                let _ = delivery
                    .outcome
                    .send(Err(SendError::LinkDetached(remote_error.clone())));
            }
        }

        if let Some(responder) = link.detach_responder.take() {
            let result = match &remote_error {
                Some(error) => Err(DetachError::Remote(error.clone())),
                None => Ok(()),
            };
            let _ = responder.send(result);
        }

        let error = remote_error.or_else(|| link.local_error.clone());
        link.fail_waiters(error.clone(), false);
        debug!(name = %link.name, ?error, "link detached");
        outbox.event(Event::LinkDetached {
            handle: link.output_handle,
            error,
        });
    }

    /// Releases every link and unsettled delivery, eg. when the session ended or the
    /// connection closed.
    pub fn release(
        &mut self,
        error: Option<definitions::Error>,
        connection_closed: bool,
        outbox: &mut Outbox,
    ) {
        for (_, delivery) in std::mem::take(&mut self.unsettled) {
            let err = match connection_closed {
                true => SendError::ConnectionClosed,
                false => SendError::LinkDetached(error.clone()),
            };
            let _ = delivery.outcome.send(Err(err));
        }

        self.link_by_name.clear();
        self.link_by_output_handle.clear();
        self.link_by_input_handle.clear();
        for mut link in self.links.drain() {
            if let Some(responder) = link.detach_responder.take() {
                let result = match (connection_closed, &error) {
                    (true, _) => Err(DetachError::ConnectionClosed),
                    (false, Some(error)) => Err(DetachError::Remote(error.clone())),
                    (false, None) => Ok(()),
                };
                let _ = responder.send(result);
            }
            link.fail_waiters(error.clone(), connection_closed);
            if !connection_closed {
                outbox.event(Event::LinkDetached {
                    handle: link.output_handle,
                    error: error.clone(),
                });
            }
        }
    }
}

/// Splits delivery ids into runs of consecutive ids, wrapping around at `u32::MAX`
fn contiguous_runs(ids: &[DeliveryNumber]) -> Vec<(DeliveryNumber, DeliveryNumber)> {
    let mut runs: Vec<(DeliveryNumber, DeliveryNumber)> = Vec::new();
    for id in ids {
        match runs.last_mut() {
            Some((_, last)) if last.wrapping_add(1) == *id => *last = *id,
            _ => runs.push((*id, *id)),
        }
    }
    runs
}

fn transfer(handle: Handle, delivery_id: DeliveryNumber, delivery_tag: DeliveryTag) -> Transfer {
    Transfer {
        handle,
        delivery_id: Some(delivery_id),
        delivery_tag: Some(delivery_tag),
        message_format: Some(0),
        settled: Some(false),
        more: false,
        rcv_settle_mode: None,
        state: None,
        resume: false,
        aborted: false,
        batchable: false,
    }
}

#[cfg(test)]
mod tests {
    use patina_amqp_types::{
        definitions::{self, DeliveryTag, ErrorCondition, Handle, LinkError, Role, SessionError},
        messaging::{DeliveryState, Message},
        performatives::{Attach, Begin, Detach, Disposition, Flow, Transfer},
    };
    use tokio::sync::{mpsc, oneshot};

    use super::{contiguous_runs, Session};
    use crate::{
        connection::{Error, Outbox},
        control::AttachRole,
        event::Event,
        frames::amqp::FrameBody,
        link::{AttachError, CreditMode, Delivery, LinkInfo, RecvError, SendError},
    };

    const PEER_HANDLE: Handle = Handle(7);
    const MAX_FRAME_SIZE: usize = 65536;

    type AttachResult = oneshot::Receiver<Result<LinkInfo, AttachError>>;
    type SendResult = oneshot::Receiver<Result<Delivery, SendError>>;

    fn frames(outbox: &mut Outbox) -> Vec<FrameBody> {
        std::iter::from_fn(|| outbox.pop_frame())
            .map(|frame| frame.into_body())
            .collect()
    }

    fn events(outbox: &mut Outbox) -> Vec<Event> {
        std::iter::from_fn(|| outbox.pop_event()).collect()
    }

    fn mapped() -> (Session, Outbox) {
        let mut outbox = Outbox::default();
        let mut session = Session::new(0);
        session.begin(&mut outbox).unwrap();
        let begin = Begin {
            remote_channel: Some(0),
            next_outgoing_id: 0,
            incoming_window: 2048,
            outgoing_window: 2048,
            handle_max: Handle(u32::MAX),
            offered_capabilities: None,
            desired_capabilities: None,
            properties: None,
        };
        session.on_begin(0, begin).unwrap();
        frames(&mut outbox);
        (session, outbox)
    }

    /// Attaches a link and answers with the peer's attach. A refusing peer answers with a null
    /// terminus on its own side.
    fn attach(
        session: &mut Session,
        outbox: &mut Outbox,
        role: AttachRole,
        refuse: bool,
    ) -> (Handle, AttachResult) {
        let (responder, attached) = oneshot::channel();
        session.attach("queue".to_string(), role, responder, outbox);
        let sent = match frames(outbox).pop() {
            Some(FrameBody::Attach(attach)) => attach,
            other => panic!("expecting attach, found {:?}", other),
        };
        let (role, initial_delivery_count) = match sent.role {
            Role::Sender => (Role::Receiver, None),
            Role::Receiver => (Role::Sender, Some(0)),
        };
        let (source, target) = match (refuse, sent.role) {
            (false, _) => (sent.source, sent.target),
            (true, Role::Sender) => (sent.source, None),
            (true, Role::Receiver) => (None, sent.target),
        };
        let reply = Attach {
            name: sent.name,
            handle: PEER_HANDLE,
            role,
            snd_settle_mode: Default::default(),
            rcv_settle_mode: Default::default(),
            source,
            target,
            unsettled: None,
            incomplete_unsettled: false,
            initial_delivery_count,
            max_message_size: None,
            offered_capabilities: None,
            desired_capabilities: None,
            properties: None,
        };
        session.on_attach(reply, outbox).unwrap();
        (sent.handle, attached)
    }

    fn grant(session: &mut Session, outbox: &mut Outbox, credit: u32) {
        let flow = Flow {
            next_incoming_id: Some(session.next_outgoing_id),
            incoming_window: 2048,
            next_outgoing_id: 0,
            outgoing_window: 2048,
            handle: Some(PEER_HANDLE),
            delivery_count: Some(0),
            link_credit: Some(credit),
            available: None,
            drain: false,
            echo: false,
            properties: None,
        };
        session.on_flow(flow, outbox).unwrap();
    }

    fn sender_with_credit(session: &mut Session, outbox: &mut Outbox, credit: u32) -> Handle {
        let (handle, _) = attach(session, outbox, AttachRole::Sender, false);
        grant(session, outbox, credit);
        frames(outbox);
        events(outbox);
        handle
    }

    fn send(session: &mut Session, outbox: &mut Outbox, handle: Handle) -> SendResult {
        let (responder, result) = oneshot::channel();
        let payload = Message::from("hello").encode().unwrap();
        session.send(handle, payload, responder, MAX_FRAME_SIZE, outbox);
        result
    }

    fn delivered(mut result: SendResult) -> Delivery {
        result.try_recv().unwrap().unwrap()
    }

    fn disposition(
        first: u32,
        last: Option<u32>,
        settled: bool,
        state: Option<DeliveryState>,
    ) -> Disposition {
        Disposition {
            role: Role::Receiver,
            first,
            last,
            settled,
            state,
            batchable: false,
        }
    }

    fn transfer_from_peer(delivery_id: u32) -> Transfer {
        Transfer {
            handle: PEER_HANDLE,
            delivery_id: Some(delivery_id),
            delivery_tag: Some(DeliveryTag::from(delivery_id.to_be_bytes().to_vec())),
            message_format: Some(0),
            settled: Some(true),
            more: false,
            rcv_settle_mode: None,
            state: None,
            resume: false,
            aborted: false,
            batchable: false,
        }
    }

    fn detach_forced() -> definitions::Error {
        definitions::Error::new(LinkError::DetachForced, None, None)
    }

    #[test]
    fn peer_detach_fails_pending_sends() {
        let (mut session, mut outbox) = mapped();
        let handle = sender_with_credit(&mut session, &mut outbox, 1);

        let mut first = delivered(send(&mut session, &mut outbox, handle));
        let mut second = send(&mut session, &mut outbox, handle);
        assert!(second.try_recv().is_err());
        frames(&mut outbox);

        let detach = Detach {
            handle: PEER_HANDLE,
            closed: true,
            error: Some(detach_forced()),
        };
        session.on_detach(detach, &mut outbox).unwrap();

        match second.try_recv() {
            Ok(Err(SendError::LinkDetached(Some(error)))) => assert_eq!(error, detach_forced()),
            other => panic!("unexpected {:?}", other),
        }
        match first.outcome.try_recv() {
            Ok(Err(SendError::LinkDetached(Some(error)))) => assert_eq!(error, detach_forced()),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            &frames(&mut outbox)[..],
            [FrameBody::Detach(Detach { error: None, .. })]
        ));
        assert!(matches!(
            &events(&mut outbox)[..],
            [Event::LinkDetached { error: Some(_), .. }]
        ));
    }

    #[test]
    fn transfer_without_credit_detaches_the_link() {
        let (mut session, mut outbox) = mapped();
        let (incoming, mut received) = mpsc::unbounded_channel();
        let role = AttachRole::Receiver {
            credit_mode: CreditMode::Manual,
            incoming,
        };
        let (handle, _) = attach(&mut session, &mut outbox, role, false);
        frames(&mut outbox);

        let payload = Message::from("unasked").encode().unwrap();
        session
            .on_transfer(transfer_from_peer(0), payload, &mut outbox)
            .unwrap();

        match &frames(&mut outbox)[..] {
            [FrameBody::Detach(Detach {
                handle: sent,
                closed: true,
                error: Some(error),
            })] => {
                assert_eq!(*sent, handle);
                assert_eq!(
                    error.condition,
                    ErrorCondition::from(LinkError::TransferLimitExceeded)
                );
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            received.try_recv(),
            Ok(Err(RecvError::LinkDetached(Some(_))))
        ));
    }

    #[test]
    fn transfer_beyond_incoming_window() {
        let (mut session, mut outbox) = mapped();
        session.incoming_window = 0;
        let payload = Message::from("too much").encode().unwrap();
        match session.on_transfer(transfer_from_peer(0), payload, &mut outbox) {
            Err(Error::ProtocolViolation(error)) => assert_eq!(
                error.condition,
                ErrorCondition::from(SessionError::WindowViolation)
            ),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn disposition_range_settles_every_delivery() {
        let (mut session, mut outbox) = mapped();
        let handle = sender_with_credit(&mut session, &mut outbox, 3);
        let mut deliveries: Vec<Delivery> = (0..3)
            .map(|_| delivered(send(&mut session, &mut outbox, handle)))
            .collect();
        frames(&mut outbox);

        let accepted = Some(DeliveryState::accepted());
        session
            .on_disposition(disposition(0, Some(2), true, accepted), &mut outbox)
            .unwrap();

        for delivery in deliveries.iter_mut() {
            assert!(delivery.outcome.try_recv().unwrap().unwrap().is_accepted());
        }
        assert!(session.unsettled.is_empty());
        assert!(frames(&mut outbox).is_empty());
        assert_eq!(events(&mut outbox).len(), 3);
    }

    #[test]
    fn disposition_range_wraps_around() {
        let (mut session, mut outbox) = mapped();
        session.next_outgoing_id = u32::MAX - 1;
        let handle = sender_with_credit(&mut session, &mut outbox, 3);
        let mut deliveries: Vec<Delivery> = (0..3)
            .map(|_| delivered(send(&mut session, &mut outbox, handle)))
            .collect();
        let ids: Vec<u32> = deliveries.iter().map(Delivery::delivery_id).collect();
        assert_eq!(ids, vec![u32::MAX - 1, u32::MAX, 0]);

        let accepted = Some(DeliveryState::accepted());
        session
            .on_disposition(disposition(u32::MAX - 1, Some(0), true, accepted), &mut outbox)
            .unwrap();

        for delivery in deliveries.iter_mut() {
            assert!(delivery.outcome.try_recv().unwrap().unwrap().is_accepted());
        }
        assert!(session.unsettled.is_empty());
    }

    #[test]
    fn settled_disposition_without_state_is_accepted() {
        let (mut session, mut outbox) = mapped();
        let handle = sender_with_credit(&mut session, &mut outbox, 1);
        let mut delivery = delivered(send(&mut session, &mut outbox, handle));

        session
            .on_disposition(disposition(0, None, true, None), &mut outbox)
            .unwrap();

        let state = delivery.outcome.try_recv().unwrap().unwrap();
        assert!(state.is_accepted());
        assert!(matches!(
            &events(&mut outbox)[..],
            [Event::Settled { delivery_id: 0, .. }]
        ));
    }

    #[test]
    fn unsettled_outcome_is_settled_in_reply_for_removed_ids_only() {
        let (mut session, mut outbox) = mapped();
        let handle = sender_with_credit(&mut session, &mut outbox, 3);
        let _deliveries: Vec<Delivery> = (0..3)
            .map(|_| delivered(send(&mut session, &mut outbox, handle)))
            .collect();
        frames(&mut outbox);

        // The middle one is settled first, the later range covers ids never sent
        let accepted = Some(DeliveryState::accepted());
        session
            .on_disposition(disposition(1, None, true, accepted.clone()), &mut outbox)
            .unwrap();
        assert!(frames(&mut outbox).is_empty());
        session
            .on_disposition(disposition(0, Some(9), false, accepted), &mut outbox)
            .unwrap();

        let replies: Vec<(u32, Option<u32>)> = frames(&mut outbox)
            .into_iter()
            .map(|body| match body {
                FrameBody::Disposition(reply) => {
                    assert_eq!(reply.role, Role::Sender);
                    assert!(reply.settled);
                    (reply.first, reply.last)
                }
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(replies, vec![(0, None), (2, None)]);
        assert!(session.unsettled.is_empty());
    }

    #[test]
    fn runs_of_consecutive_ids() {
        assert_eq!(contiguous_runs(&[]), vec![]);
        assert_eq!(contiguous_runs(&[3, 4, 5, 7]), vec![(3, 5), (7, 7)]);
        assert_eq!(
            contiguous_runs(&[u32::MAX - 1, u32::MAX, 0, 2]),
            vec![(u32::MAX - 1, 0), (2, 2)]
        );
    }

    #[test]
    fn null_terminus_refuses_the_attach() {
        let (mut session, mut outbox) = mapped();
        let (_, mut attached) = attach(&mut session, &mut outbox, AttachRole::Sender, true);

        // Nothing resolves until the peer's detach follows
        assert!(attached.try_recv().is_err());
        assert!(events(&mut outbox).is_empty());

        let detach = Detach {
            handle: PEER_HANDLE,
            closed: true,
            error: Some(detach_forced()),
        };
        session.on_detach(detach, &mut outbox).unwrap();

        match attached.try_recv() {
            Ok(Err(AttachError::Refused(Some(error)))) => assert_eq!(error, detach_forced()),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            &frames(&mut outbox)[..],
            [FrameBody::Detach(_)]
        ));
    }
}
