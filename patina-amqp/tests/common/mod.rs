//! An in-memory broker serving a single client over `tokio::io::duplex`

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use patina_amqp::{
    frames::{
        amqp::{Frame, FrameBody, FrameCodec},
        sasl,
    },
    types::{
        definitions::{self, Handle, LinkError, Role},
        messaging::DeliveryState,
        performatives::{
            Attach, Begin, ChannelMax, Close, Detach, Disposition, End, Flow, MaxFrameSize, Open,
            Transfer,
        },
        primitives::{Binary, Symbol},
        sasl::{SaslCode, SaslInit, SaslMechanisms, SaslOutcome},
    },
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream},
    task::JoinHandle,
};
use tokio_util::codec::Framed;

pub const AMQP_HEADER: [u8; 8] = *b"AMQP\x00\x01\x00\x00";
pub const SASL_HEADER: [u8; 8] = *b"AMQP\x03\x01\x00\x00";

pub const WINDOW: u32 = 2048;

/// What the broker saw from the client
#[derive(Debug, Default)]
pub struct Report {
    pub sasl_init: Option<SaslInit>,
    pub open: Option<Open>,
    pub close_frames: usize,
    pub dispositions: Vec<Disposition>,
}

pub fn broker_open(container_id: &str) -> Open {
    Open {
        container_id: container_id.to_string(),
        hostname: None,
        max_frame_size: MaxFrameSize(65536),
        channel_max: ChannelMax(0),
        idle_time_out: None,
        outgoing_locales: None,
        incoming_locales: None,
        offered_capabilities: None,
        desired_capabilities: None,
        properties: None,
    }
}

/// Runs the header exchange, SASL included if the client asks for it, and answers the client's
/// open and begin
pub async fn accept(mut io: DuplexStream, report: &mut Report) -> Framed<DuplexStream, FrameCodec> {
    let mut header = [0u8; 8];
    io.read_exact(&mut header).await.unwrap();
    if header == SASL_HEADER {
        io.write_all(&SASL_HEADER).await.unwrap();
        let mut framed = Framed::new(&mut io, sasl::FrameCodec::default());
        let mechanisms = SaslMechanisms {
            sasl_server_mechanisms: vec![Symbol::from("ANONYMOUS"), Symbol::from("PLAIN")],
        };
        framed
            .send(sasl::Frame::Mechanisms(mechanisms))
            .await
            .unwrap();
        match framed.next().await {
            Some(Ok(sasl::Frame::Init(init))) => report.sasl_init = Some(init),
            other => panic!("expecting sasl-init, found {:?}", other),
        }
        let outcome = SaslOutcome {
            code: SaslCode::Ok,
            additional_data: None,
        };
        framed.send(sasl::Frame::Outcome(outcome)).await.unwrap();
        drop(framed);
        io.read_exact(&mut header).await.unwrap();
    }
    assert_eq!(header, AMQP_HEADER);
    io.write_all(&AMQP_HEADER).await.unwrap();

    let mut framed = Framed::new(io, FrameCodec::new(65536));
    match framed.next().await {
        Some(Ok(Frame {
            body: FrameBody::Open(open),
            ..
        })) => report.open = Some(open),
        other => panic!("expecting open, found {:?}", other),
    }
    framed
        .send(Frame::new(0u16, FrameBody::Open(broker_open("broker"))))
        .await
        .unwrap();

    match framed.next().await {
        Some(Ok(Frame {
            channel,
            body: FrameBody::Begin(_),
        })) => {
            let begin = Begin {
                remote_channel: Some(channel),
                next_outgoing_id: 0,
                incoming_window: WINDOW,
                outgoing_window: WINDOW,
                handle_max: Handle(u32::MAX),
                offered_capabilities: None,
                desired_capabilities: None,
                properties: None,
            };
            framed
                .send(Frame::new(0u16, FrameBody::Begin(begin)))
                .await
                .unwrap();
        }
        other => panic!("expecting begin, found {:?}", other),
    }
    framed
}

/// Starts a broker on one end of a pipe and returns the other end
pub fn start() -> (DuplexStream, JoinHandle<Report>) {
    start_with(Broker::default())
}

pub fn start_with(broker: Broker) -> (DuplexStream, JoinHandle<Report>) {
    let (client, server) = tokio::io::duplex(65536);
    let handle = tokio::spawn(async move {
        let mut report = Report::default();
        let framed = accept(server, &mut report).await;
        broker.serve(framed, &mut report).await;
        report
    });
    (client, handle)
}

#[derive(Debug)]
struct Link {
    address: String,
    /// Role of the client's end
    role: Role,
    delivery_count: u32,
    credit: u32,
}

/// Relays messages from sending links to receiving links of the same address.
///
/// Senders get as much credit as the receivers on their address granted.
#[derive(Debug, Default)]
pub struct Broker {
    links: HashMap<Handle, Link>,
    queues: HashMap<String, VecDeque<Bytes>>,
    next_incoming_id: u32,
    next_outgoing_id: u32,

    /// Senders on this address get one credit and are detached with `detach-forced` on their
    /// first transfer, which is left unsettled
    detaching: Option<String>,
}

impl Broker {
    pub fn detaching(address: &str) -> Self {
        Self {
            detaching: Some(address.to_string()),
            ..Default::default()
        }
    }

    pub async fn serve(mut self, mut framed: Framed<DuplexStream, FrameCodec>, report: &mut Report) {
        while let Some(Ok(frame)) = framed.next().await {
            let (replies, done) = self.on_frame(frame, report);
            for reply in replies {
                if framed.send(reply).await.is_err() {
                    return;
                }
            }
            if done {
                return;
            }
        }
    }

    fn on_frame(&mut self, frame: Frame, report: &mut Report) -> (Vec<Frame>, bool) {
        let mut replies = Vec::new();
        match frame.body {
            FrameBody::Attach(attach) => {
                let address = match attach.role {
                    Role::Sender => attach.target.as_ref().and_then(|t| t.address.clone()),
                    Role::Receiver => attach.source.as_ref().and_then(|s| s.address.clone()),
                }
                .unwrap_or_default();
                let (role, initial_delivery_count) = match attach.role {
                    Role::Sender => (Role::Receiver, None),
                    Role::Receiver => (Role::Sender, Some(0)),
                };
                let reply = Attach {
                    name: attach.name,
                    handle: attach.handle,
                    role,
                    snd_settle_mode: attach.snd_settle_mode,
                    rcv_settle_mode: attach.rcv_settle_mode,
                    source: attach.source,
                    target: attach.target,
                    unsettled: None,
                    incomplete_unsettled: false,
                    initial_delivery_count,
                    max_message_size: None,
                    offered_capabilities: None,
                    desired_capabilities: None,
                    properties: None,
                };
                replies.push(Frame::new(0u16, FrameBody::Attach(reply)));
                self.links.insert(
                    attach.handle,
                    Link {
                        address: address.clone(),
                        role: attach.role,
                        delivery_count: 0,
                        credit: 0,
                    },
                );
                if attach.role == Role::Sender && self.detaching.as_ref() == Some(&address) {
                    let flow = self.sender_flow(attach.handle, 0, 1);
                    replies.push(Frame::new(0u16, FrameBody::Flow(flow)));
                    return (replies, false);
                }
                self.grant_senders(&address, &mut replies);
            }
            FrameBody::Flow(flow) => {
                let handle = match flow.handle {
                    Some(handle) => handle,
                    None => return (replies, false),
                };
                let address = match self.links.get_mut(&handle) {
                    Some(link) if link.role == Role::Receiver => {
                        let limit = flow
                            .delivery_count
                            .unwrap_or(0)
                            .wrapping_add(flow.link_credit.unwrap_or(0));
                        link.credit = limit.wrapping_sub(link.delivery_count);
                        if link.credit > i32::MAX as u32 {
                            link.credit = 0;
                        }
                        link.address.clone()
                    }
                    _ => return (replies, false),
                };
                self.deliver(&address, &mut replies);
                self.grant_senders(&address, &mut replies);
            }
            FrameBody::Transfer {
                performative,
                payload,
            } => {
                self.next_incoming_id = self.next_incoming_id.wrapping_add(1);
                let detach = match self.links.get(&performative.handle) {
                    Some(link) => self.detaching.as_ref() == Some(&link.address),
                    None => false,
                };
                if detach {
                    self.links.remove(&performative.handle);
                    let error = definitions::Error::new(
                        LinkError::DetachForced,
                        Some("detached by the broker".to_string()),
                        None,
                    );
                    let detach = Detach {
                        handle: performative.handle,
                        closed: true,
                        error: Some(error),
                    };
                    replies.push(Frame::new(0u16, FrameBody::Detach(detach)));
                    return (replies, false);
                }
                let address = match self.links.get_mut(&performative.handle) {
                    Some(link) => {
                        link.delivery_count = link.delivery_count.wrapping_add(1);
                        link.address.clone()
                    }
                    None => return (replies, false),
                };
                if let Some(delivery_id) = performative.delivery_id {
                    let disposition = Disposition {
                        role: Role::Receiver,
                        first: delivery_id,
                        last: None,
                        settled: true,
                        state: Some(DeliveryState::accepted()),
                        batchable: false,
                    };
                    replies.push(Frame::new(0u16, FrameBody::Disposition(disposition)));
                }
                self.queues.entry(address.clone()).or_default().push_back(payload);
                self.deliver(&address, &mut replies);
                self.grant_senders(&address, &mut replies);
            }
            FrameBody::Disposition(disposition) => report.dispositions.push(disposition),
            FrameBody::Detach(detach) => {
                self.links.remove(&detach.handle);
                let reply = Detach {
                    handle: detach.handle,
                    closed: true,
                    error: None,
                };
                replies.push(Frame::new(0u16, FrameBody::Detach(reply)));
            }
            FrameBody::End(_) => {
                replies.push(Frame::new(0u16, FrameBody::End(End { error: None })));
            }
            FrameBody::Close(_) => {
                report.close_frames += 1;
                replies.push(Frame::new(0u16, FrameBody::Close(Close { error: None })));
                return (replies, true);
            }
            FrameBody::Open(_) | FrameBody::Begin(_) | FrameBody::Empty => {}
        }
        (replies, false)
    }

    /// Moves queued messages to receivers with credit
    fn deliver(&mut self, address: &str, replies: &mut Vec<Frame>) {
        let queue = match self.queues.get_mut(address) {
            Some(queue) => queue,
            None => return,
        };
        for (handle, link) in self.links.iter_mut() {
            if link.role != Role::Receiver || link.address != address {
                continue;
            }
            while link.credit > 0 {
                let payload = match queue.pop_front() {
                    Some(payload) => payload,
                    None => return,
                };
                let delivery_id = self.next_outgoing_id;
                self.next_outgoing_id = self.next_outgoing_id.wrapping_add(1);
                link.credit -= 1;
                link.delivery_count = link.delivery_count.wrapping_add(1);
                let transfer = Transfer {
                    handle: *handle,
                    delivery_id: Some(delivery_id),
                    delivery_tag: Some(Binary::from(delivery_id.to_be_bytes().to_vec())),
                    message_format: Some(0),
                    settled: Some(false),
                    more: false,
                    rcv_settle_mode: None,
                    state: None,
                    resume: false,
                    aborted: false,
                    batchable: false,
                };
                replies.push(Frame::new(
                    0u16,
                    FrameBody::Transfer {
                        performative: transfer,
                        payload,
                    },
                ));
            }
        }
    }

    /// Tells every sender on `address` how much the receivers can take
    fn grant_senders(&self, address: &str, replies: &mut Vec<Frame>) {
        let queued = self.queues.get(address).map(|q| q.len()).unwrap_or(0) as u32;
        let credit = self
            .links
            .values()
            .filter(|link| link.role == Role::Receiver && link.address == address)
            .map(|link| link.credit)
            .sum::<u32>()
            .saturating_sub(queued);

        for (handle, link) in self.links.iter() {
            if link.role != Role::Sender || link.address != address {
                continue;
            }
            let flow = self.sender_flow(*handle, link.delivery_count, credit);
            replies.push(Frame::new(0u16, FrameBody::Flow(flow)));
        }
    }

    fn sender_flow(&self, handle: Handle, delivery_count: u32, credit: u32) -> Flow {
        Flow {
            next_incoming_id: Some(self.next_incoming_id),
            incoming_window: WINDOW,
            next_outgoing_id: self.next_outgoing_id,
            outgoing_window: WINDOW,
            handle: Some(handle),
            delivery_count: Some(delivery_count),
            link_credit: Some(credit),
            available: None,
            drain: false,
            echo: false,
            properties: None,
        }
    }
}

/// Reads frames until one matches `pick`
pub async fn expect<T>(
    framed: &mut Framed<DuplexStream, FrameCodec>,
    mut pick: impl FnMut(FrameBody) -> Option<T>,
) -> T {
    loop {
        match framed.next().await {
            Some(Ok(frame)) => {
                if let Some(found) = pick(frame.body) {
                    return found;
                }
            }
            other => panic!("stream ended with {:?}", other),
        }
    }
}
