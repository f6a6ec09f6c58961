//! Connection endpoint.
//!
//! [`Connection`] is a plain state machine: incoming frames and local requests go in, frames to
//! write and [`Event`]s to publish come out through its [`Outbox`]. The
//! [`engine`](engine::ConnectionEngine) owns it together with the transport.

use std::collections::{HashMap, VecDeque};

use patina_amqp_types::{
    definitions::{self, AmqpError, Handle},
    performatives::{Begin, Close, Open},
    states::SessionState,
};
use slab::Slab;
use tokio::sync::oneshot;
use tracing::{debug, instrument, trace};

mod builder;
pub(crate) mod engine;
mod error;
mod heartbeat;

pub use builder::*;
pub use error::{Error, OpenError};
pub use patina_amqp_types::states::ConnectionState;

use crate::{
    control::AttachRole,
    event::Event,
    frames::amqp::{Frame, FrameBody},
    link::{AttachError, Delivery, DetachError, LinkInfo, RecvError, SendError},
    session::Session,
    Payload,
};

/// Frames waiting to be written and events waiting to be published
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    frames: VecDeque<Frame>,
    events: VecDeque<Event>,
}

impl Outbox {
    pub fn frame(&mut self, channel: u16, body: FrameBody) {
        self.frames.push_back(Frame::new(channel, body));
    }

    pub fn event(&mut self, event: Event) {
        self.events.push_back(event);
    }

    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    pub fn pop_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }
}

#[derive(Debug)]
pub(crate) struct Connection {
    local_state: ConnectionState,
    local_open: Open,
    remote_open: Option<Open>,

    // negotiated with the remote open
    agreed_channel_max: u16,
    agreed_max_frame_size: usize,

    // sessions keyed by outgoing channel
    sessions: Slab<Session>,
    session_by_incoming_channel: HashMap<u16, usize>,

    outbox: Outbox,
    local_error: Option<definitions::Error>,
    remote_error: Option<definitions::Error>,
}

/// Looks up a mapped session by the channel the peer uses for it
fn mapped_session<'a>(
    sessions: &'a mut Slab<Session>,
    by_incoming_channel: &HashMap<u16, usize>,
    channel: u16,
) -> Result<&'a mut Session, Error> {
    let session = match by_incoming_channel.get(&channel) {
        Some(key) => sessions.get_mut(*key),
        None => None,
    }
    .ok_or_else(|| Error::illegal_state(format!("channel {} is not mapped", channel)))?;
    match session.local_state() {
        SessionState::Mapped => Ok(session),
        state => Err(Error::illegal_state(format!(
            "session on channel {} is {:?}",
            channel, state
        ))),
    }
}

impl Connection {
    /// A connection whose protocol header exchange is done
    pub fn new(local_open: Open) -> Self {
        let agreed_max_frame_size = local_open.max_frame_size.0 as usize;
        let agreed_channel_max = local_open.channel_max.0;
        Self {
            local_state: ConnectionState::HeaderExchange,
            local_open,
            remote_open: None,
            agreed_channel_max,
            agreed_max_frame_size,
            sessions: Slab::new(),
            session_by_incoming_channel: HashMap::new(),
            outbox: Outbox::default(),
            local_error: None,
            remote_error: None,
        }
    }

    pub fn local_state(&self) -> ConnectionState {
        self.local_state
    }

    pub fn local_open(&self) -> &Open {
        &self.local_open
    }

    pub fn remote_open(&self) -> Option<&Open> {
        self.remote_open.as_ref()
    }

    pub fn remote_error(&self) -> Option<&definitions::Error> {
        self.remote_error.as_ref()
    }

    pub fn agreed_max_frame_size(&self) -> usize {
        self.agreed_max_frame_size
    }

    pub fn agreed_channel_max(&self) -> u16 {
        self.agreed_channel_max
    }

    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.outbox.pop_frame()
    }

    pub fn pop_event(&mut self) -> Option<Event> {
        self.outbox.pop_event()
    }

    pub fn event(&mut self, event: Event) {
        self.outbox.event(event);
    }

    pub fn send_open(&mut self) -> Result<(), Error> {
        match self.local_state {
            ConnectionState::HeaderExchange => {
                let open = self.local_open.clone();
                self.outbox.frame(0, FrameBody::Open(open));
                self.local_state = ConnectionState::OpenSent;
                Ok(())
            }
            state => Err(Error::illegal_state(format!(
                "cannot send open in state {:?}",
                state
            ))),
        }
    }

    fn on_open(&mut self, open: Open) -> Result<(), Error> {
        match self.local_state {
            ConnectionState::OpenSent => {}
            state => {
                return Err(Error::illegal_state(format!(
                    "open received in state {:?}",
                    state
                )))
            }
        }

        self.agreed_max_frame_size =
            std::cmp::min(self.local_open.max_frame_size.0, open.max_frame_size.0) as usize;
        self.agreed_channel_max =
            std::cmp::min(self.local_open.channel_max.0, open.channel_max.0);
        self.outbox.event(Event::ConnectionOpened {
            container_id: open.container_id.clone(),
        });
        debug!(
            container_id = %open.container_id,
            max_frame_size = self.agreed_max_frame_size,
            channel_max = self.agreed_channel_max,
            "connection opened"
        );
        self.remote_open = Some(open);
        self.local_state = ConnectionState::Opened;
        Ok(())
    }

    /// Sends a begin for a new session and returns its outgoing channel
    pub fn begin_session(&mut self) -> Result<u16, Error> {
        if self.local_state != ConnectionState::Opened {
            return Err(Error::illegal_state("cannot begin a session before open"));
        }
        let entry = self.sessions.vacant_entry();
        let channel = match u16::try_from(entry.key()) {
            Ok(channel) if channel <= self.agreed_channel_max => channel,
            _ => {
                return Err(Error::violation(
                    AmqpError::ResourceLimitExceeded,
                    "channel max reached",
                ))
            }
        };
        let mut session = Session::new(channel);
        session.begin(&mut self.outbox)?;
        entry.insert(session);
        Ok(channel)
    }

    pub fn session_mapped(&self, channel: u16) -> bool {
        self.sessions
            .get(channel as usize)
            .map(|session| session.local_state() == SessionState::Mapped)
            .unwrap_or(false)
    }

    fn on_begin(&mut self, channel: u16, begin: Begin) -> Result<(), Error> {
        let outgoing_channel = match begin.remote_channel {
            Some(outgoing_channel) => outgoing_channel,
            None => {
                return Err(Error::violation(
                    AmqpError::NotImplemented,
                    "begin initiated by the peer",
                ))
            }
        };
        if self.session_by_incoming_channel.contains_key(&channel) {
            return Err(Error::illegal_state(format!(
                "channel {} is already mapped",
                channel
            )));
        }
        let session = self
            .sessions
            .get_mut(outgoing_channel as usize)
            .ok_or_else(|| {
                Error::illegal_state(format!("no session on channel {}", outgoing_channel))
            })?;
        session.on_begin(channel, begin)?;
        self.session_by_incoming_channel
            .insert(channel, outgoing_channel as usize);
        Ok(())
    }

    #[instrument(name = "RECV", skip_all)]
    pub fn on_incoming(&mut self, frame: Frame) -> Result<(), Error> {
        let Frame { channel, body } = frame;
        trace!(channel, frame = ?body);

        match (&body, self.local_state) {
            (FrameBody::Empty, _) => return Ok(()),
            (FrameBody::Open(_), _) | (FrameBody::Close(_), _) => {}
            (_, ConnectionState::Opened) => {}
            // Frames the peer sent before it saw our close
            (_, ConnectionState::CloseSent) => return Ok(()),
            (body, state) => {
                return Err(Error::illegal_state(format!(
                    "{} received in state {:?}",
                    body.name(),
                    state
                )))
            }
        }

        let sessions = &mut self.sessions;
        let by_incoming_channel = &self.session_by_incoming_channel;
        match body {
            FrameBody::Open(open) => self.on_open(open),
            FrameBody::Begin(begin) => self.on_begin(channel, begin),
            FrameBody::Attach(attach) => {
                mapped_session(sessions, by_incoming_channel, channel)?
                    .on_attach(attach, &mut self.outbox)
            }
            FrameBody::Flow(flow) => mapped_session(sessions, by_incoming_channel, channel)?
                .on_flow(flow, &mut self.outbox),
            FrameBody::Transfer {
                performative,
                payload,
            } => mapped_session(sessions, by_incoming_channel, channel)?.on_transfer(
                performative,
                payload,
                &mut self.outbox,
            ),
            FrameBody::Disposition(disposition) => {
                mapped_session(sessions, by_incoming_channel, channel)?
                    .on_disposition(disposition, &mut self.outbox)
            }
            FrameBody::Detach(detach) => {
                mapped_session(sessions, by_incoming_channel, channel)?
                    .on_detach(detach, &mut self.outbox)
            }
            FrameBody::End(end) => {
                mapped_session(sessions, by_incoming_channel, channel)?
                    .on_end(end, &mut self.outbox)?;
                self.session_by_incoming_channel.remove(&channel);
                Ok(())
            }
            FrameBody::Close(close) => self.on_close(close),
            FrameBody::Empty => Ok(()),
        }
    }

    fn on_close(&mut self, close: Close) -> Result<(), Error> {
        match self.local_state {
            ConnectionState::OpenSent | ConnectionState::Opened => {
                debug!(error = ?close.error, "close received");
                self.remote_error = close.error;
                self.local_state = ConnectionState::CloseReceived;
                self.send_close(None);
                Ok(())
            }
            ConnectionState::CloseSent => {
                self.remote_error = close.error;
                self.set_closed();
                Ok(())
            }
            state => Err(Error::illegal_state(format!(
                "close received in state {:?}",
                state
            ))),
        }
    }

    /// Queues a close frame. Returns false if a close was already sent.
    pub fn send_close(&mut self, error: Option<definitions::Error>) -> bool {
        match self.local_state {
            ConnectionState::OpenSent | ConnectionState::Opened => {
                self.outbox.frame(0, FrameBody::Close(Close { error: error.clone() }));
                self.local_error = error;
                self.local_state = ConnectionState::CloseSent;
                self.release_sessions();
                true
            }
            ConnectionState::CloseReceived => {
                self.outbox.frame(0, FrameBody::Close(Close { error: error.clone() }));
                self.local_error = error;
                self.set_closed();
                true
            }
            _ => false,
        }
    }

    /// Closes the connection after an error. A close frame carrying `error` is sent if the
    /// state still allows it.
    pub fn fail(&mut self, error: Option<definitions::Error>) {
        if let Some(error) = error {
            self.send_close(Some(error));
        }
        self.set_closed();
    }

    fn set_closed(&mut self) {
        if self.local_state == ConnectionState::Closed {
            return;
        }
        self.local_state = ConnectionState::Closed;
        self.release_sessions();
        let error = self.remote_error.clone().or_else(|| self.local_error.clone());
        debug!(?error, "connection closed");
        self.outbox.event(Event::ConnectionClosed { error });
    }

    fn release_sessions(&mut self) {
        let error = self.remote_error.clone().or_else(|| self.local_error.clone());
        for (_, session) in self.sessions.iter_mut() {
            session.release(error.clone(), true, &mut self.outbox);
        }
    }

    /// Queues an empty frame if the connection is open
    pub fn heartbeat(&mut self) {
        if self.local_state == ConnectionState::Opened {
            self.outbox.frame(0, FrameBody::Empty);
        }
    }

    pub fn attach(
        &mut self,
        channel: u16,
        address: String,
        role: AttachRole,
        responder: oneshot::Sender<Result<LinkInfo, AttachError>>,
    ) {
        if self.local_state != ConnectionState::Opened {
            let _ = responder.send(Err(AttachError::ConnectionClosed));
            return;
        }
        match self.sessions.get_mut(channel as usize) {
            Some(session) => session.attach(address, role, responder, &mut self.outbox),
            None => {
                let _ = responder.send(Err(AttachError::IllegalSessionState));
            }
        }
    }

    pub fn send(
        &mut self,
        channel: u16,
        handle: Handle,
        payload: Payload,
        responder: oneshot::Sender<Result<Delivery, SendError>>,
    ) {
        if self.local_state != ConnectionState::Opened {
            let _ = responder.send(Err(SendError::ConnectionClosed));
            return;
        }
        let max_frame_size = self.agreed_max_frame_size;
        match self.sessions.get_mut(channel as usize) {
            Some(session) => {
                session.send(handle, payload, responder, max_frame_size, &mut self.outbox)
            }
            None => {
                let _ = responder.send(Err(SendError::LinkDetached(None)));
            }
        }
    }

    pub fn credit(&self, channel: u16, handle: Handle) -> Result<u32, SendError> {
        if self.local_state != ConnectionState::Opened {
            return Err(SendError::ConnectionClosed);
        }
        self.sessions
            .get(channel as usize)
            .ok_or(SendError::LinkDetached(None))?
            .link_credit(handle)
    }

    pub fn set_credit(&mut self, channel: u16, handle: Handle, credit: u32) -> Result<(), RecvError> {
        if self.local_state != ConnectionState::Opened {
            return Err(RecvError::ConnectionClosed);
        }
        self.sessions
            .get_mut(channel as usize)
            .ok_or(RecvError::LinkDetached(None))?
            .set_credit(handle, credit, &mut self.outbox)
    }

    pub fn detach(
        &mut self,
        channel: u16,
        handle: Handle,
        responder: Option<oneshot::Sender<Result<(), DetachError>>>,
    ) {
        let session = match self.local_state {
            ConnectionState::Opened => self.sessions.get_mut(channel as usize),
            _ => None,
        };
        match session {
            Some(session) => session.detach(handle, responder, &mut self.outbox),
            None => {
                if let Some(responder) = responder {
                    let _ = responder.send(Err(DetachError::ConnectionClosed));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use patina_amqp_types::{
        definitions::{self, AmqpError, ConnectionError, ErrorCondition, Handle},
        messaging::Message,
        performatives::{Begin, ChannelMax, Close, End, MaxFrameSize, Open, Transfer},
    };

    use super::{Connection, ConnectionState, Error};
    use crate::{
        event::Event,
        frames::amqp::{Frame, FrameBody},
    };

    fn open(container_id: &str, max_frame_size: u32, channel_max: u16) -> Open {
        Open {
            container_id: container_id.to_string(),
            hostname: None,
            max_frame_size: MaxFrameSize(max_frame_size),
            channel_max: ChannelMax(channel_max),
            idle_time_out: None,
            outgoing_locales: None,
            incoming_locales: None,
            offered_capabilities: None,
            desired_capabilities: None,
            properties: None,
        }
    }

    fn frames(connection: &mut Connection) -> Vec<FrameBody> {
        std::iter::from_fn(|| connection.pop_frame())
            .map(Frame::into_body)
            .collect()
    }

    fn opened() -> Connection {
        let mut connection = Connection::new(open("client", 65536, 9));
        connection.send_open().unwrap();
        connection
            .on_incoming(Frame::new(0u16, FrameBody::Open(open("broker", 1024, 255))))
            .unwrap();
        frames(&mut connection);
        while connection.pop_event().is_some() {}
        connection
    }

    fn is_illegal_state(err: &Error) -> bool {
        matches!(
            err,
            Error::ProtocolViolation(definitions::Error {
                condition: ErrorCondition::AmqpError(AmqpError::IllegalState),
                ..
            })
        )
    }

    #[test]
    fn open_negotiates_limits() {
        let mut connection = Connection::new(open("client", 65536, 9));
        connection.send_open().unwrap();
        assert_eq!(connection.local_state(), ConnectionState::OpenSent);
        assert!(matches!(&frames(&mut connection)[..], [FrameBody::Open(_)]));

        connection
            .on_incoming(Frame::new(0u16, FrameBody::Open(open("broker", 1024, 255))))
            .unwrap();
        assert_eq!(connection.local_state(), ConnectionState::Opened);
        assert_eq!(connection.agreed_max_frame_size(), 1024);
        assert_eq!(connection.agreed_channel_max(), 9);
        match connection.pop_event() {
            Some(Event::ConnectionOpened { container_id }) => assert_eq!(container_id, "broker"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn second_open_is_a_violation() {
        let mut connection = opened();
        let err = connection
            .on_incoming(Frame::new(0u16, FrameBody::Open(open("broker", 1024, 255))))
            .unwrap_err();
        assert!(is_illegal_state(&err));
    }

    #[test]
    fn begin_before_open_is_a_violation() {
        let mut connection = Connection::new(open("client", 65536, 9));
        connection.send_open().unwrap();
        let begin = Begin {
            remote_channel: Some(0),
            next_outgoing_id: 0,
            incoming_window: 10,
            outgoing_window: 10,
            handle_max: Handle(u32::MAX),
            offered_capabilities: None,
            desired_capabilities: None,
            properties: None,
        };
        let err = connection
            .on_incoming(Frame::new(0u16, FrameBody::Begin(begin)))
            .unwrap_err();
        assert!(is_illegal_state(&err));
        assert!(connection.begin_session().is_err());
    }

    #[test]
    fn transfer_on_unmapped_channel_is_a_violation() {
        let mut connection = opened();
        let transfer = Transfer {
            handle: Handle(0),
            delivery_id: Some(0),
            delivery_tag: None,
            message_format: Some(0),
            settled: Some(true),
            more: false,
            rcv_settle_mode: None,
            state: None,
            resume: false,
            aborted: false,
            batchable: false,
        };
        let payload = Message::from("hello").encode().unwrap();
        let err = connection
            .on_incoming(Frame::new(
                3u16,
                FrameBody::Transfer {
                    performative: transfer,
                    payload,
                },
            ))
            .unwrap_err();
        assert!(is_illegal_state(&err));
    }

    #[test]
    fn failing_sends_close_with_the_error() {
        let mut connection = opened();
        let error = definitions::Error::new(AmqpError::IllegalState, None, None);
        connection.fail(Some(error.clone()));
        assert_eq!(connection.local_state(), ConnectionState::Closed);
        match &frames(&mut connection)[..] {
            [FrameBody::Close(Close { error: Some(sent) })] => assert_eq!(sent, &error),
            other => panic!("unexpected {:?}", other),
        }
        match connection.pop_event() {
            Some(Event::ConnectionClosed { error: Some(closed) }) => assert_eq!(closed, error),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn local_close_is_idempotent() {
        let mut connection = opened();
        assert!(connection.send_close(None));
        assert!(!connection.send_close(None));
        assert_eq!(frames(&mut connection).len(), 1);
        assert_eq!(connection.local_state(), ConnectionState::CloseSent);

        connection
            .on_incoming(Frame::new(0u16, FrameBody::Close(Close { error: None })))
            .unwrap();
        assert_eq!(connection.local_state(), ConnectionState::Closed);
        assert!(!connection.send_close(None));
        assert!(frames(&mut connection).is_empty());
    }

    #[test]
    fn remote_close_is_answered() {
        let mut connection = opened();
        let error = definitions::Error::new(ConnectionError::ConnectionForced, None, None);
        connection
            .on_incoming(Frame::new(
                0u16,
                FrameBody::Close(Close {
                    error: Some(error.clone()),
                }),
            ))
            .unwrap();
        assert_eq!(connection.local_state(), ConnectionState::Closed);
        assert!(matches!(
            &frames(&mut connection)[..],
            [FrameBody::Close(Close { error: None })]
        ));
        assert_eq!(connection.remote_error(), Some(&error));
    }

    #[test]
    fn frames_after_close_sent_are_ignored() {
        let mut connection = opened();
        connection.send_close(None);
        frames(&mut connection);
        connection
            .on_incoming(Frame::new(7u16, FrameBody::End(End { error: None })))
            .unwrap();
        assert!(frames(&mut connection).is_empty());
    }
}
