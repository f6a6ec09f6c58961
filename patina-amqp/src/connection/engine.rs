//! The engine owns the transport and the connection state machine. Incoming frames, control
//! requests and heartbeats are handled on a single task.

use std::{io, time::Duration};

use futures_util::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, error, instrument, trace};

use crate::{
    control::ConnectionControl, event::Event, frames::amqp::Frame, transport::Transport,
    util::Running,
};

use super::{heartbeat::HeartBeat, Connection, ConnectionState, Error, OpenError};

#[derive(Debug)]
pub(crate) struct ConnectionEngine<Io> {
    transport: Transport<Io>,
    connection: Connection,
    control: mpsc::Receiver<ConnectionControl>,
    events: broadcast::Sender<Event>,
    heartbeat: HeartBeat,
    control_closed: bool,
    error: Option<Error>,
}

impl<Io> ConnectionEngine<Io>
where
    Io: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Exchanges open frames and begins the default session without starting the event loop.
    ///
    /// Returns the engine and the outgoing channel of the session.
    pub(crate) async fn open(
        transport: Transport<Io>,
        connection: Connection,
        control: mpsc::Receiver<ConnectionControl>,
        events: broadcast::Sender<Event>,
    ) -> Result<(Self, u16), OpenError> {
        let mut engine = Self {
            transport,
            connection,
            control,
            events,
            heartbeat: HeartBeat::never(),
            control_closed: false,
            error: None,
        };

        engine.connection.send_open()?;
        engine.flush().await?;
        engine
            .wait_until(|connection| connection.local_state() == ConnectionState::Opened)
            .await?;

        let max_frame_size = engine.connection.agreed_max_frame_size();
        engine.transport.set_max_frame_size(max_frame_size);

        // Keep the peer's idle timeout from firing
        let remote_idle_time_out = engine
            .connection
            .remote_open()
            .and_then(|open| open.idle_time_out)
            .filter(|millis| *millis > 0);
        if let Some(millis) = remote_idle_time_out {
            let period = Duration::from_millis(u64::from(millis) / 2);
            engine.heartbeat = HeartBeat::new(period);
        }

        let channel = engine.connection.begin_session()?;
        engine.flush().await?;
        engine
            .wait_until(|connection| connection.session_mapped(channel))
            .await?;
        engine.dispatch_events();

        Ok((engine, channel))
    }

    /// Reads frames until `done` holds
    async fn wait_until(
        &mut self,
        done: impl Fn(&Connection) -> bool,
    ) -> Result<(), OpenError> {
        while !done(&self.connection) {
            let frame = match self.transport.next().await {
                Some(frame) => frame.map_err(Error::from)?,
                None => {
                    return Err(OpenError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "transport closed while opening",
                    )))
                }
            };
            if let Err(err) = self.connection.on_incoming(frame) {
                self.connection.fail(err.close_condition());
                let _ = self.flush().await;
                return Err(err.into());
            }
            self.flush().await?;

            if self.connection.local_state() == ConnectionState::Closed {
                return Err(OpenError::Remote(self.connection.remote_error().cloned()));
            }
        }
        Ok(())
    }

    pub fn spawn(self) -> JoinHandle<Result<(), Error>> {
        tokio::spawn(self.event_loop())
    }
}

impl<Io> ConnectionEngine<Io>
where
    Io: AsyncRead + AsyncWrite + Send + Unpin,
{
    /// Writes every queued frame
    #[instrument(name = "SEND", skip_all)]
    async fn flush(&mut self) -> Result<(), Error> {
        let mut fed = false;
        while let Some(frame) = self.connection.pop_frame() {
            trace!(channel = frame.channel, frame = ?frame.body);
            self.transport.feed(frame).await?;
            fed = true;
        }
        if fed {
            self.transport.flush().await?;
        }
        Ok(())
    }

    fn dispatch_events(&mut self) {
        while let Some(event) = self.connection.pop_event() {
            // No subscriber is fine
            let _ = self.events.send(event);
        }
    }

    #[inline]
    fn on_incoming(&mut self, incoming: Result<Frame, Error>) -> Result<Running, Error> {
        self.connection.on_incoming(incoming?)?;
        Ok(Running::Continue)
    }

    #[inline]
    fn on_control(&mut self, control: ConnectionControl) -> Result<Running, Error> {
        match control {
            ConnectionControl::Close(error) => {
                self.connection.send_close(error);
            }
            ConnectionControl::Attach {
                channel,
                address,
                role,
                responder,
            } => self.connection.attach(channel, address, role, responder),
            ConnectionControl::Send {
                channel,
                handle,
                payload,
                responder,
            } => self.connection.send(channel, handle, payload, responder),
            ConnectionControl::Credit {
                channel,
                handle,
                responder,
            } => {
                let _ = responder.send(self.connection.credit(channel, handle));
            }
            ConnectionControl::SetCredit {
                channel,
                handle,
                credit,
                responder,
            } => {
                let _ = responder.send(self.connection.set_credit(channel, handle, credit));
            }
            ConnectionControl::Detach {
                channel,
                handle,
                responder,
            } => self.connection.detach(channel, handle, responder),
        }
        Ok(Running::Continue)
    }

    #[inline]
    fn on_heartbeat(&mut self) -> Result<Running, Error> {
        self.connection.heartbeat();
        Ok(Running::Continue)
    }

    /// Closes the connection with the condition matching `err` and stops the loop
    fn on_error(&mut self, err: Error) -> Running {
        error!(%err, "connection engine stopped");
        self.connection.event(Event::Error(err.clone()));
        self.connection.fail(err.close_condition());
        self.error = Some(err);
        Running::Stop
    }

    async fn event_loop(mut self) -> Result<(), Error> {
        loop {
            let result = tokio::select! {
                _ = self.heartbeat.next() => self.on_heartbeat(),
                incoming = self.transport.next() => {
                    match incoming {
                        Some(incoming) => self.on_incoming(incoming.map_err(Into::into)),
                        None => Err(Error::from(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "transport closed by the peer",
                        ))),
                    }
                },
                control = self.control.recv(), if !self.control_closed => {
                    match control {
                        Some(control) => self.on_control(control),
                        None => {
                            // Every handle is dropped
                            self.control_closed = true;
                            self.connection.send_close(None);
                            Ok(Running::Continue)
                        }
                    }
                },
            };

            let mut running = match result {
                Ok(running) => running,
                Err(err) => self.on_error(err),
            };
            if let Err(err) = self.flush().await {
                if self.error.is_none() {
                    running = self.on_error(err);
                }
            }
            self.dispatch_events();

            if running == Running::Stop
                || self.connection.local_state() == ConnectionState::Closed
            {
                break;
            }
        }

        debug!("stopping connection engine");
        let _ = self.transport.close().await;
        match self.error.take() {
            Some(err) => Err(err),
            None => match self.connection.remote_error() {
                Some(error) => Err(Error::Remote(error.clone())),
                None => Ok(()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use patina_amqp_types::{
        definitions::Handle,
        performatives::{Begin, ChannelMax, Close, MaxFrameSize, Open},
    };
    use tokio::{
        io::DuplexStream,
        sync::{broadcast, mpsc},
    };
    use tokio_util::codec::Framed;

    use super::ConnectionEngine;
    use crate::{
        connection::{Connection, OpenError},
        frames::amqp::{Frame, FrameBody, FrameCodec},
        transport::Transport,
    };

    fn open(container_id: &str, idle_time_out: Option<u32>) -> Open {
        Open {
            container_id: container_id.to_string(),
            hostname: None,
            max_frame_size: MaxFrameSize(4096),
            channel_max: ChannelMax(0),
            idle_time_out,
            outgoing_locales: None,
            incoming_locales: None,
            offered_capabilities: None,
            desired_capabilities: None,
            properties: None,
        }
    }

    fn begin_reply() -> Begin {
        Begin {
            remote_channel: Some(0),
            next_outgoing_id: 0,
            incoming_window: 100,
            outgoing_window: 100,
            handle_max: Handle(7),
            offered_capabilities: None,
            desired_capabilities: None,
            properties: None,
        }
    }

    fn engine_parts(
        io: DuplexStream,
    ) -> (
        Transport<DuplexStream>,
        Connection,
        mpsc::Receiver<crate::control::ConnectionControl>,
        broadcast::Sender<crate::Event>,
    ) {
        let (_control_tx, control_rx) = mpsc::channel(8);
        let (events, _) = broadcast::channel(8);
        (
            Transport::bind(io, 4096, None),
            Connection::new(open("client", None)),
            control_rx,
            events,
        )
    }

    #[tokio::test]
    async fn open_begins_the_default_session() {
        let (client, server) = tokio::io::duplex(4096);
        let peer = tokio::spawn(async move {
            let mut framed = Framed::new(server, FrameCodec::new(4096));
            let frame = framed.next().await.unwrap().unwrap();
            assert!(matches!(frame.body, FrameBody::Open(_)));
            framed
                .send(Frame::new(0u16, FrameBody::Open(open("broker", Some(60_000)))))
                .await
                .unwrap();
            let frame = framed.next().await.unwrap().unwrap();
            assert!(matches!(frame.body, FrameBody::Begin(_)));
            framed
                .send(Frame::new(0u16, FrameBody::Begin(begin_reply())))
                .await
                .unwrap();
            framed
        });

        let (transport, connection, control, events) = engine_parts(client);
        let (engine, channel) = ConnectionEngine::open(transport, connection, control, events)
            .await
            .unwrap();
        assert_eq!(channel, 0);
        assert!(engine.connection.session_mapped(0));
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn close_during_open_is_reported() {
        let (client, server) = tokio::io::duplex(4096);
        let peer = tokio::spawn(async move {
            let mut framed = Framed::new(server, FrameCodec::new(4096));
            framed.next().await.unwrap().unwrap();
            framed
                .send(Frame::new(0u16, FrameBody::Close(Close { error: None })))
                .await
                .unwrap();
            // The close is answered
            let frame = framed.next().await.unwrap().unwrap();
            assert!(matches!(frame.body, FrameBody::Close(_)));
        });

        let (transport, connection, control, events) = engine_parts(client);
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            ConnectionEngine::open(transport, connection, control, events),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(OpenError::Remote(None))));
        peer.await.unwrap();
    }
}
