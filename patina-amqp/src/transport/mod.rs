//! Implements low level transport framing
//!
//! The protocol header exchange and the SASL negotiation operate on the raw io. Once the
//! AMQP header is exchanged the io is bound to a [`Transport`], which is a `Sink` and a
//! `Stream` of AMQP frames.

pub mod protocol_header;

mod error;
pub use error::{Error, NegotiationError};

use std::{
    fmt::Debug,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use patina_amqp_types::{sasl::SaslCode, states::ConnectionState};
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Framed;
use tracing::{instrument, trace};

use crate::{
    frames::{
        amqp::{Frame, FrameCodec},
        sasl,
    },
    sasl_profile::{Negotiation, SaslProfile},
    util::IdleTimeout,
};

use protocol_header::ProtocolHeader;

pin_project! {
    /// Framed AMQP transport with an optional idle timeout on the read half
    pub struct Transport<Io> {
        #[pin]
        framed: Framed<Io, FrameCodec>,
        idle_timeout: Option<IdleTimeout>,
    }
}

impl<Io> Debug for Transport<Io> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("codec", self.framed.codec())
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl<Io> Transport<Io>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    /// Binds a transport to an io that already exchanged the AMQP protocol header
    pub fn bind(io: Io, max_frame_size: usize, idle_timeout: Option<Duration>) -> Self {
        let framed = Framed::new(io, FrameCodec::new(max_frame_size));
        let idle_timeout = match idle_timeout {
            Some(duration) if !duration.is_zero() => Some(IdleTimeout::new(duration)),
            _ => None,
        };

        Self {
            framed,
            idle_timeout,
        }
    }

    pub async fn send_proto_header(
        io: &mut Io,
        local_state: &mut ConnectionState,
        proto_header: ProtocolHeader,
    ) -> Result<(), NegotiationError> {
        let buf: [u8; 8] = proto_header.into();
        match local_state {
            ConnectionState::Start => {
                io.write_all(&buf).await?;
                io.flush().await?;
                *local_state = ConnectionState::HeaderSent;
            }
            _ => return Err(NegotiationError::IllegalState),
        }
        Ok(())
    }

    pub async fn recv_proto_header(
        io: &mut Io,
        local_state: &mut ConnectionState,
        proto_header: ProtocolHeader,
    ) -> Result<ProtocolHeader, NegotiationError> {
        match local_state {
            ConnectionState::HeaderSent => {
                let mut inbound_buf = [0u8; 8];
                io.read_exact(&mut inbound_buf).await?;
                let incoming_header = ProtocolHeader::try_from(inbound_buf)
                    .map_err(NegotiationError::ProtocolHeaderMismatch)?;
                if incoming_header != proto_header {
                    *local_state = ConnectionState::Closed;
                    return Err(NegotiationError::ProtocolHeaderMismatch(inbound_buf));
                }
                *local_state = ConnectionState::HeaderExchange;
                Ok(incoming_header)
            }
            _ => Err(NegotiationError::IllegalState),
        }
    }

    /// Sends the local protocol header and waits for the peer's, which must be identical
    pub async fn negotiate(
        io: &mut Io,
        local_state: &mut ConnectionState,
        proto_header: ProtocolHeader,
    ) -> Result<ProtocolHeader, NegotiationError> {
        Self::send_proto_header(io, local_state, proto_header.clone()).await?;
        Self::recv_proto_header(io, local_state, proto_header).await
    }

    /// Performs the SASL header exchange and the SASL dialog on `io`
    #[instrument(skip_all)]
    pub async fn connect_sasl(
        io: &mut Io,
        hostname: Option<&str>,
        profile: &SaslProfile,
    ) -> Result<(), NegotiationError> {
        let mut local_state = ConnectionState::Start;
        Self::negotiate(io, &mut local_state, ProtocolHeader::sasl()).await?;

        let mut framed = Framed::new(io, sasl::FrameCodec::default());
        loop {
            let frame = match framed.next().await {
                Some(frame) => frame?,
                None => {
                    return Err(NegotiationError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "connection closed during SASL negotiation",
                    )))
                }
            };
            trace!(frame = ?frame, "RECV");

            match profile.on_frame(frame, hostname)? {
                Negotiation::Init(init) => {
                    let frame = sasl::Frame::Init(init);
                    trace!(frame = ?frame, "SEND");
                    framed.send(frame).await?;
                }
                Negotiation::Outcome(outcome) => match outcome.code {
                    SaslCode::Ok => return Ok(()),
                    code => {
                        return Err(NegotiationError::SaslError {
                            code,
                            additional_data: outcome
                                .additional_data
                                .map(|data| Bytes::from(data.into_vec())),
                        })
                    }
                },
            }
        }
    }

    pub fn max_frame_size(&self) -> usize {
        self.framed.codec().max_frame_size()
    }

    pub fn set_max_frame_size(&mut self, max_frame_size: usize) -> &mut Self {
        self.framed.codec_mut().set_max_frame_size(max_frame_size);
        self
    }

    pub fn set_idle_timeout(&mut self, duration: Duration) -> &mut Self {
        self.idle_timeout = match duration.is_zero() {
            true => None,
            false => Some(IdleTimeout::new(duration)),
        };
        self
    }
}

impl<Io> Sink<Frame> for Transport<Io>
where
    Io: AsyncWrite + Unpin,
{
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        this.framed.poll_ready(cx).map_err(Into::into)
    }

    fn start_send(self: Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
        let this = self.project();
        this.framed.start_send(item).map_err(Into::into)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        this.framed.poll_flush(cx).map_err(Into::into)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        this.framed.poll_close(cx).map_err(Into::into)
    }
}

impl<Io> Stream for Transport<Io>
where
    Io: AsyncRead + Unpin,
{
    type Item = Result<Frame, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.framed.poll_next(cx) {
            Poll::Ready(next) => {
                if let Some(delay) = this.idle_timeout {
                    delay.reset();
                }
                Poll::Ready(next.map(|result| result.map_err(Into::into)))
            }
            Poll::Pending => {
                if let Some(delay) = this.idle_timeout {
                    if let Poll::Ready(()) = Pin::new(delay).poll(cx) {
                        return Poll::Ready(Some(Err(Error::IdleTimeout)));
                    }
                }
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use patina_amqp_types::{
        performatives::{ChannelMax, MaxFrameSize, Open},
        sasl::SaslCode,
        states::ConnectionState,
    };
    use tokio_test::io::Builder;

    use super::{protocol_header::ProtocolHeader, Error, NegotiationError, Transport};
    use crate::{
        frames::amqp::{Frame, FrameBody},
        sasl_profile::SaslProfile,
    };

    #[tokio::test]
    async fn test_header_exchange() {
        let mut mock = Builder::new()
            .write(b"AMQP\x00\x01\x00\x00")
            .read(b"AMQP\x00\x01\x00\x00")
            .build();

        let mut local_state = ConnectionState::Start;
        Transport::negotiate(&mut mock, &mut local_state, ProtocolHeader::amqp())
            .await
            .unwrap();
        assert_eq!(local_state, ConnectionState::HeaderExchange);
    }

    #[tokio::test]
    async fn test_header_mismatch() {
        let mut mock = Builder::new()
            .write(b"AMQP\x00\x01\x00\x00")
            .read(b"AMQP\x03\x01\x00\x00")
            .build();

        let mut local_state = ConnectionState::Start;
        let result =
            Transport::negotiate(&mut mock, &mut local_state, ProtocolHeader::amqp()).await;
        match result {
            Err(NegotiationError::ProtocolHeaderMismatch(buf)) => {
                assert_eq!(&buf, b"AMQP\x03\x01\x00\x00")
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(local_state, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_sasl_anonymous() {
        let mut mock = Builder::new()
            .write(b"AMQP\x03\x01\x00\x00")
            .read(b"AMQP\x03\x01\x00\x00")
            // sasl-mechanisms [ANONYMOUS]
            .read(&[
                0x00, 0x00, 0x00, 0x19, 0x02, 0x01, 0x00, 0x00, 0x00, 0x53, 0x40, 0xc0, 0x0c,
                0x01, 0xa3, 0x09, 0x41, 0x4e, 0x4f, 0x4e, 0x59, 0x4d, 0x4f, 0x55, 0x53,
            ])
            // sasl-init ANONYMOUS
            .write(&[
                0x00, 0x00, 0x00, 0x19, 0x02, 0x01, 0x00, 0x00, 0x00, 0x53, 0x41, 0xc0, 0x0c,
                0x01, 0xa3, 0x09, 0x41, 0x4e, 0x4f, 0x4e, 0x59, 0x4d, 0x4f, 0x55, 0x53,
            ])
            // sasl-outcome ok
            .read(&[
                0x00, 0x00, 0x00, 0x10, 0x02, 0x01, 0x00, 0x00, 0x00, 0x53, 0x44, 0xc0, 0x03,
                0x01, 0x50, 0x00,
            ])
            .build();

        Transport::connect_sasl(&mut mock, None, &SaslProfile::Anonymous)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sasl_auth_failure() {
        let mut mock = Builder::new()
            .write(b"AMQP\x03\x01\x00\x00")
            .read(b"AMQP\x03\x01\x00\x00")
            // sasl-outcome auth
            .read(&[
                0x00, 0x00, 0x00, 0x10, 0x02, 0x01, 0x00, 0x00, 0x00, 0x53, 0x44, 0xc0, 0x03,
                0x01, 0x50, 0x01,
            ])
            .build();

        let result = Transport::connect_sasl(&mut mock, None, &SaslProfile::Anonymous).await;
        assert!(matches!(
            result,
            Err(NegotiationError::SaslError {
                code: SaslCode::Auth,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_empty_frame_round_trip() {
        let (client, server) = tokio::io::duplex(1024);
        let mut client = Transport::bind(client, 512, None);
        let mut server = Transport::bind(server, 512, None);

        client.send(Frame::empty()).await.unwrap();
        let frame = server.next().await.unwrap().unwrap();
        assert_eq!(frame.body, FrameBody::Empty);
    }

    #[tokio::test]
    async fn test_open_frame_over_transport() {
        let (client, server) = tokio::io::duplex(1024);
        let mut client = Transport::bind(client, 512, None);
        let mut server = Transport::bind(server, 512, None);

        let open = Open {
            container_id: "client".into(),
            hostname: None,
            max_frame_size: MaxFrameSize(512),
            channel_max: ChannelMax(0),
            idle_time_out: None,
            outgoing_locales: None,
            incoming_locales: None,
            offered_capabilities: None,
            desired_capabilities: None,
            properties: None,
        };
        client
            .send(Frame::new(0u16, FrameBody::Open(open.clone())))
            .await
            .unwrap();
        let frame = server.next().await.unwrap().unwrap();
        assert_eq!(frame.body, FrameBody::Open(open));
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let (client, _server) = tokio::io::duplex(1024);
        let mut client = Transport::bind(client, 512, Some(Duration::from_millis(20)));
        match client.next().await {
            Some(Err(Error::IdleTimeout)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
