//! The client context: one connection with its default session

use patina_amqp_types::definitions;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::warn;

use crate::{
    connection::{Builder, Error, OpenError},
    control::ConnectionControl,
    event::Event,
    link::{AttachError, CreditMode, Receiver, Sender},
};

/// An open connection and its default session.
///
/// The connection itself is driven by a background task. Dropping the client asks that task
/// to close the connection.
#[derive(Debug)]
pub struct Client {
    control: mpsc::Sender<ConnectionControl>,
    engine: Option<JoinHandle<Result<(), Error>>>,
    events: broadcast::Receiver<Event>,

    /// Outgoing channel of the default session
    session: u16,
    credit_mode: CreditMode,
}

impl Client {
    pub(crate) fn new(
        control: mpsc::Sender<ConnectionControl>,
        engine: JoinHandle<Result<(), Error>>,
        events: broadcast::Receiver<Event>,
        session: u16,
        credit_mode: CreditMode,
    ) -> Self {
        Self {
            control,
            engine: Some(engine),
            events,
            session,
            credit_mode,
        }
    }

    /// Creates a builder for [`Client`]
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Connects with the default configuration.
    ///
    /// `url` is either `amqp://[user:pass@]host[:port]` or a bare `host:port`.
    pub async fn connect(url: impl AsRef<str>) -> Result<Self, OpenError> {
        Builder::new().open(url).await
    }

    /// Attaches a sending link to `address`
    pub async fn sender(&self, address: impl Into<String>) -> Result<Sender, AttachError> {
        Sender::attach(&self.control, self.session, address.into()).await
    }

    /// Attaches a receiving link to `address` using the client's credit mode
    pub async fn receiver(&self, address: impl Into<String>) -> Result<Receiver, AttachError> {
        self.receiver_with_credit_mode(address, self.credit_mode)
            .await
    }

    pub async fn receiver_with_credit_mode(
        &self,
        address: impl Into<String>,
        credit_mode: CreditMode,
    ) -> Result<Receiver, AttachError> {
        Receiver::attach(&self.control, self.session, address.into(), credit_mode).await
    }

    /// Waits for the next event.
    ///
    /// Events missed because this client fell behind are skipped. Returns `None` once the
    /// engine stopped and every remaining event was taken.
    pub async fn next_event(&mut self) -> Option<Event> {
        loop {
            match self.events.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event queue lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Checks if the underlying event loop has stopped
    pub fn is_closed(&self) -> bool {
        match &self.engine {
            Some(engine) => engine.is_finished(),
            None => true,
        }
    }

    /// Closes the connection and waits for the event loop to stop.
    ///
    /// Returns the error the connection stopped with, if any. Calling this again is a no-op.
    pub async fn close(&mut self) -> Result<(), Error> {
        self.close_inner(None).await
    }

    /// Closes the connection with an error
    pub async fn close_with_error(
        &mut self,
        error: impl Into<definitions::Error>,
    ) -> Result<(), Error> {
        self.close_inner(Some(error.into())).await
    }

    async fn close_inner(&mut self, error: Option<definitions::Error>) -> Result<(), Error> {
        let engine = match self.engine.take() {
            Some(engine) => engine,
            None => return Ok(()),
        };
        // Fails if the event loop already stopped, the join handle tells why
        let _ = self.control.send(ConnectionControl::Close(error)).await;
        match engine.await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if self.engine.is_some() {
            let _ = self.control.try_send(ConnectionControl::Close(None));
        }
    }
}

/// Connects with the default configuration, see [`Client::connect`]
pub async fn connect(url: impl AsRef<str>) -> Result<Client, OpenError> {
    Client::connect(url).await
}
