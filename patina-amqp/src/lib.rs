//! A minimal AMQP 1.0 client built on tokio.
//!
//! A [`Client`] owns one connection and its default session. The connection is driven by a
//! single event loop task that owns the socket. [`Sender`]s, [`Receiver`]s and the client talk
//! to that task over a control channel.
//!
//! ```rust,no_run
//! use patina_amqp::Client;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut client = Client::connect("localhost:5672").await.unwrap();
//!     let mut sender = client.sender("examples").await.unwrap();
//!     let mut receiver = client.receiver("examples").await.unwrap();
//!
//!     let delivery = sender.send("Hello World!").await.unwrap();
//!     let message = receiver.receive().await.unwrap();
//!     println!("{}", message.body());
//!     delivery.settled().await.unwrap();
//!
//!     client.close().await.unwrap();
//! }
//! ```

#![deny(missing_debug_implementations)]

pub mod client;
pub mod connection;
pub mod event;
pub mod frames;
pub mod link;
pub mod sasl_profile;
pub mod transport;

pub(crate) mod control;
pub(crate) mod session;
pub(crate) mod util;

pub use client::{connect, Client};
pub use connection::Builder;
pub use event::Event;
pub use link::{CreditMode, Delivery, Receiver, Sender};

pub use patina_amqp_types as types;
pub use patina_amqp_types::messaging::{Body, Message};

/// Encoded message carried by a transfer frame
pub type Payload = bytes::Bytes;
