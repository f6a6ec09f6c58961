//! AMQP 1.0 data types.
//!
//! This crate covers the parts of the AMQP 1.0 type system a client needs to talk to a broker:
//! the transport performatives, the message sections and the delivery states. Encoding and
//! decoding is done by [`serde_amqp`], with [`scan`] checking untrusted input before it is
//! handed to the deserializer.

#![deny(missing_debug_implementations)]

pub mod definitions;
pub mod error;
pub mod messaging;
pub mod performatives;
pub mod sasl;
pub mod scan;
pub mod states;

pub use error::Error;
pub use serde_amqp::{descriptor::Descriptor, primitives, Value};
