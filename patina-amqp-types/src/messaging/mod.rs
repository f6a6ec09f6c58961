//! Messaging types defined in AMQP 1.0 specification Part 3

/* -------------------------- 3.2 Messaging Format -------------------------- */
mod format;
pub use format::*;

pub mod message;
pub use message::{Body, Message};

/* --------------------------- 3.4 Delivery State --------------------------- */
mod delivery_state;
pub use delivery_state::*;

/* -------------------------- 3.5 Source and Target ------------------------- */
pub mod source;
pub use source::Source;

pub mod target;
pub use target::Target;

mod terminus;
pub use terminus::{TerminusDurability, TerminusExpiryPolicy};
