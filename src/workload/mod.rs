//! Echo message model and serialization strategies

pub mod message;
pub mod strategy;

pub use message::{EchoMessage, FILL_CHAR, HEADER_LEN};
pub use strategy::{OutgoingPayload, SerializationStrategy};
