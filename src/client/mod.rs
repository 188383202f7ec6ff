//! I/O substrate layer
//!
//! - `Substrate`: queue/token based asynchronous I/O contract
//! - `TcpSubstrate`: mio-backed implementation over a real TCP connection
//! - `SimSubstrate`: deterministic in-process echo server on a virtual clock

pub mod sim_substrate;
pub mod substrate;
pub mod tcp_substrate;

pub use sim_substrate::{ServerModel, SimStats, SimSubstrate};
pub use substrate::{release_slot, OpResult, QToken, QueueDesc, Substrate};
pub use tcp_substrate::TcpSubstrate;
