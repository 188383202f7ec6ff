//! Utility modules

pub mod error;
pub mod resp;

pub use error::{BenchmarkError, Result, SubstrateError};
pub use resp::RespEncoder;
