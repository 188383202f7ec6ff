//! echo-bench library
//!
//! Closed-loop latency benchmark client for request/response echo servers.
//! Many virtual clients are multiplexed over one connection on a queue/token
//! I/O substrate, with an optional timer-driven retry mode.

pub mod benchmark;
pub mod client;
pub mod config;
pub mod metrics;
pub mod utils;
pub mod workload;
