//! Error types for echo-bench

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::client::{QToken, QueueDesc};

/// Top-level application error
#[derive(Error, Debug)]
pub enum BenchmarkError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Substrate error: {0}")]
    Substrate(#[from] SubstrateError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Failures reported by the I/O substrate.
///
/// The scheduler treats every one of these as fatal: they indicate a broken
/// I/O layer, not an application-level loss.
#[derive(Error, Debug)]
pub enum SubstrateError {
    #[error("Unknown or already released token {0}")]
    UnknownToken(QToken),

    #[error("Unknown queue descriptor {0}")]
    UnknownQueue(QueueDesc),

    #[error("Queue {qd} does not support {op}")]
    WrongQueueKind { qd: QueueDesc, op: &'static str },

    #[error("Failed to connect to {addr}: {source}")]
    ConnectFailed { addr: SocketAddr, source: io::Error },

    #[error("Connection closed unexpectedly")]
    Closed,

    #[error("Frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),

    #[error("wait_any called without any pending token")]
    EmptyWaitSet,

    #[error("No pending operation can ever complete")]
    Stalled,

    #[error("Unexpected completion at position {index}: {detail}")]
    UnexpectedCompletion { index: usize, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, BenchmarkError>;
