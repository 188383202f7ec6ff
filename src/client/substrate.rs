//! Queue-based asynchronous I/O substrate
//!
//! Every operation (connect, push, pop, timer) is issued without blocking and
//! returns a [`QToken`]. Progress is observed only through [`Substrate::wait`]
//! and the multiplexer [`Substrate::wait_any`], which blocks until one of a set
//! of tokens completes and reports which one.
//!
//! Token contract:
//! - a token handed back by `wait`/`wait_any` is consumed
//! - a token that is never waited on must be released exactly once
//! - releasing an unknown (or already released) token is an error

use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::utils::SubstrateError;

/// Opaque pending-operation token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QToken(pub(crate) u64);

impl fmt::Display for QToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "qt#{}", self.0)
    }
}

/// Queue descriptor (a connection or a timer queue)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueDesc(pub(crate) u32);

impl fmt::Display for QueueDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a completed operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpResult {
    /// A connect finished
    Connected,
    /// A push has been handed to the transport
    Pushed,
    /// A pop produced one message (owned; dropping it frees the buffer)
    Popped(Vec<u8>),
    /// A timer reached its deadline
    TimerFired,
}

impl OpResult {
    pub fn kind(&self) -> &'static str {
        match self {
            OpResult::Connected => "connect",
            OpResult::Pushed => "push",
            OpResult::Popped(_) => "pop",
            OpResult::TimerFired => "timer",
        }
    }
}

/// The asynchronous I/O layer the schedulers are written against
pub trait Substrate {
    /// Allocate a connection queue
    fn socket(&mut self) -> Result<QueueDesc, SubstrateError>;

    /// Start connecting `qd` to `addr`
    fn connect(&mut self, qd: QueueDesc, addr: SocketAddr) -> Result<QToken, SubstrateError>;

    /// Queue one message for sending
    fn push(&mut self, qd: QueueDesc, buf: &[u8]) -> Result<QToken, SubstrateError>;

    /// Request the next incoming message
    fn pop(&mut self, qd: QueueDesc) -> Result<QToken, SubstrateError>;

    /// Allocate a timer queue
    fn new_timer(&mut self) -> Result<QueueDesc, SubstrateError>;

    /// Schedule a fire event on `timer` after `timeout`
    fn arm_timer(&mut self, timer: QueueDesc, timeout: Duration) -> Result<QToken, SubstrateError>;

    /// Wait for one or more of `tokens` to complete, giving up after `timeout`.
    ///
    /// `None` entries are skipped; the returned index is the position in
    /// `tokens`. Returns `Ok(None)` when the timeout elapses first.
    fn wait_any_timeout(
        &mut self,
        tokens: &[Option<QToken>],
        timeout: Option<Duration>,
    ) -> Result<Option<(usize, OpResult)>, SubstrateError>;

    /// Abandon a pending or completed operation
    fn release(&mut self, qt: QToken) -> Result<(), SubstrateError>;

    /// Close a queue; pending operations on it are abandoned
    fn close(&mut self, qd: QueueDesc) -> Result<(), SubstrateError>;

    /// Current time on the substrate's clock
    fn now(&self) -> Instant;

    /// Block until one of `tokens` completes
    fn wait_any(&mut self, tokens: &[Option<QToken>]) -> Result<(usize, OpResult), SubstrateError> {
        if tokens.iter().all(Option::is_none) {
            return Err(SubstrateError::EmptyWaitSet);
        }
        loop {
            if let Some(ready) = self.wait_any_timeout(tokens, None)? {
                return Ok(ready);
            }
        }
    }

    /// Block until `qt` completes
    fn wait(&mut self, qt: QToken) -> Result<OpResult, SubstrateError> {
        self.wait_any(&[Some(qt)]).map(|(_, result)| result)
    }
}

/// Release the token held in `slot`, if any, leaving `None` behind.
///
/// Taking the token out before releasing it makes a second call a no-op.
pub fn release_slot<S: Substrate + ?Sized>(
    substrate: &mut S,
    slot: &mut Option<QToken>,
) -> Result<(), SubstrateError> {
    match slot.take() {
        Some(qt) => substrate.release(qt),
        None => Ok(()),
    }
}
