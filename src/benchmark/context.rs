//! Scheduler state shared by every mode
//!
//! `EchoContext` bundles the substrate, the connection, the outgoing buffer,
//! the counters and the latency sink. Each scheduler borrows it mutably for
//! the whole run, and `finish` consumes it, so end-of-run cleanup happens at
//! most once no matter how the loop ended.

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::counters::{CancelFlag, RoundCounters};
use super::slot::{ClientSlot, WaitSet};
use crate::client::{OpResult, QToken, QueueDesc, Substrate};
use crate::metrics::{LatencyRecorder, LatencySnapshot};
use crate::utils::{Result, SubstrateError};
use crate::workload::OutgoingPayload;

/// Longest a scheduler blocks before re-checking the cancel flag
pub const WAIT_TICK: Duration = Duration::from_millis(100);

/// How a scheduler loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The iteration budget was spent
    Completed,
    /// The cancel flag was raised mid-run
    Interrupted,
}

/// Result of [`EchoContext::finish`]
#[derive(Debug, Clone)]
pub struct FinishedRun {
    pub counters: RoundCounters,
    pub latency: LatencySnapshot,
    /// Time from connection to finish, on the substrate's clock
    pub duration: Duration,
}

/// Scheduler state for one connection
pub struct EchoContext<'p, S: Substrate> {
    pub(crate) substrate: S,
    pub(crate) conn: QueueDesc,
    pub(crate) payload: OutgoingPayload<'p>,
    pub(crate) counters: RoundCounters,
    pub(crate) latency: LatencyRecorder,
    cancel: CancelFlag,
    started: Instant,
}

impl<'p, S: Substrate> EchoContext<'p, S> {
    /// Open a connection to `addr` and build the scheduler state around it
    pub fn connect(
        mut substrate: S,
        addr: SocketAddr,
        payload: OutgoingPayload<'p>,
        iterations: u64,
        cancel: CancelFlag,
    ) -> Result<Self> {
        let conn = substrate.socket()?;
        info!("client qd: {}", conn);
        info!("Attempting to connect to `{}`...", addr);
        let qt = substrate.connect(conn, addr)?;
        match substrate.wait(qt)? {
            OpResult::Connected => {}
            other => {
                return Err(SubstrateError::UnexpectedCompletion {
                    index: 0,
                    detail: format!("connect completed as {}", other.kind()),
                }
                .into())
            }
        }
        info!("Connected.");

        let started = substrate.now();
        Ok(Self {
            substrate,
            conn,
            payload,
            counters: RoundCounters::with_budget(iterations),
            latency: LatencyRecorder::new("end-to-end"),
            cancel,
            started,
        })
    }

    pub fn counters(&self) -> &RoundCounters {
        &self.counters
    }

    pub fn latency(&self) -> &LatencyRecorder {
        &self.latency
    }

    pub fn substrate(&self) -> &S {
        &self.substrate
    }

    #[inline]
    pub(crate) fn now(&self) -> Instant {
        self.substrate.now()
    }

    /// Push the payload, pop for its echo and stamp the start time
    ///
    /// Counts one round as sent.
    pub(crate) fn issue(&mut self, slot: &mut ClientSlot, waits: &mut WaitSet, client: usize) -> Result<()> {
        slot.send = Some(self.substrate.push(self.conn, self.payload.as_bytes())?);
        let recv = self.substrate.pop(self.conn)?;
        waits.set(waits.recv_pos(client), recv);
        slot.start_time = self.substrate.now();
        self.counters.record_sent();
        Ok(())
    }

    /// Push the payload again for a round whose timer expired
    pub(crate) fn resend(&mut self, slot: &mut ClientSlot) -> Result<()> {
        crate::client::release_slot(&mut self.substrate, &mut slot.send)?;
        slot.send = Some(self.substrate.push(self.conn, self.payload.as_bytes())?);
        self.counters.record_resend();
        Ok(())
    }

    /// Wait for the next completion among `tokens`
    ///
    /// Blocks in `WAIT_TICK` slices and returns `Ok(None)` once the cancel
    /// flag is raised.
    pub(crate) fn next_completion(&mut self, tokens: &[Option<QToken>]) -> Result<Option<(usize, OpResult)>> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }
            if let Some(ready) = self.substrate.wait_any_timeout(tokens, Some(WAIT_TICK))? {
                return Ok(Some(ready));
            }
        }
    }

    /// Report the counters, free the outgoing buffer and close the connection
    pub fn finish(self) -> Result<FinishedRun> {
        let Self {
            mut substrate,
            conn,
            payload,
            counters,
            latency,
            started,
            ..
        } = self;

        eprintln!("Sent: {}  Recved: {}", counters.sent, counters.received);

        let owned = payload.is_owned();
        let freed = payload.release();
        if owned {
            debug!(bytes = freed, "released outgoing buffer");
        }

        let duration = substrate.now().saturating_duration_since(started);
        substrate.close(conn)?;
        latency.dump(&mut io::stderr().lock())?;

        Ok(FinishedRun {
            counters,
            latency: latency.snapshot(),
            duration,
        })
    }
}

/// Error for a completion that does not fit its position in the wait set
pub(crate) fn unexpected(index: usize, expected: &str, got: &OpResult) -> SubstrateError {
    SubstrateError::UnexpectedCompletion {
        index,
        detail: format!("expected {}, got {}", expected, got.kind()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ServerModel, SimSubstrate};
    use crate::workload::{EchoMessage, SerializationStrategy};

    fn addr() -> SocketAddr {
        "127.0.0.1:12345".parse().unwrap()
    }

    #[test]
    fn test_connect_and_finish_closes_connection() {
        let msg = EchoMessage::filled(16);
        let payload = SerializationStrategy::Fill.serialize(&msg).unwrap();
        let ctx = EchoContext::connect(
            SimSubstrate::new(ServerModel::immediate()),
            addr(),
            payload,
            10,
            CancelFlag::new(),
        )
        .unwrap();
        assert_eq!(ctx.counters().iterations_remaining, 10);
        assert_eq!(ctx.substrate().live_tokens(), 0);

        let finished = ctx.finish().unwrap();
        assert_eq!(finished.counters.sent, 0);
        assert_eq!(finished.latency.count, 0);
    }

    #[test]
    fn test_issue_counts_one_round() {
        let msg = EchoMessage::filled(4);
        let payload = SerializationStrategy::Fill.serialize(&msg).unwrap();
        let mut ctx = EchoContext::connect(
            SimSubstrate::new(ServerModel::immediate()),
            addr(),
            payload,
            10,
            CancelFlag::new(),
        )
        .unwrap();
        let mut slot = ClientSlot::new(ctx.now());
        let mut waits = WaitSet::receives_only(1);
        ctx.issue(&mut slot, &mut waits, 0).unwrap();

        assert_eq!(ctx.counters().sent, 1);
        assert!(slot.send.is_some());
        let (idx, result) = ctx.next_completion(waits.as_slice()).unwrap().unwrap();
        assert_eq!(idx, 0);
        assert_eq!(result, OpResult::Popped(b"aaaa".to_vec()));
    }

    #[test]
    fn test_cancelled_wait_returns_none() {
        let msg = EchoMessage::filled(4);
        let payload = SerializationStrategy::Fill.serialize(&msg).unwrap();
        let cancel = CancelFlag::new();
        let mut ctx = EchoContext::connect(
            SimSubstrate::new(ServerModel::silent()),
            addr(),
            payload,
            10,
            cancel.clone(),
        )
        .unwrap();
        let mut slot = ClientSlot::new(ctx.now());
        let mut waits = WaitSet::receives_only(1);
        ctx.issue(&mut slot, &mut waits, 0).unwrap();

        cancel.cancel();
        assert!(ctx.next_completion(waits.as_slice()).unwrap().is_none());
    }
}
