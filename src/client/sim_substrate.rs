//! Deterministic in-process substrate with a virtual clock
//!
//! The simulated peer behaves like an echo server on the far end of a byte
//! stream: every push is a request, a [`ServerModel`] decides whether and
//! after how long it is answered, and answers leave the server in request
//! order (a late answer holds back the ones behind it). Pending pops are
//! satisfied first-come first-served.
//!
//! Time only moves inside `wait_any_timeout`, which jumps the clock straight
//! to the next completion. A run is therefore exactly reproducible and takes
//! no wall-clock time regardless of the delays being modelled.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::substrate::{OpResult, QToken, QueueDesc, Substrate};
use crate::utils::SubstrateError;

type ResponsePlan = Box<dyn FnMut(u64) -> Option<Duration> + Send>;

/// Decides, per request, whether the simulated server answers and when.
///
/// The closure receives the zero-based index of the request on the
/// connection and returns the service delay, or `None` to drop it.
pub struct ServerModel {
    name: &'static str,
    plan: ResponsePlan,
}

impl ServerModel {
    /// Echo every request with no delay
    pub fn immediate() -> Self {
        Self::fixed(Duration::ZERO)
    }

    /// Echo every request after `delay`
    pub fn fixed(delay: Duration) -> Self {
        Self {
            name: "fixed",
            plan: Box::new(move |_| Some(delay)),
        }
    }

    /// Never answer anything
    pub fn silent() -> Self {
        Self {
            name: "silent",
            plan: Box::new(|_| None),
        }
    }

    /// Use `script[i]` for request `i`, then `rest` for every later request
    pub fn scripted(script: Vec<Option<Duration>>, rest: Option<Duration>) -> Self {
        Self {
            name: "scripted",
            plan: Box::new(move |idx| script.get(idx as usize).copied().unwrap_or(rest)),
        }
    }

    /// Arbitrary per-request plan
    pub fn from_fn<F>(name: &'static str, plan: F) -> Self
    where
        F: FnMut(u64) -> Option<Duration> + Send + 'static,
    {
        Self {
            name,
            plan: Box::new(plan),
        }
    }

    /// Base delay plus uniform jitter, dropping a `loss` fraction of requests
    pub fn lossy(delay: Duration, jitter: Duration, loss: f64, seed: u64) -> Self {
        let mut rng = if seed == 0 {
            fastrand::Rng::new()
        } else {
            fastrand::Rng::with_seed(seed)
        };
        let jitter_ns = jitter.as_nanos() as u64;
        Self {
            name: "lossy",
            plan: Box::new(move |_| {
                if loss > 0.0 && rng.f64() < loss {
                    return None;
                }
                let extra = if jitter_ns == 0 { 0 } else { rng.u64(0..=jitter_ns) };
                Some(delay + Duration::from_nanos(extra))
            }),
        }
    }

    fn respond(&mut self, request_idx: u64) -> Option<Duration> {
        (self.plan)(request_idx)
    }
}

impl fmt::Debug for ServerModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerModel").field("name", &self.name).finish()
    }
}

/// Operation counters, logged when a connection closes
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimStats {
    pub pushes: u64,
    pub pops: u64,
    pub timers_armed: u64,
    pub releases: u64,
    pub dropped_requests: u64,
}

enum SimQueue {
    Conn(SimConn),
    Timer,
}

#[derive(Default)]
struct SimConn {
    peer: Option<SocketAddr>,
    requests: u64,
    /// Answers not yet claimed by a pop, in delivery order
    responses: VecDeque<SimResponse>,
    /// Pops not yet paired with an answer, in issue order
    waiting_pops: VecDeque<QToken>,
    last_delivery: Duration,
}

struct SimResponse {
    ready_at: Duration,
    body: Vec<u8>,
}

enum SimOpState {
    Ready { at: Duration, result: OpResult },
    Waiting,
}

struct SimOp {
    qd: QueueDesc,
    state: SimOpState,
}

/// Simulated substrate driving a [`ServerModel`]
pub struct SimSubstrate {
    epoch: Instant,
    clock: Duration,
    next_token: u64,
    next_qd: u32,
    queues: HashMap<QueueDesc, SimQueue>,
    ops: HashMap<QToken, SimOp>,
    model: ServerModel,
    stats: SimStats,
}

impl SimSubstrate {
    pub fn new(model: ServerModel) -> Self {
        Self {
            epoch: Instant::now(),
            clock: Duration::ZERO,
            next_token: 1,
            next_qd: 1,
            queues: HashMap::new(),
            ops: HashMap::new(),
            model,
            stats: SimStats::default(),
        }
    }

    /// Virtual time elapsed since the substrate was created
    pub fn elapsed(&self) -> Duration {
        self.clock
    }

    pub fn stats(&self) -> SimStats {
        self.stats
    }

    /// Number of tokens issued and not yet consumed or released
    pub fn live_tokens(&self) -> usize {
        self.ops.len()
    }

    fn alloc_token(&mut self, qd: QueueDesc, state: SimOpState) -> QToken {
        let qt = QToken(self.next_token);
        self.next_token += 1;
        self.ops.insert(qt, SimOp { qd, state });
        qt
    }

    fn alloc_qd(&mut self, queue: SimQueue) -> QueueDesc {
        let qd = QueueDesc(self.next_qd);
        self.next_qd += 1;
        self.queues.insert(qd, queue);
        qd
    }

    fn conn_mut(&mut self, qd: QueueDesc, op: &'static str) -> Result<&mut SimConn, SubstrateError> {
        match self.queues.get_mut(&qd) {
            Some(SimQueue::Conn(conn)) => Ok(conn),
            Some(SimQueue::Timer) => Err(SubstrateError::WrongQueueKind { qd, op }),
            None => Err(SubstrateError::UnknownQueue(qd)),
        }
    }

    /// Match waiting pops with queued answers, oldest first on both sides
    fn pair(&mut self, qd: QueueDesc) {
        let Some(SimQueue::Conn(conn)) = self.queues.get_mut(&qd) else {
            return;
        };
        while !conn.waiting_pops.is_empty() && !conn.responses.is_empty() {
            let (Some(qt), Some(resp)) = (conn.waiting_pops.pop_front(), conn.responses.pop_front())
            else {
                break;
            };
            if let Some(op) = self.ops.get_mut(&qt) {
                op.state = SimOpState::Ready {
                    at: resp.ready_at,
                    result: OpResult::Popped(resp.body),
                };
            }
        }
    }

    fn take_ready(&mut self, qt: QToken) -> Option<OpResult> {
        match self.ops.remove(&qt)?.state {
            SimOpState::Ready { result, .. } => Some(result),
            SimOpState::Waiting => None,
        }
    }
}

impl Substrate for SimSubstrate {
    fn socket(&mut self) -> Result<QueueDesc, SubstrateError> {
        Ok(self.alloc_qd(SimQueue::Conn(SimConn::default())))
    }

    fn connect(&mut self, qd: QueueDesc, addr: SocketAddr) -> Result<QToken, SubstrateError> {
        self.conn_mut(qd, "connect")?.peer = Some(addr);
        let at = self.clock;
        Ok(self.alloc_token(
            qd,
            SimOpState::Ready {
                at,
                result: OpResult::Connected,
            },
        ))
    }

    fn push(&mut self, qd: QueueDesc, buf: &[u8]) -> Result<QToken, SubstrateError> {
        let now = self.clock;
        let conn = match self.queues.get_mut(&qd) {
            Some(SimQueue::Conn(conn)) => conn,
            Some(SimQueue::Timer) => return Err(SubstrateError::WrongQueueKind { qd, op: "push" }),
            None => return Err(SubstrateError::UnknownQueue(qd)),
        };
        if conn.peer.is_none() {
            return Err(SubstrateError::Closed);
        }
        let request_idx = conn.requests;
        conn.requests += 1;
        self.stats.pushes += 1;

        match self.model.respond(request_idx) {
            Some(delay) => {
                let ready_at = (now + delay).max(conn.last_delivery);
                conn.last_delivery = ready_at;
                conn.responses.push_back(SimResponse {
                    ready_at,
                    body: buf.to_vec(),
                });
                trace!(request_idx, ?ready_at, "sim: request answered");
            }
            None => {
                self.stats.dropped_requests += 1;
                trace!(request_idx, "sim: request dropped");
            }
        }

        let qt = self.alloc_token(
            qd,
            SimOpState::Ready {
                at: now,
                result: OpResult::Pushed,
            },
        );
        self.pair(qd);
        Ok(qt)
    }

    fn pop(&mut self, qd: QueueDesc) -> Result<QToken, SubstrateError> {
        if self.conn_mut(qd, "pop")?.peer.is_none() {
            return Err(SubstrateError::Closed);
        }
        self.stats.pops += 1;
        let qt = self.alloc_token(qd, SimOpState::Waiting);
        self.conn_mut(qd, "pop")?.waiting_pops.push_back(qt);
        self.pair(qd);
        Ok(qt)
    }

    fn new_timer(&mut self) -> Result<QueueDesc, SubstrateError> {
        Ok(self.alloc_qd(SimQueue::Timer))
    }

    fn arm_timer(&mut self, timer: QueueDesc, timeout: Duration) -> Result<QToken, SubstrateError> {
        match self.queues.get(&timer) {
            Some(SimQueue::Timer) => {}
            Some(SimQueue::Conn(_)) => {
                return Err(SubstrateError::WrongQueueKind {
                    qd: timer,
                    op: "arm_timer",
                })
            }
            None => return Err(SubstrateError::UnknownQueue(timer)),
        }
        self.stats.timers_armed += 1;
        let at = self.clock + timeout;
        Ok(self.alloc_token(
            timer,
            SimOpState::Ready {
                at,
                result: OpResult::TimerFired,
            },
        ))
    }

    fn wait_any_timeout(
        &mut self,
        tokens: &[Option<QToken>],
        timeout: Option<Duration>,
    ) -> Result<Option<(usize, OpResult)>, SubstrateError> {
        if tokens.iter().all(Option::is_none) {
            return Err(SubstrateError::EmptyWaitSet);
        }

        // Earliest completion wins; ties go to the lowest position
        let mut next: Option<(Duration, usize, QToken)> = None;
        for (idx, qt) in tokens.iter().enumerate() {
            let Some(qt) = *qt else { continue };
            let op = self.ops.get(&qt).ok_or(SubstrateError::UnknownToken(qt))?;
            if let SimOpState::Ready { at, .. } = op.state {
                if next.map_or(true, |(best, _, _)| at < best) {
                    next = Some((at, idx, qt));
                }
            }
        }

        let deadline = timeout.map(|t| self.clock + t);
        match next {
            Some((at, idx, qt)) if deadline.map_or(true, |d| at <= d) => {
                self.clock = self.clock.max(at);
                let result = self.take_ready(qt).ok_or(SubstrateError::UnknownToken(qt))?;
                Ok(Some((idx, result)))
            }
            _ => match deadline {
                Some(d) => {
                    self.clock = d;
                    Ok(None)
                }
                None => Err(SubstrateError::Stalled),
            },
        }
    }

    fn release(&mut self, qt: QToken) -> Result<(), SubstrateError> {
        let op = self.ops.remove(&qt).ok_or(SubstrateError::UnknownToken(qt))?;
        self.stats.releases += 1;
        if let SimOpState::Waiting = op.state {
            if let Some(SimQueue::Conn(conn)) = self.queues.get_mut(&op.qd) {
                conn.waiting_pops.retain(|&p| p != qt);
            }
        }
        Ok(())
    }

    fn close(&mut self, qd: QueueDesc) -> Result<(), SubstrateError> {
        let queue = self
            .queues
            .remove(&qd)
            .ok_or(SubstrateError::UnknownQueue(qd))?;
        self.ops.retain(|_, op| op.qd != qd);
        if let SimQueue::Conn(conn) = queue {
            let s = self.stats;
            debug!(
                requests = conn.requests,
                pushes = s.pushes,
                pops = s.pops,
                timers_armed = s.timers_armed,
                releases = s.releases,
                dropped = s.dropped_requests,
                elapsed_us = self.clock.as_micros() as u64,
                "sim: connection closed"
            );
        }
        Ok(())
    }

    fn now(&self) -> Instant {
        self.epoch + self.clock
    }
}
