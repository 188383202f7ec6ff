//! TCP substrate using mio for non-blocking I/O
//!
//! One `mio::Poll` drives every queue on the calling thread:
//! - connection queues wrap a non-blocking `mio::net::TcpStream`
//! - timer queues are plain deadlines folded into the poll timeout
//!
//! Messages are framed as a 4-byte big-endian length followed by the body, so
//! a server that echoes bytes verbatim hands back intact frames. Pushes are
//! appended to a per-connection write buffer and complete once their last byte
//! has reached the socket; incoming frames are handed to pending pops in the
//! order the pops were issued.
//!
//! Timer deadlines fire through the poll timeout, which mio rounds up to whole
//! milliseconds on epoll. A sub-millisecond timer therefore fires after about
//! 1 ms on Linux.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mio::net::TcpStream as MioTcpStream;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, trace};

use super::substrate::{OpResult, QToken, QueueDesc, Substrate};
use crate::utils::SubstrateError;

/// Length prefix size
const FRAME_HEADER: usize = 4;

/// Largest frame accepted from the peer
const MAX_FRAME: usize = 64 * 1024 * 1024;

const READ_CHUNK: usize = 65536;

enum OpState {
    Pending,
    Done(OpResult),
}

struct TcpOp {
    qd: QueueDesc,
    state: OpState,
    /// Fire time, timers only
    deadline: Option<Instant>,
}

struct TcpConn {
    stream: Option<MioTcpStream>,
    peer: Option<SocketAddr>,
    connect_op: Option<QToken>,
    connected: bool,
    write_buf: Vec<u8>,
    write_pos: usize,
    /// Total bytes ever queued / written, used to complete pushes
    queued_total: u64,
    written_total: u64,
    pending_pushes: VecDeque<(u64, QToken)>,
    read_buf: Vec<u8>,
    read_len: usize,
    waiting_pops: VecDeque<QToken>,
    unclaimed_frames: VecDeque<Vec<u8>>,
}

impl TcpConn {
    fn new() -> Self {
        Self {
            stream: None,
            peer: None,
            connect_op: None,
            connected: false,
            write_buf: Vec::with_capacity(READ_CHUNK),
            write_pos: 0,
            queued_total: 0,
            written_total: 0,
            pending_pushes: VecDeque::new(),
            read_buf: vec![0u8; READ_CHUNK],
            read_len: 0,
            waiting_pops: VecDeque::new(),
            unclaimed_frames: VecDeque::new(),
        }
    }

    /// Finish a non-blocking connect once the socket turns writable
    fn check_connect(&mut self, ops: &mut HashMap<QToken, TcpOp>) -> Result<(), SubstrateError> {
        let (Some(stream), Some(addr)) = (self.stream.as_ref(), self.peer) else {
            return Ok(());
        };
        if let Some(err) = stream.take_error()? {
            return Err(SubstrateError::ConnectFailed { addr, source: err });
        }
        match stream.peer_addr() {
            Ok(_) => {
                stream.set_nodelay(true).ok();
                self.connected = true;
                if let Some(qt) = self.connect_op.take() {
                    complete(ops, qt, OpResult::Connected);
                }
                debug!(%addr, "tcp: connected");
                Ok(())
            }
            Err(ref e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(SubstrateError::ConnectFailed { addr, source: e }),
        }
    }

    /// Write as much buffered data as the socket takes
    fn try_flush(&mut self, ops: &mut HashMap<QToken, TcpOp>) -> Result<(), SubstrateError> {
        if !self.connected {
            return Ok(());
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(SubstrateError::Closed);
        };
        while self.write_pos < self.write_buf.len() {
            match stream.write(&self.write_buf[self.write_pos..]) {
                Ok(0) => return Err(SubstrateError::Closed),
                Ok(n) => {
                    self.write_pos += n;
                    self.written_total += n as u64;
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if self.write_pos == self.write_buf.len() {
            self.write_buf.clear();
            self.write_pos = 0;
        }
        while let Some(&(end, qt)) = self.pending_pushes.front() {
            if end > self.written_total {
                break;
            }
            self.pending_pushes.pop_front();
            complete(ops, qt, OpResult::Pushed);
        }
        Ok(())
    }

    /// Read until the socket would block, then cut complete frames
    fn try_read(&mut self, ops: &mut HashMap<QToken, TcpOp>) -> Result<(), SubstrateError> {
        if !self.connected {
            return Ok(());
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(SubstrateError::Closed);
        };
        loop {
            if self.read_len == self.read_buf.len() {
                self.read_buf.resize(self.read_buf.len() * 2, 0);
            }
            match stream.read(&mut self.read_buf[self.read_len..]) {
                Ok(0) => return Err(SubstrateError::Closed),
                Ok(n) => self.read_len += n,
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let mut parse_pos = 0;
        while self.read_len - parse_pos >= FRAME_HEADER {
            let header = &self.read_buf[parse_pos..parse_pos + FRAME_HEADER];
            let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
            if len > MAX_FRAME {
                return Err(SubstrateError::FrameTooLarge(len));
            }
            let end = parse_pos + FRAME_HEADER + len;
            if end > self.read_len {
                break;
            }
            let body = self.read_buf[parse_pos + FRAME_HEADER..end].to_vec();
            parse_pos = end;
            self.deliver(ops, body);
        }

        // Shift the partial frame to the front of the buffer
        if parse_pos > 0 {
            self.read_buf.copy_within(parse_pos..self.read_len, 0);
            self.read_len -= parse_pos;
        }
        Ok(())
    }

    fn deliver(&mut self, ops: &mut HashMap<QToken, TcpOp>, body: Vec<u8>) {
        match self.waiting_pops.pop_front() {
            Some(qt) => complete(ops, qt, OpResult::Popped(body)),
            None => self.unclaimed_frames.push_back(body),
        }
    }
}

fn complete(ops: &mut HashMap<QToken, TcpOp>, qt: QToken, result: OpResult) {
    // Released tokens are simply gone from the table
    if let Some(op) = ops.get_mut(&qt) {
        op.state = OpState::Done(result);
    }
}

/// Substrate over real TCP sockets
pub struct TcpSubstrate {
    poll: Poll,
    events: Events,
    next_token: u64,
    next_qd: u32,
    conns: HashMap<QueueDesc, TcpConn>,
    timers: HashSet<QueueDesc>,
    ops: HashMap<QToken, TcpOp>,
}

impl TcpSubstrate {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(1024),
            next_token: 1,
            next_qd: 1,
            conns: HashMap::new(),
            timers: HashSet::new(),
            ops: HashMap::new(),
        })
    }

    fn alloc_token(&mut self, qd: QueueDesc, state: OpState, deadline: Option<Instant>) -> QToken {
        let qt = QToken(self.next_token);
        self.next_token += 1;
        self.ops.insert(qt, TcpOp { qd, state, deadline });
        qt
    }

    fn alloc_qd(&mut self) -> QueueDesc {
        let qd = QueueDesc(self.next_qd);
        self.next_qd += 1;
        qd
    }

    fn conn_mut(&mut self, qd: QueueDesc, op: &'static str) -> Result<&mut TcpConn, SubstrateError> {
        if self.timers.contains(&qd) {
            return Err(SubstrateError::WrongQueueKind { qd, op });
        }
        self.conns.get_mut(&qd).ok_or(SubstrateError::UnknownQueue(qd))
    }

    fn fire_timers(&mut self, now: Instant) {
        for op in self.ops.values_mut() {
            if let (OpState::Pending, Some(deadline)) = (&op.state, op.deadline) {
                if deadline <= now {
                    op.state = OpState::Done(OpResult::TimerFired);
                }
            }
        }
    }

    fn next_timer_deadline(&self) -> Option<Instant> {
        self.ops
            .values()
            .filter(|op| matches!(op.state, OpState::Pending))
            .filter_map(|op| op.deadline)
            .min()
    }

    /// Run connect/flush/read for the connection behind a readiness event
    fn drive(&mut self, qd: QueueDesc) -> Result<(), SubstrateError> {
        let Some(conn) = self.conns.get_mut(&qd) else {
            return Ok(());
        };
        if !conn.connected {
            conn.check_connect(&mut self.ops)?;
        }
        conn.try_flush(&mut self.ops)?;
        conn.try_read(&mut self.ops)
    }
}

impl Substrate for TcpSubstrate {
    fn socket(&mut self) -> Result<QueueDesc, SubstrateError> {
        let qd = self.alloc_qd();
        self.conns.insert(qd, TcpConn::new());
        Ok(qd)
    }

    fn connect(&mut self, qd: QueueDesc, addr: SocketAddr) -> Result<QToken, SubstrateError> {
        let mut stream = MioTcpStream::connect(addr)
            .map_err(|source| SubstrateError::ConnectFailed { addr, source })?;
        self.poll.registry().register(
            &mut stream,
            Token(qd.0 as usize),
            Interest::READABLE | Interest::WRITABLE,
        )?;
        let qt = self.alloc_token(qd, OpState::Pending, None);
        let conn = self.conn_mut(qd, "connect")?;
        conn.stream = Some(stream);
        conn.peer = Some(addr);
        conn.connect_op = Some(qt);
        Ok(qt)
    }

    fn push(&mut self, qd: QueueDesc, buf: &[u8]) -> Result<QToken, SubstrateError> {
        if buf.len() > MAX_FRAME {
            return Err(SubstrateError::FrameTooLarge(buf.len()));
        }
        if self.conn_mut(qd, "push")?.stream.is_none() {
            return Err(SubstrateError::Closed);
        }
        let qt = self.alloc_token(qd, OpState::Pending, None);
        let Self { conns, ops, .. } = self;
        let conn = conns.get_mut(&qd).ok_or(SubstrateError::UnknownQueue(qd))?;
        conn.write_buf
            .extend_from_slice(&(buf.len() as u32).to_be_bytes());
        conn.write_buf.extend_from_slice(buf);
        conn.queued_total += (FRAME_HEADER + buf.len()) as u64;
        conn.pending_pushes.push_back((conn.queued_total, qt));
        // Socket is likely writable; try immediately
        conn.try_flush(ops)?;
        trace!(%qt, len = buf.len(), "tcp: push");
        Ok(qt)
    }

    fn pop(&mut self, qd: QueueDesc) -> Result<QToken, SubstrateError> {
        if self.conn_mut(qd, "pop")?.stream.is_none() {
            return Err(SubstrateError::Closed);
        }
        let qt = self.alloc_token(qd, OpState::Pending, None);
        let Self { conns, ops, .. } = self;
        let conn = conns.get_mut(&qd).ok_or(SubstrateError::UnknownQueue(qd))?;
        match conn.unclaimed_frames.pop_front() {
            Some(body) => complete(ops, qt, OpResult::Popped(body)),
            None => conn.waiting_pops.push_back(qt),
        }
        Ok(qt)
    }

    fn new_timer(&mut self) -> Result<QueueDesc, SubstrateError> {
        let qd = self.alloc_qd();
        self.timers.insert(qd);
        Ok(qd)
    }

    fn arm_timer(&mut self, timer: QueueDesc, timeout: Duration) -> Result<QToken, SubstrateError> {
        if self.conns.contains_key(&timer) {
            return Err(SubstrateError::WrongQueueKind {
                qd: timer,
                op: "arm_timer",
            });
        }
        if !self.timers.contains(&timer) {
            return Err(SubstrateError::UnknownQueue(timer));
        }
        let deadline = Instant::now() + timeout;
        Ok(self.alloc_token(timer, OpState::Pending, Some(deadline)))
    }

    fn wait_any_timeout(
        &mut self,
        tokens: &[Option<QToken>],
        timeout: Option<Duration>,
    ) -> Result<Option<(usize, OpResult)>, SubstrateError> {
        if tokens.iter().all(Option::is_none) {
            return Err(SubstrateError::EmptyWaitSet);
        }
        let give_up_at = timeout.map(|t| Instant::now() + t);

        loop {
            let now = Instant::now();
            self.fire_timers(now);

            for (idx, qt) in tokens.iter().enumerate() {
                let Some(qt) = *qt else { continue };
                let op = self.ops.get(&qt).ok_or(SubstrateError::UnknownToken(qt))?;
                if !matches!(op.state, OpState::Done(_)) {
                    continue;
                }
                if let Some(TcpOp {
                    state: OpState::Done(result),
                    ..
                }) = self.ops.remove(&qt)
                {
                    return Ok(Some((idx, result)));
                }
            }

            if give_up_at.is_some_and(|t| now >= t) {
                return Ok(None);
            }

            // Sleep until I/O, the next timer, or the caller's deadline
            let wake_at = match (give_up_at, self.next_timer_deadline()) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            let poll_timeout = wake_at.map(|t| t.saturating_duration_since(now));

            match self.poll.poll(&mut self.events, poll_timeout) {
                Ok(()) => {}
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            let ready: Vec<QueueDesc> = self
                .events
                .iter()
                .map(|event| QueueDesc(event.token().0 as u32))
                .collect();
            for qd in ready {
                self.drive(qd)?;
            }
        }
    }

    fn release(&mut self, qt: QToken) -> Result<(), SubstrateError> {
        let op = self.ops.remove(&qt).ok_or(SubstrateError::UnknownToken(qt))?;
        if let Some(conn) = self.conns.get_mut(&op.qd) {
            // A released pop must not swallow the next frame
            conn.waiting_pops.retain(|&p| p != qt);
        }
        Ok(())
    }

    fn close(&mut self, qd: QueueDesc) -> Result<(), SubstrateError> {
        if !self.timers.remove(&qd) {
            let mut conn = self.conns.remove(&qd).ok_or(SubstrateError::UnknownQueue(qd))?;
            if let Some(mut stream) = conn.stream.take() {
                self.poll.registry().deregister(&mut stream)?;
                stream.shutdown(std::net::Shutdown::Both).ok();
            }
        }
        self.ops.retain(|_, op| op.qd != qd);
        Ok(())
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}
