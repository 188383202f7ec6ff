//! Per-client state and the pending-token set handed to the multiplexer

use std::time::Instant;

use crate::client::{QToken, QueueDesc};

/// State of one virtual client
///
/// The client's receive and timer tokens live in the [`WaitSet`], so the set
/// can be passed to `wait_any` as-is on every iteration.
#[derive(Debug)]
pub struct ClientSlot {
    /// Outstanding push, released once the round completes or is resent
    pub send: Option<QToken>,
    /// Timer queue (reliable mode only)
    pub timer_q: Option<QueueDesc>,
    /// When the current request was issued
    pub start_time: Instant,
    /// When the current timer was armed
    pub timer_armed_at: Instant,
}

impl ClientSlot {
    pub fn new(now: Instant) -> Self {
        Self {
            send: None,
            timer_q: None,
            start_time: now,
            timer_armed_at: now,
        }
    }
}

/// Ordered pending-token set
///
/// With `stride == 1` position `c` is client `c`'s receive. With `stride == 2`
/// receives sit at even positions (`2c`) and timers at odd ones (`2c + 1`).
/// An empty position is skipped by the multiplexer.
#[derive(Debug)]
pub struct WaitSet {
    tokens: Vec<Option<QToken>>,
    stride: usize,
}

impl WaitSet {
    /// One receive position per client
    pub fn receives_only(clients: usize) -> Self {
        Self {
            tokens: vec![None; clients],
            stride: 1,
        }
    }

    /// Interleaved receive/timer positions per client
    pub fn with_timers(clients: usize) -> Self {
        Self {
            tokens: vec![None; clients * 2],
            stride: 2,
        }
    }

    pub fn as_slice(&self) -> &[Option<QToken>] {
        &self.tokens
    }

    #[inline]
    pub fn client_of(&self, idx: usize) -> usize {
        idx / self.stride
    }

    #[inline]
    pub fn is_timer(&self, idx: usize) -> bool {
        self.stride == 2 && idx % 2 == 1
    }

    #[inline]
    pub fn recv_pos(&self, client: usize) -> usize {
        client * self.stride
    }

    #[inline]
    pub fn timer_pos(&self, client: usize) -> usize {
        debug_assert_eq!(self.stride, 2);
        client * self.stride + 1
    }

    /// Mutable access to a position, for `release_slot`
    pub fn slot_mut(&mut self, idx: usize) -> &mut Option<QToken> {
        &mut self.tokens[idx]
    }

    /// Store a fresh token; the position must be empty
    pub fn set(&mut self, idx: usize, qt: QToken) {
        debug_assert!(self.tokens[idx].is_none(), "position {} already pending", idx);
        self.tokens[idx] = Some(qt);
    }

    /// Forget a token the multiplexer has consumed
    pub fn clear(&mut self, idx: usize) {
        self.tokens[idx] = None;
    }

    /// Clients with a receive outstanding
    pub fn active_clients(&self) -> usize {
        self.tokens.iter().step_by(self.stride).filter(|t| t.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_only_layout() {
        let ws = WaitSet::receives_only(3);
        assert_eq!(ws.as_slice().len(), 3);
        assert_eq!(ws.client_of(2), 2);
        assert_eq!(ws.recv_pos(2), 2);
        assert!(!ws.is_timer(1));
    }

    #[test]
    fn test_interleaved_layout() {
        let ws = WaitSet::with_timers(3);
        assert_eq!(ws.as_slice().len(), 6);
        assert_eq!(ws.recv_pos(1), 2);
        assert_eq!(ws.timer_pos(1), 3);
        assert_eq!(ws.client_of(3), 1);
        assert_eq!(ws.client_of(4), 2);
        assert!(ws.is_timer(5));
        assert!(!ws.is_timer(4));
    }

    #[test]
    fn test_active_clients_ignores_timers() {
        let mut ws = WaitSet::with_timers(2);
        ws.set(1, QToken(7));
        assert_eq!(ws.active_clients(), 0);
        ws.set(2, QToken(8));
        assert_eq!(ws.active_clients(), 1);
        ws.clear(2);
        assert_eq!(ws.active_clients(), 0);
    }
}
