//! Round accounting and the cancellation flag
//!
//! `RoundCounters` is owned by the scheduler thread and never shared. The only
//! cross-thread state is `CancelFlag`, raised by the interrupt handler and
//! polled by the schedulers between multiplexer wakes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Global round counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundCounters {
    /// Rounds issued (initial requests and post-response requests)
    pub sent: u64,
    /// Responses consumed
    pub received: u64,
    /// Timer expiries after the first response
    pub retries: u32,
    /// Requests pushed again because their timer expired
    pub resends: u64,
    /// Decremented once per response; the loop stops at zero
    pub iterations_remaining: i64,
}

impl RoundCounters {
    /// Counters for a run of `iterations` round trips
    ///
    /// The budget is capped one below `i64::MAX`, leaving room for the
    /// warm-up round.
    pub fn with_budget(iterations: u64) -> Self {
        Self {
            iterations_remaining: iterations.min(i64::MAX as u64 - 1) as i64,
            ..Self::default()
        }
    }

    /// Add one discarded warm-up round to the budget
    pub fn add_warmup_round(&mut self) {
        self.iterations_remaining = self.iterations_remaining.saturating_add(1);
    }

    #[inline]
    pub fn record_sent(&mut self) {
        self.sent += 1;
    }

    /// Count one response against the budget
    #[inline]
    pub fn record_received(&mut self) {
        self.received += 1;
        self.iterations_remaining -= 1;
    }

    #[inline]
    pub fn record_retry(&mut self) {
        self.retries += 1;
    }

    #[inline]
    pub fn record_resend(&mut self) {
        self.resends += 1;
    }

    /// No response has been seen yet
    #[inline]
    pub fn is_warming_up(&self) -> bool {
        self.received == 0
    }

    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.iterations_remaining <= 0
    }

    /// Fewer rounds remain than there are clients: stop issuing new work
    #[inline]
    pub fn should_drain(&self, clients: usize) -> bool {
        self.iterations_remaining < clients as i64
    }

    /// Rounds issued but not yet answered
    pub fn outstanding(&self) -> u64 {
        self.sent.saturating_sub(self.received)
    }
}

/// Cooperative cancellation shared with the interrupt handler
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_budget_accounting() {
        let mut counters = RoundCounters::with_budget(3);
        counters.record_sent();
        counters.record_sent();
        assert_eq!(counters.outstanding(), 2);
        assert!(counters.is_warming_up());

        counters.record_received();
        assert!(!counters.is_warming_up());
        assert_eq!(counters.iterations_remaining, 2);
        assert!(!counters.is_exhausted());

        counters.record_received();
        counters.record_received();
        assert!(counters.is_exhausted());
    }

    #[test]
    fn test_warmup_round() {
        let mut counters = RoundCounters::with_budget(10);
        counters.add_warmup_round();
        assert_eq!(counters.iterations_remaining, 11);
    }

    #[test]
    fn test_huge_budget_keeps_warmup_round() {
        let mut counters = RoundCounters::with_budget(u64::MAX);
        counters.add_warmup_round();
        assert_eq!(counters.iterations_remaining, i64::MAX);
        assert!(!counters.is_exhausted());

        // Adding more never wraps
        counters.add_warmup_round();
        assert_eq!(counters.iterations_remaining, i64::MAX);
    }

    #[test]
    fn test_should_drain() {
        let mut counters = RoundCounters::with_budget(5);
        assert!(!counters.should_drain(4));
        counters.record_received();
        assert!(!counters.should_drain(4));
        counters.record_received();
        assert!(counters.should_drain(4));
    }

    #[test]
    fn test_outstanding_never_underflows() {
        let mut counters = RoundCounters::with_budget(1);
        counters.record_received();
        assert_eq!(counters.outstanding(), 0);
    }

    #[test]
    fn test_cancel_flag_across_threads() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());

        let remote = flag.clone();
        thread::spawn(move || remote.cancel()).join().unwrap();
        assert!(flag.is_cancelled());
    }
}
