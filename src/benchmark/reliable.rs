//! Reliable scheduler: per-client timers and resend on timeout
//!
//! Each active client has two pending tokens in the wait set: its receive at
//! position `2c` and its timer at `2c + 1`. A response cancels the timer and
//! starts the next round; a timer expiry pushes the same payload again and
//! re-arms the timer, leaving the receive in place.
//!
//! The first response of the run is a warm-up round: it is budgeted for but
//! its latency is discarded, and timer expiries before it are not counted as
//! retries.
//!
//! A response arriving after a resend cannot be told apart from the echo of
//! the original request. Both are consumed as ordinary responses, so a late
//! echo may complete the next round early.

use std::time::Duration;

use tracing::{debug, info};

use super::context::{unexpected, EchoContext, RunOutcome};
use super::slot::{ClientSlot, WaitSet};
use crate::client::{release_slot, OpResult, Substrate};
use crate::utils::Result;

/// Run `clients` loops with a retransmission timer of `timeout` each
pub fn run_reliable<S: Substrate>(
    ctx: &mut EchoContext<'_, S>,
    clients: usize,
    timeout: Duration,
) -> Result<RunOutcome> {
    info!("Number of clients: {}", clients);
    ctx.counters.add_warmup_round();

    let now = ctx.now();
    let mut slots: Vec<ClientSlot> = (0..clients).map(|_| ClientSlot::new(now)).collect();
    let mut waits = WaitSet::with_timers(clients);
    for slot in slots.iter_mut() {
        slot.timer_q = Some(ctx.substrate.new_timer()?);
    }

    let active = clients.min(ctx.counters.iterations_remaining.max(0) as usize);
    for c in 0..active {
        ctx.issue(&mut slots[c], &mut waits, c)?;
        arm(ctx, &mut slots[c], &mut waits, c, timeout)?;
    }

    while !ctx.counters.is_exhausted() {
        let Some((idx, result)) = ctx.next_completion(waits.as_slice())? else {
            return Ok(RunOutcome::Interrupted);
        };
        waits.clear(idx);
        let c = waits.client_of(idx);

        if waits.is_timer(idx) {
            if result != OpResult::TimerFired {
                return Err(unexpected(idx, "timer", &result).into());
            }
            on_timeout(ctx, &mut slots[c], &mut waits, c, idx, timeout)?;
            continue;
        }

        if !matches!(result, OpResult::Popped(_)) {
            return Err(unexpected(idx, "pop", &result).into());
        }
        drop(result);

        let slot = &mut slots[c];
        if !ctx.counters.is_warming_up() {
            ctx.latency
                .record(ctx.substrate.now().saturating_duration_since(slot.start_time));
        }
        ctx.counters.record_received();
        release_slot(&mut ctx.substrate, &mut slot.send)?;
        release_slot(&mut ctx.substrate, waits.slot_mut(waits.timer_pos(c)))?;

        if ctx.counters.should_drain(clients) {
            debug!(
                client = c,
                remaining = ctx.counters.iterations_remaining,
                outstanding = ctx.counters.outstanding(),
                active = waits.active_clients(),
                "client drained"
            );
            continue;
        }
        ctx.issue(slot, &mut waits, c)?;
        arm(ctx, slot, &mut waits, c, timeout)?;
    }

    Ok(RunOutcome::Completed)
}

fn arm<S: Substrate>(
    ctx: &mut EchoContext<'_, S>,
    slot: &mut ClientSlot,
    waits: &mut WaitSet,
    client: usize,
    timeout: Duration,
) -> Result<()> {
    let timer_q = match slot.timer_q {
        Some(qd) => qd,
        None => {
            let qd = ctx.substrate.new_timer()?;
            slot.timer_q = Some(qd);
            qd
        }
    };
    let qt = ctx.substrate.arm_timer(timer_q, timeout)?;
    waits.set(waits.timer_pos(client), qt);
    slot.timer_armed_at = ctx.substrate.now();
    Ok(())
}

fn on_timeout<S: Substrate>(
    ctx: &mut EchoContext<'_, S>,
    slot: &mut ClientSlot,
    waits: &mut WaitSet,
    client: usize,
    idx: usize,
    timeout: Duration,
) -> Result<()> {
    let now = ctx.substrate.now();
    if ctx.counters.is_warming_up() {
        debug!(client, "timer fired before first response");
    } else {
        ctx.counters.record_retry();
        info!(
            idx,
            client,
            since_armed_us = now.saturating_duration_since(slot.timer_armed_at).as_micros() as u64,
            since_sent_us = now.saturating_duration_since(slot.start_time).as_micros() as u64,
            received = ctx.counters.received,
            retries = ctx.counters.retries,
            "Retrying request"
        );
    }
    ctx.resend(slot)?;
    arm(ctx, slot, waits, client, timeout)
}
