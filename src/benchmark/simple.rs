//! Closed-loop schedulers without retry
//!
//! `run_simple` re-issues a client as soon as its echo arrives. `run_wait_all`
//! advances all clients in lock step: every outstanding echo is collected
//! before the next batch goes out, and one latency sample covers the batch.

use tracing::{debug, info};

use super::context::{unexpected, EchoContext, RunOutcome};
use super::slot::{ClientSlot, WaitSet};
use crate::client::{release_slot, OpResult, Substrate};
use crate::utils::Result;

/// Clients that get an initial request
fn initial_clients(clients: usize, remaining: i64) -> usize {
    clients.min(remaining.max(0) as usize)
}

/// Run `clients` independent request/response loops until the budget is spent
pub fn run_simple<S: Substrate>(ctx: &mut EchoContext<'_, S>, clients: usize) -> Result<RunOutcome> {
    info!("Number of clients: {}", clients);
    let now = ctx.now();
    let mut slots: Vec<ClientSlot> = (0..clients).map(|_| ClientSlot::new(now)).collect();
    let mut waits = WaitSet::receives_only(clients);

    for c in 0..initial_clients(clients, ctx.counters.iterations_remaining) {
        ctx.issue(&mut slots[c], &mut waits, c)?;
    }

    while !ctx.counters.is_exhausted() {
        let Some((idx, result)) = ctx.next_completion(waits.as_slice())? else {
            return Ok(RunOutcome::Interrupted);
        };
        waits.clear(idx);
        if !matches!(result, OpResult::Popped(_)) {
            return Err(unexpected(idx, "pop", &result).into());
        }
        drop(result);

        let slot = &mut slots[idx];
        ctx.latency.record(ctx.substrate.now().saturating_duration_since(slot.start_time));
        ctx.counters.record_received();
        release_slot(&mut ctx.substrate, &mut slot.send)?;

        if ctx.counters.should_drain(clients) {
            debug!(
                client = idx,
                remaining = ctx.counters.iterations_remaining,
                outstanding = ctx.counters.outstanding(),
                active = waits.active_clients(),
                "client drained"
            );
            continue;
        }
        ctx.issue(slot, &mut waits, idx)?;
    }

    Ok(RunOutcome::Completed)
}

/// Run `clients` loops in lock step, one latency sample per batch
pub fn run_wait_all<S: Substrate>(ctx: &mut EchoContext<'_, S>, clients: usize) -> Result<RunOutcome> {
    info!("Number of clients: {}", clients);
    let now = ctx.now();
    let mut slots: Vec<ClientSlot> = (0..clients).map(|_| ClientSlot::new(now)).collect();
    let mut waits = WaitSet::receives_only(clients);

    for c in 0..initial_clients(clients, ctx.counters.iterations_remaining) {
        ctx.issue(&mut slots[c], &mut waits, c)?;
    }
    let mut batch_start = ctx.now();

    while !ctx.counters.is_exhausted() {
        for c in 0..clients {
            if waits.as_slice()[c].is_none() {
                continue;
            }
            let Some((_, result)) = ctx.next_completion(&waits.as_slice()[c..=c])? else {
                return Ok(RunOutcome::Interrupted);
            };
            waits.clear(c);
            if !matches!(result, OpResult::Popped(_)) {
                return Err(unexpected(c, "pop", &result).into());
            }
            ctx.counters.record_received();
            release_slot(&mut ctx.substrate, &mut slots[c].send)?;
        }

        let now = ctx.now();
        ctx.latency.record(now.saturating_duration_since(batch_start));
        batch_start = now;

        // The next batch never asks for more rounds than are left
        let batch = initial_clients(clients, ctx.counters.iterations_remaining);
        for c in 0..batch {
            ctx.issue(&mut slots[c], &mut waits, c)?;
        }
        if batch < clients && batch > 0 {
            debug!(batch, "short final batch");
        }
    }

    Ok(RunOutcome::Completed)
}
