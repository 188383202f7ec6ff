//! Benchmark orchestrator
//!
//! Builds the outgoing payload, opens the connection on the configured
//! backend, runs the selected scheduler and turns the result into a report.

use tracing::info;

use super::context::{EchoContext, RunOutcome};
use super::counters::CancelFlag;
use super::reliable::run_reliable;
use super::simple::{run_simple, run_wait_all};
use crate::client::{ServerModel, SimSubstrate, Substrate, TcpSubstrate};
use crate::config::{Backend, BenchmarkConfig, SchedulerMode};
use crate::metrics::RunReport;
use crate::utils::Result;
use crate::workload::{EchoMessage, OutgoingPayload};

/// Benchmark orchestrator
pub struct Orchestrator {
    config: BenchmarkConfig,
    cancel: CancelFlag,
}

impl Orchestrator {
    pub fn new(config: BenchmarkConfig, cancel: CancelFlag) -> Self {
        Self { config, cancel }
    }

    /// Run on the backend named in the configuration
    pub fn run(&self) -> Result<RunReport> {
        let message = EchoMessage::filled(self.config.payload_size);
        let payload = self.config.strategy.serialize(&message)?;
        info!(
            strategy = %self.config.strategy,
            bytes = payload.len(),
            "payload ready"
        );

        match self.config.backend {
            Backend::Tcp => self.run_on(TcpSubstrate::new()?, payload),
            Backend::Sim => {
                let sim = &self.config.sim;
                let model = ServerModel::lossy(sim.delay, sim.jitter, sim.loss, sim.seed);
                self.run_on(SimSubstrate::new(model), payload)
            }
        }
    }

    /// Run against an already constructed substrate
    pub fn run_on<S: Substrate>(&self, substrate: S, payload: OutgoingPayload<'_>) -> Result<RunReport> {
        let payload_bytes = payload.len();
        let clients = self.config.clients as usize;
        let mut ctx = EchoContext::connect(
            substrate,
            self.config.address,
            payload,
            self.config.iterations,
            self.cancel.clone(),
        )?;

        let outcome = match self.config.mode {
            SchedulerMode::Simple => run_simple(&mut ctx, clients)?,
            SchedulerMode::WaitAll => run_wait_all(&mut ctx, clients)?,
            SchedulerMode::Reliable { timeout } => run_reliable(&mut ctx, clients, timeout)?,
        };
        if outcome == RunOutcome::Interrupted {
            info!("Interrupted, shutting down");
        }
        if let SchedulerMode::Reliable { .. } = self.config.mode {
            println!("Final num retries: {}", ctx.counters().retries);
        }

        let finished = ctx.finish()?;
        Ok(RunReport {
            mode: self.config.mode.as_str().to_string(),
            strategy: self.config.strategy.as_str().to_string(),
            clients: self.config.clients,
            payload_bytes,
            counters: finished.counters,
            duration: finished.duration,
            interrupted: outcome == RunOutcome::Interrupted,
            latency: finished.latency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CliArgs;
    use clap::Parser;

    fn config(extra: &[&str]) -> BenchmarkConfig {
        let mut argv = vec!["test", "--backend", "sim"];
        argv.extend_from_slice(extra);
        BenchmarkConfig::from_cli(&CliArgs::parse_from(argv)).unwrap()
    }

    #[test]
    fn test_sim_simple_run() {
        let orchestrator = Orchestrator::new(config(&["-c", "4", "-i", "20"]), CancelFlag::new());
        let report = orchestrator.run().unwrap();
        assert_eq!(report.mode, "simple");
        assert_eq!(report.counters.sent, 20);
        assert_eq!(report.counters.received, 20);
        assert!(!report.interrupted);
        assert_eq!(report.latency.count, 20);
    }

    #[test]
    fn test_sim_reliable_run() {
        let orchestrator = Orchestrator::new(
            config(&["-c", "2", "-i", "50", "--retries", "--sim-delay-us", "20", "--system", "json"]),
            CancelFlag::new(),
        );
        let report = orchestrator.run().unwrap();
        assert_eq!(report.mode, "reliable");
        assert_eq!(report.strategy, "json");
        assert_eq!(report.counters.retries, 0);
        assert_eq!(report.counters.received, report.counters.sent);
        assert_eq!(report.latency.count, 50);
    }

    #[test]
    fn test_sim_lossy_reliable_recovers() {
        let orchestrator = Orchestrator::new(
            config(&[
                "-c", "4", "-i", "200", "--retries", "--timeout-us", "100",
                "--sim-delay-us", "10", "--sim-loss", "0.2", "--seed", "11",
            ]),
            CancelFlag::new(),
        );
        let report = orchestrator.run().unwrap();
        assert!(!report.interrupted);
        assert_eq!(report.counters.iterations_remaining, 0);
        assert!(report.counters.resends > 0);
        assert!(report.counters.received <= report.counters.sent);
    }

    #[test]
    fn test_pre_cancelled_run_is_interrupted() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let orchestrator = Orchestrator::new(config(&["-i", "5"]), cancel);
        let report = orchestrator.run().unwrap();
        assert!(report.interrupted);
        assert_eq!(report.counters.received, 0);
        assert_eq!(report.counters.sent, 1);
    }
}
