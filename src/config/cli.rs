//! Command-line argument parsing
//!
//! Arguments are grouped by category for clarity.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Closed-loop echo latency benchmark client
#[derive(Parser, Debug, Clone)]
#[command(name = "echo-bench")]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    // ===== Connection Options =====
    /// Server address (IP or hostname)
    #[arg(short = 's', long = "server", default_value = "127.0.0.1")]
    pub server: String,

    /// Server port
    #[arg(short = 'p', long = "port", default_value_t = 12345)]
    pub port: u16,

    /// I/O backend
    #[arg(long = "backend", value_enum, default_value_t = Backend::Tcp)]
    pub backend: Backend,

    // ===== Benchmark Parameters =====
    /// Number of virtual clients multiplexed over the connection
    #[arg(short = 'c', long = "clients", default_value_t = 1)]
    pub clients: u32,

    /// Number of round trips to measure
    #[arg(short = 'i', long = "iterations", default_value_t = 10)]
    pub iterations: u64,

    /// Payload size in bytes
    #[arg(long = "size", default_value_t = 64)]
    pub size: usize,

    /// Serialization strategy (fill, malloc_baseline, malloc_no_str, memcpy,
    /// single_memcpy, json, resp, zero_copy)
    #[arg(long = "system")]
    pub system: Option<String>,

    // ===== Scheduling Mode =====
    /// Resend requests whose echo does not arrive within --timeout-us
    #[arg(long = "retries")]
    pub retries: bool,

    /// Retry timeout in microseconds
    #[arg(long = "timeout-us", default_value_t = 300)]
    pub timeout_us: u64,

    /// Wait for every client's echo before issuing the next batch
    #[arg(long = "wait-all")]
    pub wait_all: bool,

    // ===== Simulated Server =====
    /// Simulated service delay in microseconds
    #[arg(long = "sim-delay-us", default_value_t = 0)]
    pub sim_delay_us: u64,

    /// Extra uniform random delay in microseconds
    #[arg(long = "sim-jitter-us", default_value_t = 0)]
    pub sim_jitter_us: u64,

    /// Fraction of requests the simulated server drops
    #[arg(long = "sim-loss", default_value_t = 0.0)]
    pub sim_loss: f64,

    /// Random seed for the simulated server (0 = random)
    #[arg(long = "seed", default_value_t = 0)]
    pub seed: u64,

    // ===== Output Options =====
    /// Output file for the JSON report
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Quiet mode (errors only)
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

/// I/O backend the client runs on
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Real TCP connection
    #[default]
    Tcp,
    /// In-process simulated echo server
    Sim,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Tcp => "tcp",
            Backend::Sim => "sim",
        }
    }
}

impl CliArgs {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate argument combinations
    pub fn validate(&self) -> Result<(), String> {
        if self.clients == 0 {
            return Err("--clients must be at least 1".to_string());
        }

        if self.iterations == 0 {
            return Err("--iterations must be at least 1".to_string());
        }

        if self.timeout_us == 0 {
            return Err("--timeout-us must be positive".to_string());
        }

        if self.retries && self.wait_all {
            return Err("--wait-all cannot be combined with --retries".to_string());
        }

        if !(0.0..1.0).contains(&self.sim_loss) {
            return Err("--sim-loss must be in [0.0, 1.0)".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let args = CliArgs::parse_from(["test"]);
        assert_eq!(args.server, "127.0.0.1");
        assert_eq!(args.port, 12345);
        assert_eq!(args.clients, 1);
        assert_eq!(args.iterations, 10);
        assert_eq!(args.size, 64);
        assert_eq!(args.timeout_us, 300);
        assert_eq!(args.backend, Backend::Tcp);
        assert!(args.system.is_none());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_reliable_args() {
        let args = CliArgs::parse_from([
            "test",
            "-s",
            "10.0.0.2",
            "-c",
            "8",
            "-i",
            "1000",
            "--retries",
            "--timeout-us",
            "500",
            "--system",
            "memcpy",
        ]);
        assert_eq!(args.server, "10.0.0.2");
        assert_eq!(args.clients, 8);
        assert_eq!(args.iterations, 1000);
        assert!(args.retries);
        assert_eq!(args.timeout_us, 500);
        assert_eq!(args.system.as_deref(), Some("memcpy"));
    }

    #[test]
    fn test_sim_backend_args() {
        let args = CliArgs::parse_from([
            "test",
            "--backend",
            "sim",
            "--sim-delay-us",
            "50",
            "--sim-loss",
            "0.1",
            "--seed",
            "7",
        ]);
        assert_eq!(args.backend, Backend::Sim);
        assert_eq!(args.backend.as_str(), "sim");
        assert_eq!(Backend::default().as_str(), "tcp");
        assert_eq!(args.sim_delay_us, 50);
        assert_eq!(args.sim_loss, 0.1);
        assert_eq!(args.seed, 7);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_validation_zero_clients() {
        let args = CliArgs::parse_from(["test", "-c", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_zero_iterations() {
        let args = CliArgs::parse_from(["test", "-i", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_wait_all_with_retries() {
        let args = CliArgs::parse_from(["test", "--wait-all", "--retries"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_zero_timeout() {
        let args = CliArgs::parse_from(["test", "--timeout-us", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_sim_loss_range() {
        let args = CliArgs::parse_from(["test", "--sim-loss", "1.0"]);
        assert!(args.validate().is_err());
    }
}
