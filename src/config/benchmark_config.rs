//! Benchmark configuration derived from CLI arguments

use super::cli::{Backend, CliArgs};
use crate::workload::SerializationStrategy;
use std::fmt;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

/// Server address as given on the command line
#[derive(Debug, Clone)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    /// Resolve to a socket address; literal IPs skip the resolver
    pub fn resolve(&self) -> Result<SocketAddr, String> {
        if let Ok(ip) = self.host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| format!("Failed to resolve {}: {}", self, e))?
            .next()
            .ok_or_else(|| format!("No address found for {}", self))
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Which scheduler drives the clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerMode {
    /// Re-issue on every response, no retry
    Simple,
    /// Lock-step batches across all clients
    WaitAll,
    /// Per-client timers with resend on timeout
    Reliable { timeout: Duration },
}

impl SchedulerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerMode::Simple => "simple",
            SchedulerMode::WaitAll => "wait-all",
            SchedulerMode::Reliable { .. } => "reliable",
        }
    }
}

/// Simulated server parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimConfig {
    pub delay: Duration,
    pub jitter: Duration,
    pub loss: f64,
    pub seed: u64,
}

/// Complete benchmark configuration
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    // Connection
    pub server: ServerAddress,
    pub address: SocketAddr,
    pub backend: Backend,
    pub sim: SimConfig,

    // Workload
    pub clients: u32,
    pub iterations: u64,
    pub payload_size: usize,
    pub strategy: SerializationStrategy,
    pub mode: SchedulerMode,

    // Output
    pub output_path: Option<PathBuf>,
    pub quiet: bool,
    pub verbose: bool,
}

impl BenchmarkConfig {
    /// Create configuration from CLI arguments
    pub fn from_cli(args: &CliArgs) -> Result<Self, String> {
        // Validate first
        args.validate()?;

        let server = ServerAddress {
            host: args.server.clone(),
            port: args.port,
        };
        let address = server.resolve()?;

        let strategy = match args.system.as_deref() {
            Some(name) => name.parse::<SerializationStrategy>()?,
            None => SerializationStrategy::default(),
        };

        let mode = if args.retries {
            SchedulerMode::Reliable {
                timeout: Duration::from_micros(args.timeout_us),
            }
        } else if args.wait_all {
            SchedulerMode::WaitAll
        } else {
            SchedulerMode::Simple
        };

        Ok(Self {
            server,
            address,
            backend: args.backend,
            sim: SimConfig {
                delay: Duration::from_micros(args.sim_delay_us),
                jitter: Duration::from_micros(args.sim_jitter_us),
                loss: args.sim_loss,
                seed: args.seed,
            },

            clients: args.clients,
            iterations: args.iterations,
            payload_size: args.size,
            strategy,
            mode,

            output_path: args.output.clone(),
            quiet: args.quiet,
            verbose: args.verbose,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_default_config() {
        let config = BenchmarkConfig::from_cli(&CliArgs::parse_from(["test"])).unwrap();
        assert_eq!(config.address, "127.0.0.1:12345".parse::<SocketAddr>().unwrap());
        assert_eq!(config.mode, SchedulerMode::Simple);
        assert_eq!(config.strategy, SerializationStrategy::Fill);
        assert_eq!(config.backend, Backend::Tcp);
    }

    #[test]
    fn test_reliable_mode_timeout() {
        let args = CliArgs::parse_from(["test", "--retries", "--timeout-us", "150"]);
        let config = BenchmarkConfig::from_cli(&args).unwrap();
        assert_eq!(
            config.mode,
            SchedulerMode::Reliable {
                timeout: Duration::from_micros(150)
            }
        );
        assert_eq!(config.mode.as_str(), "reliable");
    }

    #[test]
    fn test_wait_all_mode() {
        let args = CliArgs::parse_from(["test", "--wait-all"]);
        let config = BenchmarkConfig::from_cli(&args).unwrap();
        assert_eq!(config.mode, SchedulerMode::WaitAll);
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let args = CliArgs::parse_from(["test", "--system", "capnproto"]);
        let err = BenchmarkConfig::from_cli(&args).unwrap_err();
        assert_eq!(err, "Serialization strategy capnproto unknown.");
    }

    #[test]
    fn test_ipv6_literal() {
        let server = ServerAddress {
            host: "::1".to_string(),
            port: 9000,
        };
        assert_eq!(server.resolve().unwrap(), "[::1]:9000".parse::<SocketAddr>().unwrap());
    }
}
