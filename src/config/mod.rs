//! Configuration module

pub mod benchmark_config;
pub mod cli;

pub use benchmark_config::{BenchmarkConfig, SchedulerMode, ServerAddress, SimConfig};
pub use cli::{Backend, CliArgs};
