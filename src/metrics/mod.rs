//! Metrics collection and reporting
//!
//! - `LatencyRecorder`: HDR histogram sink for round-trip samples
//! - `MetricsReporter`: console summary and JSON export

pub mod latency;
pub mod reporter;

pub use latency::{LatencyRecorder, LatencySnapshot};
pub use reporter::{MetricsReporter, RunReport};
