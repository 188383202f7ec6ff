//! Run report formatting and export
//!
//! Supports:
//! - Console summary (stdout)
//! - JSON file export

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use super::latency::LatencySnapshot;
use crate::benchmark::RoundCounters;

/// Everything known about a finished (or interrupted) run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub mode: String,
    pub strategy: String,
    pub clients: u32,
    pub payload_bytes: usize,
    pub counters: RoundCounters,
    pub duration: Duration,
    pub interrupted: bool,
    pub latency: LatencySnapshot,
}

impl RunReport {
    /// Completed round trips per second
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.counters.received as f64 / secs
        } else {
            0.0
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "mode": self.mode,
            "strategy": self.strategy,
            "clients": self.clients,
            "payload_bytes": self.payload_bytes,
            "sent": self.counters.sent,
            "received": self.counters.received,
            "retries": self.counters.retries,
            "resends": self.counters.resends,
            "iterations_remaining": self.counters.iterations_remaining,
            "duration_secs": self.duration.as_secs_f64(),
            "throughput": self.throughput(),
            "interrupted": self.interrupted,
            "latency": self.latency.to_json()
        })
    }
}

/// Metrics reporter
pub struct MetricsReporter {
    quiet: bool,
}

impl MetricsReporter {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    /// Human-readable summary on stdout
    pub fn report_console(&self, report: &RunReport) {
        if self.quiet {
            return;
        }
        println!("\n=== {} ({}) ===", report.mode, report.strategy);
        if report.interrupted {
            println!("Run interrupted before the iteration budget was spent");
        }
        println!("Clients: {}, payload: {} bytes", report.clients, report.payload_bytes);
        println!("Duration: {:.3}s", report.duration.as_secs_f64());
        println!("Throughput: {:.2} req/sec", report.throughput());
        println!(
            "Latency (us): avg {:.1}, p50 {}, p99 {}, max {}",
            report.latency.mean_us, report.latency.p50_us, report.latency.p99_us, report.latency.max_us
        );
    }

    /// Write the report as pretty JSON
    pub fn write_json_file(&self, path: &Path, report: &RunReport) -> io::Result<()> {
        let text = serde_json::to_string_pretty(&report.to_json())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut file = File::create(path)?;
        writeln!(file, "{}", text)?;
        Ok(())
    }
}
