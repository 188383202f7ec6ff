//! End-to-end latency recording
//!
//! A named HDR histogram of round-trip times in microseconds. The schedulers
//! only ever call [`LatencyRecorder::record`]; everything else is reporting.

use std::io::{self, Write};
use std::time::Duration;

use hdrhistogram::Histogram;

/// Highest trackable latency: one hour in microseconds
const MAX_TRACKABLE_US: u64 = 3_600_000_000;

/// Latency sink for raw round-trip samples
pub struct LatencyRecorder {
    name: String,
    histogram: Histogram<u64>,
}

impl LatencyRecorder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            histogram: Histogram::new_with_bounds(1, MAX_TRACKABLE_US, 3)
                .expect("Failed to create histogram"),
        }
    }

    /// Record one round trip
    #[inline]
    pub fn record(&mut self, elapsed: Duration) {
        let us = elapsed.as_micros().min(MAX_TRACKABLE_US as u128) as u64;
        self.histogram.saturating_record(us);
    }

    /// Number of recorded samples
    pub fn count(&self) -> u64 {
        self.histogram.len()
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let hist = &self.histogram;
        let empty = hist.is_empty();
        LatencySnapshot {
            name: self.name.clone(),
            count: hist.len(),
            min_us: if empty { 0 } else { hist.min() },
            mean_us: if empty { 0.0 } else { hist.mean() },
            p50_us: hist.value_at_percentile(50.0),
            p90_us: hist.value_at_percentile(90.0),
            p99_us: hist.value_at_percentile(99.0),
            p999_us: hist.value_at_percentile(99.9),
            max_us: hist.max(),
        }
    }

    /// Write the human-readable report
    pub fn dump<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let snap = self.snapshot();
        writeln!(out, "=== latency: {} ===", snap.name)?;
        writeln!(out, "  samples: {}", snap.count)?;
        if snap.count == 0 {
            return Ok(());
        }
        writeln!(out, "  min:   {} us", snap.min_us)?;
        writeln!(out, "  avg:   {:.1} us", snap.mean_us)?;
        writeln!(out, "  p50:   {} us", snap.p50_us)?;
        writeln!(out, "  p90:   {} us", snap.p90_us)?;
        writeln!(out, "  p99:   {} us", snap.p99_us)?;
        writeln!(out, "  p99.9: {} us", snap.p999_us)?;
        writeln!(out, "  max:   {} us", snap.max_us)?;
        Ok(())
    }
}

/// Point-in-time latency summary
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySnapshot {
    pub name: String,
    pub count: u64,
    pub min_us: u64,
    pub mean_us: f64,
    pub p50_us: u64,
    pub p90_us: u64,
    pub p99_us: u64,
    pub p999_us: u64,
    pub max_us: u64,
}

impl LatencySnapshot {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "samples": self.count,
            "min_us": self.min_us,
            "mean_us": self.mean_us,
            "p50_us": self.p50_us,
            "p90_us": self.p90_us,
            "p99_us": self.p99_us,
            "p999_us": self.p999_us,
            "max_us": self.max_us
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let mut recorder = LatencyRecorder::new("end-to-end");
        for i in 1..=100u64 {
            recorder.record(Duration::from_micros(i * 10));
        }
        let snap = recorder.snapshot();
        assert_eq!(snap.count, 100);
        assert_eq!(snap.min_us, 10);
        assert!(snap.max_us >= 1000 && snap.max_us <= 1001);
        assert!(snap.p50_us >= 495 && snap.p50_us <= 505);
    }

    #[test]
    fn test_zero_latency_is_counted() {
        let mut recorder = LatencyRecorder::new("zero");
        recorder.record(Duration::ZERO);
        assert_eq!(recorder.count(), 1);
    }

    #[test]
    fn test_dump_empty() {
        let recorder = LatencyRecorder::new("empty");
        let mut out = Vec::new();
        recorder.dump(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("=== latency: empty ==="));
        assert!(text.contains("samples: 0"));
        assert!(!text.contains("p99"));
    }

    #[test]
    fn test_snapshot_json() {
        let mut recorder = LatencyRecorder::new("end-to-end");
        recorder.record(Duration::from_micros(42));
        let json = recorder.snapshot().to_json();
        assert_eq!(json["name"], "end-to-end");
        assert_eq!(json["samples"], 1);
    }
}
