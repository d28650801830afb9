/// Utility functions and helpers for THZ operations
///
/// Exchange metrics, timers, argument validation and formatting helpers
/// shared by the session, the config layer and the binaries.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use log::{debug, warn};
use crate::error::{ThzError, ThzResult};

/// Number of recent exchange durations kept for the rolling average
pub const RECENT_WINDOW: usize = 32;

/// Timing statistics for telegram exchanges
#[derive(Debug, Clone, Default)]
pub struct PerformanceMetrics {
    pub exchanges: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub total_time: Duration,
    pub fastest: Option<Duration>,
    pub slowest: Option<Duration>,
    recent: VecDeque<Duration>,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an exchange that produced a valid response
    pub fn record_success(&mut self, duration: Duration) {
        self.succeeded += 1;
        self.fastest = Some(self.fastest.map_or(duration, |d| d.min(duration)));
        self.slowest = Some(self.slowest.map_or(duration, |d| d.max(duration)));
        self.record(duration);
    }

    /// Record an exchange that ended in an error
    pub fn record_failure(&mut self, duration: Duration) {
        self.failed += 1;
        self.record(duration);
    }

    fn record(&mut self, duration: Duration) {
        self.exchanges += 1;
        self.total_time += duration;
        if self.recent.len() == RECENT_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(duration);
    }

    /// Mean duration over every exchange so far
    pub fn average(&self) -> Duration {
        match u32::try_from(self.exchanges) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_time / n,
            Err(_) => Duration::from_secs_f64(self.total_time.as_secs_f64() / self.exchanges as f64),
        }
    }

    /// Mean duration over the last [`RECENT_WINDOW`] exchanges
    pub fn recent_average(&self) -> Duration {
        if self.recent.is_empty() {
            return Duration::ZERO;
        }
        self.recent.iter().sum::<Duration>() / self.recent.len() as u32
    }

    /// Share of successful exchanges, in percent
    pub fn success_rate(&self) -> f64 {
        if self.exchanges == 0 {
            return 0.0;
        }
        self.succeeded as f64 * 100.0 / self.exchanges as f64
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Measures one exchange and logs how it ended
pub struct OperationTimer {
    started: Instant,
    label: String,
}

impl OperationTimer {
    pub fn start(label: &str) -> Self {
        debug!("⏱️  {} started", label);
        Self {
            started: Instant::now(),
            label: label.to_string(),
        }
    }

    /// Stop the timer, logging failures at warn level
    pub fn stop_and_log(self, success: bool) -> Duration {
        let elapsed = self.started.elapsed();
        if success {
            debug!("⏱️  {} finished in {:?}", self.label, elapsed);
        } else {
            warn!("⏱️  {} failed after {:?}", self.label, elapsed);
        }
        elapsed
    }
}

/// Argument validation utilities
pub mod validation {
    use super::*;

    /// Baud rates the service interface is known to run at
    pub const SUPPORTED_BAUD_RATES: [u32; 5] = [9_600, 19_200, 38_400, 57_600, 115_200];

    /// Validate serial baud rate
    pub fn validate_baud_rate(baud_rate: u32) -> ThzResult<()> {
        if !SUPPORTED_BAUD_RATES.contains(&baud_rate) {
            return Err(ThzError::configuration(format!(
                "Unsupported baud rate: {} (expected one of {:?})",
                baud_rate, SUPPORTED_BAUD_RATES
            )));
        }
        Ok(())
    }

    /// Validate that a value has exactly the declared write length
    pub fn validate_write_length(value: &[u8], write_length: usize) -> ThzResult<()> {
        if value.len() != write_length {
            return Err(ThzError::invalid_data(format!(
                "Value has {} byte(s), write length is {}",
                value.len(),
                write_length
            )));
        }
        Ok(())
    }

    /// Validate a timeout or interval given in milliseconds
    pub fn validate_duration_ms(name: &str, millis: u64) -> ThzResult<()> {
        if millis == 0 {
            return Err(ThzError::configuration(format!("{} must be greater than 0", name)));
        }
        Ok(())
    }
}

/// Formatting and display utilities
pub mod format {
    use super::*;

    /// Format byte array as hex string
    pub fn bytes_to_hex(bytes: &[u8]) -> String {
        bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Format duration in a human-readable way
    pub fn format_duration(duration: Duration) -> String {
        let millis = duration.as_millis();
        if millis < 1000 {
            format!("{}ms", millis)
        } else if millis < 60_000 {
            format!("{:.2}s", duration.as_secs_f64())
        } else {
            let mins = millis / 60_000;
            let secs = (millis % 60_000) as f64 / 1000.0;
            format!("{}m {:.1}s", mins, secs)
        }
    }

    /// Render exchange metrics as a small tree
    pub fn format_metrics(metrics: &PerformanceMetrics) -> String {
        let or_na = |d: Option<Duration>| d.map_or_else(|| "N/A".to_string(), format_duration);
        format!(
            "Exchange Metrics:\n\
             ├─ Exchanges: {} ({} ok, {} failed, {:.1}% success)\n\
             ├─ Average: {} (last {}: {})\n\
             └─ Fastest / Slowest: {} / {}",
            metrics.exchanges,
            metrics.succeeded,
            metrics.failed,
            metrics.success_rate(),
            format_duration(metrics.average()),
            RECENT_WINDOW,
            format_duration(metrics.recent_average()),
            or_na(metrics.fastest),
            or_na(metrics.slowest),
        )
    }
}
