//! Performance monitoring for instrumented code paths
//!
//! [`PerformanceMonitor`] times a closure or future, samples the process's
//! resident memory and CPU usage around it and warns when a configured threshold
//! is exceeded. Samples are kept in a bounded history for summary statistics.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use sysinfo::{Pid, System};
use tracing::{debug, warn};

/// Default number of samples kept
pub const DEFAULT_HISTORY_SIZE: usize = 1_000;

/// Limits that trigger a warning when exceeded
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceThresholds {
    /// Longest acceptable run time
    pub max_duration: Duration,
    /// Largest acceptable growth of resident memory, in bytes
    pub max_memory_delta_bytes: u64,
    /// Highest acceptable CPU usage, in percent of one core
    pub max_cpu_percent: f32,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_secs(1),
            max_memory_delta_bytes: 50 * 1024 * 1024,
            max_cpu_percent: 80.0,
        }
    }
}

/// A threshold a sample exceeded
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ThresholdViolation {
    /// Ran longer than allowed
    Duration {
        /// Measured run time
        actual: Duration,
        /// Configured limit
        limit: Duration,
    },
    /// Resident memory grew more than allowed
    Memory {
        /// Measured growth in bytes
        actual: u64,
        /// Configured limit in bytes
        limit: u64,
    },
    /// CPU usage above the limit
    Cpu {
        /// Measured usage in percent
        actual: f32,
        /// Configured limit in percent
        limit: f32,
    },
}

impl fmt::Display for ThresholdViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duration { actual, limit } => {
                write!(f, "duration {actual:?} exceeds {limit:?}")
            }
            Self::Memory { actual, limit } => {
                write!(f, "memory growth {actual} bytes exceeds {limit} bytes")
            }
            Self::Cpu { actual, limit } => write!(f, "cpu usage {actual:.1}% exceeds {limit:.1}%"),
        }
    }
}

/// One measured run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSample {
    /// Operation name
    pub name: String,
    /// Run time
    pub duration: Duration,
    /// Resident memory before the run, in bytes
    pub memory_before: u64,
    /// Resident memory after the run, in bytes
    pub memory_after: u64,
    /// Process CPU usage after the run, in percent
    pub cpu_percent: f32,
    /// Completion time
    pub timestamp: DateTime<Utc>,
    /// Thresholds this run exceeded
    pub violations: Vec<ThresholdViolation>,
}

impl PerformanceSample {
    /// Signed change in resident memory, in bytes
    #[must_use]
    pub fn memory_delta(&self) -> i64 {
        self.memory_after as i64 - self.memory_before as i64
    }
}

/// Summary over a set of samples
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceStatistics {
    /// Number of samples
    pub count: usize,
    /// Shortest run
    pub min_duration: Duration,
    /// Longest run
    pub max_duration: Duration,
    /// Mean run time
    pub mean_duration: Duration,
    /// 95th percentile run time (nearest rank)
    pub p95_duration: Duration,
    /// Mean memory change in bytes
    pub mean_memory_delta: f64,
    /// Samples with at least one violation
    pub violations: usize,
}

/// Times operations and keeps a bounded sample history
pub struct PerformanceMonitor {
    thresholds: PerformanceThresholds,
    max_history: usize,
    pid: Option<Pid>,
    system: Mutex<System>,
    history: Mutex<VecDeque<PerformanceSample>>,
}

impl fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerformanceMonitor")
            .field("thresholds", &self.thresholds)
            .field("max_history", &self.max_history)
            .field("samples", &self.history.lock().len())
            .finish()
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(PerformanceThresholds::default())
    }
}

impl PerformanceMonitor {
    /// Monitor with the default history size
    #[must_use]
    pub fn new(thresholds: PerformanceThresholds) -> Self {
        Self::with_history_size(thresholds, DEFAULT_HISTORY_SIZE)
    }

    /// Monitor keeping at most `max_history` samples
    #[must_use]
    pub fn with_history_size(thresholds: PerformanceThresholds, max_history: usize) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!(error = e, "Process id unavailable, memory and CPU will read as zero");
                None
            }
        };
        Self {
            thresholds,
            max_history: max_history.max(1),
            pid,
            system: Mutex::new(System::new()),
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Configured thresholds
    #[must_use]
    pub fn thresholds(&self) -> &PerformanceThresholds {
        &self.thresholds
    }

    /// Run `operation` and record a sample for it
    pub fn measure<T, F>(&self, name: &str, operation: F) -> T
    where
        F: FnOnce() -> T,
    {
        let (memory_before, _) = self.sample_process();
        let started = Instant::now();
        let output = operation();
        self.finish(name, started.elapsed(), memory_before);
        output
    }

    /// Await `operation` and record a sample for it
    pub async fn measure_async<F>(&self, name: &str, operation: F) -> F::Output
    where
        F: Future,
    {
        let (memory_before, _) = self.sample_process();
        let started = Instant::now();
        let output = operation.await;
        self.finish(name, started.elapsed(), memory_before);
        output
    }

    /// Record a run whose timing was measured elsewhere
    pub fn record(&self, sample: PerformanceSample) {
        let mut history = self.history.lock();
        history.push_back(sample);
        while history.len() > self.max_history {
            history.pop_front();
        }
    }

    /// Copy of the sample history, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<PerformanceSample> {
        self.history.lock().iter().cloned().collect()
    }

    /// Drop every sample
    pub fn clear(&self) {
        self.history.lock().clear();
    }

    /// Statistics over all samples, or only those named `name`
    #[must_use]
    pub fn statistics(&self, name: Option<&str>) -> PerformanceStatistics {
        let history = self.history.lock();
        let samples: Vec<&PerformanceSample> = history
            .iter()
            .filter(|s| name.is_none_or(|n| s.name == n))
            .collect();
        summarize(&samples)
    }

    fn finish(&self, name: &str, duration: Duration, memory_before: u64) {
        let (memory_after, cpu_percent) = self.sample_process();
        let violations = self.check(duration, memory_before, memory_after, cpu_percent);
        for violation in &violations {
            warn!(operation = name, %violation, "Performance threshold exceeded");
        }
        debug!(
            operation = name,
            duration_ms = duration.as_secs_f64() * 1000.0,
            memory_after,
            cpu_percent,
            "Performance sample recorded"
        );

        self.record(PerformanceSample {
            name: name.to_string(),
            duration,
            memory_before,
            memory_after,
            cpu_percent,
            timestamp: Utc::now(),
            violations,
        });
    }

    fn check(
        &self,
        duration: Duration,
        memory_before: u64,
        memory_after: u64,
        cpu_percent: f32,
    ) -> Vec<ThresholdViolation> {
        let limits = &self.thresholds;
        let mut violations = Vec::new();

        if duration > limits.max_duration {
            violations.push(ThresholdViolation::Duration {
                actual: duration,
                limit: limits.max_duration,
            });
        }
        let growth = memory_after.saturating_sub(memory_before);
        if growth > limits.max_memory_delta_bytes {
            violations.push(ThresholdViolation::Memory {
                actual: growth,
                limit: limits.max_memory_delta_bytes,
            });
        }
        if cpu_percent > limits.max_cpu_percent {
            violations.push(ThresholdViolation::Cpu {
                actual: cpu_percent,
                limit: limits.max_cpu_percent,
            });
        }
        violations
    }

    /// Resident memory in bytes and CPU percent of this process
    fn sample_process(&self) -> (u64, f32) {
        let Some(pid) = self.pid else {
            return (0, 0.0);
        };
        let mut system = self.system.lock();
        if !system.refresh_process(pid) {
            return (0, 0.0);
        }
        system
            .process(pid)
            .map_or((0, 0.0), |process| (process.memory(), process.cpu_usage()))
    }
}

fn summarize(samples: &[&PerformanceSample]) -> PerformanceStatistics {
    if samples.is_empty() {
        return PerformanceStatistics::default();
    }

    let mut durations: Vec<Duration> = samples.iter().map(|s| s.duration).collect();
    durations.sort_unstable();
    let count = durations.len();
    let total: Duration = durations.iter().sum();
    let rank = ((count as f64) * 0.95).ceil() as usize;

    PerformanceStatistics {
        count,
        min_duration: durations[0],
        max_duration: durations[count - 1],
        mean_duration: total / count as u32,
        p95_duration: durations[rank.clamp(1, count) - 1],
        mean_memory_delta: samples.iter().map(|s| s.memory_delta() as f64).sum::<f64>() / count as f64,
        violations: samples.iter().filter(|s| !s.violations.is_empty()).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str, millis: u64) -> PerformanceSample {
        PerformanceSample {
            name: name.to_string(),
            duration: Duration::from_millis(millis),
            memory_before: 1_000,
            memory_after: 1_500,
            cpu_percent: 0.0,
            timestamp: Utc::now(),
            violations: Vec::new(),
        }
    }

    #[test]
    fn test_measure_returns_output_and_records() {
        let monitor = PerformanceMonitor::default();
        let value = monitor.measure("sum", || (1..=10).sum::<u32>());
        assert_eq!(value, 55);

        let history = monitor.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].name, "sum");
    }

    #[tokio::test]
    async fn test_measure_async_flags_slow_operations() {
        let monitor = PerformanceMonitor::new(PerformanceThresholds {
            max_duration: Duration::from_millis(1),
            max_memory_delta_bytes: u64::MAX,
            max_cpu_percent: f32::MAX,
        });

        let value = monitor
            .measure_async("sleep", async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                "done"
            })
            .await;
        assert_eq!(value, "done");

        let stats = monitor.statistics(Some("sleep"));
        assert_eq!(stats.count, 1);
        assert_eq!(stats.violations, 1);
        assert!(stats.min_duration >= Duration::from_millis(20));
    }

    #[test]
    fn test_statistics() {
        let monitor = PerformanceMonitor::default();
        for millis in 1..=20 {
            monitor.record(sample("op", millis));
        }
        monitor.record(sample("other", 500));

        let stats = monitor.statistics(Some("op"));
        assert_eq!(stats.count, 20);
        assert_eq!(stats.min_duration, Duration::from_millis(1));
        assert_eq!(stats.max_duration, Duration::from_millis(20));
        assert_eq!(stats.p95_duration, Duration::from_millis(19));
        assert_eq!(stats.mean_duration, Duration::from_micros(10_500));
        assert!((stats.mean_memory_delta - 500.0).abs() < f64::EPSILON);

        assert_eq!(monitor.statistics(None).count, 21);
        assert_eq!(monitor.statistics(Some("missing")), PerformanceStatistics::default());
    }

    #[test]
    fn test_history_is_bounded() {
        let monitor = PerformanceMonitor::with_history_size(PerformanceThresholds::default(), 3);
        for millis in 0..5 {
            monitor.record(sample("op", millis));
        }
        let history = monitor.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].duration, Duration::from_millis(2));

        monitor.clear();
        assert!(monitor.history().is_empty());
    }

    #[test]
    fn test_violation_display() {
        let violation = ThresholdViolation::Memory { actual: 10, limit: 5 };
        assert_eq!(violation.to_string(), "memory growth 10 bytes exceeds 5 bytes");
    }
}
