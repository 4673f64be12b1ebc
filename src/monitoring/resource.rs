//! Resource Usage Monitoring
//!
//! Samples CPU and memory of the engine process between task runs, each
//! sample labelled with the unit of work that just finished.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use log::warn;
use sysinfo::{get_current_pid, Pid, ProcessRefreshKind, System};

#[derive(Debug, Clone)]
pub struct ResourceSample {
    pub timestamp: Instant,
    /// What was running when the sample was taken
    pub label: String,
    /// CPU usage percentage (0-100+)
    pub cpu_usage: f32,
    pub memory_mb: u64,
}

/// Samples resource usage of the current process.
pub struct ResourceMonitor {
    system: System,
    process_id: Option<Pid>,
    samples: Vec<ResourceSample>,
    warmup_done: bool,
    last_sample: Option<Instant>,
    min_interval: Duration,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        let process_id = match get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("Resource monitoring disabled: {}", e);
                None
            }
        };

        Self {
            system: System::new(),
            process_id,
            samples: Vec::new(),
            warmup_done: false,
            last_sample: None,
            min_interval: Duration::from_millis(250),
        }
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Takes a sample, rate-limited by the minimum interval.
    ///
    /// The first call only primes the CPU counters.
    pub fn sample(&mut self, label: &str) {
        let Some(pid) = self.process_id else { return };
        let now = Instant::now();
        let refresh_kind = ProcessRefreshKind::new().with_cpu().with_memory();

        if !self.warmup_done {
            self.system.refresh_processes_specifics(refresh_kind);
            self.warmup_done = true;
            self.last_sample = Some(now);
            return;
        }

        if let Some(last) = self.last_sample {
            if now.duration_since(last) < self.min_interval {
                return;
            }
        }

        self.system.refresh_processes_specifics(refresh_kind);
        self.last_sample = Some(now);

        if let Some(process) = self.system.process(pid) {
            self.samples.push(ResourceSample {
                timestamp: now,
                label: label.to_string(),
                cpu_usage: process.cpu_usage(),
                memory_mb: process.memory() / (1024 * 1024),
            });
        }
    }

    pub fn get_samples(&self) -> &[ResourceSample] {
        &self.samples
    }

    pub fn peak_memory_mb(&self) -> u64 {
        self.samples.iter().map(|s| s.memory_mb).max().unwrap_or(0)
    }

    pub fn average_cpu(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.cpu_usage).sum::<f32>() / self.samples.len() as f32
    }

    /// Highest memory reading per label.
    pub fn peak_memory_by_label(&self) -> BTreeMap<String, u64> {
        let mut peaks: BTreeMap<String, u64> = BTreeMap::new();
        for sample in &self.samples {
            let peak = peaks.entry(sample.label.clone()).or_insert(0);
            *peak = (*peak).max(sample.memory_mb);
        }
        peaks
    }

    pub fn get_summary(&self) -> String {
        if self.samples.is_empty() {
            return "No resource data collected".to_string();
        }

        let min_memory = self.samples.iter().map(|s| s.memory_mb).min().unwrap_or(0);
        format!(
            "Resource Usage:\n  Average CPU: {:.1}%\n  Peak Memory: {} MB\n  Min Memory: {} MB\n  Samples: {}",
            self.average_cpu(),
            self.peak_memory_mb(),
            min_memory,
            self.samples.len()
        )
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_first_sample_is_warmup() {
        let mut monitor = ResourceMonitor::new();
        monitor.sample("warmup");
        assert!(monitor.get_samples().is_empty());
    }

    #[test]
    fn test_rate_limited_sampling() {
        let mut monitor = ResourceMonitor::new().with_min_interval(Duration::from_millis(200));
        monitor.sample("a");
        monitor.sample("a");
        assert!(monitor.get_samples().is_empty());

        thread::sleep(Duration::from_millis(250));
        monitor.sample("S#0 W:t1");
        assert_eq!(monitor.get_samples().len(), 1);
        assert_eq!(monitor.get_samples()[0].label, "S#0 W:t1");
        assert!(monitor.peak_memory_by_label().contains_key("S#0 W:t1"));
    }

    #[test]
    fn test_summary_format() {
        let mut monitor = ResourceMonitor::new().with_min_interval(Duration::from_millis(10));
        monitor.sample("x");
        thread::sleep(Duration::from_millis(20));
        monitor.sample("x");

        let summary = monitor.get_summary();
        assert!(summary.contains("Resource Usage"));
        assert!(summary.contains("Peak Memory"));
        assert!(monitor.average_cpu() >= 0.0);
    }

    #[test]
    fn test_empty_monitor() {
        let monitor = ResourceMonitor::default();
        assert_eq!(monitor.get_summary(), "No resource data collected");
        assert_eq!(monitor.peak_memory_mb(), 0);
        assert_eq!(monitor.average_cpu(), 0.0);
    }
}
