//! Memory pressure detection for the run loop.
//!
//! The monitor reads the process's physical memory and compares it against
//! `ceiling * watermark`. The run loop consults it at every chunk boundary:
//! above the watermark it sleeps and re-checks a bounded number of times, and
//! a run that never gets headroom back is stopped early as partial rather
//! than pushed into the hard ceiling.

use std::time::Duration;

use log::{info, warn};

use crate::config::Config;

type Probe = Box<dyn Fn() -> Option<usize> + Send + Sync>;

pub struct MemoryMonitor {
    threshold_bytes: usize,
    backoff_checks: u32,
    backoff: Duration,
    probe: Probe,
}

impl MemoryMonitor {
    /// Monitor backed by the process RSS readout.
    pub fn from_config(config: &Config) -> Self {
        Self::with_probe(
            config,
            Box::new(|| memory_stats::memory_stats().map(|usage| usage.physical_mem)),
        )
    }

    /// Same thresholds with a caller-supplied probe.
    pub fn with_probe(config: &Config, probe: Probe) -> Self {
        let ceiling = config.memory_ceiling_mb.saturating_mul(1024 * 1024);
        MemoryMonitor {
            threshold_bytes: (ceiling as f64 * config.memory_watermark as f64) as usize,
            backoff_checks: config.memory_backoff_checks,
            backoff: config.memory_backoff,
            probe,
        }
    }

    /// Whether the process currently sits above the watermark. An unreadable
    /// probe counts as headroom.
    pub fn over_watermark(&self) -> bool {
        (self.probe)().is_some_and(|rss| rss > self.threshold_bytes)
    }

    /// Sleeps until the process drops below the watermark, giving up after
    /// the configured number of backoff checks. Returns `false` when the
    /// pressure never cleared.
    pub async fn wait_for_headroom(&self) -> bool {
        if !self.over_watermark() {
            return true;
        }
        warn!(
            "memory above the {} MiB watermark; backing off",
            self.threshold_bytes / (1024 * 1024)
        );
        for check in 1..=self.backoff_checks {
            tokio::time::sleep(self.backoff).await;
            if !self.over_watermark() {
                info!("memory settled after {check} backoff sleep(s)");
                return true;
            }
        }
        false
    }
}
