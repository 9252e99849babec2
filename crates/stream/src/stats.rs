use std::collections::VecDeque;
use std::time::Duration;

use crate::scheduler::{PagingReport, Phase};

/// Running totals across every paging call since setup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PagingStats {
    pub ticks: u64,
    pub reprioritize_passes: u64,
    pub cleanup_passes: u64,
    pub load_passes: u64,
    /// Load passes that used the idle burst size.
    pub idle_bursts: u64,
    pub constructed: u64,
    pub construct_failures: u64,
    pub evicted: u64,
    pub dequeued: u64,
}

impl PagingStats {
    pub(crate) fn absorb(&mut self, report: &PagingReport) {
        self.ticks += 1;
        match report.phase {
            Some(Phase::Reprioritize) => self.reprioritize_passes += 1,
            Some(Phase::Cleanup) => self.cleanup_passes += 1,
            Some(Phase::Load) => {
                self.load_passes += 1;
                if report.idle {
                    self.idle_bursts += 1;
                }
            }
            None => {}
        }
        self.constructed += report.constructed as u64;
        self.construct_failures += report.failed as u64;
        self.evicted += report.evicted as u64;
        self.dequeued += report.dequeued as u64;
    }
}

impl std::fmt::Display for PagingStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ticks={} sorts={} cleanups={} loads={} (idle {}) built={} failed={} evicted={} dequeued={}",
            self.ticks,
            self.reprioritize_passes,
            self.cleanup_passes,
            self.load_passes,
            self.idle_bursts,
            self.constructed,
            self.construct_failures,
            self.evicted,
            self.dequeued
        )
    }
}

/// Rolling window of paging-call durations.
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl LatencyWindow {
    /// A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, dt: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(dt);
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn last(&self) -> Option<Duration> {
        self.samples.back().copied()
    }

    pub fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        self.samples.iter().sum::<Duration>() / self.samples.len() as u32
    }

    pub fn max(&self) -> Duration {
        self.samples.iter().copied().max().unwrap_or(Duration::ZERO)
    }

    pub fn min(&self) -> Duration {
        self.samples.iter().copied().min().unwrap_or(Duration::ZERO)
    }
}
