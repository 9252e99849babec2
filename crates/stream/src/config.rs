use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Paging policy knobs that do not change per tick.
///
/// Intervals are stored as seconds so the JSON form stays readable; use the
/// `Duration` accessors in code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingConfig {
    /// Minimum gap between visibility range and page-out distance.
    pub page_out_margin: f32,
    /// Seconds between queue re-sorts.
    pub reprioritize_interval: f64,
    /// Seconds between eviction/dequeue passes.
    pub cleanup_interval: f64,
    /// Seconds between construction bursts.
    pub load_interval: f64,
    /// Entries constructed per load burst while the camera moves.
    pub burst_moving: usize,
    /// Entries constructed per load burst while the camera is still.
    pub burst_idle: usize,
    /// Added to the priority distance of entries behind the camera.
    pub behind_penalty: f32,
    /// Number of paging-call durations kept for latency stats.
    pub latency_window: usize,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            page_out_margin: 50.0,
            reprioritize_interval: 1.0,
            cleanup_interval: 0.25,
            load_interval: 0.01,
            burst_moving: 1,
            burst_idle: 5,
            behind_penalty: 1.0e5,
            latency_window: 64,
        }
    }
}

impl PagingConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path.as_ref())?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.page_out_margin.is_finite() && self.page_out_margin >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "page_out_margin must be non-negative, got {}",
                self.page_out_margin
            )));
        }
        for (name, secs) in [
            ("reprioritize_interval", self.reprioritize_interval),
            ("cleanup_interval", self.cleanup_interval),
            ("load_interval", self.load_interval),
        ] {
            if !(secs.is_finite() && secs >= 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be non-negative seconds, got {secs}"
                )));
            }
        }
        if self.burst_moving == 0 || self.burst_idle == 0 {
            return Err(ConfigError::Invalid("burst sizes must be at least 1".into()));
        }
        if self.latency_window == 0 {
            return Err(ConfigError::Invalid("latency_window must be at least 1".into()));
        }
        Ok(())
    }

    pub fn reprioritize_every(&self) -> Duration {
        Duration::from_secs_f64(self.reprioritize_interval)
    }

    pub fn cleanup_every(&self) -> Duration {
        Duration::from_secs_f64(self.cleanup_interval)
    }

    pub fn load_every(&self) -> Duration {
        Duration::from_secs_f64(self.load_interval)
    }
}
