// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Runtime configuration.
//!
//! Everything the original firmware fixed at build time is an immutable
//! value here, assembled in `main` from the CLI plus an optional JSON5
//! overrides file, validated once, then passed by reference. Workers
//! resolve the flags into their setup at start; nothing re-reads
//! configuration on the hot path.

use crate::profile::Topology;
use crate::rate::DEFAULT_WINDOW_NS;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {0}: {1}")]
    Io(String, String),

    #[error("cannot parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Feature switches, fixed for a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FeatureFlags {
    /// One frame per VL-ID per window instead of smooth byte pacing.
    pub window_pacing: bool,
    /// Run the latency sub-test before steady state.
    pub latency_test: bool,
    /// IMIX size mixing instead of fixed maximum frames.
    pub imix: bool,
    /// Byte-rate shaping; off means frames leave as fast as queues accept.
    pub rate_limiter: bool,
    pub ptp: bool,
    pub health_monitor: bool,
    /// 34-row DTN view; off selects the legacy per-server-port table.
    pub dtn_stats: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            window_pacing: false,
            latency_test: false,
            imix: false,
            rate_limiter: true,
            ptp: true,
            health_monitor: true,
            dtn_stats: true,
        }
    }
}

/// Kernel interface assignment for one poll-mode port.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortInterface {
    pub port: u16,
    pub name: String,
}

/// Complete run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub topology: Topology,
    pub features: FeatureFlags,
    /// TX workers (and queues) per poll-mode port.
    pub tx_queues: usize,
    /// RX workers (and queues) per poll-mode port.
    pub rx_queues: usize,
    /// Per-class port targets in Gbps.
    pub gbps_fast: f64,
    pub gbps_mid: f64,
    pub gbps_slow: f64,
    /// Window length for window pacing, nanoseconds.
    pub window_ns: u64,
    /// Fixed frame length when IMIX is off.
    pub frame_len: usize,
    pub warmup_secs: u64,
    pub stats_interval_secs: u64,
    /// Steady-state duration; 0 runs until SIGINT.
    pub duration_secs: u64,
    /// Log-file friendly output (no ANSI screen clearing).
    pub daemon: bool,
    /// Wire poll-mode ports through in-memory rings instead of interfaces;
    /// bench self-test without hardware.
    pub loopback: bool,
    /// Poll-mode port → kernel interface, ignored in loopback mode.
    pub interfaces: Vec<PortInterface>,
    pub latency_probes: u32,
    pub latency_timeout_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            topology: Topology::Normal,
            features: FeatureFlags::default(),
            tx_queues: 2,
            rx_queues: 4,
            gbps_fast: 3.6,
            gbps_mid: 3.4,
            gbps_slow: 3.4,
            window_ns: DEFAULT_WINDOW_NS,
            frame_len: crate::MAX_FRAME_LEN,
            warmup_secs: 120,
            stats_interval_secs: 1,
            duration_secs: 0,
            daemon: false,
            loopback: false,
            interfaces: Vec::new(),
            latency_probes: 1,
            latency_timeout_secs: 5,
        }
    }
}

impl RunConfig {
    /// Load overrides from a JSON5 file on top of the defaults.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e.to_string()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = json5::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize for `--config` files. The json5 crate has no pretty
    /// printer, so output goes through serde_json (valid JSON5 input).
    pub fn to_json5(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_json5())
            .map_err(|e| ConfigError::Io(path.display().to_string(), e.to_string()))
    }

    /// Kernel interface assigned to a poll-mode port, if any.
    pub fn interface_for(&self, port: u16) -> Option<&str> {
        self.interfaces
            .iter()
            .find(|i| i.port == port)
            .map(|i| i.name.as_str())
    }

    /// Per-class target rate in Mbps for one of a port's four flows.
    pub fn flow_rate_mbps(&self, class: crate::profile::PortClass) -> u32 {
        let gbps = match class {
            crate::profile::PortClass::Fast => self.gbps_fast,
            crate::profile::PortClass::Mid => self.gbps_mid,
            crate::profile::PortClass::Slow => self.gbps_slow,
        };
        (gbps * 1000.0 / crate::profile::FLOWS_PER_PORT as f64) as u32
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tx_queues == 0 || self.tx_queues > 8 {
            return Err(ConfigError::Invalid(format!(
                "tx_queues must be 1..=8, got {}",
                self.tx_queues
            )));
        }
        if self.rx_queues == 0 || self.rx_queues > 8 {
            return Err(ConfigError::Invalid(format!(
                "rx_queues must be 1..=8, got {}",
                self.rx_queues
            )));
        }
        if self.features.rate_limiter
            && !self.features.window_pacing
            && (self.gbps_fast <= 0.0 || self.gbps_mid <= 0.0 || self.gbps_slow <= 0.0)
        {
            return Err(ConfigError::Invalid(
                "per-class rates must be positive with the limiter enabled".into(),
            ));
        }
        if self.frame_len < crate::packet::min_stamped_len(true)
            || self.frame_len > crate::MAX_FRAME_LEN
        {
            return Err(ConfigError::Invalid(format!(
                "frame_len must be {}..={}, got {}",
                crate::packet::min_stamped_len(true),
                crate::MAX_FRAME_LEN,
                self.frame_len
            )));
        }
        if self.features.window_pacing && self.window_ns == 0 {
            return Err(ConfigError::Invalid("window_ns must be non-zero".into()));
        }
        if self.stats_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "stats_interval_secs must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::PortClass;

    #[test]
    fn defaults_validate() {
        RunConfig::default().validate().unwrap();
    }

    #[test]
    fn parse_json5_overrides() {
        let config = RunConfig::parse(
            r#"{
                // bench run: short warm-up, loopback wiring
                topology: "Ate",
                warmup_secs: 5,
                loopback: true,
                features: { imix: true, ptp: false },
            }"#,
        )
        .unwrap();
        assert_eq!(config.topology, Topology::Ate);
        assert_eq!(config.warmup_secs, 5);
        assert!(config.loopback);
        assert!(config.features.imix);
        assert!(!config.features.ptp);
        // Unmentioned fields keep their defaults.
        assert!(config.features.rate_limiter);
        assert_eq!(config.tx_queues, 2);
    }

    #[test]
    fn rejects_bad_queue_counts() {
        let mut config = RunConfig::default();
        config.tx_queues = 0;
        assert!(config.validate().is_err());
        config.tx_queues = 9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_rate_with_limiter() {
        let mut config = RunConfig::default();
        config.gbps_mid = 0.0;
        assert!(config.validate().is_err());
        // Without the limiter the rates are unused.
        config.features.rate_limiter = false;
        config.validate().unwrap();
    }

    #[test]
    fn rejects_undersized_frames() {
        let mut config = RunConfig::default();
        config.frame_len = 40;
        assert!(config.validate().is_err());
    }

    #[test]
    fn flow_rate_splits_port_target() {
        let config = RunConfig::default();
        assert_eq!(config.flow_rate_mbps(PortClass::Fast), 900);
        assert_eq!(config.flow_rate_mbps(PortClass::Mid), 850);
        assert_eq!(config.flow_rate_mbps(PortClass::Slow), 850);
    }

    #[test]
    fn load_from_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json5");
        std::fs::write(&path, r#"{ duration_secs: 30, daemon: true }"#).unwrap();
        let config = RunConfig::load_from_file(&path).unwrap();
        assert_eq!(config.duration_secs, 30);
        assert!(config.daemon);
    }

    #[test]
    fn save_and_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.json5");
        let mut config = RunConfig::default();
        config.topology = Topology::Ate;
        config.features.imix = true;
        config.save_to_file(&path).unwrap();
        let reloaded = RunConfig::load_from_file(&path).unwrap();
        assert_eq!(reloaded.topology, Topology::Ate);
        assert!(reloaded.features.imix);
    }

    #[test]
    fn missing_file_reports_io_error() {
        let err = RunConfig::load_from_file(Path::new("/nonexistent/x.json5")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_, _)));
    }
}
