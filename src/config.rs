//! ==============================================================================
//! config.rs - fleet configuration loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `fleet.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - NodeConfig: how to reach a sensor node (port, basic auth, tls policy).
//!     - TimeoutConfig: per-phase request timeouts (probe, gather, fetch).
//!     - ExportConfig: memory threshold and spool location for bundles.
//!     - AddressBookConfig: where address lists live and how many slots they have.
//!     - LoggingConfig: default log level when RUST_LOG is not set.
//!
//! every section is optional; a missing key takes its default value.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sysinfo::System;

use crate::address::DEFAULT_PORT;

/// headroom left free when the memory threshold is derived from the system
const MEMORY_MARGIN_BYTES: u64 = 25 * 1024 * 1024;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct FleetConfig {
    pub node: NodeConfig,
    pub timeouts: TimeoutConfig,
    pub export: ExportConfig,
    pub address_book: AddressBookConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NodeConfig {
    pub default_port: u16,
    pub username: String,
    pub password: String,
    /// sensor nodes ship self-signed certificates
    pub accept_invalid_certs: bool,
}

/// all values in seconds
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TimeoutConfig {
    pub probe: f64,
    pub clean: f64,
    pub gather: f64,
    pub readings: f64,
    pub fetch_connect: f64,
    pub fetch: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExportConfig {
    /// bundles estimated below this stay in memory; None = derive from free ram
    pub memory_threshold_mb: Option<u64>,
    pub spool_dir: PathBuf,
    pub size_attempts: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AddressBookConfig {
    pub directory: PathBuf,
    pub slots: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            default_port: DEFAULT_PORT,
            username: "Kootnet".to_string(),
            password: "sensors".to_string(),
            accept_invalid_certs: true,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            probe: 5.0,
            clean: 4.0,
            gather: 10.0,
            readings: 20.0,
            fetch_connect: 10.0,
            fetch: 600.0,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            memory_threshold_mb: None,
            spool_dir: PathBuf::from("spool"),
            size_attempts: 3,
        }
    }
}

impl Default for AddressBookConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("address_lists"),
            slots: 20,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

fn seconds(value: f64) -> Duration {
    // negative or nan values from a hand-edited file collapse to zero
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl TimeoutConfig {
    pub fn probe(&self) -> Duration {
        seconds(self.probe)
    }

    pub fn clean(&self) -> Duration {
        seconds(self.clean)
    }

    pub fn gather(&self) -> Duration {
        seconds(self.gather)
    }

    pub fn readings(&self) -> Duration {
        seconds(self.readings)
    }

    pub fn fetch_connect(&self) -> Duration {
        seconds(self.fetch_connect)
    }

    pub fn fetch(&self) -> Duration {
        seconds(self.fetch)
    }
}

impl ExportConfig {
    /// size (bytes) below which an export bundle is assembled in memory
    pub fn memory_threshold_bytes(&self) -> u64 {
        match self.memory_threshold_mb {
            Some(mb) => mb.saturating_mul(1024 * 1024),
            None => {
                let mut system = System::new();
                system.refresh_memory();
                system.available_memory().saturating_sub(MEMORY_MARGIN_BYTES)
            }
        }
    }
}

impl FleetConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let config: FleetConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        Ok(config)
    }

    /// Load with default fallback
    ///
    /// runs before logging is set up, so it reports on stderr.
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("fleet.toml"),
            PathBuf::from("..").join("config").join("fleet.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        eprintln!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        eprintln!("[CONFIG] Warning: Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        eprintln!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        let threshold = match self.export.memory_threshold_mb {
            Some(mb) => format!("{} MB", mb),
            None => "available memory".to_string(),
        };
        tracing::info!("[CONFIG] default port: {}", self.node.default_port);
        tracing::info!(
            "[CONFIG] timeouts: probe {}s, gather {}s, fetch {}s",
            self.timeouts.probe,
            self.timeouts.gather,
            self.timeouts.fetch
        );
        tracing::info!("[CONFIG] export memory threshold: {}", threshold);
        tracing::info!("[CONFIG] spool dir: {}", self.export.spool_dir.display());
        tracing::info!(
            "[CONFIG] address lists: {} ({} slots)",
            self.address_book.directory.display(),
            self.address_book.slots
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: FleetConfig = toml::from_str("").unwrap();
        assert_eq!(config.node.default_port, 10065);
        assert_eq!(config.timeouts.clean(), Duration::from_secs(4));
        assert_eq!(config.address_book.slots, 20);
        assert_eq!(config.export.size_attempts, 3);
    }

    #[test]
    fn partial_sections_override() {
        let config: FleetConfig = toml::from_str(
            r#"
            [timeouts]
            probe = 1.5

            [export]
            memory_threshold_mb = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.timeouts.probe(), Duration::from_millis(1500));
        assert_eq!(config.timeouts.gather(), Duration::from_secs(10));
        assert_eq!(config.export.memory_threshold_bytes(), 500 * 1024 * 1024);
    }

    #[test]
    fn negative_timeout_is_zero() {
        let timeouts = TimeoutConfig { probe: -1.0, ..TimeoutConfig::default() };
        assert_eq!(timeouts.probe(), Duration::ZERO);
    }
}
