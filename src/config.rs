//! Configuration loading using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (`config/lecroy.toml` by default)
//! 2. environment variables prefixed with `LECROY_DAQ_`, with `__` separating
//!    nested keys (e.g. `LECROY_DAQ_CONNECTION__TIMEOUT_MS=2000`)
//!
//! Every section has defaults, so an absent file yields a mock-transport
//! configuration with the default settings tree.
//!
//! # Example
//! ```no_run
//! use lecroy_daq::config::LecroyConfig;
//!
//! let config = LecroyConfig::load()?;
//! config.validate().map_err(lecroy_daq::error::DsoError::Configuration)?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), lecroy_daq::error::DsoError>(())
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::acquisition::TimeAxisFetch;
use crate::driver::scpi::{DEFAULT_PORT, DEFAULT_TIMEOUT_MS};
use crate::error::DsoResult;
use crate::settings::SettingsConfig;

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "config/lecroy.toml";

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "LECROY_DAQ_";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LecroyConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// How to reach the oscilloscope
    pub connection: ConnectionConfig,
    /// Acquisition loop settings
    pub acquisition: AcquisitionConfig,
    /// Initial values of the settings tree
    pub settings: SettingsConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "LeCroy DAQ".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Instrument connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Transport used to reach the instrument
    pub transport: TransportConfig,
    /// Command I/O timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// Instrument transport
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// In-process mock oscilloscope
    #[default]
    Mock,
    /// VICP over TCP
    Tcp {
        /// Host name or address
        host: String,
        /// TCP port
        #[serde(default = "default_port")]
        port: u16,
    },
    /// VISA resource (requires feature `instrument_visa`)
    Visa {
        /// Resource string; the first discovered resource when absent
        #[serde(default)]
        resource: Option<String>,
    },
}

/// Acquisition loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Bound on each waveform fetch in milliseconds
    pub timeout_ms: u64,
    /// How channels obtain their time axis
    pub time_axis: TimeAxisFetch,
    /// Name attached to every acquisition result
    pub result_name: String,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_acquisition_timeout(),
            time_axis: TimeAxisFetch::default(),
            result_name: "lecroy".to_string(),
        }
    }
}

impl AcquisitionConfig {
    /// Fetch timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// Default value functions
fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_acquisition_timeout() -> u64 {
    10_000
}

impl LecroyConfig {
    /// Load configuration from the default file and environment variables
    pub fn load() -> DsoResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> DsoResult<Self> {
        let config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if let TransportConfig::Tcp { host, port } = &self.connection.transport {
            if host.trim().is_empty() {
                return Err("TCP transport requires a host".to_string());
            }
            if *port == 0 {
                return Err("TCP transport port must be non-zero".to_string());
            }
        }

        if self.connection.timeout_ms == 0 {
            return Err("connection.timeout_ms must be positive".to_string());
        }
        if self.acquisition.timeout_ms == 0 {
            return Err("acquisition.timeout_ms must be positive".to_string());
        }

        self.settings.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = LecroyConfig::load_from("does/not/exist.toml").unwrap();
        assert_eq!(config.connection.transport, TransportConfig::Mock);
        assert_eq!(config.settings.memory_size, "10K");
        assert_eq!(config.acquisition.time_axis, TimeAxisFetch::SharedFromFirst);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn loads_tcp_transport_and_settings() {
        let file = write_config(
            r#"
            [application]
            log_level = "debug"

            [connection]
            timeout_ms = 2500

            [connection.transport]
            type = "tcp"
            host = "192.168.0.42"

            [acquisition]
            time_axis = "per_channel_by_position"

            [settings]
            memory_size = "25K"
            number_of_segments = 4
            trigger_source = "C2"
            "#,
        );

        let config = LecroyConfig::load_from(file.path()).unwrap();
        assert_eq!(
            config.connection.transport,
            TransportConfig::Tcp {
                host: "192.168.0.42".into(),
                port: DEFAULT_PORT,
            }
        );
        assert_eq!(config.connection.timeout_ms, 2500);
        assert_eq!(
            config.acquisition.time_axis,
            TimeAxisFetch::PerChannelByPosition
        );
        assert_eq!(config.settings.memory_size, "25K");
        assert_eq!(config.settings.number_of_segments, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn visa_resource_is_optional() {
        let file = write_config(
            r#"
            [connection.transport]
            type = "visa"
            "#,
        );
        let config = LecroyConfig::load_from(file.path()).unwrap();
        assert_eq!(
            config.connection.transport,
            TransportConfig::Visa { resource: None }
        );
    }

    #[test]
    fn env_overrides_file() {
        let file = write_config(
            r#"
            [acquisition]
            result_name = "from-file"
            "#,
        );
        std::env::set_var("LECROY_DAQ_ACQUISITION__RESULT_NAME", "from-env");
        let config = LecroyConfig::load_from(file.path());
        std::env::remove_var("LECROY_DAQ_ACQUISITION__RESULT_NAME");

        assert_eq!(config.unwrap().acquisition.result_name, "from-env");
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = LecroyConfig::default();
        config.application.log_level = "verbose".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_tcp_endpoint() {
        let mut config = LecroyConfig::default();
        config.connection.transport = TransportConfig::Tcp {
            host: " ".into(),
            port: 1861,
        };
        assert!(config.validate().is_err());

        config.connection.transport = TransportConfig::Tcp {
            host: "scope".into(),
            port: 0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_settings_propagate() {
        let mut config = LecroyConfig::default();
        config.settings.time_division = "3NS".into();
        assert!(config.validate().is_err());
    }
}
