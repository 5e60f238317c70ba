//! Configuration loading using Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `DATAQ_`, nested keys separated by a
//!    double underscore (`DATAQ_DEVICE__PORT=/dev/ttyACM1`)
//!
//! # Example
//! ```no_run
//! use dataq_stream::config::DataqConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DataqConfig::load_from("config/dataq.toml")?;
//! config.validate()?;
//! println!("Model: {}", config.device.model);
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::decoder::{DecoderOptions, ScanDecoder};
use crate::error::{ConfigError, DaqResult};
use crate::logging::{parse_log_level, OutputFormat};
use crate::profile::{ModelProfile, DEFAULT_BAUD_RATE};
use crate::range::GainPolicy;
use crate::scan_list::ScanList;
use crate::session::SessionConfig;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "DATAQ_";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataqConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Instrument connection
    pub device: DeviceConfig,
    /// Scan list and decoding
    pub acquisition: AcquisitionConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
        }
    }
}

/// Instrument connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Instrument model
    pub model: ModelProfile,
    /// Serial port path; discovered by USB vendor id when absent
    #[serde(default)]
    pub port: Option<String>,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Command echo timeout in milliseconds
    #[serde(default = "default_response_timeout")]
    pub response_timeout_ms: u64,
    /// Quiet period used to drain the port after stop, in milliseconds
    #[serde(default = "default_settle")]
    pub settle_ms: u64,
}

/// Scan list and decoding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Channel codes in scan order
    pub scan_list: Vec<u16>,
    /// Passes averaged into one record
    #[serde(default = "default_decimation")]
    pub decimation_factor: u32,
    /// Reject reserved gain codes instead of scaling them to zero
    #[serde(default = "default_strict")]
    pub strict_gain_codes: bool,
    /// Enable the trailing digital status word (DI-245)
    #[serde(default)]
    pub digital_inputs: bool,
    /// Sample rate commands overriding the model defaults
    #[serde(default)]
    pub rate_commands: Option<Vec<String>>,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_response_timeout() -> u64 {
    1000
}

fn default_settle() -> u64 {
    100
}

fn default_decimation() -> u32 {
    1
}

fn default_strict() -> bool {
    true
}

impl DataqConfig {
    /// Load configuration from a TOML file and environment variables.
    pub fn load_from<P: AsRef<Path>>(path: P) -> DaqResult<Self> {
        Ok(Self::figment(Toml::file(path.as_ref())).extract()?)
    }

    /// Load configuration from TOML text and environment variables.
    pub fn from_toml_str(toml: &str) -> DaqResult<Self> {
        Ok(Self::figment(Toml::string(toml)).extract()?)
    }

    fn figment(base: figment::providers::Data<Toml>) -> Figment {
        Figment::new()
            .merge(base)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading.
    ///
    /// Builds the scan list and resolves every channel so all configuration
    /// errors surface before the port is touched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_log_level(&self.application.log_level).map_err(ConfigError::Invalid)?;

        if self.device.baud_rate == 0 {
            return Err(ConfigError::Invalid("baud_rate must be positive".to_string()));
        }
        if self.device.response_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "response_timeout_ms must be positive".to_string(),
            ));
        }
        if let Some(commands) = &self.acquisition.rate_commands {
            if commands.iter().any(|c| c.trim().is_empty()) {
                return Err(ConfigError::Invalid(
                    "rate_commands must not contain empty commands".to_string(),
                ));
            }
        }

        ScanDecoder::new(self.scan_list()?, self.decoder_options())?;
        Ok(())
    }

    /// Scan list for the configured model.
    pub fn scan_list(&self) -> Result<ScanList, ConfigError> {
        ScanList::build(&self.acquisition.scan_list, self.device.model)
    }

    /// Decoder options from the acquisition section.
    pub fn decoder_options(&self) -> DecoderOptions {
        let policy = if self.acquisition.strict_gain_codes {
            GainPolicy::Strict
        } else {
            GainPolicy::Lenient
        };
        DecoderOptions::default()
            .decimation(self.acquisition.decimation_factor)
            .gain_policy(policy)
            .digital_inputs(self.acquisition.digital_inputs)
    }

    /// Session settings derived from this configuration.
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let mut session = SessionConfig::new(self.scan_list()?)
            .options(self.decoder_options())
            .response_timeout(Duration::from_millis(self.device.response_timeout_ms))
            .settle_ms(self.device.settle_ms);
        if let Some(commands) = &self.acquisition.rate_commands {
            session = session.rate_commands(commands.clone());
        }
        Ok(session)
    }
}
