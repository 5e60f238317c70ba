//! Error types for configuration, transport and session handling.
//!
//! This module defines the error enums used across the crate. Using the
//! `thiserror` crate, each concern gets its own enum so callers can match on
//! exactly the failure class they care about:
//!
//! - **`ConfigError`**: structural problems with the scan list, gain codes or
//!   decimation settings. These are detected while building a session and are
//!   fatal before any byte is decoded.
//! - **`TransportError`**: failures of the serial link (I/O, timeouts, the
//!   instrument going away). Fatal to the running session; there is no
//!   automatic reconnect.
//! - **`DaqError`**: the crate-level error consolidating the above together with
//!   configuration-loading and plain I/O errors.
//!
//! Measurement-level error conditions (thermocouple open circuit, cold junction
//! fault) are *not* errors; they travel inline as
//! [`ErrorSentinel`](crate::convert::ErrorSentinel) values.

use thiserror::Error;

use crate::scan_list::ChannelFunction;

/// Convenience alias for results using the crate error type.
pub type DaqResult<T> = std::result::Result<T, DaqError>;

/// Scan list and acquisition configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The scan list has no entries.
    #[error("Scan list is empty: at least one channel is required")]
    Empty,

    /// The function bits of a channel code are not known to the model.
    #[error("Unknown channel function in code {code:#06x} at position {position} for model {model}")]
    UnknownFunction {
        /// Scan position of the offending entry.
        position: usize,
        /// Channel code as given.
        code: u16,
        /// Display name of the model.
        model: &'static str,
    },

    /// A voltage gain code maps to a reserved or undefined range.
    #[error("Reserved gain code {gain_code:#x} in channel code {code:#06x} at position {position}")]
    ReservedGainCode {
        /// Scan position of the offending entry.
        position: usize,
        /// Channel code as given.
        code: u16,
        /// Gain code extracted from the channel code.
        gain_code: u8,
    },

    /// A rate channel selects a range outside the twelve defined ranges.
    #[error("Rate range index {index} out of range [0, 11] in channel code {code:#06x} at position {position}")]
    RateIndexOutOfRange {
        /// Scan position of the offending entry.
        position: usize,
        /// Channel code as given.
        code: u16,
        /// Zero-based range index, `-1` for selector 0.
        index: i32,
    },

    /// A scaling parameter was paired with a channel of another function.
    #[error("Scaling for channel code {code:#06x} does not fit a {function} channel")]
    ScalingMismatch {
        /// Channel code of the descriptor.
        code: u16,
        /// Function the scaling was applied to.
        function: ChannelFunction,
    },

    /// The decimation factor must be strictly positive.
    #[error("Invalid decimation factor {0}: must be at least 1")]
    InvalidDecimation(u32),

    /// The model name in a configuration file is not recognised.
    #[error("Unknown instrument model '{0}'")]
    UnknownModel(String),

    /// Any other semantic problem with loaded settings.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised by the serial transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// I/O error from the underlying port.
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The port reported end-of-stream.
    #[error("Serial port closed by the instrument")]
    Closed,

    /// No response arrived within the configured timeout.
    #[error("Timed out after {timeout_ms} ms waiting for response to '{command}'")]
    Timeout {
        /// Command that went unanswered.
        command: String,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// No instrument with the expected vendor id was found.
    #[error("No DATAQ instrument found (looked for USB vendor id {vendor_id:#06x})")]
    NoDevice {
        /// USB vendor id searched for.
        vendor_id: u16,
    },

    /// Opening the port failed.
    #[error("Failed to open serial port '{path}': {message}")]
    Open {
        /// Port path.
        path: String,
        /// Reason reported by the OS.
        message: String,
    },

    /// Serial support was compiled out.
    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,
}

impl TransportError {
    /// Whether the port is gone for good (as opposed to a single slow reply).
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Closed => true,
            Self::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Crate-level error.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Scan list or acquisition settings are unusable.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The configuration file or environment could not be read.
    #[error("Failed to load settings: {0}")]
    Settings(#[from] Box<figment::Error>),

    /// The serial link failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Local I/O outside the serial link.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Settings(Box::new(err))
    }
}
