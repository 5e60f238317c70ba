//! # dataq_stream
//!
//! Configures DATAQ data-acquisition instruments over a serial link and
//! decodes their binary sample stream into calibrated engineering units.
//!
//! ## Crate Structure
//!
//! Decode core, leaves first:
//!
//! - **`profile`**: per-model constant bundles (word layout, gain and
//!   thermocouple tables, status bits, command vocabulary).
//! - **`scan_list`**: `ChannelDescriptor` and the ordered, immutable `ScanList`.
//! - **`range`**: `RangeResolver`, mapping gain/type codes to scaling parameters.
//! - **`demux`**: splits the byte stream into per-channel raw samples.
//! - **`decimation`**: sums raw values over N passes.
//! - **`convert`**: unit formulas and the inline `ErrorSentinel` values.
//! - **`frame`**: assembles `OutputRecord`s in scan order.
//! - **`decoder`**: `ScanDecoder`, the sans-IO pipeline tying the above together.
//!
//! Around it:
//!
//! - **`serial`**: port discovery, async serial ports, the text command link.
//! - **`session`**: handshake and the command-driven streaming loop.
//! - **`config`**: Figment-based TOML + environment configuration.
//! - **`logging`**: `tracing-subscriber` setup.
//! - **`error`**: `ConfigError`, `TransportError` and the crate-level `DaqError`.

pub mod config;
pub mod convert;
pub mod decimation;
pub mod decoder;
pub mod demux;
pub mod error;
pub mod frame;
pub mod logging;
pub mod profile;
pub mod range;
pub mod scan_list;
pub mod serial;
pub mod session;

pub use convert::{ErrorSentinel, Measurement};
pub use decoder::{DecoderOptions, ScanDecoder};
pub use error::{ConfigError, DaqError, DaqResult, TransportError};
pub use frame::OutputRecord;
pub use profile::ModelProfile;
pub use scan_list::{ChannelDescriptor, ChannelFunction, ScanList};
pub use session::{AcquisitionSession, SessionCommand, SessionConfig, SessionSummary};
