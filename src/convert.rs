//! Conversion of raw counts to engineering units.

use std::fmt;

use crate::error::ConfigError;
use crate::profile::ModelProfile;
use crate::range::ScalingParameter;
use crate::scan_list::{ChannelDescriptor, ChannelFunction};

/// Bias applied to rate and counter samples, which the instrument sends as
/// offset-binary.
const BIPOLAR_OFFSET: f64 = 32768.0;
const RATE_FULL_COUNTS: f64 = 65535.0;

/// Inline thermocouple fault reported instead of a temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSentinel {
    /// Cold-junction compensation fault (most positive count).
    ColdJunctionError,
    /// Open thermocouple (most negative count).
    OpenCircuit,
}

impl fmt::Display for ErrorSentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ColdJunctionError => f.write_str("cjc error"),
            Self::OpenCircuit => f.write_str("open"),
        }
    }
}

/// One converted value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Measurement {
    /// Volts.
    Voltage(f64),
    /// Degrees Celsius.
    Temperature(f64),
    /// Hertz.
    Rate(f64),
    /// Digital input bits.
    Digital(u16),
    /// Event count.
    Count(u32),
    /// Thermocouple fault.
    Sentinel(ErrorSentinel),
}

impl Measurement {
    /// Numeric value, if this is not a sentinel.
    pub fn value(&self) -> Option<f64> {
        match *self {
            Self::Voltage(v) | Self::Temperature(v) | Self::Rate(v) => Some(v),
            Self::Digital(bits) => Some(f64::from(bits)),
            Self::Count(count) => Some(f64::from(count)),
            Self::Sentinel(_) => None,
        }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Voltage(v) | Self::Temperature(v) => write!(f, "{v:.3}"),
            Self::Rate(hz) => write!(f, "{hz:.1}"),
            Self::Digital(bits) => write!(f, "{bits}"),
            Self::Count(count) => write!(f, "{count}"),
            Self::Sentinel(sentinel) => sentinel.fmt(f),
        }
    }
}

/// Applies per-function formulas for one model.
#[derive(Debug, Clone, Copy)]
pub struct UnitConverter {
    half_scale: f64,
    limits: (i32, i32),
    digital_mask: u16,
}

impl UnitConverter {
    /// Create a converter for a model.
    pub fn new(profile: ModelProfile) -> Self {
        Self {
            half_scale: profile.adc_half_scale(),
            limits: profile.adc_limits(),
            digital_mask: profile.digital_mask(),
        }
    }

    /// Convert a raw value, or the sum of `decimation_factor` raw values, for
    /// one channel.
    ///
    /// Digital and counter values are never summed; pass the latest sample.
    /// Fails when `scaling` was not resolved for the descriptor's function.
    pub fn convert(
        &self,
        descriptor: &ChannelDescriptor,
        scaling: &ScalingParameter,
        value_or_sum: i64,
        decimation_factor: u32,
    ) -> Result<Measurement, ConfigError> {
        let factor = f64::from(decimation_factor.max(1));
        let n = i64::from(decimation_factor.max(1));
        let value = value_or_sum as f64;

        let measurement = match (descriptor.function, scaling) {
            (ChannelFunction::Voltage, &ScalingParameter::FullScale(full_scale)) => {
                Measurement::Voltage(full_scale * value / self.half_scale / factor)
            }
            (
                ChannelFunction::Thermocouple,
                &ScalingParameter::Thermocouple { slope, offset, .. },
            ) => {
                let (max, min) = self.limits;
                if value_or_sum == i64::from(max) * n {
                    Measurement::Sentinel(ErrorSentinel::ColdJunctionError)
                } else if value_or_sum == i64::from(min) * n {
                    Measurement::Sentinel(ErrorSentinel::OpenCircuit)
                } else {
                    Measurement::Temperature(slope * value / factor + offset)
                }
            }
            (ChannelFunction::RateInput, &ScalingParameter::RateCeiling(ceiling)) => {
                let biased = value + BIPOLAR_OFFSET * factor;
                Measurement::Rate(biased / RATE_FULL_COUNTS * ceiling / factor)
            }
            (ChannelFunction::DigitalInput, ScalingParameter::None) => {
                Measurement::Digital((value_or_sum as u16) & self.digital_mask)
            }
            (ChannelFunction::CounterInput, ScalingParameter::None) => {
                Measurement::Count((value_or_sum + 32768).clamp(0, i64::from(u32::MAX)) as u32)
            }
            (function, _) => {
                return Err(ConfigError::ScalingMismatch {
                    code: descriptor.raw_code,
                    function,
                });
            }
        };
        Ok(measurement)
    }

    /// Wrap captured status bits as a measurement.
    pub fn status(&self, bits: u16) -> Measurement {
        Measurement::Digital(bits)
    }
}
