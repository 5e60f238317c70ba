//! Scaling parameters resolved from channel codes.

use crate::error::ConfigError;
use crate::profile::{ModelProfile, ThermocoupleType, RATE_RANGES};
use crate::scan_list::{ChannelDescriptor, ChannelFunction, ScanList};

/// Per-channel constant used by the unit converter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalingParameter {
    /// Full-scale voltage of a ±range input.
    FullScale(f64),
    /// Thermocouple linearization.
    Thermocouple {
        /// Type the constants belong to.
        tc_type: ThermocoupleType,
        /// °C per count.
        slope: f64,
        /// °C at zero counts.
        offset: f64,
    },
    /// Upper end of a rate input range, in Hz.
    RateCeiling(f64),
    /// Digital and counter inputs carry no scaling.
    None,
}

/// How reserved gain codes are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GainPolicy {
    /// Reject reserved codes at setup.
    #[default]
    Strict,
    /// Accept them with a zero full scale, as older host software did.
    Lenient,
}

/// Resolves scan list entries to scaling parameters for one model.
#[derive(Debug, Clone, Copy)]
pub struct RangeResolver {
    profile: ModelProfile,
    policy: GainPolicy,
}

impl RangeResolver {
    /// Create a resolver.
    pub fn new(profile: ModelProfile, policy: GainPolicy) -> Self {
        Self { profile, policy }
    }

    /// Resolve the scaling parameter of one descriptor.
    pub fn resolve(
        &self,
        position: usize,
        descriptor: &ChannelDescriptor,
    ) -> Result<ScalingParameter, ConfigError> {
        match descriptor.function {
            ChannelFunction::Voltage => {
                let gain_code = descriptor.gain_or_type_index;
                let full_scale = self
                    .profile
                    .gain_table()
                    .get(usize::from(gain_code))
                    .copied()
                    .unwrap_or(0.0);

                if full_scale == 0.0 && self.policy == GainPolicy::Strict {
                    return Err(ConfigError::ReservedGainCode {
                        position,
                        code: descriptor.raw_code,
                        gain_code,
                    });
                }
                if full_scale == 0.0 {
                    tracing::warn!(
                        position,
                        code = descriptor.raw_code,
                        "Reserved gain code accepted with zero full scale"
                    );
                }
                Ok(ScalingParameter::FullScale(full_scale))
            }
            ChannelFunction::Thermocouple => {
                let table = self.profile.thermocouple_table().ok_or(
                    ConfigError::UnknownFunction {
                        position,
                        code: descriptor.raw_code,
                        model: self.profile.name(),
                    },
                )?;
                let tc_type = ThermocoupleType::from_code(descriptor.gain_or_type_index);
                let (slope, offset) = table.constants(tc_type);
                Ok(ScalingParameter::Thermocouple {
                    tc_type,
                    slope,
                    offset,
                })
            }
            ChannelFunction::RateInput => {
                let index = i32::from(descriptor.gain_or_type_index) - 1;
                usize::try_from(index)
                    .ok()
                    .and_then(|i| RATE_RANGES.get(i))
                    .map(|&ceiling| ScalingParameter::RateCeiling(ceiling))
                    .ok_or(ConfigError::RateIndexOutOfRange {
                        position,
                        code: descriptor.raw_code,
                        index,
                    })
            }
            ChannelFunction::DigitalInput | ChannelFunction::CounterInput => {
                Ok(ScalingParameter::None)
            }
        }
    }

    /// Resolve every entry of a scan list, in order.
    pub fn resolve_all(&self, scan_list: &ScanList) -> Result<Vec<ScalingParameter>, ConfigError> {
        scan_list
            .iter()
            .enumerate()
            .map(|(position, descriptor)| self.resolve(position, descriptor))
            .collect()
    }
}
