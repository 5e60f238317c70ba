//! Channel descriptors and the scan list.
//!
//! The scan list is the ordered set of 16-bit channel codes registered with the
//! instrument. Its order is the order in which samples arrive on the wire, so
//! once built it never changes for the lifetime of an acquisition.

use std::fmt;

use crate::error::ConfigError;
use crate::profile::{FunctionDecode, ModelProfile};

/// Bit that turns an analog input code into a thermocouple code.
const MODE_BIT: u16 = 0x1000;

/// Measurement function of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelFunction {
    /// Analog voltage input.
    Voltage,
    /// Thermocouple input, linearized to °C.
    Thermocouple,
    /// Digital input port.
    DigitalInput,
    /// Frequency (rate) input.
    RateInput,
    /// Event counter input.
    CounterInput,
}

impl ChannelFunction {
    /// Whether values of this function are summed over a decimation cycle.
    pub fn accumulates(self) -> bool {
        matches!(self, Self::Voltage | Self::Thermocouple | Self::RateInput)
    }
}

impl fmt::Display for ChannelFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Voltage => "voltage",
            Self::Thermocouple => "thermocouple",
            Self::DigitalInput => "digital",
            Self::RateInput => "rate",
            Self::CounterInput => "counter",
        };
        f.write_str(name)
    }
}

/// One scan list entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelDescriptor {
    /// Configuration word as sent to the instrument.
    pub raw_code: u16,
    /// Decoded measurement function.
    pub function: ChannelFunction,
    /// Gain code, thermocouple type or rate range selector.
    pub gain_or_type_index: u8,
}

impl ChannelDescriptor {
    /// Decode a channel code for the given model.
    pub fn decode(
        position: usize,
        raw_code: u16,
        profile: ModelProfile,
    ) -> Result<Self, ConfigError> {
        let nibble = raw_code & 0x000f;
        let thermocouple = raw_code & MODE_BIT != 0;
        let unknown = || ConfigError::UnknownFunction {
            position,
            code: raw_code,
            model: profile.name(),
        };
        if thermocouple && profile.thermocouple_table().is_none() {
            return Err(unknown());
        }

        let function = match profile.function_decode() {
            FunctionDecode::NibbleWithMode => match nibble {
                0..=7 if thermocouple => ChannelFunction::Thermocouple,
                0..=7 => ChannelFunction::Voltage,
                8 => ChannelFunction::DigitalInput,
                9 => ChannelFunction::RateInput,
                10 => ChannelFunction::CounterInput,
                _ => return Err(unknown()),
            },
            FunctionDecode::ModeBitOnly if thermocouple => ChannelFunction::Thermocouple,
            FunctionDecode::ModeBitOnly => ChannelFunction::Voltage,
            FunctionDecode::AnalogOnly => match nibble {
                0..=7 => ChannelFunction::Voltage,
                _ => return Err(unknown()),
            },
            FunctionDecode::Nibble => match nibble {
                0..=7 => ChannelFunction::Voltage,
                8 => ChannelFunction::DigitalInput,
                9 => ChannelFunction::RateInput,
                10 => ChannelFunction::CounterInput,
                _ => return Err(unknown()),
            },
        };

        let gain_or_type_index = match function {
            ChannelFunction::Thermocouple => ((raw_code & 0x0700) >> 8) as u8,
            _ => (raw_code >> 8) as u8,
        };

        Ok(Self {
            raw_code,
            function,
            gain_or_type_index,
        })
    }
}

/// Ordered, non-empty list of channel descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanList {
    profile: ModelProfile,
    channels: Vec<ChannelDescriptor>,
}

impl ScanList {
    /// Build a scan list from raw channel codes, in scan order.
    pub fn build(raw_codes: &[u16], profile: ModelProfile) -> Result<Self, ConfigError> {
        if raw_codes.is_empty() {
            return Err(ConfigError::Empty);
        }

        let channels = raw_codes
            .iter()
            .enumerate()
            .map(|(position, &code)| ChannelDescriptor::decode(position, code, profile))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { profile, channels })
    }

    /// Number of channels, i.e. samples per pass.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Always false: an empty scan list cannot be built.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Model this scan list was decoded for.
    pub fn profile(&self) -> ModelProfile {
        self.profile
    }

    /// Descriptor at a scan position.
    pub fn get(&self, position: usize) -> Option<&ChannelDescriptor> {
        self.channels.get(position)
    }

    /// Descriptors in scan order.
    pub fn iter(&self) -> impl Iterator<Item = &ChannelDescriptor> {
        self.channels.iter()
    }

    /// Raw codes in scan order.
    pub fn raw_codes(&self) -> Vec<u16> {
        self.channels.iter().map(|ch| ch.raw_code).collect()
    }
}

impl<'a> IntoIterator for &'a ScanList {
    type Item = &'a ChannelDescriptor;
    type IntoIter = std::slice::Iter<'a, ChannelDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.channels.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_di2008_function_decoding() {
        let codes = [0x0A00, 0x0B01, 0x1702, 0x1303, 0x0709, 0x000A, 0x0008];
        let list = ScanList::build(&codes, ModelProfile::Di2008).unwrap();
        let functions: Vec<_> = list.iter().map(|ch| ch.function).collect();
        assert_eq!(
            functions,
            vec![
                ChannelFunction::Voltage,
                ChannelFunction::Voltage,
                ChannelFunction::Thermocouple,
                ChannelFunction::Thermocouple,
                ChannelFunction::RateInput,
                ChannelFunction::CounterInput,
                ChannelFunction::DigitalInput,
            ]
        );
        // T-type and K-type
        assert_eq!(list.get(2).unwrap().gain_or_type_index, 7);
        assert_eq!(list.get(3).unwrap().gain_or_type_index, 3);
        assert_eq!(list.get(4).unwrap().gain_or_type_index, 7);
        assert_eq!(list.raw_codes(), codes.to_vec());
    }

    #[test]
    fn test_empty_scan_list_rejected() {
        assert_eq!(
            ScanList::build(&[], ModelProfile::Di1110),
            Err(ConfigError::Empty)
        );
    }

    #[test]
    fn test_unknown_function_rejected() {
        let err = ScanList::build(&[0x0000, 0x000C], ModelProfile::Di1110).unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownFunction {
                position: 1,
                code: 0x000C,
                model: "DI-1110"
            }
        );
        // DI-1100 has analog inputs only
        assert!(ScanList::build(&[0x0008], ModelProfile::Di1100).is_err());
    }

    #[test]
    fn test_thermocouple_code_without_tc_tables_rejected() {
        for profile in [
            ModelProfile::Di1100,
            ModelProfile::Di1110,
            ModelProfile::Di2108,
            ModelProfile::Di4208,
        ] {
            assert_eq!(
                ScanList::build(&[0x0000, 0x1303], profile),
                Err(ConfigError::UnknownFunction {
                    position: 1,
                    code: 0x1303,
                    model: profile.name(),
                })
            );
        }
        let list = ScanList::build(&[0x1303], ModelProfile::Di2008).unwrap();
        assert_eq!(list.get(0).unwrap().function, ChannelFunction::Thermocouple);
    }

    #[test]
    fn test_di245_mode_bit_only() {
        let list = ScanList::build(&[0x0A00, 0x1303], ModelProfile::Di245).unwrap();
        assert_eq!(list.get(0).unwrap().function, ChannelFunction::Voltage);
        assert_eq!(list.get(0).unwrap().gain_or_type_index, 0x0A);
        assert_eq!(list.get(1).unwrap().function, ChannelFunction::Thermocouple);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_accumulating_functions() {
        assert!(ChannelFunction::Voltage.accumulates());
        assert!(ChannelFunction::Thermocouple.accumulates());
        assert!(ChannelFunction::RateInput.accumulates());
        assert!(!ChannelFunction::DigitalInput.accumulates());
        assert!(!ChannelFunction::CounterInput.accumulates());
    }
}
