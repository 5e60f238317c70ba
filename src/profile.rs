//! Instrument model profiles.
//!
//! Every supported instrument runs the same decode pipeline; what differs is a
//! small bundle of constants: how a 2-byte word unpacks into ADC counts, how
//! channel codes select a measurement function, the gain and thermocouple
//! tables, where digital status bits live, and the command vocabulary of the
//! text handshake. [`ModelProfile`] is a closed enum and each variant maps to
//! one static bundle.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Supported instrument models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProfile {
    /// DI-2008: voltage, thermocouple, rate, counter and digital channels.
    Di2008,
    /// DI-245: 14-bit voltage/thermocouple with sync-bit framing.
    Di245,
    /// DI-1100: four ±10 V channels, digital inputs piggybacked on position 0.
    Di1100,
    /// DI-1110: ±10 V channels plus rate, counter and digital channels.
    Di1110,
    /// DI-1120: programmable gain ±100 V … ±2 V.
    Di1120,
    /// DI-2108: fixed ±10 V.
    Di2108,
    /// DI-4108: programmable gain ±10 V … ±0.2 V.
    Di4108,
    /// DI-4208: programmable gain ±100 V … ±2 V.
    Di4208,
    /// DI-4718B: fixed ±5 V.
    Di4718B,
}

/// How a 2-byte analog word becomes signed ADC counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawLayout {
    /// Little-endian two's-complement 16-bit.
    Signed16,
    /// 14-bit value with a sync bit in the LSB of each byte and an inverted
    /// sign bit (DI-245).
    Sync14,
}

/// How the function of a channel is derived from its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionDecode {
    /// Low nibble selects the function, bit 12 turns an analog code into a
    /// thermocouple.
    NibbleWithMode,
    /// Only bit 12 matters: clear is voltage, set is thermocouple.
    ModeBitOnly,
    /// Low nibble must select an analog input.
    AnalogOnly,
    /// Low nibble selects analog, digital, rate or counter.
    Nibble,
}

/// Where digital status bits travel in the stream, if anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLayout {
    /// No status bits outside dedicated digital channels.
    None,
    /// Low bits of the first analog sample of every pass.
    Piggyback {
        /// Number of status bits.
        width: u8,
    },
    /// An extra 2-byte word served after the last channel of every pass.
    TrailingWord {
        /// Number of status bits.
        width: u8,
    },
}

impl StatusLayout {
    /// Extra bytes this layout adds to every pass.
    pub fn extra_bytes(self) -> usize {
        match self {
            Self::TrailingWord { .. } => 2,
            _ => 0,
        }
    }

    /// Whether records carry a trailing status field.
    pub fn is_present(self) -> bool {
        !matches!(self, Self::None)
    }

    /// Mask selecting the status bits.
    pub fn mask(self) -> u16 {
        match self {
            Self::None => 0,
            Self::Piggyback { width } | Self::TrailingWord { width } => (1u16 << width) - 1,
        }
    }
}

/// Thermocouple types in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThermocoupleType {
    /// Type B.
    B,
    /// Type E.
    E,
    /// Type J.
    J,
    /// Type K.
    K,
    /// Type N.
    N,
    /// Type R.
    R,
    /// Type S.
    S,
    /// Type T.
    T,
}

impl ThermocoupleType {
    /// All types, ordered by their 3-bit code.
    pub const ALL: [ThermocoupleType; 8] = [
        Self::B,
        Self::E,
        Self::J,
        Self::K,
        Self::N,
        Self::R,
        Self::S,
        Self::T,
    ];

    /// Type selected by a 3-bit code.
    pub fn from_code(code: u8) -> Self {
        Self::ALL[usize::from(code & 0x7)]
    }

    /// Table index of this type.
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Linearization constants `(slope, offset)` per thermocouple type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThermocoupleTable {
    /// Slope in °C per count, in type order B, E, J, K, N, R, S, T.
    pub slope: [f64; 8],
    /// Offset in °C, in the same order.
    pub offset: [f64; 8],
}

impl ThermocoupleTable {
    /// Constants for one thermocouple type.
    pub fn constants(&self, tc: ThermocoupleType) -> (f64, f64) {
        (self.slope[tc.index()], self.offset[tc.index()])
    }
}

/// Command vocabulary of the configuration handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSet {
    /// Scan list entry keyword (`slist` or `chn`), followed by position and code.
    pub scan_entry: &'static str,
    /// Start streaming.
    pub start: &'static str,
    /// Stop streaming.
    pub stop: &'static str,
    /// Whether the instrument echoes start/stop.
    pub echoes_start_stop: bool,
    /// Select binary output, if the model needs it.
    pub binary_mode: Option<&'static str>,
    /// Smallest packet size, if the model supports it.
    pub packet_size: Option<&'static str>,
    /// Reset the counter channel, if the model has one.
    pub reset_counter: Option<&'static str>,
    /// Enable the trailing digital status word, if the model has one.
    pub digital_enable: Option<&'static str>,
    /// Sample rate commands used when the configuration does not override them.
    pub default_rate: &'static [&'static str],
}

/// Rate ceilings in Hz, indexed by `gain code - 1`.
pub const RATE_RANGES: [f64; 12] = [
    50000.0, 20000.0, 10000.0, 5000.0, 2000.0, 1000.0, 500.0, 200.0, 100.0, 50.0, 20.0, 10.0,
];

/// USB vendor id of DATAQ Instruments devices.
pub const DATAQ_VENDOR_ID: u16 = 0x0683;

/// Default serial speed of every supported model in CDC mode.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

// Zero entries are reserved gain codes.
const DI2008_GAINS: [f64; 16] = [
    0.5, 0.25, 0.1, 0.05, 0.025, 0.01, 0.0, 0.0, 50.0, 25.0, 10.0, 5.0, 2.5, 1.0, 0.0, 0.0,
];
const DI4208_GAINS: [f64; 6] = [100.0, 50.0, 20.0, 10.0, 5.0, 2.0];
const DI4108_GAINS: [f64; 6] = [10.0, 5.0, 2.0, 1.0, 0.5, 0.2];
const FIXED_10V: [f64; 1] = [10.0];
const FIXED_5V: [f64; 1] = [5.0];

const TC_OFFSETS: [f64; 8] = [1035.0, 400.0, 495.0, 586.0, 550.0, 859.0, 859.0, 100.0];

const DI2008_TC: ThermocoupleTable = ThermocoupleTable {
    slope: [
        0.023956, 0.018311, 0.021515, 0.023987, 0.022888, 0.02774, 0.02774, 0.009155,
    ],
    offset: TC_OFFSETS,
};

const DI245_TC: ThermocoupleTable = ThermocoupleTable {
    slope: [
        0.095825, 0.073242, 0.08606, 0.095947, 0.091553, 0.110962, 0.110962, 0.036621,
    ],
    offset: TC_OFFSETS,
};

const DI2008_COMMANDS: CommandSet = CommandSet {
    scan_entry: "slist",
    start: "start",
    stop: "stop",
    echoes_start_stop: false,
    binary_mode: None,
    packet_size: Some("ps 0"),
    reset_counter: Some("reset 1"),
    digital_enable: None,
    // 800 / (srate * dec) = 800 / (4 * 20) = 10 Hz
    default_rate: &["dec 20", "srate 4"],
};

const DI245_COMMANDS: CommandSet = CommandSet {
    scan_entry: "chn",
    start: "S1",
    stop: "S0",
    echoes_start_stop: false,
    binary_mode: None,
    packet_size: None,
    reset_counter: None,
    digital_enable: Some("dchn 1"),
    // Sinc4 filter, AF = 1, SF = 0x63: 20 Hz
    default_rate: &["xrate 4451 20"],
};

const DI1100_COMMANDS: CommandSet = CommandSet {
    scan_entry: "slist",
    start: "start",
    stop: "stop",
    echoes_start_stop: false,
    binary_mode: Some("encode 0"),
    packet_size: Some("ps 0"),
    reset_counter: None,
    digital_enable: None,
    // 60,000,000 / 60000 = 1 kHz before host decimation
    default_rate: &["srate 60000"],
};

const DI1110_COMMANDS: CommandSet = CommandSet {
    reset_counter: Some("reset 1"),
    ..DI1100_COMMANDS
};

const STARTER_COMMANDS: CommandSet = CommandSet {
    // 60,000,000 / (11718 * 512) = 10 Hz
    default_rate: &["dec 512", "srate 11718"],
    ..DI1110_COMMANDS
};

impl ModelProfile {
    /// Every profile, in display order.
    pub const ALL: [ModelProfile; 9] = [
        Self::Di2008,
        Self::Di245,
        Self::Di1100,
        Self::Di1110,
        Self::Di1120,
        Self::Di2108,
        Self::Di4108,
        Self::Di4208,
        Self::Di4718B,
    ];

    /// Instrument model name as printed on the device.
    pub fn name(self) -> &'static str {
        match self {
            Self::Di2008 => "DI-2008",
            Self::Di245 => "DI-245",
            Self::Di1100 => "DI-1100",
            Self::Di1110 => "DI-1110",
            Self::Di1120 => "DI-1120",
            Self::Di2108 => "DI-2108",
            Self::Di4108 => "DI-4108",
            Self::Di4208 => "DI-4208",
            Self::Di4718B => "DI-4718B",
        }
    }

    /// Word unpacking rule for analog samples.
    pub fn raw_layout(self) -> RawLayout {
        match self {
            Self::Di245 => RawLayout::Sync14,
            _ => RawLayout::Signed16,
        }
    }

    /// Function decoding rule for channel codes.
    pub fn function_decode(self) -> FunctionDecode {
        match self {
            Self::Di2008 => FunctionDecode::NibbleWithMode,
            Self::Di245 => FunctionDecode::ModeBitOnly,
            Self::Di1100 => FunctionDecode::AnalogOnly,
            _ => FunctionDecode::Nibble,
        }
    }

    /// Ordered full-scale voltages indexed by gain code. Zero marks a reserved code.
    pub fn gain_table(self) -> &'static [f64] {
        match self {
            Self::Di2008 | Self::Di245 => &DI2008_GAINS,
            Self::Di1120 | Self::Di4208 => &DI4208_GAINS,
            Self::Di4108 => &DI4108_GAINS,
            Self::Di1100 | Self::Di1110 | Self::Di2108 => &FIXED_10V,
            Self::Di4718B => &FIXED_5V,
        }
    }

    /// Thermocouple constants, for models with thermocouple inputs.
    pub fn thermocouple_table(self) -> Option<&'static ThermocoupleTable> {
        match self {
            Self::Di2008 => Some(&DI2008_TC),
            Self::Di245 => Some(&DI245_TC),
            _ => None,
        }
    }

    /// Counts per full-scale half range: 32768 for 16-bit ADCs, 8192 for 14-bit.
    pub fn adc_half_scale(self) -> f64 {
        match self.raw_layout() {
            RawLayout::Signed16 => 32768.0,
            RawLayout::Sync14 => 8192.0,
        }
    }

    /// Most positive and most negative counts; thermocouple inputs reserve
    /// these as cold-junction and open-circuit sentinels.
    pub fn adc_limits(self) -> (i32, i32) {
        match self.raw_layout() {
            RawLayout::Signed16 => (i32::from(i16::MAX), i32::from(i16::MIN)),
            RawLayout::Sync14 => (8191, -8192),
        }
    }

    /// Mask applied to dedicated digital input samples.
    pub fn digital_mask(self) -> u16 {
        0x007f
    }

    /// Status bit layout for this model.
    ///
    /// `digital_inputs` only matters for models whose status word must be
    /// switched on explicitly.
    pub fn status_layout(self, digital_inputs: bool) -> StatusLayout {
        match self {
            Self::Di1100 => StatusLayout::Piggyback { width: 2 },
            Self::Di245 if digital_inputs => StatusLayout::TrailingWord { width: 2 },
            _ => StatusLayout::None,
        }
    }

    /// Handshake vocabulary.
    pub fn commands(self) -> &'static CommandSet {
        match self {
            Self::Di2008 => &DI2008_COMMANDS,
            Self::Di245 => &DI245_COMMANDS,
            Self::Di1100 => &DI1100_COMMANDS,
            Self::Di1110 => &DI1110_COMMANDS,
            Self::Di1120 | Self::Di2108 | Self::Di4108 | Self::Di4208 | Self::Di4718B => {
                &STARTER_COMMANDS
            }
        }
    }
}

impl fmt::Display for ModelProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelProfile {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Self::ALL
            .into_iter()
            .find(|profile| {
                let name: String = profile
                    .name()
                    .chars()
                    .filter(|c| c.is_ascii_alphanumeric())
                    .map(|c| c.to_ascii_lowercase())
                    .collect();
                name == wanted
            })
            .ok_or_else(|| ConfigError::UnknownModel(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_name_parsing() {
        assert_eq!("DI-2008".parse::<ModelProfile>().unwrap(), ModelProfile::Di2008);
        assert_eq!("di245".parse::<ModelProfile>().unwrap(), ModelProfile::Di245);
        assert_eq!("Di-4718b".parse::<ModelProfile>().unwrap(), ModelProfile::Di4718B);
        assert!(matches!(
            "DI-9999".parse::<ModelProfile>(),
            Err(ConfigError::UnknownModel(_))
        ));
    }

    #[test]
    fn test_thermocouple_table_order() {
        let table = ModelProfile::Di2008.thermocouple_table().unwrap();
        assert_eq!(table.constants(ThermocoupleType::K), (0.023987, 586.0));
        assert_eq!(table.constants(ThermocoupleType::T), (0.009155, 100.0));
        assert_eq!(ThermocoupleType::from_code(3), ThermocoupleType::K);
        assert!(ModelProfile::Di1110.thermocouple_table().is_none());
    }

    #[test]
    fn test_adc_resolution_per_layout() {
        assert_eq!(ModelProfile::Di2008.adc_half_scale(), 32768.0);
        assert_eq!(ModelProfile::Di245.adc_half_scale(), 8192.0);
        assert_eq!(ModelProfile::Di245.adc_limits(), (8191, -8192));
        assert_eq!(ModelProfile::Di1100.adc_limits(), (32767, -32768));
    }

    #[test]
    fn test_status_layouts() {
        assert_eq!(
            ModelProfile::Di1100.status_layout(false),
            StatusLayout::Piggyback { width: 2 }
        );
        assert_eq!(ModelProfile::Di245.status_layout(false), StatusLayout::None);
        let trailing = ModelProfile::Di245.status_layout(true);
        assert_eq!(trailing, StatusLayout::TrailingWord { width: 2 });
        assert_eq!(trailing.extra_bytes(), 2);
        assert_eq!(trailing.mask(), 0x3);
    }

    #[test]
    fn test_command_sets() {
        assert_eq!(ModelProfile::Di245.commands().scan_entry, "chn");
        assert_eq!(ModelProfile::Di245.commands().start, "S1");
        assert_eq!(ModelProfile::Di1110.commands().binary_mode, Some("encode 0"));
        assert_eq!(ModelProfile::Di1100.commands().reset_counter, None);
        assert_eq!(
            ModelProfile::Di2108.commands().default_rate,
            &["dec 512", "srate 11718"]
        );
    }
}
