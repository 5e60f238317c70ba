//! Scan-list-driven decode pipeline.
//!
//! [`ScanDecoder`] owns one instance of every decode stage and wires them
//! together:
//!
//! ```text
//! bytes -> Demultiplexer -> DecimationAccumulator -> UnitConverter -> FrameAssembler -> OutputRecord
//! ```
//!
//! It performs no I/O. Callers push whatever bytes the transport delivered and
//! pull records until [`ScanDecoder::next_record`] returns `None`, which means
//! more bytes are needed. Only whole passes are ever decoded.
//!
//! # Example
//!
//! ```
//! use dataq_stream::decoder::{DecoderOptions, ScanDecoder};
//! use dataq_stream::profile::ModelProfile;
//! use dataq_stream::scan_list::ScanList;
//!
//! let scan_list = ScanList::build(&[0x0A00, 0x0A01], ModelProfile::Di2008).unwrap();
//! let mut decoder = ScanDecoder::new(scan_list, DecoderOptions::default()).unwrap();
//!
//! let bytes: Vec<u8> = [16384i16, -16384].iter().flat_map(|v| v.to_le_bytes()).collect();
//! decoder.push_bytes(&bytes);
//!
//! let record = decoder.next_record().unwrap();
//! assert_eq!(record.to_string(), "5.000, -5.000");
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::convert::UnitConverter;
use crate::decimation::DecimationAccumulator;
use crate::demux::Demultiplexer;
use crate::error::ConfigError;
use crate::frame::{FrameAssembler, OutputRecord};
use crate::range::{GainPolicy, RangeResolver, ScalingParameter};
use crate::scan_list::ScanList;

/// Decoder settings beyond the scan list itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderOptions {
    /// Passes summed into one record; 1 disables averaging.
    pub decimation_factor: u32,
    /// Treatment of reserved gain codes.
    pub gain_policy: GainPolicy,
    /// Enable the trailing digital status word on models that have one.
    pub digital_inputs: bool,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            decimation_factor: 1,
            gain_policy: GainPolicy::Strict,
            digital_inputs: false,
        }
    }
}

impl DecoderOptions {
    /// Set the decimation factor.
    pub fn decimation(mut self, factor: u32) -> Self {
        self.decimation_factor = factor;
        self
    }

    /// Set the gain code policy.
    pub fn gain_policy(mut self, policy: GainPolicy) -> Self {
        self.gain_policy = policy;
        self
    }

    /// Enable or disable digital status inputs.
    pub fn digital_inputs(mut self, enabled: bool) -> Self {
        self.digital_inputs = enabled;
        self
    }
}

/// Counters describing decoder activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderStats {
    /// Complete passes demultiplexed.
    pub passes_decoded: u64,
    /// Records emitted.
    pub records_emitted: u64,
    /// Buffered bytes thrown away on stop.
    pub bytes_discarded: u64,
}

/// Byte stream to record pipeline for one scan list.
#[derive(Debug)]
pub struct ScanDecoder {
    scan_list: ScanList,
    scaling: Vec<ScalingParameter>,
    demux: Demultiplexer,
    accumulator: DecimationAccumulator,
    converter: UnitConverter,
    assembler: FrameAssembler,
    status: Option<u16>,
    has_status: bool,
    stats: DecoderStats,
}

impl ScanDecoder {
    /// Resolve scaling for every channel and set up the pipeline.
    ///
    /// All configuration errors surface here, before any byte is decoded.
    pub fn new(scan_list: ScanList, options: DecoderOptions) -> Result<Self, ConfigError> {
        let profile = scan_list.profile();
        let scaling = RangeResolver::new(profile, options.gain_policy).resolve_all(&scan_list)?;
        let accumulator = DecimationAccumulator::new(&scan_list, options.decimation_factor)?;
        let status_layout = profile.status_layout(options.digital_inputs);

        debug!(
            model = %profile,
            channels = scan_list.len(),
            decimation = options.decimation_factor,
            status = ?status_layout,
            "Decoder configured"
        );

        Ok(Self {
            demux: Demultiplexer::new(&scan_list, status_layout),
            converter: UnitConverter::new(profile),
            assembler: FrameAssembler::new(scan_list.len(), status_layout.is_present()),
            has_status: status_layout.is_present(),
            scaling,
            accumulator,
            scan_list,
            status: None,
            stats: DecoderStats::default(),
        })
    }

    /// Scan list being decoded.
    pub fn scan_list(&self) -> &ScanList {
        &self.scan_list
    }

    /// Resolved scaling, one entry per scan position.
    pub fn scaling(&self) -> &[ScalingParameter] {
        &self.scaling
    }

    /// Decimation factor in effect.
    pub fn decimation_factor(&self) -> u32 {
        self.accumulator.factor()
    }

    /// Values per record, including the status field.
    pub fn record_width(&self) -> usize {
        self.scan_list.len() + usize::from(self.has_status)
    }

    /// Bytes needed for one pass.
    pub fn pass_bytes(&self) -> usize {
        self.demux.pass_bytes()
    }

    /// Bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.demux.buffered()
    }

    /// Activity counters.
    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Append bytes received from the instrument.
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.demux.push_bytes(data);
    }

    /// Decode buffered passes until a record completes.
    ///
    /// Returns `None` when the buffer runs out first; the partial cycle is kept
    /// for the next call.
    pub fn next_record(&mut self) -> Option<OutputRecord> {
        loop {
            let pass = self.demux.next_pass()?;
            self.stats.passes_decoded += 1;

            self.accumulator.absorb_pass(&pass.values);
            if pass.status.is_some() {
                self.status = pass.status;
            }
            if !self.accumulator.end_pass() {
                continue;
            }

            let factor = self.accumulator.factor();
            let sums = self.accumulator.drain_and_reset();
            let mut dropped = false;
            for (position, ((descriptor, scaling), sum)) in self
                .scan_list
                .iter()
                .zip(&self.scaling)
                .zip(sums)
                .enumerate()
            {
                match self.converter.convert(descriptor, scaling, sum, factor) {
                    Ok(measurement) => self.assembler.push(position, measurement),
                    Err(err) => {
                        warn!(position, error = %err, "Dropping record");
                        dropped = true;
                        break;
                    }
                }
            }
            if dropped {
                self.assembler.reset();
                self.status = None;
                continue;
            }
            if let Some(bits) = self.status.take() {
                self.assembler.set_status(self.converter.status(bits));
            }

            if let Some(record) = self.assembler.take_if_complete() {
                self.stats.records_emitted += 1;
                trace!(sequence = record.sequence, "Record assembled");
                return Some(record);
            }
        }
    }

    /// Decode every complete record currently buffered.
    pub fn drain_records(&mut self) -> Vec<OutputRecord> {
        std::iter::from_fn(|| self.next_record()).collect()
    }

    /// Drop buffered bytes and the partial decimation cycle.
    ///
    /// Returns the number of bytes discarded.
    pub fn discard(&mut self) -> usize {
        let discarded = self.demux.discard();
        self.accumulator.reset();
        self.assembler.reset();
        self.status = None;
        self.stats.bytes_discarded += discarded as u64;
        if discarded > 0 {
            debug!(bytes = discarded, "Discarded undecoded bytes");
        }
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{ErrorSentinel, Measurement};
    use crate::profile::ModelProfile;

    fn words(values: &[i16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn decoder(codes: &[u16], profile: ModelProfile, options: DecoderOptions) -> ScanDecoder {
        ScanDecoder::new(ScanList::build(codes, profile).unwrap(), options).unwrap()
    }

    #[test]
    fn test_one_record_per_pass() {
        let mut dec = decoder(&[0x0000, 0x0001], ModelProfile::Di2108, DecoderOptions::default());
        dec.push_bytes(&words(&[16384, -16384, 0, 32767]));

        let records = dec.drain_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].to_string(), "5.000, -5.000");
        assert_eq!(records[1].sequence, 1);
        assert_eq!(dec.stats().passes_decoded, 2);
        assert_eq!(dec.stats().records_emitted, 2);
    }

    #[test]
    fn test_decimated_mean() {
        let mut dec = decoder(
            &[0x0000],
            ModelProfile::Di2108,
            DecoderOptions::default().decimation(4),
        );
        dec.push_bytes(&words(&[0, 8192, 16384, 24576]));
        let record = dec.next_record().unwrap();
        assert_eq!(record.values, vec![Measurement::Voltage(3.75)]);
        assert!(dec.next_record().is_none());
        assert_eq!(dec.stats().passes_decoded, 4);
    }

    #[test]
    fn test_partial_pass_waits() {
        let mut dec = decoder(&[0x0000, 0x0001], ModelProfile::Di2108, DecoderOptions::default());
        dec.push_bytes(&words(&[100])[..]);
        assert!(dec.next_record().is_none());
        assert_eq!(dec.buffered(), 2);
        dec.push_bytes(&words(&[200]));
        assert!(dec.next_record().is_some());
    }

    #[test]
    fn test_reserved_gain_rejected_at_setup() {
        let list = ScanList::build(&[0x0600], ModelProfile::Di2008).unwrap();
        assert!(matches!(
            ScanDecoder::new(list.clone(), DecoderOptions::default()),
            Err(ConfigError::ReservedGainCode { .. })
        ));
        let lenient = DecoderOptions::default().gain_policy(GainPolicy::Lenient);
        assert!(ScanDecoder::new(list, lenient).is_ok());
    }

    #[test]
    fn test_piggyback_status_appended() {
        let mut dec = decoder(&[0x0000, 0x0001], ModelProfile::Di1100, DecoderOptions::default());
        assert_eq!(dec.record_width(), 3);
        dec.push_bytes(&words(&[16386, 0]));
        let record = dec.next_record().unwrap();
        assert_eq!(
            record.values,
            vec![
                Measurement::Voltage(5.0),
                Measurement::Voltage(0.0),
                Measurement::Digital(2)
            ]
        );
    }

    #[test]
    fn test_mismatched_scaling_drops_record() {
        let mut dec = decoder(&[0x0000, 0x0001], ModelProfile::Di2108, DecoderOptions::default());
        dec.scaling[1] = ScalingParameter::None;
        dec.push_bytes(&words(&[16384, -16384]));

        assert!(dec.next_record().is_none());
        assert_eq!(dec.stats().passes_decoded, 1);
        assert_eq!(dec.stats().records_emitted, 0);
        assert!(!dec.assembler.is_complete());
    }

    #[test]
    fn test_discard_drops_partial_cycle() {
        let mut dec = decoder(
            &[0x1303],
            ModelProfile::Di2008,
            DecoderOptions::default().decimation(2),
        );
        // first pass absorbed, half a word of the second still buffered
        dec.push_bytes(&words(&[i16::MIN]));
        dec.push_bytes(&[0x01]);
        assert!(dec.next_record().is_none());
        assert_eq!(dec.discard(), 1);
        assert_eq!(dec.stats().bytes_discarded, 1);

        dec.push_bytes(&words(&[1000, 1000]));
        let record = dec.next_record().unwrap();
        assert_eq!(
            record.values,
            vec![Measurement::Temperature(0.023987 * 1000.0 + 586.0)]
        );
        assert_ne!(
            record.values[0],
            Measurement::Sentinel(ErrorSentinel::OpenCircuit)
        );
    }
}
