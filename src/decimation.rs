//! Decimation by summing consecutive passes.

use crate::error::ConfigError;
use crate::scan_list::{ChannelFunction, ScanList};

/// Sums raw values per channel over `decimation_factor` passes.
///
/// Voltage, thermocouple and rate channels accumulate. Digital and counter
/// channels keep only the most recent value of the cycle. A thermocouple
/// channel that reports a sentinel anywhere in the cycle drains as
/// `sentinel * factor` so the converter still recognises it.
#[derive(Debug, Clone)]
pub struct DecimationAccumulator {
    functions: Vec<ChannelFunction>,
    factor: u32,
    remaining: u32,
    sums: Vec<i64>,
    latched: Vec<Option<i32>>,
    limits: (i32, i32),
}

impl DecimationAccumulator {
    /// Create an accumulator for a scan list.
    pub fn new(scan_list: &ScanList, decimation_factor: u32) -> Result<Self, ConfigError> {
        if decimation_factor == 0 {
            return Err(ConfigError::InvalidDecimation(decimation_factor));
        }
        let len = scan_list.len();
        Ok(Self {
            functions: scan_list.iter().map(|ch| ch.function).collect(),
            factor: decimation_factor,
            remaining: decimation_factor,
            sums: vec![0; len],
            latched: vec![None; len],
            limits: scan_list.profile().adc_limits(),
        })
    }

    /// Configured decimation factor.
    pub fn factor(&self) -> u32 {
        self.factor
    }

    /// Passes still needed to close the current cycle.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Add one raw value for a scan position.
    pub fn absorb(&mut self, position: usize, raw: i32) {
        debug_assert!(
            position < self.functions.len(),
            "position {position} outside a {}-channel scan list",
            self.functions.len()
        );
        let Some(&function) = self.functions.get(position) else {
            return;
        };
        match function {
            ChannelFunction::Thermocouple => {
                if self.latched[position].is_some() {
                    return;
                }
                let (max, min) = self.limits;
                if raw == max || raw == min {
                    self.latched[position] = Some(raw);
                } else {
                    self.sums[position] += i64::from(raw);
                }
            }
            ChannelFunction::Voltage | ChannelFunction::RateInput => {
                self.sums[position] += i64::from(raw);
            }
            ChannelFunction::DigitalInput | ChannelFunction::CounterInput => {
                self.sums[position] = i64::from(raw);
            }
        }
    }

    /// Add a full pass of raw values in scan order.
    pub fn absorb_pass(&mut self, values: &[i32]) {
        for (position, &raw) in values.iter().enumerate() {
            self.absorb(position, raw);
        }
    }

    /// Mark the end of a pass. Returns whether the cycle is now complete.
    pub fn end_pass(&mut self) -> bool {
        self.remaining = self.remaining.saturating_sub(1);
        self.is_cycle_complete()
    }

    /// Whether `decimation_factor` passes have been absorbed.
    pub fn is_cycle_complete(&self) -> bool {
        self.remaining == 0
    }

    /// Take the per-position sums and start a new cycle.
    pub fn drain_and_reset(&mut self) -> Vec<i64> {
        let factor = i64::from(self.factor);
        let drained = self
            .sums
            .iter()
            .zip(&self.latched)
            .map(|(&sum, latched)| match latched {
                Some(sentinel) => i64::from(*sentinel) * factor,
                None => sum,
            })
            .collect();
        self.reset();
        drained
    }

    /// Drop the partial cycle.
    pub fn reset(&mut self) {
        self.sums.iter_mut().for_each(|sum| *sum = 0);
        self.latched.iter_mut().for_each(|latched| *latched = None);
        self.remaining = self.factor;
    }
}
