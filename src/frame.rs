//! Output record assembly.

use std::fmt;

use crate::convert::Measurement;

/// One converted value per scan position, plus status bits when the model
/// carries them.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRecord {
    /// Zero-based record counter within the session.
    pub sequence: u64,
    /// Values in scan order; status bits, if any, come last.
    pub values: Vec<Measurement>,
}

impl OutputRecord {
    /// Number of values including the status field.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the record holds no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Display for OutputRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        Ok(())
    }
}

/// Collects one measurement per scan position into records.
#[derive(Debug, Clone)]
pub struct FrameAssembler {
    slots: Vec<Option<Measurement>>,
    status: Option<Measurement>,
    expects_status: bool,
    filled: usize,
    sequence: u64,
}

impl FrameAssembler {
    /// Create an assembler for `len` positions.
    pub fn new(len: usize, expects_status: bool) -> Self {
        Self {
            slots: vec![None; len],
            status: None,
            expects_status,
            filled: 0,
            sequence: 0,
        }
    }

    /// Store the measurement for a position, replacing any earlier one.
    pub fn push(&mut self, position: usize, measurement: Measurement) {
        debug_assert!(
            position < self.slots.len(),
            "position {position} outside a {}-channel record",
            self.slots.len()
        );
        if let Some(slot) = self.slots.get_mut(position) {
            if slot.is_none() {
                self.filled += 1;
            }
            *slot = Some(measurement);
        }
    }

    /// Store the status bits closing the record.
    pub fn set_status(&mut self, status: Measurement) {
        self.status = Some(status);
    }

    /// Whether every position (and the status field, if expected) is filled.
    pub fn is_complete(&self) -> bool {
        self.filled == self.slots.len() && (!self.expects_status || self.status.is_some())
    }

    /// Emit the record if complete and start the next one.
    pub fn take_if_complete(&mut self) -> Option<OutputRecord> {
        if !self.is_complete() {
            return None;
        }
        let mut values: Vec<Measurement> = self.slots.iter_mut().filter_map(Option::take).collect();
        if let Some(status) = self.status.take() {
            if self.expects_status {
                values.push(status);
            }
        }
        self.filled = 0;

        let record = OutputRecord {
            sequence: self.sequence,
            values,
        };
        self.sequence += 1;
        Some(record)
    }

    /// Drop a partially filled record. The sequence counter keeps running.
    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.status = None;
        self.filled = 0;
    }

    /// Records emitted so far.
    pub fn emitted(&self) -> u64 {
        self.sequence
    }
}
