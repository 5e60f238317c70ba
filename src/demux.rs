//! Sample demultiplexing.
//!
//! The instrument sends one 2-byte word per scan list position per pass, in
//! strict round-robin order, optionally followed by a status word. The
//! [`Demultiplexer`] buffers whatever the transport delivers and hands out
//! fully decoded samples only; a partial word is never interpreted.
//!
//! # Word layouts
//!
//! ```text
//! Signed16 (most models)     [ lo ][ hi ]           i16 little-endian
//! Digital input channel      [ hi ][ lo ]           u16 big-endian, masked
//! Sync14 (DI-245)            [A6..A0 s][A13..A7 s]  sign bit inverted, s = sync
//! Trailing status (DI-245)   [D0 ...  s][... D1 s]
//! ```

use bytes::{Buf, BytesMut};
use tracing::trace;

use crate::profile::{RawLayout, StatusLayout};
use crate::scan_list::{ChannelFunction, ScanList};

/// Bytes per sample word.
pub const WORD_BYTES: usize = 2;

/// Decode a little-endian two's-complement word.
pub fn decode_signed16(word: [u8; 2]) -> i32 {
    i32::from(i16::from_le_bytes(word))
}

/// Decode a DI-245 analog word into signed 14-bit counts (-8192..=8191).
pub fn decode_sync14(word: [u8; 2]) -> i32 {
    let counts = i32::from(i16::from_le_bytes([word[0], word[1] ^ 0x80]));
    // Drop the low byte's sync bit, then the high byte's.
    let counts = counts >> 1;
    let low = counts & 0x7f;
    ((counts >> 8) << 7) | low
}

/// Decode a dedicated digital input word.
pub fn decode_digital(word: [u8; 2], mask: u16) -> u16 {
    u16::from_be_bytes(word) & mask
}

/// Decode a DI-245 trailing status word: D0 is bit 7 of the first byte, D1
/// sits above the second byte's sync bit.
pub fn decode_status_word(word: [u8; 2], mask: u16) -> u16 {
    (u16::from_le_bytes([word[0], word[1] >> 1]) >> 7) & mask
}

/// Split piggybacked status bits off an analog value.
///
/// Returns the value with its low `width` bits cleared (sign preserved) and the
/// extracted bits.
pub fn split_piggyback(value: i32, width: u8) -> (i32, u16) {
    let mask = (1i32 << width) - 1;
    let bits = (value & mask) as u16;
    ((value >> width) << width, bits)
}

/// One decoded word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawSample {
    /// Sample for one scan list position.
    Channel {
        /// Scan list position.
        position: usize,
        /// Counts (signed analog, biased rate/counter, or masked digital bits).
        value: i32,
        /// Status bits carried by this sample.
        status: Option<u16>,
    },
    /// Trailing status word closing a pass.
    Status(u16),
}

/// One complete pass through the scan list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawPass {
    /// One value per scan list position, in scan order.
    pub values: Vec<i32>,
    /// Status bits captured during the pass.
    pub status: Option<u16>,
}

/// Splits a byte stream into per-channel raw samples.
#[derive(Debug)]
pub struct Demultiplexer {
    functions: Vec<ChannelFunction>,
    layout: RawLayout,
    status_layout: StatusLayout,
    digital_mask: u16,
    buffer: BytesMut,
    cursor: usize,
    pending: RawPass,
}

impl Demultiplexer {
    /// Create a demultiplexer for a scan list.
    pub fn new(scan_list: &ScanList, status_layout: StatusLayout) -> Self {
        let profile = scan_list.profile();
        let functions: Vec<_> = scan_list.iter().map(|ch| ch.function).collect();
        let pass_bytes = functions.len() * WORD_BYTES + status_layout.extra_bytes();

        Self {
            pending: RawPass {
                values: Vec::with_capacity(functions.len()),
                status: None,
            },
            functions,
            layout: profile.raw_layout(),
            status_layout,
            digital_mask: profile.digital_mask(),
            buffer: BytesMut::with_capacity(pass_bytes * 64),
            cursor: 0,
        }
    }

    /// Append bytes received from the transport.
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes making up one full pass.
    pub fn pass_bytes(&self) -> usize {
        self.slots_per_pass() * WORD_BYTES
    }

    /// Next word slot to decode within the current pass.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    fn slots_per_pass(&self) -> usize {
        match self.status_layout {
            StatusLayout::TrailingWord { .. } => self.functions.len() + 1,
            _ => self.functions.len(),
        }
    }

    /// Decode the next word, or `None` if fewer than two bytes are buffered.
    ///
    /// `None` leaves the cursor untouched; call again after more bytes arrive.
    pub fn next_raw(&mut self) -> Option<RawSample> {
        if self.buffer.len() < WORD_BYTES {
            return None;
        }
        let word = [self.buffer[0], self.buffer[1]];
        self.buffer.advance(WORD_BYTES);

        let position = self.cursor;
        self.cursor = (self.cursor + 1) % self.slots_per_pass();

        let Some(&function) = self.functions.get(position) else {
            let bits = decode_status_word(word, self.status_layout.mask());
            self.pending.status = Some(bits);
            return Some(RawSample::Status(bits));
        };

        let mut status = None;
        let value = match function {
            ChannelFunction::DigitalInput => i32::from(decode_digital(word, self.digital_mask)),
            _ => {
                let counts = match self.layout {
                    RawLayout::Signed16 => decode_signed16(word),
                    RawLayout::Sync14 => decode_sync14(word),
                };
                match self.status_layout {
                    StatusLayout::Piggyback { width } if position == 0 => {
                        let (stripped, bits) = split_piggyback(counts, width);
                        status = Some(bits);
                        stripped
                    }
                    _ => counts,
                }
            }
        };

        self.pending.values.push(value);
        if status.is_some() {
            self.pending.status = status;
        }

        Some(RawSample::Channel {
            position,
            value,
            status,
        })
    }

    /// Decode the rest of the current pass if all of its bytes are buffered.
    ///
    /// Returns `None` without consuming anything otherwise.
    pub fn next_pass(&mut self) -> Option<RawPass> {
        let remaining = (self.slots_per_pass() - self.cursor) * WORD_BYTES;
        if self.buffer.len() < remaining {
            return None;
        }

        loop {
            self.next_raw()?;
            if self.cursor == 0 {
                break;
            }
        }

        let capacity = self.functions.len();
        let pass = std::mem::replace(
            &mut self.pending,
            RawPass {
                values: Vec::with_capacity(capacity),
                status: None,
            },
        );
        trace!(values = ?pass.values, status = ?pass.status, "Demultiplexed pass");
        Some(pass)
    }

    /// Throw away buffered bytes and any partly decoded pass.
    ///
    /// Returns the number of bytes discarded. Used on stop so a partial pass is
    /// never stitched onto the next acquisition.
    pub fn discard(&mut self) -> usize {
        let discarded = self.buffer.len();
        self.buffer.clear();
        self.cursor = 0;
        self.pending.values.clear();
        self.pending.status = None;
        discarded
    }
}
