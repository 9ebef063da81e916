//! Bit pattern selection and bitstream encoding
//!
//! Each payload bit becomes a short code of `width` serializer bits whose
//! leading run of ones approximates the requested duty cycle (33% at width
//! 3 is `100`, 66% is `110`). Codes are packed MSB first into a byte
//! stream, and every group of four stream bytes is stored reversed so that
//! the PWM serializer, which shifts each little-endian word out MSB first,
//! emits the stream in order.

use alloc::vec::Vec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::dma::{DESCRIPTOR_BYTES, MAX_TRANSFER_BYTES};
use crate::error::ConfigError;

/// Narrowest code considered
pub const MIN_WIDTH: u8 = 3;
/// Widest code considered
pub const MAX_WIDTH: u8 = 16;

/// Parameters of a pattern session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PatternConfig {
    /// Largest payload a single send may carry
    pub byte_count: usize,
    /// Payload bit rate
    pub frequency_hz: u32,
    /// Low time appended after every payload
    pub reset_delay_us: u32,
    /// High share of a zero bit, in percent
    pub duty_zero_percent: u8,
    /// High share of a one bit, in percent
    pub duty_one_percent: u8,
}

impl PatternConfig {
    /// WS2812-style timing: 800 kHz, 33%/66% duty, 55 us latch
    pub const fn ws2812(byte_count: usize) -> Self {
        Self {
            byte_count,
            frequency_hz: 800_000,
            reset_delay_us: 55,
            duty_zero_percent: 33,
            duty_one_percent: 66,
        }
    }
}

/// Serializer codes for a zero and a one bit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BitPattern {
    zero: u16,
    one: u16,
    width: u8,
}

/// Code of `width` bits with the top `round(percent * width / 100)` bits set
///
/// At least one bit is always set.
pub fn representation(percent: u8, width: u8) -> u16 {
    let width = width.clamp(1, MAX_WIDTH) as u32;
    let ones = ((percent as u32 * width + 50) / 100).clamp(1, width);
    let run = ((1u32 << ones) - 1) as u16;
    run << (width - ones)
}

/// Smallest code width that tells the two duty cycles apart
pub fn choose_width(zero_percent: u8, one_percent: u8) -> Result<BitPattern, ConfigError> {
    for percent in [zero_percent, one_percent] {
        if percent > 100 {
            return Err(ConfigError::DutyCycleOutOfRange(percent));
        }
    }

    (MIN_WIDTH..=MAX_WIDTH)
        .map(|width| BitPattern {
            zero: representation(zero_percent, width),
            one: representation(one_percent, width),
            width,
        })
        .find(|pattern| pattern.zero != pattern.one)
        .ok_or(ConfigError::IndistinguishableDutyCycles {
            zero: zero_percent,
            one: one_percent,
        })
}

/// Bytes needed to hold `byte_count` payload bytes at `width` bits per bit,
/// rounded up to whole words
pub fn encoded_len(byte_count: usize, width: u8) -> usize {
    bits_to_word_bytes(byte_count as u64 * 8 * width as u64)
}

fn bits_to_word_bytes(bits: u64) -> usize {
    (bits.div_ceil(32) * 4) as usize
}

/// Position of stream byte `index` in the word-swapped output
fn swizzle(index: usize) -> usize {
    (index & !3) | (3 - index % 4)
}

impl BitPattern {
    pub fn zero_code(&self) -> u16 {
        self.zero
    }

    pub fn one_code(&self) -> u16 {
        self.one
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    pub fn code(&self, bit: bool) -> u16 {
        if bit {
            self.one
        } else {
            self.zero
        }
    }

    /// Encode `bytes` into `out`, zeroing everything past the payload
    ///
    /// Returns the number of bytes the payload occupies.
    ///
    /// # Panics
    /// If `out` is shorter than [`encoded_len`] for `bytes`.
    pub fn encode(&self, bytes: &[u8], out: &mut [u8]) -> usize {
        let used = encoded_len(bytes.len(), self.width);
        assert!(
            out.len() >= used,
            "output of {} bytes cannot hold {} encoded bytes",
            out.len(),
            used
        );
        out.fill(0);

        let mut bit = 0usize;
        for byte in bytes {
            for shift in (0..8).rev() {
                let code = self.code(byte >> shift & 1 == 1);
                for code_shift in (0..self.width).rev() {
                    if code >> code_shift & 1 == 1 {
                        out[swizzle(bit / 8)] |= 0x80 >> (bit % 8);
                    }
                    bit += 1;
                }
            }
        }
        used
    }

    /// Recover `byte_count` payload bytes from an encoded stream
    ///
    /// Returns `None` if any code matches neither bit.
    pub fn decode(&self, stream: &[u8], byte_count: usize) -> Option<Vec<u8>> {
        if stream.len() < encoded_len(byte_count, self.width) {
            return None;
        }

        let mut bit = 0usize;
        let mut bytes = Vec::with_capacity(byte_count);
        for _ in 0..byte_count {
            let mut byte = 0u8;
            for _ in 0..8 {
                let mut code = 0u16;
                for _ in 0..self.width {
                    let set = stream[swizzle(bit / 8)] & (0x80 >> (bit % 8)) != 0;
                    code = code << 1 | set as u16;
                    bit += 1;
                }
                byte <<= 1;
                if code == self.one {
                    byte |= 1;
                } else if code != self.zero {
                    return None;
                }
            }
            bytes.push(byte);
        }
        Some(bytes)
    }
}

/// Layout of the uncached buffer: control block, then pattern data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BufferLayout {
    /// Serializer bits for a full payload
    pub pattern_bits: u64,
    /// Zero bits forming the reset gap
    pub reset_bits: u64,
    /// Byte offset of pattern data (after the control block)
    pub data_offset: usize,
    /// Pattern data bytes, rounded up to whole words; also the DMA length
    pub data_bytes: usize,
    /// Allocation size, rounded up to the page size
    pub total_bytes: usize,
}

impl BufferLayout {
    /// Size the buffer for `config` at `width` bits per payload bit
    ///
    /// Fails when `page_size` is not a power of two or the pattern data
    /// would not fit a single DMA transfer.
    pub fn new(config: &PatternConfig, width: u8, page_size: usize) -> Result<Self, ConfigError> {
        if !page_size.is_power_of_two() {
            return Err(ConfigError::InvalidPageSize(page_size));
        }
        let width = width as u64;
        let pattern_bits = (config.byte_count as u64).saturating_mul(8 * width);
        let reset_bits = (config.reset_delay_us as u64 * config.frequency_hz as u64)
            .saturating_mul(width)
            / 1_000_000;
        let bits = pattern_bits.saturating_add(reset_bits);
        let bytes = bits.div_ceil(32) * 4;
        if bytes > MAX_TRANSFER_BYTES as u64 {
            return Err(ConfigError::BufferTooLarge { bytes });
        }
        let data_bytes = bytes as usize;
        let total_bytes = (DESCRIPTOR_BYTES + data_bytes).next_multiple_of(page_size);
        Ok(Self {
            pattern_bits,
            reset_bits,
            data_offset: DESCRIPTOR_BYTES,
            data_bytes,
            total_bytes,
        })
    }

    /// Word index of the first pattern word
    pub fn data_word(&self) -> usize {
        self.data_offset / 4
    }
}
