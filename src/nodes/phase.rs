// src/nodes/phase.rs
//
// Branch-free phase accumulator for power-of-two wavetables.
//
// The running phase (in table samples) is offset by UNIT_BIT32 = 1.5 * 2^20.
// Every double in [2^20, 2^21) has an ulp of 2^-32, so the high 32-bit
// word of the biased value carries the integer part in its low bits and
// the low word carries the fraction. Masking the high word gives the
// table index modulo the table length; restoring the bias's own high word
// and subtracting the bias gives the fraction. No floor, no cast of the
// phase, no wrap branch in the per-sample loop.
//
// At the end of a block the phase is folded back into [0, len) with the
// same trick at bias UNIT_BIT32 * len, whose high word holds the
// multiples of len. Increments are folded into [0, len) the same way, and
// long blocks are renormalized every `chunk_frames` frames, so the cursor
// never leaves the biased binade whatever the frequency.

use crate::audio_buffer::AudioBuffer;
use crate::contract;

use super::tables::{MAX_TABLE_LEN, SampleTable, TableError};

const UNIT_BIT32: f64 = 1_572_864.0;
const UNIT_BIT32_HI: u32 = (UNIT_BIT32.to_bits() >> 32) as u32;
const LOW_WORD: u64 = 0xFFFF_FFFF;

/// Phase excursion (in table samples) a cursor can absorb.
const CURSOR_RANGE: usize = 1 << 19;

#[inline(always)]
fn high_word(x: f64) -> u32 {
    (x.to_bits() >> 32) as u32
}

#[inline(always)]
fn with_high_word(x: f64, hi: u32) -> f64 {
    f64::from_bits(((hi as u64) << 32) | (x.to_bits() & LOW_WORD))
}

/// Phase state for one block.
///
/// Valid while the total excursion stays below 2^19 table samples; the
/// render methods guarantee this, manual users must fold increments and
/// renormalize themselves.
#[derive(Debug, Clone, Copy)]
pub struct PhaseCursor {
    biased: f64,
    mask: u32,
}

impl PhaseCursor {
    /// Table index and interpolation fraction of the current phase.
    #[inline(always)]
    pub fn position(&self) -> (usize, f64) {
        let index = (high_word(self.biased) & self.mask) as usize;
        let frac = with_high_word(self.biased, UNIT_BIT32_HI) - UNIT_BIT32;
        (index, frac)
    }

    #[inline(always)]
    pub fn advance(&mut self, increment: f64) {
        self.biased += increment;
    }

    /// Interpolated table value at the current phase.
    ///
    /// `table` holds one cycle plus the guard sample.
    #[inline(always)]
    pub fn lookup(&self, table: &[f32]) -> f32 {
        let (index, frac) = self.position();
        let f1 = table[index];
        let f2 = table[index + 1];
        f1 + frac as f32 * (f2 - f1)
    }
}

/// Running phase into a table of `len` samples.
#[derive(Debug, Clone)]
pub struct PhaseAccumulator {
    phase: f64,
    len: usize,
    mask: u32,
    wrap_bias: f64,
    wrap_hi: u32,
    /// Largest increment magnitude folded exactly
    fold_limit: f64,
    /// Frames rendered between renormalizations
    chunk_frames: usize,
}

impl PhaseAccumulator {
    pub fn new(len: usize) -> Result<Self, TableError> {
        if len == 0 {
            return Err(TableError::Empty);
        }
        if !len.is_power_of_two() {
            return Err(TableError::NotPowerOfTwo(len));
        }
        if len > MAX_TABLE_LEN {
            return Err(TableError::TooLarge {
                len,
                max: MAX_TABLE_LEN,
            });
        }
        Ok(Self::with_len(len))
    }

    /// Accumulator sized for `table`. Sample tables are always valid.
    pub fn for_table(table: &SampleTable) -> Self {
        Self::with_len(table.len())
    }

    fn with_len(len: usize) -> Self {
        let wrap_bias = UNIT_BIT32 * len as f64;
        Self {
            phase: 0.0,
            len,
            mask: (len - 1) as u32,
            wrap_bias,
            wrap_hi: high_word(wrap_bias),
            fold_limit: len as f64 * (CURSOR_RANGE / 2) as f64,
            chunk_frames: (CURSOR_RANGE / len).saturating_sub(1).max(1),
        }
    }

    #[inline]
    pub fn table_len(&self) -> usize {
        self.len
    }

    /// Current phase in table samples, in `[0, len)`.
    #[inline]
    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub fn set_phase(&mut self, phase: f64) {
        self.phase = phase.rem_euclid(self.len as f64);
    }

    /// Offset the phase by `samples` table samples (may be negative).
    pub fn add_phase(&mut self, samples: f64) {
        self.set_phase(self.phase + samples);
    }

    /// Fold a per-frame increment into `[0, len)`.
    ///
    /// NaN advances nothing; magnitudes beyond what a cursor can absorb
    /// saturate first.
    #[inline(always)]
    pub fn fold_increment(&self, increment: f64) -> f64 {
        let increment = if increment.is_nan() { 0.0 } else { increment };
        let increment = increment.clamp(-self.fold_limit, self.fold_limit);
        with_high_word(increment + self.wrap_bias, self.wrap_hi) - self.wrap_bias
    }

    /// Start a block at the current phase.
    #[inline]
    pub fn begin(&self) -> PhaseCursor {
        PhaseCursor {
            biased: self.phase + UNIT_BIT32,
            mask: self.mask,
        }
    }

    /// End a block: fold the cursor's phase back into `[0, len)`.
    #[inline]
    pub fn finish(&mut self, cursor: PhaseCursor) {
        contract!(
            (1_048_576.0..2_097_152.0).contains(&cursor.biased),
            "phase moved {} table samples in one block",
            cursor.biased - UNIT_BIT32
        );
        let folded = cursor.biased + (self.wrap_bias - UNIT_BIT32);
        self.phase = with_high_word(folded, self.wrap_hi) - self.wrap_bias;
    }

    /// Fill channel 0 of `out` advancing by a fixed `increment`, then
    /// broadcast to the other channels.
    pub fn render_constant(&mut self, table: &[f32], increment: f64, out: &mut AudioBuffer) {
        contract!(table.len() == self.len + 1, "table has {} samples, expected {}", table.len(), self.len + 1);
        let increment = self.fold_increment(increment);
        let channels = out.channels().max(1);
        for chunk in out.samples_mut().chunks_mut(channels * self.chunk_frames) {
            let mut cursor = self.begin();
            for frame in chunk.chunks_exact_mut(channels) {
                frame[0] = cursor.lookup(table);
                cursor.advance(increment);
            }
            self.finish(cursor);
        }
        out.fill_channels();
    }

    /// Like [`render_constant`](Self::render_constant) but with one
    /// increment per frame, read from channel 0 of `increments`. Each
    /// increment is folded with [`fold_increment`](Self::fold_increment).
    pub fn render_modulated(&mut self, table: &[f32], increments: &AudioBuffer, out: &mut AudioBuffer) {
        contract!(table.len() == self.len + 1, "table has {} samples, expected {}", table.len(), self.len + 1);
        contract!(
            increments.frames() >= out.frames(),
            "{} increments for {} frames",
            increments.frames(),
            out.frames()
        );
        let channels = out.channels().max(1);
        let rate_channels = increments.channels().max(1);
        let chunks = out
            .samples_mut()
            .chunks_mut(channels * self.chunk_frames)
            .zip(increments.samples().chunks(rate_channels * self.chunk_frames));
        for (chunk, rates) in chunks {
            let mut cursor = self.begin();
            for (frame, rate) in chunk.chunks_exact_mut(channels).zip(rates.chunks_exact(rate_channels)) {
                frame[0] = cursor.lookup(table);
                cursor.advance(self.fold_increment(rate[0] as f64));
            }
            self.finish(cursor);
        }
        out.fill_channels();
    }
}
