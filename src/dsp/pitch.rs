//! Frequency and sample-increment math.
//!
//! A voice's pitch is the sum of many small offsets (bend, tuning, vibrato,
//! portamento...) in 1/16 cent units, applied to a base frequency with one
//! table-driven ratio. The result becomes a signed fixed-point increment with
//! [`FRACTION_BITS`](crate::FRACTION_BITS) fractional bits.

use crate::tables::{apply_ratio, Tables, CENT_UNITS, SEMITONE};
use crate::FRACTION_BITS;

/// Pitch-bend wheel range: -8192..=8191.
pub const BEND_CENTER: i32 = 8192;

/// Offset of a 14-bit-centred bend value for a sensitivity given in cents.
#[inline]
pub fn bend_offset(bend: i16, range_cents: u16) -> i32 {
    (bend as i64 * range_cents as i64 * CENT_UNITS as i64 / BEND_CENTER as i64) as i32
}

/// Frequency after applying an offset, saturating at the u32 range.
#[inline]
pub fn offset_frequency(tables: &Tables, freq_mhz: u32, offset: i32) -> u32 {
    apply_ratio(freq_mhz as u64, tables.pitch_ratio(offset)).min(u32::MAX as u64) as u32
}

/// Playback increment for a wave recorded at `wave_rate` with root `root_mhz`,
/// sounding at `freq_mhz` on an output running at `output_rate`.
///
/// Never zero: a voice that should be advancing must move.
pub fn increment(freq_mhz: u32, root_mhz: u32, wave_rate: u32, output_rate: u32) -> i32 {
    let numerator = ((freq_mhz as u128) * (wave_rate as u128)) << FRACTION_BITS;
    let denominator = root_mhz.max(1) as u128 * output_rate.max(1) as u128;
    (numerator / denominator).clamp(1, i32::MAX as u128) as i32
}

/// Independent pitch contributions, each in 1/16 cent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PitchOffsets {
    pub tuning: i32,
    pub temperament: i32,
    pub scale_tuning: i32,
    pub key_scaling: i32,
    pub drum: i32,
    pub chorus: i32,
}

impl PitchOffsets {
    pub fn total(&self) -> i32 {
        self.tuning
            .saturating_add(self.temperament)
            .saturating_add(self.scale_tuning)
            .saturating_add(self.key_scaling)
            .saturating_add(self.drum)
            .saturating_add(self.chorus)
    }
}

/// Linear glide from a previous note's pitch toward zero offset.
#[derive(Debug, Clone, Copy, Default)]
pub struct Portamento {
    offset: i32,
    step: i32,
}

impl Portamento {
    /// Glide from `from` to `to` over `time_ms`.
    pub fn start(from: u8, to: u8, time_ms: u32, sample_rate: u32, control_ratio: u32) -> Self {
        let offset = (from as i32 - to as i32) * SEMITONE;
        let ticks = (time_ms as u64 * sample_rate as u64 / (1000 * control_ratio.max(1) as u64)).max(1);
        let magnitude = ((offset.unsigned_abs() as u64 + ticks - 1) / ticks).max(1) as i32;
        Self {
            offset,
            step: if offset > 0 { -magnitude } else { magnitude },
        }
    }

    pub fn offset(&self) -> i32 {
        self.offset
    }

    pub fn is_active(&self) -> bool {
        self.offset != 0
    }

    /// Advance one control tick, landing exactly on zero.
    pub fn advance(&mut self) {
        if self.offset == 0 {
            return;
        }
        let next = self.offset + self.step;
        self.offset = if (self.offset > 0) != (next > 0) || next == 0 {
            0
        } else {
            next
        };
    }
}
