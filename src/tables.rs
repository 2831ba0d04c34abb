//! Precomputed lookup tables shared by every voice.

/*
Fixed-Point Conventions
=======================

Pitch and envelope math never touch floating point once a note is running.
The tables below are built once (with f64) when a Synth is created, and every
per-tick computation afterwards is integer arithmetic with explicit scales.

  frequency     milli-Hertz in a u32. A4 = 440_000.

  pitch offset  i32 in 1/16 cent units. One semitone = 1600 units.
                Sums of bend, tuning, vibrato and portamento stay in this unit
                until the very end.

  ratio         u64 with RATIO_BITS (32) fractional bits. An offset becomes a
                ratio through two table lookups:

                    ratio = semitone_ratio[offset / 1600] * cent_ratio[offset % 1600]

                and a frequency is scaled with one widening multiply:

                    freq' = (freq as u128 * ratio as u128) >> 32

  LFO           Q15 sine table indexed by the top bits of a u32 phase.

Amplitude (volume curves, pan gains) stays in f32: it never accumulates, so
there is nothing to drift.
*/

use std::f64::consts::{FRAC_PI_2, TAU};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Pitch offsets are counted in 1/16 cent.
pub const CENT_UNITS: i32 = 16;
pub const SEMITONE: i32 = 100 * CENT_UNITS;
pub const RATIO_BITS: u32 = 32;
pub const RATIO_ONE: u64 = 1 << RATIO_BITS;
pub const LFO_BITS: u32 = 15;
pub const LFO_TABLE_BITS: u32 = 10;
const LFO_TABLE_SIZE: usize = 1 << LFO_TABLE_BITS;
const SEMITONE_RANGE: i32 = 128;

/// Historical tuning systems selectable per channel.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Temperament {
    #[default]
    Equal,
    Pythagorean,
    MeanTone,
    PureMajor,
    PureMinor,
}

// Deviation from equal temperament per pitch class (tonic first), in cents.
const PYTHAGOREAN: [f64; 12] = [0.0, 13.7, 3.9, -5.9, 7.8, -2.0, 11.7, 2.0, 15.6, 5.9, -3.9, 9.8];
const MEAN_TONE: [f64; 12] = [
    0.0, -24.0, -6.8, 10.3, -13.7, 3.4, -20.5, -3.4, -27.4, -10.3, 6.8, -17.1,
];
const PURE_MAJOR: [f64; 12] = [
    0.0, 11.7, 3.9, 15.6, -13.7, -2.0, -9.8, 2.0, 13.7, -15.6, 17.6, -11.7,
];
const PURE_MINOR: [f64; 12] = [
    0.0, 11.7, -7.8, 15.6, -13.7, -2.0, 9.8, 2.0, 13.7, -15.6, 17.6, -11.7,
];

impl Temperament {
    fn cents(self) -> Option<&'static [f64; 12]> {
        match self {
            Temperament::Equal => None,
            Temperament::Pythagorean => Some(&PYTHAGOREAN),
            Temperament::MeanTone => Some(&MEAN_TONE),
            Temperament::PureMajor => Some(&PURE_MAJOR),
            Temperament::PureMinor => Some(&PURE_MINOR),
        }
    }

    /// Offset of `note` from equal temperament, with `key` as the tonic.
    pub fn offset(self, key: u8, note: u8) -> i32 {
        match self.cents() {
            None => 0,
            Some(table) => {
                let class = (note as usize + 12 - (key as usize % 12)) % 12;
                (table[class] * CENT_UNITS as f64).round() as i32
            }
        }
    }
}

/// Portamento glide time for a CC5 value: 1 ms at 0, 8 s at 127.
pub fn portamento_time_ms(value: u8) -> u32 {
    8000f64.powf(value.min(127) as f64 / 127.0).round() as u32
}

pub struct Tables {
    note_freq: [u32; 128],
    semitone_ratio: [u64; 2 * SEMITONE_RANGE as usize],
    cent_ratio: Box<[u64]>,
    volume: [f32; 128],
    pan_left: [f32; 128],
    pan_right: [f32; 128],
    sine: [i32; LFO_TABLE_SIZE],
}

impl Default for Tables {
    fn default() -> Self {
        Self::new()
    }
}

impl Tables {
    pub fn new() -> Self {
        let note_freq = std::array::from_fn(|n| {
            (440_000.0 * 2f64.powf((n as f64 - 69.0) / 12.0)).round() as u32
        });
        let semitone_ratio = std::array::from_fn(|i| {
            let semis = i as i32 - SEMITONE_RANGE;
            (2f64.powf(semis as f64 / 12.0) * RATIO_ONE as f64).round() as u64
        });
        let cent_ratio = (0..SEMITONE)
            .map(|u| (2f64.powf(u as f64 / (12.0 * SEMITONE as f64)) * RATIO_ONE as f64).round() as u64)
            .collect();
        let volume = std::array::from_fn(|v| {
            let x = v as f32 / 127.0;
            x * x
        });
        let pan_angle = |p: usize| (p.max(1) - 1) as f64 / 126.0 * FRAC_PI_2;
        let pan_left = std::array::from_fn(|p| pan_angle(p).cos() as f32);
        let pan_right = std::array::from_fn(|p| pan_angle(p).sin() as f32);
        let sine = std::array::from_fn(|i| {
            let phase = i as f64 / LFO_TABLE_SIZE as f64 * TAU;
            (phase.sin() * ((1 << LFO_BITS) - 1) as f64).round() as i32
        });

        Self {
            note_freq,
            semitone_ratio,
            cent_ratio,
            volume,
            pan_left,
            pan_right,
            sine,
        }
    }

    /// Equal-temperament frequency of `note` in milli-Hertz.
    #[inline]
    pub fn note_freq(&self, note: u8) -> u32 {
        self.note_freq[note.min(127) as usize]
    }

    /// Ratio (Q32) for a pitch offset in 1/16 cent, saturating at ±128 semitones.
    #[inline]
    pub fn pitch_ratio(&self, offset: i32) -> u64 {
        let semis = offset.div_euclid(SEMITONE);
        let (semis, rest) = if semis < -SEMITONE_RANGE {
            (-SEMITONE_RANGE, 0)
        } else if semis >= SEMITONE_RANGE {
            (SEMITONE_RANGE - 1, 0)
        } else {
            (semis, offset.rem_euclid(SEMITONE))
        };
        let coarse = self.semitone_ratio[(semis + SEMITONE_RANGE) as usize];
        apply_ratio(coarse, self.cent_ratio[rest as usize])
    }

    /// Same as [`pitch_ratio`](Self::pitch_ratio), for the float filter path.
    #[inline]
    pub fn pitch_ratio_f32(&self, offset: i32) -> f32 {
        (self.pitch_ratio(offset) as f64 / RATIO_ONE as f64) as f32
    }

    /// Squared-law gain for a 7-bit volume, expression or velocity value.
    #[inline]
    pub fn volume(&self, value: u8) -> f32 {
        self.volume[value.min(127) as usize]
    }

    /// Equal-power (left, right) gains for a 7-bit pan position.
    #[inline]
    pub fn pan_gains(&self, pan: u8) -> (f32, f32) {
        let p = pan.min(127) as usize;
        (self.pan_left[p], self.pan_right[p])
    }

    /// Q15 sine of a full-range u32 phase.
    #[inline]
    pub fn sine(&self, phase: u32) -> i32 {
        self.sine[(phase >> (32 - LFO_TABLE_BITS)) as usize]
    }
}

/// Scale `value` by a Q32 ratio.
#[inline]
pub fn apply_ratio(value: u64, ratio: u64) -> u64 {
    ((value as u128 * ratio as u128) >> RATIO_BITS) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a4_is_440() {
        let tables = Tables::new();
        assert_eq!(tables.note_freq(69), 440_000);
        assert_eq!(tables.note_freq(81), 880_000);
    }

    #[test]
    fn octave_offset_doubles() {
        let tables = Tables::new();
        let up = tables.pitch_ratio(12 * SEMITONE);
        let down = tables.pitch_ratio(-12 * SEMITONE);
        assert_eq!(up, 2 * RATIO_ONE);
        assert_eq!(down, RATIO_ONE / 2);
        assert_eq!(tables.pitch_ratio(0), RATIO_ONE);
    }

    #[test]
    fn fractional_offsets_are_monotonic() {
        let tables = Tables::new();
        let mut last = tables.pitch_ratio(-SEMITONE * 3);
        for offset in (-SEMITONE * 3 + 1)..(SEMITONE * 3) {
            let ratio = tables.pitch_ratio(offset);
            assert!(ratio >= last, "ratio decreased at offset {offset}");
            last = ratio;
        }
    }

    #[test]
    fn extreme_offsets_saturate() {
        let tables = Tables::new();
        assert_eq!(tables.pitch_ratio(i32::MAX), tables.pitch_ratio(127 * SEMITONE));
        assert_eq!(tables.pitch_ratio(i32::MIN), tables.pitch_ratio(-128 * SEMITONE));
    }

    #[test]
    fn center_pan_is_equal_power() {
        let tables = Tables::new();
        let (l, r) = tables.pan_gains(64);
        assert!((l * l + r * r - 1.0).abs() < 1e-3);
        assert_eq!(tables.pan_gains(0), tables.pan_gains(1));
        let (hard_l, hard_r) = tables.pan_gains(0);
        assert!((hard_l - 1.0).abs() < 1e-6 && hard_r.abs() < 1e-6);
    }

    #[test]
    fn temperament_is_relative_to_key() {
        assert_eq!(Temperament::Equal.offset(0, 64), 0);
        let e_in_c = Temperament::PureMajor.offset(0, 64);
        let fsharp_in_d = Temperament::PureMajor.offset(2, 66);
        assert_eq!(e_in_c, fsharp_in_d);
        assert!(e_in_c < 0, "just major third sits below equal temperament");
    }

    #[test]
    fn portamento_time_range() {
        assert_eq!(portamento_time_ms(0), 1);
        assert_eq!(portamento_time_ms(127), 8000);
    }
}
