//! Low Frequency Oscillator (LFO) for per-voice vibrato and tremolo.

use crate::tables::{Tables, LFO_BITS};

/*
Low Frequency Oscillators
=========================

An LFO is simply an oscillator running at sub-audio frequencies. Here it runs
at the control rate (once every `control_ratio` samples), never per sample.

Vocabulary
----------

  phase       u32 that wraps once per cycle. The top bits index the shared
              sine table, so a full turn is exactly 2^32 and wrapping is free.

  step        Phase advance per control tick:

                  step = freq * 2^32 / control_rate

  delay       Control ticks to wait after note-on before the LFO starts to
              move. While delayed the output is exactly zero.

  sweep       Control ticks over which the depth fades in after the delay.
              Vibrato that arrives gradually sounds like a player, vibrato
              that arrives at full depth sounds like a machine.

  bipolar     Output swings positive AND negative (Q15: -32767..=32767).
              Vibrato uses this: pitch goes sharp AND flat.

  unipolar    Output is only positive (Q15: 0..=32767). Tremolo uses this:
              amplitude only ever dips below the nominal level.


Typical LFO Frequencies
-----------------------

    0.5 - 2 Hz      Classic tremolo
    2 - 7 Hz        Vibrato sweet spot (default 5 Hz)
    > 15 Hz         Approaching audio rate, the control rate aliases it


Why fixed point?
----------------

A float phase accumulated for an hour-long pad drifts. A u32 phase wraps
exactly, so the LFO is bit-identical however the audio was chunked.
*/

/// Q15 full scale.
pub const LFO_ONE: i32 = (1 << LFO_BITS) - 1;

/// Frequency used when a controller asks for vibrato but the sample has none.
pub const DEFAULT_VIBRATO_MHZ: u32 = 5_000;

#[derive(Debug, Clone, Default)]
pub struct Lfo {
    phase: u32,
    step: u32,
    delay: u32,
    delay_left: u32,
    sweep: u32,
    sweep_pos: u32,
}

/// Phase increment per control tick for `freq_mhz`.
pub fn phase_step(freq_mhz: u32, sample_rate: u32, control_ratio: u32) -> u32 {
    let numerator = (freq_mhz as u128) << 32;
    let denominator = sample_rate.max(1) as u128 * 1000 / control_ratio.max(1) as u128;
    (numerator / denominator.max(1)).min(u32::MAX as u128) as u32
}

/// Control ticks spanning `ms` milliseconds.
pub fn ms_to_ticks(ms: u32, sample_rate: u32, control_ratio: u32) -> u32 {
    (ms as u64 * sample_rate as u64 / (1000 * control_ratio.max(1) as u64)).min(u32::MAX as u64) as u32
}

impl Lfo {
    pub fn new(step: u32, delay_ticks: u32, sweep_ticks: u32) -> Self {
        Self {
            phase: 0,
            step,
            delay: delay_ticks,
            delay_left: delay_ticks,
            sweep: sweep_ticks,
            sweep_pos: 0,
        }
    }

    /// Restart from phase zero (note-on sync).
    pub fn reset(&mut self) {
        self.phase = 0;
        self.delay_left = self.delay;
        self.sweep_pos = 0;
    }

    pub fn set_step(&mut self, step: u32) {
        self.step = step;
    }

    pub fn is_running(&self) -> bool {
        self.step != 0
    }

    /// Advance one control tick.
    #[inline]
    pub fn advance(&mut self) {
        if self.step == 0 {
            return;
        }
        if self.delay_left > 0 {
            self.delay_left -= 1;
            return;
        }
        if self.sweep_pos < self.sweep {
            self.sweep_pos += 1;
        }
        self.phase = self.phase.wrapping_add(self.step);
    }

    /// Bipolar Q15 output including delay and sweep.
    #[inline]
    pub fn value(&self, tables: &Tables) -> i32 {
        if self.step == 0 || self.delay_left > 0 {
            return 0;
        }
        let raw = tables.sine(self.phase);
        if self.sweep_pos < self.sweep {
            (raw as i64 * self.sweep_pos as i64 / self.sweep as i64) as i32
        } else {
            raw
        }
    }

    /// Unipolar Q15 output.
    #[inline]
    pub fn unipolar(&self, tables: &Tables) -> i32 {
        if self.step == 0 || self.delay_left > 0 {
            return 0;
        }
        bipolar_to_unipolar(self.value(tables))
    }
}

/// Convert a bipolar Q15 value to unipolar.
#[inline]
pub fn bipolar_to_unipolar(bipolar: i32) -> i32 {
    (bipolar + LFO_ONE) / 2
}

/// Scale `depth` by a Q15 LFO value.
#[inline]
pub fn scale_depth(value: i32, depth: i32) -> i32 {
    ((value as i64 * depth as i64) / LFO_ONE as i64) as i32
}
