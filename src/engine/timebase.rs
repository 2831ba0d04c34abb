//! Musical time (ticks, tempo) to audio time (samples).

/*
Time Base
=========

    samples per tick = sample_rate * tempo / (division * 1_000_000)

  tempo     microseconds per quarter note, carried in-band by Tempo events
  division  ticks per quarter note, fixed for the whole stream

Every tempo change re-anchors the conversion at the tick where it happens:

    anchor_sample = sample_at(change_tick)    (with the OLD tempo)
    anchor_tick   = change_tick

so the interval before a change keeps the sample count it was given. The
conversion is exact integer math on u128, floored, and always measured from
the anchor, so rounding never accumulates across events.
*/

pub const DEFAULT_TEMPO: u32 = 500_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    sample_rate: u32,
    division: u16,
    tempo: u32,
    anchor_tick: u64,
    anchor_sample: u64,
}

impl TimeBase {
    pub fn new(sample_rate: u32, division: u16) -> Self {
        Self {
            sample_rate,
            division: division.max(1),
            tempo: DEFAULT_TEMPO,
            anchor_tick: 0,
            anchor_sample: 0,
        }
    }

    pub fn tempo(&self) -> u32 {
        self.tempo
    }

    pub fn division(&self) -> u16 {
        self.division
    }

    /// Absolute sample position of `tick` under the tempo map seen so far.
    ///
    /// Ticks before the current anchor are clamped to it.
    pub fn sample_at(&self, tick: u64) -> u64 {
        let ticks = tick.saturating_sub(self.anchor_tick) as u128;
        let numerator = ticks * self.sample_rate as u128 * self.tempo as u128;
        let denominator = self.division as u128 * 1_000_000;
        let offset = (numerator / denominator).min(u64::MAX as u128) as u64;
        self.anchor_sample.saturating_add(offset)
    }

    /// Apply a tempo change taking effect at `tick`.
    pub fn set_tempo(&mut self, tick: u64, micros_per_quarter: u32) {
        let at = self.sample_at(tick);
        self.anchor_tick = tick.max(self.anchor_tick);
        self.anchor_sample = at;
        self.tempo = micros_per_quarter.max(1);
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.sample_rate, self.division);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tempo_conversion() {
        // 120 bpm, 480 ticks per quarter: one quarter = 0.5 s.
        let tb = TimeBase::new(44_100, 480);
        assert_eq!(tb.sample_at(480), 22_050);
        assert_eq!(tb.sample_at(0), 0);
    }

    #[test]
    fn tempo_change_is_not_retroactive() {
        let mut tb = TimeBase::new(48_000, 96);
        let before = tb.sample_at(96);
        tb.set_tempo(96, 250_000);
        assert_eq!(tb.sample_at(96), before);
        assert_eq!(tb.sample_at(192) - tb.sample_at(96), 12_000);
    }

    #[test]
    fn no_drift_over_many_events() {
        // 44_100 * 500_000 / (7 * 1e6) is not an integer.
        let tb = TimeBase::new(44_100, 7);
        let direct = tb.sample_at(7_000_000);
        assert_eq!(direct, 22_050 * 1_000_000);
    }

    #[test]
    fn extreme_tempo_saturates() {
        let mut tb = TimeBase::new(192_000, 1);
        tb.set_tempo(0, u32::MAX);
        assert!(tb.sample_at(u64::MAX) >= tb.sample_at(1_000));
    }
}
