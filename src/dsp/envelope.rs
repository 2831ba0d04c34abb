/*
Staged Envelope Implementation
==============================

This module implements the six-stage envelope that drives both a voice's
amplitude and its modulation envelope (pitch / filter cutoff bias).

Vocabulary
----------

  level       Current output, a fixed-point integer where ENV_MAX (1 << 30)
              means full scale. Integer levels never drift, no matter how long
              a note is held.

  stage       Which segment is running. Stages 0-2 lead up to the sustain
              point, stages 3-5 are the release.

  target      The level the current stage is heading to. Reaching it moves
              the state machine to the next stage.

  rate        Magnitude of the per-control-tick step toward the target. The
              sign of the step is chosen when a stage is entered.

  control tick  Envelopes advance once every `control_ratio` samples, not
              every sample. The step is held for the whole tick.


The Shape
---------

  Level
    MAX ┐   ╱╲
        │  ╱  ╲____
    T2  │ ╱  T1    ╲___________
        │╱                     ╲_ T3
        │                        ╲___ T4
    0   └──────────────────────────────╲──→ ticks
         Attack Hold Decay  Sustain  Rel1 Rel2 Rel3

  Each of the six stages has its own (rate, target) pair. Instruments that
  only need ADSR give stages 1 and 4/5 a target equal to the previous one,
  which makes them pass through instantly.


The State Machine
-----------------

    start ──→ Attack ──→ Hold ──→ Decay ──┬──→ Sustain ──release()──┐
                 │         │        │     │ (sustain hold on)       │
                 │         │        │     └──→ Release1 ←───────────┘
                 └─────────┴────────┴── release() ──→ Release1
                                                        │
                                      Release2 ←────────┘
                                         │
                                      Release3 ──→ Idle (voice freed)

  kill() jumps straight to Release3 with a very fast rate and a zero target.

  Release always starts from the CURRENT level, so an early note-off in the
  middle of the attack does not click.


Overshoot
---------

  A step never carries the level past its target: when `level + step` would
  cross, the level is set to the target exactly and the stage advances. A
  stage whose target already equals the level is skipped in the same tick.
*/

/// Fractional bits of an envelope level.
pub const ENV_BITS: u32 = 30;
/// Full-scale envelope level.
pub const ENV_MAX: i32 = 1 << ENV_BITS;

const STAGES: usize = 6;
const RELEASE_STAGE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStage {
    Attack,
    Hold,
    Decay,
    Sustain,
    Release1,
    Release2,
    Release3,
    Idle,
}

impl EnvelopeStage {
    fn index(self) -> Option<usize> {
        match self {
            EnvelopeStage::Attack => Some(0),
            EnvelopeStage::Hold => Some(1),
            EnvelopeStage::Decay => Some(2),
            EnvelopeStage::Release1 => Some(3),
            EnvelopeStage::Release2 => Some(4),
            EnvelopeStage::Release3 => Some(5),
            EnvelopeStage::Sustain | EnvelopeStage::Idle => None,
        }
    }

    fn from_index(index: usize) -> Self {
        match index {
            0 => EnvelopeStage::Attack,
            1 => EnvelopeStage::Hold,
            2 => EnvelopeStage::Decay,
            3 => EnvelopeStage::Release1,
            4 => EnvelopeStage::Release2,
            5 => EnvelopeStage::Release3,
            _ => EnvelopeStage::Idle,
        }
    }

    pub fn is_release(self) -> bool {
        matches!(
            self,
            EnvelopeStage::Release1 | EnvelopeStage::Release2 | EnvelopeStage::Release3
        )
    }
}

/// Per-stage rates and targets, already converted to control-tick units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeRates {
    pub rates: [i32; STAGES],
    pub targets: [i32; STAGES],
    /// Hold at the end of Decay until released.
    pub sustain: bool,
}

#[derive(Debug, Clone)]
pub struct Envelope {
    rates: EnvelopeRates,
    stage: EnvelopeStage,
    level: i32,
    step: i32,
    target: i32,
}

impl Default for Envelope {
    fn default() -> Self {
        Self::idle()
    }
}

impl Envelope {
    pub fn new(rates: EnvelopeRates) -> Self {
        Self {
            rates,
            stage: EnvelopeStage::Idle,
            level: 0,
            step: 0,
            target: 0,
        }
    }

    /// An envelope that never sounds.
    pub fn idle() -> Self {
        Self::new(EnvelopeRates {
            rates: [ENV_MAX; STAGES],
            targets: [0; STAGES],
            sustain: false,
        })
    }

    /// A flat full-scale envelope for samples that play without one.
    ///
    /// It holds until released or killed, then drops with `release_rate`.
    pub fn constant(release_rate: i32) -> Self {
        let mut env = Self::new(EnvelopeRates {
            rates: [ENV_MAX, ENV_MAX, ENV_MAX, release_rate, release_rate, release_rate],
            targets: [ENV_MAX, ENV_MAX, ENV_MAX, 0, 0, 0],
            sustain: true,
        });
        env.level = ENV_MAX;
        env.stage = EnvelopeStage::Sustain;
        env
    }

    /// Gate on: restart from silence.
    pub fn start(&mut self) {
        self.level = 0;
        self.enter(0);
    }

    /// Gate off: jump to the first release stage from the current level.
    pub fn release(&mut self) {
        match self.stage {
            EnvelopeStage::Idle => {}
            stage if stage.is_release() => {}
            _ => self.enter(RELEASE_STAGE),
        }
    }

    /// Fast fade to silence at `rate`, used for voice kills.
    pub fn kill(&mut self, rate: i32) {
        if self.stage == EnvelopeStage::Idle {
            return;
        }
        self.stage = EnvelopeStage::Release3;
        self.target = 0;
        self.step = -rate.max(1);
        if self.level == 0 {
            self.stage = EnvelopeStage::Idle;
        }
    }

    fn enter(&mut self, mut index: usize) {
        // Skip stages whose target is already reached.
        while index < STAGES {
            let target = self.rates.targets[index];
            if target != self.level {
                let rate = self.rates.rates[index].max(1);
                self.stage = EnvelopeStage::from_index(index);
                self.target = target;
                self.step = if target > self.level { rate } else { -rate };
                return;
            }
            if index == 2 && self.rates.sustain {
                self.stage = EnvelopeStage::Sustain;
                self.step = 0;
                return;
            }
            index += 1;
        }
        self.stage = EnvelopeStage::Idle;
        self.step = 0;
        self.level = 0;
    }

    /// Advance one control tick. Returns false once the envelope has finished.
    pub fn advance(&mut self) -> bool {
        let Some(index) = self.stage.index() else {
            return self.stage != EnvelopeStage::Idle;
        };

        let next = self.level.saturating_add(self.step);
        let crossed = (self.step > 0 && next >= self.target) || (self.step < 0 && next <= self.target);
        if crossed {
            self.level = self.target;
            if index == 2 && self.rates.sustain {
                self.stage = EnvelopeStage::Sustain;
                self.step = 0;
            } else {
                self.enter(index + 1);
            }
        } else {
            self.level = next;
        }

        debug_assert!((0..=ENV_MAX).contains(&self.level));
        self.stage != EnvelopeStage::Idle
    }

    /// Replace the rate of one stage; the running step is updated if it is that stage.
    pub fn set_rate(&mut self, stage: usize, rate: i32) {
        if stage >= STAGES {
            return;
        }
        self.rates.rates[stage] = rate.max(1);
        if self.stage.index() == Some(stage) {
            self.step = self.step.signum() * self.rates.rates[stage];
        }
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    pub fn level_f32(&self) -> f32 {
        self.level as f32 / ENV_MAX as f32
    }

    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    pub fn target(&self) -> i32 {
        self.target
    }

    pub fn step(&self) -> i32 {
        self.step
    }

    pub fn is_active(&self) -> bool {
        self.stage != EnvelopeStage::Idle
    }

    pub fn is_releasing(&self) -> bool {
        self.stage.is_release()
    }

    /// Level held during Sustain.
    pub fn sustain_level(&self) -> i32 {
        self.rates.targets[RELEASE_STAGE - 1]
    }

    /// Control ticks left in the release if it started from the current level.
    pub fn release_ticks(&self) -> u64 {
        self.release_ticks_from(self.level)
    }

    /// Control ticks a release would take starting from `level`.
    pub fn release_ticks_from(&self, level: i32) -> u64 {
        let mut level = level as i64;
        let mut ticks = 0u64;
        for index in RELEASE_STAGE..STAGES {
            let target = self.rates.targets[index] as i64;
            let rate = self.rates.rates[index].max(1) as i64;
            let distance = (target - level).abs();
            ticks += ((distance + rate - 1) / rate) as u64;
            level = target;
        }
        ticks
    }
}

/// Per-tick increment that sweeps the full scale in `time_ms`.
pub fn rate_from_time(time_ms: u32, sample_rate: u32, control_ratio: u32) -> i32 {
    let ticks = (time_ms as u64 * sample_rate as u64) / (1000 * control_ratio.max(1) as u64);
    let ticks = ticks.max(1);
    ((ENV_MAX as u64 + ticks - 1) / ticks).min(ENV_MAX as u64) as i32
}

/// Level for an 8-bit envelope offset (255 = full scale).
pub fn offset_to_level(offset: u8) -> i32 {
    ((offset as i64 * ENV_MAX as i64) / 255) as i32
}

/// Scale a rate by a Q32 ratio, keeping it within `1..=ENV_MAX`.
pub fn scale_rate(rate: i32, ratio: u64) -> i32 {
    let scaled = crate::tables::apply_ratio(rate.max(1) as u64, ratio);
    scaled.clamp(1, ENV_MAX as u64) as i32
}
