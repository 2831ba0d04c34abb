//! Per-voice resampling and the stereo mix.

use crate::engine::allocator::VoicePool;
use crate::instrument::Wave;
use crate::synth::voice::Voice;
use crate::tables::Tables;
use crate::{FRACTION_BITS, FRACTION_MASK, MAX_BLOCK_SIZE};

/*
Mixing
======

  for each live voice, in slot order:
      split the block at control-tick boundaries
      for each piece:
          control tick if due (envelopes, LFOs, gains, pitch)
          resample the wave into scratch   (linear interpolation)
          run the voice filter over scratch
          add scratch * (left, right) into the output
          add scratch * send levels into the reverb / chorus / delay buses
  hand the send buses to the effect bus, which adds its wet signal
  clip to [-1, 1]

Every voice keeps its own countdown to the next control tick, so splitting
a render into smaller calls lands the ticks on exactly the same samples.

Loop Modes
----------

  forward loop    past loop_end → wrap to loop_start
  ping-pong       past loop_end → reflect and flip the increment sign;
                  before loop_start → reflect and flip back
  reverse         start at the data end with a negative increment; a looped
                  reverse wave wraps from loop_start to loop_end

A wave that is not (or no longer) looping frees its voice when the read
position leaves the data.
*/

/// Send buses, in `Voice::sends` order.
pub const REVERB: usize = 0;
pub const CHORUS: usize = 1;
pub const DELAY: usize = 2;

/// Receives the three stereo send buses once per render and adds its wet
/// output to the dry mix.
pub trait EffectBus {
    fn process(&mut self, sends: [&[f32]; 3], out: &mut [f32]);

    /// When false, sends are not accumulated at all.
    fn is_active(&self) -> bool {
        true
    }
}

/// Dry output only.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEffects;

impl EffectBus for NoEffects {
    fn process(&mut self, _sends: [&[f32]; 3], _out: &mut [f32]) {}

    fn is_active(&self) -> bool {
        false
    }
}

impl<E: EffectBus + ?Sized> EffectBus for Box<E> {
    fn process(&mut self, sends: [&[f32]; 3], out: &mut [f32]) {
        (**self).process(sends, out)
    }

    fn is_active(&self) -> bool {
        (**self).is_active()
    }
}

pub struct Mixer {
    sample_rate: u32,
    control_ratio: u32,
    scratch: Vec<f32>,
    sends: [Vec<f32>; 3],
}

impl Mixer {
    pub fn new(sample_rate: u32, control_ratio: u32) -> Self {
        Self {
            sample_rate,
            control_ratio: control_ratio.max(1),
            scratch: vec![0.0; MAX_BLOCK_SIZE],
            sends: std::array::from_fn(|_| vec![0.0; MAX_BLOCK_SIZE * 2]),
        }
    }

    /// Render `out.len() / 2` interleaved stereo frames (at most
    /// `MAX_BLOCK_SIZE`) from every live voice.
    pub fn render(&mut self, pool: &mut VoicePool, tables: &Tables, effects: &mut impl EffectBus, out: &mut [f32]) {
        let frames = out.len() / 2;
        debug_assert!(frames <= MAX_BLOCK_SIZE);
        out.fill(0.0);
        let sends_active = effects.is_active();
        if sends_active {
            for bus in &mut self.sends {
                bus[..out.len()].fill(0.0);
            }
        }

        for index in 0..pool.upper_bound() {
            if pool.voice(index).is_free() {
                continue;
            }
            let alive = self.render_voice(pool.voice_mut(index), tables, frames, out, sends_active);
            if !alive {
                pool.free(index);
            }
        }
        pool.trim_upper_bound();

        if sends_active {
            let len = out.len();
            let [reverb, chorus, delay] = &self.sends;
            effects.process([&reverb[..len], &chorus[..len], &delay[..len]], out);
        }

        for s in out.iter_mut() {
            *s = s.clamp(-1.0, 1.0);
        }
    }

    fn render_voice(&mut self, voice: &mut Voice, tables: &Tables, frames: usize, out: &mut [f32], sends_active: bool) -> bool {
        let mut done = 0;
        while done < frames {
            if voice.control_counter == 0 {
                if !voice.control_tick(tables, self.sample_rate) {
                    return false;
                }
                voice.control_counter = self.control_ratio;
            }
            let n = (voice.control_counter as usize).min(frames - done);
            let scratch = &mut self.scratch[..n];

            let (produced, alive) = match voice.wave.as_ref() {
                Some(wave) => {
                    let pingpong = voice.sample.as_ref().is_some_and(|s| s.modes.pingpong);
                    resample(wave, voice.looping, pingpong, &mut voice.position, &mut voice.increment, scratch)
                }
                None => (0, false),
            };

            let (left, right) = (voice.left_gain, voice.right_gain);
            for (frame, &raw) in scratch[..produced].iter().enumerate() {
                let s = voice.filter.process(raw);
                let at = (done + frame) * 2;
                out[at] += s * left;
                out[at + 1] += s * right;
                if sends_active {
                    for (bus, &level) in self.sends.iter_mut().zip(&voice.sends) {
                        if level > 0.0 {
                            bus[at] += s * left * level;
                            bus[at + 1] += s * right * level;
                        }
                    }
                }
            }

            voice.control_counter -= n as u32;
            done += n;
            if !alive {
                return false;
            }
        }
        true
    }
}

/// Read `buf.len()` samples starting at `pos`. Returns how many were produced
/// and whether the wave still has data.
pub fn resample(wave: &Wave, looping: bool, pingpong: bool, pos: &mut i64, inc: &mut i32, buf: &mut [f32]) -> (usize, bool) {
    let data = &wave.data;
    if data.is_empty() {
        return (0, false);
    }
    let last = data.len() - 1;
    let end = wave.end_position();
    let looping = looping && wave.has_loop();
    let (loop_start, loop_end) = wave.loop_positions();
    let loop_len = (loop_end - loop_start).max(1);

    for (k, slot) in buf.iter_mut().enumerate() {
        if looping {
            if *inc > 0 && *pos >= loop_end {
                let over = *pos - loop_end;
                if pingpong {
                    *pos = loop_end - 1 - over % loop_len;
                    *inc = -*inc;
                } else {
                    *pos = loop_start + over % loop_len;
                }
            } else if *inc < 0 && *pos < loop_start {
                let under = loop_start - *pos;
                if pingpong {
                    *pos = loop_start + under % loop_len;
                    *inc = -*inc;
                } else {
                    *pos = loop_end - 1 - (under - 1) % loop_len;
                }
            }
        } else if *pos >= end || *pos < 0 {
            return (k, false);
        }

        let index = ((*pos >> FRACTION_BITS) as usize).min(last);
        let frac = (*pos & FRACTION_MASK) as i32;
        let a = data[index] as i32;
        let b = data[(index + 1).min(last)] as i32;
        let value = a + (((b - a) * frac) >> FRACTION_BITS);
        *slot = value as f32 / 32_768.0;
        *pos += *inc as i64;
    }
    (buf.len(), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const ONE: i32 = 1 << FRACTION_BITS;

    fn ramp(len: usize, loop_start: u32, loop_end: u32) -> Wave {
        Wave {
            data: (0..len as i16).map(|i| i * 100).collect::<Vec<_>>().into(),
            sample_rate: 44_100,
            root_freq: 440_000,
            loop_start,
            loop_end,
        }
    }

    fn read(wave: &Wave, looping: bool, pingpong: bool, start: i64, inc: i32, n: usize) -> (Vec<i32>, bool) {
        let mut pos = start;
        let mut inc = inc;
        let mut buf = vec![0.0; n];
        let (produced, alive) = resample(wave, looping, pingpong, &mut pos, &mut inc, &mut buf);
        let values = buf[..produced].iter().map(|s| (s * 32_768.0).round() as i32 / 100).collect();
        (values, alive)
    }

    #[test]
    fn forward_loop_wraps() {
        let wave = ramp(8, 2, 6);
        let (values, alive) = read(&wave, true, false, 0, ONE, 10);
        assert!(alive);
        assert_eq!(values, vec![0, 1, 2, 3, 4, 5, 2, 3, 4, 5]);
    }

    #[test]
    fn pingpong_reflects() {
        let wave = ramp(8, 2, 6);
        let (values, _) = read(&wave, true, true, 0, ONE, 12);
        assert_eq!(values, vec![0, 1, 2, 3, 4, 5, 5, 4, 3, 2, 2, 3]);
    }

    #[test]
    fn one_shot_ends() {
        let wave = ramp(4, 0, 0);
        let (values, alive) = read(&wave, false, false, 0, ONE, 10);
        assert_eq!(values, vec![0, 1, 2, 3]);
        assert!(!alive);
    }

    #[test]
    fn reverse_one_shot_ends_at_zero() {
        let wave = ramp(4, 0, 0);
        let (values, alive) = read(&wave, false, false, 3 << FRACTION_BITS, -ONE, 10);
        assert_eq!(values, vec![3, 2, 1, 0]);
        assert!(!alive);
    }

    #[test]
    fn interpolates_between_samples() {
        let wave = ramp(4, 0, 0);
        let mut pos = ONE as i64 / 2;
        let mut inc = ONE;
        let mut buf = [0.0f32; 1];
        resample(&wave, false, false, &mut pos, &mut inc, &mut buf);
        assert!((buf[0] * 32_768.0 - 50.0).abs() < 1.0);
    }

    #[test]
    fn chunked_render_matches_single_render() {
        use crate::dsp::envelope::Envelope;
        use crate::instrument::Sample;
        use crate::synth::voice::VoiceStatus;

        struct Judge;
        impl crate::engine::allocator::EvictionJudge for Judge {
            fn is_drum_channel(&self, _: usize) -> bool {
                false
            }
            fn channel_pan(&self, _: usize) -> u8 {
                64
            }
        }

        let tables = Tables::new();
        let build = || {
            let mut pool = VoicePool::new(2);
            let i = pool.allocate(&Judge, &[]);
            let wave = ramp(64, 0, 64);
            let v = pool.voice_mut(i);
            v.sample = Some(Arc::new(Sample::new(wave.clone())));
            v.wave = Some(wave);
            v.looping = true;
            v.base_amp = 0.8;
            v.base_freq = 330_000;
            v.increment = 1;
            v.status = VoiceStatus::On;
            v.amp_env = Envelope::constant(1 << 20);
            v.apply_pitch(&tables, 44_100);
            pool
        };

        let mut whole = build();
        let mut mixer = Mixer::new(44_100, 44);
        let mut a = vec![0.0; 2 * 300];
        mixer.render(&mut whole, &tables, &mut NoEffects, &mut a);

        let mut pieces = build();
        let mut mixer = Mixer::new(44_100, 44);
        let mut b = vec![0.0; 2 * 300];
        let mut offset = 0;
        for chunk in [17usize, 100, 1, 182] {
            mixer.render(&mut pieces, &tables, &mut NoEffects, &mut b[offset * 2..(offset + chunk) * 2]);
            offset += chunk;
        }

        assert_eq!(a, b);
        assert_eq!(whole.voice(0).position, pieces.voice(0).position);
        assert_eq!(whole.voice(0).control_counter, pieces.voice(0).control_counter);
    }
}
