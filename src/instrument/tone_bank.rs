//! Procedural instruments, so the engine plays without patch files.

use std::collections::HashMap;
use std::f64::consts::{PI, TAU};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::{EnvelopeSpec, Instrument, InstrumentProvider, LfoSpec, Sample, SampleFilter, SampleModes, Wave};
use crate::dsp::filter::FilterKind;

/*
Tone Bank
=========

Melodic programs are single-cycle waveforms built by additive synthesis,
looped, and shaped by an envelope. Percussion is rendered once into one-shot
samples that play at a fixed pitch, without envelope, until their data ends.

Waveform Types and Their Character:
-----------------------------------

Sine: The purest tone - a single frequency with no harmonics.
Sawtooth: All harmonics, amplitude falling off as 1/n. Bright, buzzy.
Square: Odd harmonics only, falling off as 1/n. Hollow, woody.
Triangle: Odd harmonics falling off as 1/n². Soft, flute-like.
Noise: Random samples, no pitch. Used only for percussion.

Harmonics are summed up to HARMONICS, so even the sawtooth stays clear of
aliasing across the keyboard at the recorded rate.

The sixteen General MIDI families (program / 8) each get one preset.
*/

/// Recording rate of melodic waves; a 256-frame period is then exactly 172 Hz.
const MELODIC_RATE: u32 = 256 * 172;
const PERIOD: usize = 256;
const PERIODS: usize = 8;
const ROOT_MHZ: u32 = 172_000;
const HARMONICS: usize = 32;
const DRUM_RATE: u32 = 44_100;
const PEAK: f64 = 0.8 * i16::MAX as f64;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Saw,
    Square,
    Triangle,
}

impl Waveform {
    fn harmonic(self, k: usize) -> f64 {
        let k_f = k as f64;
        match self {
            Waveform::Sine => {
                if k == 1 {
                    1.0
                } else {
                    0.0
                }
            }
            Waveform::Saw => 2.0 / (PI * k_f),
            Waveform::Square => {
                if k % 2 == 1 {
                    4.0 / (PI * k_f)
                } else {
                    0.0
                }
            }
            Waveform::Triangle => {
                if k % 2 == 1 {
                    let sign = if (k / 2) % 2 == 0 { 1.0 } else { -1.0 };
                    sign * 8.0 / (PI * PI * k_f * k_f)
                } else {
                    0.0
                }
            }
        }
    }

    /// One looped wave of `PERIODS` cycles.
    pub fn render(self) -> Wave {
        let len = PERIOD * PERIODS;
        let raw: Vec<f64> = (0..len)
            .map(|i| {
                let x = i as f64 / PERIOD as f64;
                (1..=HARMONICS)
                    .map(|k| self.harmonic(k) * (TAU * k as f64 * x).sin())
                    .sum()
            })
            .collect();
        Wave {
            data: normalize(&raw),
            sample_rate: MELODIC_RATE,
            root_freq: ROOT_MHZ,
            loop_start: 0,
            loop_end: len as u32,
        }
    }
}

fn normalize(raw: &[f64]) -> Arc<[i16]> {
    let peak = raw.iter().fold(0.0f64, |acc, x| acc.max(x.abs())).max(1e-9);
    raw.iter()
        .map(|x| (x / peak * PEAK).round() as i16)
        .collect()
}

struct Preset {
    waveform: Waveform,
    env: EnvelopeSpec,
    filter: Option<(FilterKind, u32, i32)>,
    vibrato: bool,
}

const fn preset(waveform: Waveform, env: EnvelopeSpec) -> Preset {
    Preset {
        waveform,
        env,
        filter: None,
        vibrato: false,
    }
}

fn family_preset(program: u8) -> Preset {
    match program / 8 {
        // Piano, chromatic percussion: struck, no sustain.
        0 => preset(Waveform::Triangle, non_sustaining(EnvelopeSpec::adsr(2, 1500, 0, 300))),
        1 => preset(Waveform::Sine, non_sustaining(EnvelopeSpec::adsr(1, 800, 0, 400))),
        2 => Preset {
            vibrato: true,
            ..preset(Waveform::Square, EnvelopeSpec::adsr(10, 50, 230, 80))
        },
        3 => preset(Waveform::Triangle, non_sustaining(EnvelopeSpec::adsr(2, 900, 0, 200))),
        4 => Preset {
            filter: Some((FilterKind::Ladder, 900, 30)),
            ..preset(Waveform::Saw, EnvelopeSpec::adsr(3, 400, 160, 120))
        },
        5 | 6 => Preset {
            vibrato: true,
            filter: Some((FilterKind::StateVariable, 4_000, 0)),
            ..preset(Waveform::Saw, EnvelopeSpec::adsr(60, 300, 210, 350))
        },
        7 => Preset {
            filter: Some((FilterKind::StateVariable, 2_500, 20)),
            ..preset(Waveform::Saw, EnvelopeSpec::adsr(30, 200, 220, 150))
        },
        8 | 9 => Preset {
            vibrato: true,
            ..preset(Waveform::Square, EnvelopeSpec::adsr(40, 200, 200, 150))
        },
        10 => Preset {
            filter: Some((FilterKind::Ladder, 3_000, 60)),
            ..preset(Waveform::Saw, EnvelopeSpec::adsr(5, 300, 200, 200))
        },
        11 => Preset {
            vibrato: true,
            ..preset(Waveform::Triangle, EnvelopeSpec::adsr(400, 800, 200, 900))
        },
        12 => preset(Waveform::Square, EnvelopeSpec::adsr(200, 600, 150, 600)),
        13 => preset(Waveform::Triangle, non_sustaining(EnvelopeSpec::adsr(1, 700, 0, 250))),
        _ => preset(Waveform::Sine, EnvelopeSpec::adsr(10, 400, 180, 300)),
    }
}

const fn non_sustaining(mut env: EnvelopeSpec) -> EnvelopeSpec {
    env.sustain = false;
    env
}

fn melodic(program: u8) -> Instrument {
    let preset = family_preset(program);
    let mut sample = Sample::new(preset.waveform.render());
    sample.amp_env = preset.env;
    sample.amp_env.key_follow = 8;
    if let Some((kind, cutoff_hz, resonance_cb)) = preset.filter {
        sample.filter = SampleFilter {
            kind,
            cutoff_hz,
            resonance_cb,
            vel_to_fc: 1_200,
            vel_to_fc_threshold: 64,
            key_to_fc: 50,
            key_to_fc_break: 60,
            ..SampleFilter::default()
        };
        sample.mod_env = EnvelopeSpec::adsr(5, 300, 0, 200);
        sample.mod_env_to_fc = 1_200;
    }
    if preset.vibrato {
        sample.vibrato = LfoSpec {
            rate_mhz: 5_500,
            depth: 12,
            delay_ms: 250,
            sweep_ms: 300,
        };
    }
    Instrument::new(format!("tone {program}"), vec![sample])
}

#[derive(Debug, Clone, Copy)]
enum DrumSound {
    Kick,
    Snare,
    Rim,
    Clap,
    ClosedHat,
    PedalHat,
    OpenHat,
    Tom(f64),
    Crash,
    Ride,
    Perc(f64),
}

fn drum_sound(note: u8) -> DrumSound {
    match note {
        35 | 36 => DrumSound::Kick,
        37 => DrumSound::Rim,
        38 | 40 => DrumSound::Snare,
        39 => DrumSound::Clap,
        42 => DrumSound::ClosedHat,
        44 => DrumSound::PedalHat,
        46 => DrumSound::OpenHat,
        41 | 43 | 45 | 47 | 48 | 50 => DrumSound::Tom(80.0 + (note as f64 - 41.0) * 18.0),
        49 | 52 | 55 | 57 => DrumSound::Crash,
        51 | 53 | 59 => DrumSound::Ride,
        _ => DrumSound::Perc(200.0 * 2f64.powf((note as f64 - 60.0) / 24.0)),
    }
}

/// Xorshift noise, deterministic so renders are reproducible.
struct Noise(u32);

impl Noise {
    fn next(&mut self) -> f64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 17;
        self.0 ^= self.0 << 5;
        self.0 as f64 / u32::MAX as f64 * 2.0 - 1.0
    }
}

impl DrumSound {
    fn length_s(self) -> f64 {
        match self {
            DrumSound::Kick => 0.35,
            DrumSound::Snare | DrumSound::Clap => 0.25,
            DrumSound::Rim | DrumSound::ClosedHat => 0.08,
            DrumSound::PedalHat => 0.12,
            DrumSound::OpenHat => 0.4,
            DrumSound::Tom(_) => 0.3,
            DrumSound::Crash | DrumSound::Ride => 0.8,
            DrumSound::Perc(_) => 0.2,
        }
    }

    fn render(self, seed: u32) -> Vec<f64> {
        let rate = DRUM_RATE as f64;
        let len = (self.length_s() * rate) as usize;
        let mut noise = Noise(seed.max(1));
        let mut phase = 0.0f64;
        let mut last = 0.0f64;
        (0..len)
            .map(|i| {
                let t = i as f64 / rate;
                let decay = |tau: f64| (-t / tau).exp();
                match self {
                    DrumSound::Kick => {
                        let freq = 50.0 + 100.0 * decay(0.04);
                        phase += TAU * freq / rate;
                        phase.sin() * decay(0.12)
                    }
                    DrumSound::Snare => {
                        phase += TAU * 180.0 / rate;
                        0.5 * phase.sin() * decay(0.05) + 0.6 * noise.next() * decay(0.08)
                    }
                    DrumSound::Rim => {
                        phase += TAU * 1_700.0 / rate;
                        phase.sin() * decay(0.01)
                    }
                    DrumSound::Clap => {
                        let burst = if (t * 100.0) as u32 % 2 == 0 || t > 0.03 { 1.0 } else { 0.3 };
                        noise.next() * burst * decay(0.06)
                    }
                    DrumSound::ClosedHat | DrumSound::PedalHat | DrumSound::OpenHat => {
                        // First difference tilts white noise toward the top end.
                        let n = noise.next();
                        let bright = n - last;
                        last = n;
                        let tau = match self {
                            DrumSound::OpenHat => 0.15,
                            DrumSound::PedalHat => 0.04,
                            _ => 0.02,
                        };
                        bright * decay(tau)
                    }
                    DrumSound::Tom(freq) => {
                        phase += TAU * freq * (1.0 + 0.5 * decay(0.05)) / rate;
                        phase.sin() * decay(0.1)
                    }
                    DrumSound::Crash | DrumSound::Ride => {
                        let n = noise.next();
                        let bright = n - 0.5 * last;
                        last = n;
                        let tau = if matches!(self, DrumSound::Crash) { 0.35 } else { 0.25 };
                        bright * decay(tau)
                    }
                    DrumSound::Perc(freq) => {
                        phase += TAU * freq / rate;
                        phase.sin() * decay(0.05)
                    }
                }
            })
            .collect()
    }

    fn pan(self) -> Option<u8> {
        match self {
            DrumSound::ClosedHat | DrumSound::PedalHat | DrumSound::OpenHat => Some(84),
            DrumSound::Crash => Some(40),
            DrumSound::Ride => Some(90),
            DrumSound::Tom(freq) => Some((40.0 + (freq - 80.0) / 2.0).clamp(30.0, 100.0) as u8),
            _ => None,
        }
    }
}

fn drum_kit() -> Instrument {
    let samples = (27u8..=87)
        .map(|note| {
            let sound = drum_sound(note);
            let wave = Wave {
                data: normalize(&sound.render(0x9E37_79B9 ^ note as u32)),
                sample_rate: DRUM_RATE,
                root_freq: 261_626,
                loop_start: 0,
                loop_end: 0,
            };
            let mut sample = Sample::new(wave);
            sample.low_key = note;
            sample.high_key = note;
            sample.note_to_use = Some(60);
            sample.modes = SampleModes::default();
            sample.panning = sound.pan();
            sample
        })
        .collect();
    Instrument::new("drum kit", samples)
}

/// Built-in provider of procedural instruments.
///
/// Every instrument is generated once and cached.
#[derive(Debug, Default)]
pub struct ToneBank {
    cache: HashMap<(bool, u8), Arc<Instrument>>,
    /// Keyed on the source sample's address. Each entry holds its source
    /// alive, so the address cannot be reused by another sample while the
    /// entry exists; this holds for samples from any provider, not just ours.
    resampled: HashMap<(usize, u8, u32), (Arc<Sample>, Wave)>,
}

impl ToneBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

impl InstrumentProvider for ToneBank {
    fn load(&mut self, is_drum: bool, _bank: u16, program: u8) -> Option<Arc<Instrument>> {
        // One kit serves every drum set number.
        let key = (is_drum, if is_drum { 0 } else { program.min(127) });
        let instrument = self.cache.entry(key).or_insert_with(|| {
            log::debug!("tone bank: building {} {}", if is_drum { "drum kit" } else { "program" }, key.1);
            Arc::new(if is_drum { drum_kit() } else { melodic(program) })
        });
        Some(Arc::clone(instrument))
    }

    fn resampled(&mut self, sample: &Arc<Sample>, note: u8, output_rate: u32) -> Option<Wave> {
        let wave = &sample.wave;
        if !sample.loops() || sample.modes.pingpong || sample.is_fixed_pitch() || output_rate == 0 {
            return None;
        }
        let key = (Arc::as_ptr(sample) as usize, note, output_rate);
        if let Some((_, wave)) = self.resampled.get(&key) {
            return Some(wave.clone());
        }

        // Whole loop cycles at the target pitch, so the seam stays clean.
        let target_mhz = 440_000.0 * 2f64.powf((note as f64 - 69.0) / 12.0);
        let loop_len = (wave.loop_end - wave.loop_start) as f64;
        let cycles = loop_len * wave.root_freq as f64 / (wave.sample_rate as f64 * 1000.0);
        let frames = (cycles * 1000.0 / target_mhz * output_rate as f64).round().max(2.0) as usize;
        let step = loop_len / frames as f64;
        let data: Arc<[i16]> = (0..frames)
            .map(|i| {
                let pos = wave.loop_start as f64 + i as f64 * step;
                let index = pos as usize;
                let frac = pos - index as f64;
                let next = if index + 1 >= wave.loop_end as usize {
                    wave.loop_start as usize
                } else {
                    index + 1
                };
                let a = wave.data[index] as f64;
                let b = wave.data[next] as f64;
                (a + (b - a) * frac).round() as i16
            })
            .collect();
        // Root chosen so the pitch math lands on unit increment for `note`.
        let root_freq = (cycles * 1000.0 * output_rate as f64 / frames as f64).round() as u32;
        let resampled = Wave {
            data,
            sample_rate: output_rate,
            root_freq,
            loop_start: 0,
            loop_end: frames as u32,
        };
        self.resampled.insert(key, (Arc::clone(sample), resampled.clone()));
        Some(resampled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waveforms_are_normalized() {
        for waveform in [Waveform::Sine, Waveform::Saw, Waveform::Square, Waveform::Triangle] {
            let wave = waveform.render();
            let peak = wave.data.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
            assert!(peak > 26_000, "{waveform:?} peak {peak}");
            assert!(wave.has_loop());
        }
    }

    #[test]
    fn test_loop_is_seamless() {
        let wave = Waveform::Sine.render();
        let first = wave.data[0] as i32;
        let last = wave.data[wave.loop_end as usize - 1] as i32;
        let step = (wave.data[1] as i32 - first).abs();
        assert!((first - last).abs() <= step + 1);
    }

    #[test]
    fn test_bank_caches_instruments() {
        let mut bank = ToneBank::new();
        let a = bank.load(false, 0, 10).expect("program");
        let b = bank.load(false, 0, 10).expect("program");
        assert!(Arc::ptr_eq(&a, &b));
        let kit = bank.load(true, 0, 0).expect("kit");
        let other = bank.load(true, 0, 25).expect("kit");
        assert!(Arc::ptr_eq(&kit, &other));
        assert_eq!(bank.cached(), 2);
    }

    #[test]
    fn test_drums_are_fixed_pitch_one_shots() {
        let kit = drum_kit();
        let (_, kick) = kit.layers(36, 100).next().expect("kick");
        assert!(kick.is_fixed_pitch());
        assert!(!kick.loops());
        assert!(!kick.modes.envelope);
        assert_eq!(kit.layers(36, 100).count(), 1);
    }

    #[test]
    fn test_resample_cache_survives_dropped_samples() {
        fn looped(len: u32) -> Arc<Sample> {
            Arc::new(Sample::new(Wave {
                data: (0..len).map(|i| (i as i16) * 100).collect(),
                sample_rate: 44_100,
                root_freq: 261_626,
                loop_start: 0,
                loop_end: len,
            }))
        }

        let mut bank = ToneBank::new();
        let first = looped(64);
        assert!(bank.resampled(&first, 60, 48_000).is_some());
        assert_eq!(Arc::strong_count(&first), 2, "cache keeps its source alive");
        drop(first);

        let second = looped(100);
        let cached = bank.resampled(&second, 60, 48_000).expect("resampled");
        let fresh = ToneBank::new().resampled(&second, 60, 48_000).expect("resampled");
        assert_eq!(cached.loop_end, fresh.loop_end);
        assert_eq!(cached.data, fresh.data);
    }

    #[test]
    fn test_resampled_plays_at_unit_rate() {
        let mut bank = ToneBank::new();
        let inst = bank.load(false, 0, 80).expect("program");
        let sample = Arc::clone(&inst.samples[0]);
        let wave = bank.resampled(&sample, 69, 48_000).expect("resampled");
        assert_eq!(wave.sample_rate, 48_000);
        let error = (wave.root_freq as f64 - 440_000.0).abs() / 440_000.0;
        assert!(error < 0.01, "root {} too far from A4", wave.root_freq);
    }
}
