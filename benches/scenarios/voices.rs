//! Benchmarks for polyphonic renders.
//!
//! Voices are started once and held (sustain pedal down), so every iteration
//! renders the same number of live voices.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion};
use saavy_synth::instrument::ToneBank;
use saavy_synth::io::MidiEvent;
use saavy_synth::{Synth, SynthConfig};

use crate::{BLOCK_SIZES, SAMPLE_RATE};

const VOICE_COUNTS: &[usize] = &[8, 32, 64];

/// A synth with `voices` held notes spread over four channels and programs.
fn held_chord(voices: usize, chorus: bool) -> Synth {
    let mut config = SynthConfig::new(SAMPLE_RATE).with_max_voices(voices * 2);
    if chorus {
        config = config.with_chorus_doubling(6);
    }
    let mut synth = Synth::new(config, ToneBank::new()).expect("valid config");
    for channel in 0..4u8 {
        synth.apply_event(&MidiEvent::ProgramChange {
            channel,
            program: channel * 16 + 1,
        });
        synth.apply_event(&MidiEvent::ControlChange {
            channel,
            controller: 64,
            value: 127,
        });
        synth.apply_event(&MidiEvent::ControlChange {
            channel,
            controller: 93,
            value: 64,
        });
    }
    let per_note = if chorus { 2 } else { 1 };
    for n in 0..voices / per_note {
        synth.note_on((n % 4) as u8, 36 + (n % 48) as u8, 100);
    }
    synth
}

pub fn bench_voices(c: &mut Criterion) {
    let mut group = c.benchmark_group("scenarios/voices");

    for &size in BLOCK_SIZES {
        let mut buffer = vec![0.0f32; size * 2];

        for &voices in VOICE_COUNTS {
            let mut synth = held_chord(voices, false);
            group.bench_with_input(BenchmarkId::new(format!("poly_{voices}"), size), &size, |b, _| {
                b.iter(|| {
                    synth.render(black_box(&mut buffer));
                })
            });
        }

        // Chorus doubling: same voice count, half the notes
        let mut synth = held_chord(32, true);
        group.bench_with_input(BenchmarkId::new("chorus_32", size), &size, |b, _| {
            b.iter(|| {
                synth.render(black_box(&mut buffer));
            })
        });
    }

    group.finish();
}
