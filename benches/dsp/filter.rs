//! Benchmarks for the voice filters.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion};
use saavy_synth::dsp::filter::{FilterKind, FilterParams, VoiceFilter};

use crate::{BLOCK_SIZES, SAMPLE_RATE};

pub fn bench_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("dsp/filter");

    for &size in BLOCK_SIZES {
        // Generate a test signal (sawtooth-like ramp)
        let input: Vec<f32> = (0..size).map(|i| (i as f32 / size as f32) * 2.0 - 1.0).collect();

        for (name, kind) in [("state_variable", FilterKind::StateVariable), ("ladder", FilterKind::Ladder)] {
            let mut filter = VoiceFilter::new(kind);
            filter.set_params(FilterParams::clamped(1_000.0, 6.0, SAMPLE_RATE), SAMPLE_RATE);
            let mut buffer = input.clone();
            group.bench_with_input(BenchmarkId::new(name, size), &size, |b, _| {
                b.iter(|| {
                    buffer.copy_from_slice(&input);
                    for s in buffer.iter_mut() {
                        *s = filter.process(black_box(*s));
                    }
                    black_box(&buffer);
                })
            });
        }

        // Cutoff sweep: new parameters every control tick
        let mut filter = VoiceFilter::new(FilterKind::StateVariable);
        let mut buffer = input.clone();
        group.bench_with_input(BenchmarkId::new("state_variable_sweep", size), &size, |b, _| {
            b.iter(|| {
                buffer.copy_from_slice(&input);
                for (i, block) in buffer.chunks_mut(48).enumerate() {
                    let cutoff = 500.0 + 100.0 * i as f32;
                    filter.set_params(FilterParams::clamped(cutoff, 12.0, SAMPLE_RATE), SAMPLE_RATE);
                    for s in block.iter_mut() {
                        *s = filter.process(*s);
                    }
                }
                black_box(&buffer);
            })
        });
    }

    group.finish();
}
