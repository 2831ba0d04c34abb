//! Benchmarks for the fixed-point envelope.
//!
//! One `advance` is one control tick, so a block of N samples costs
//! N / control_ratio advances.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion};
use saavy_synth::config::control_ratio_for;
use saavy_synth::dsp::envelope::Envelope;
use saavy_synth::instrument::{EnvelopeBias, EnvelopeSpec};
use saavy_synth::tables::Tables;

use crate::{BLOCK_SIZES, SAMPLE_RATE};

pub fn bench_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("dsp/envelope");
    let tables = Tables::new();
    let ratio = control_ratio_for(SAMPLE_RATE);
    let rates = |spec: EnvelopeSpec| spec.rates(&tables, 60, 100, EnvelopeBias::default(), SAMPLE_RATE, ratio);

    for &size in BLOCK_SIZES {
        let ticks = (size as u32).div_ceil(ratio);

        // Attack phase (long ramp so it never completes)
        let mut env = Envelope::new(rates(EnvelopeSpec::adsr(60_000, 100, 180, 300)));
        env.start();
        group.bench_with_input(BenchmarkId::new("attack", size), &size, |b, _| {
            b.iter(|| {
                for _ in 0..ticks {
                    black_box(env.advance());
                }
                black_box(env.level())
            })
        });

        // Sustain phase (holding steady)
        let mut env = Envelope::new(rates(EnvelopeSpec::adsr(1, 1, 180, 300)));
        env.start();
        for _ in 0..1_000 {
            env.advance();
        }
        group.bench_with_input(BenchmarkId::new("sustain", size), &size, |b, _| {
            b.iter(|| {
                for _ in 0..ticks {
                    black_box(env.advance());
                }
                black_box(env.level())
            })
        });

        // Release phase (ramping down)
        let mut env = Envelope::new(rates(EnvelopeSpec::adsr(1, 1, 180, 60_000)));
        env.start();
        for _ in 0..1_000 {
            env.advance();
        }
        env.release();
        group.bench_with_input(BenchmarkId::new("release", size), &size, |b, _| {
            b.iter(|| {
                for _ in 0..ticks {
                    black_box(env.advance());
                }
                black_box(env.level())
            })
        });
    }

    group.finish();
}
