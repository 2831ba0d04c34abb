//! Benchmarks for the fixed-point resampler.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion};
use saavy_synth::engine::mixer::resample;
use saavy_synth::instrument::Wave;
use saavy_synth::FRACTION_BITS;

use crate::{BLOCK_SIZES, SAMPLE_RATE};

fn wave(len: usize) -> Wave {
    let data: Arc<[i16]> = (0..len)
        .map(|i| ((i as f32 / len as f32 * std::f32::consts::TAU).sin() * 16_000.0) as i16)
        .collect();
    Wave {
        data,
        sample_rate: SAMPLE_RATE,
        root_freq: 440_000,
        loop_start: 0,
        loop_end: len as u32,
    }
}

pub fn bench_resample(c: &mut Criterion) {
    let mut group = c.benchmark_group("dsp/resample");
    let wave = wave(4_096);
    // A fifth up: fractional increment, interpolation on every sample.
    let increment = ((3 << FRACTION_BITS) / 2) as i32;

    for &size in BLOCK_SIZES {
        let mut buffer = vec![0.0f32; size];

        let mut pos = 0i64;
        let mut inc = increment;
        group.bench_with_input(BenchmarkId::new("loop", size), &size, |b, _| {
            b.iter(|| black_box(resample(&wave, true, false, &mut pos, &mut inc, black_box(&mut buffer))))
        });

        let mut pos = 0i64;
        let mut inc = increment;
        group.bench_with_input(BenchmarkId::new("pingpong", size), &size, |b, _| {
            b.iter(|| black_box(resample(&wave, true, true, &mut pos, &mut inc, black_box(&mut buffer))))
        });
    }

    group.finish();
}
