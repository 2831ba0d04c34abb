//! Benchmarks for low-level DSP primitives.

mod envelope;
mod filter;
mod resample;

pub use envelope::bench_envelope;
pub use filter::bench_filter;
pub use resample::bench_resample;
