//! Benchmarks for scheduler-driven playback.
//!
//! A few bars of dense material (chords, drums, controller sweeps and pitch
//! bends) rendered from start to end into memory.

use criterion::{BatchSize, Criterion};
use saavy_synth::instrument::ToneBank;
use saavy_synth::io::{BufferSink, EventList, MidiEvent, TimedEvent};
use saavy_synth::{Scheduler, Synth, SynthConfig};

use crate::SAMPLE_RATE;

const DIVISION: u16 = 96;

fn song() -> EventList {
    let mut events = Vec::new();
    let quarter = DIVISION as u64;
    for beat in 0..16u64 {
        let tick = beat * quarter;
        for (i, key) in [48u8, 55, 60, 64].iter().enumerate() {
            events.push(TimedEvent::new(tick, MidiEvent::NoteOn { channel: i as u8, key: key + (beat % 4) as u8, velocity: 90 }));
            events.push(TimedEvent::new(tick + quarter - 1, MidiEvent::NoteOff { channel: i as u8, key: key + (beat % 4) as u8, velocity: 0 }));
        }
        for (offset, drum) in [(0, 36u8), (quarter / 2, 42)] {
            events.push(TimedEvent::new(tick + offset, MidiEvent::NoteOn { channel: 9, key: drum, velocity: 110 }));
            events.push(TimedEvent::new(tick + offset + 4, MidiEvent::NoteOff { channel: 9, key: drum, velocity: 0 }));
        }
        for step in 0..8u64 {
            let value = ((beat * 8 + step) % 128) as u8;
            events.push(TimedEvent::new(tick + step * quarter / 8, MidiEvent::ControlChange { channel: 0, controller: 11, value }));
            events.push(TimedEvent::new(tick + step * quarter / 8, MidiEvent::PitchBend { channel: 1, value: (value as i16 - 64) * 64 }));
        }
    }
    EventList::new(DIVISION, events)
}

pub fn bench_playback(c: &mut Criterion) {
    let mut group = c.benchmark_group("scenarios/playback");
    group.sample_size(10);
    let events = song();

    group.bench_function("sixteen_beats", |b| {
        b.iter_batched(
            || {
                let synth = Synth::new(SynthConfig::new(SAMPLE_RATE), ToneBank::new()).expect("valid config");
                Scheduler::new(synth, events.clone(), BufferSink::new())
            },
            |mut scheduler| scheduler.play().expect("memory sink never fails"),
            BatchSize::LargeInput,
        )
    });

    group.finish();
}
