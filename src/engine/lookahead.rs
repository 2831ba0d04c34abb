//! Early note end for un-looped samples bent past their data.
//!
//! When a note starts on a wave that does not loop, the events ahead of it
//! are scanned until its note-off. If a pitch bend speeds the wave up enough
//! that the data runs out before the key is released, a synthetic note-off is
//! scheduled so the release finishes right as the data ends instead of the
//! voice being cut mid-level.

use crate::dsp::pitch::bend_offset;
use crate::engine::timebase::TimeBase;
use crate::io::midi::{MidiEvent, TimedEvent};
use crate::synth::voice::VoiceLink;
use crate::tables::{apply_ratio, Tables};

/// Events inspected per note before giving up.
pub const MAX_SCAN_EVENTS: usize = 4096;

/// A synthetic note-off for one specific voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingOff {
    pub at: u64,
    pub link: VoiceLink,
}

/// Snapshot of a freshly started voice.
#[derive(Debug, Clone, Copy)]
pub struct ScanVoice {
    pub link: VoiceLink,
    pub channel: u8,
    pub note: u8,
    /// Fixed-point distance to the end of the data in the playback direction.
    pub distance: u64,
    pub increment: u32,
    pub bend: i16,
    pub bend_range: u16,
    pub release_samples: u64,
    pub start_sample: u64,
}

/// Sample time for a synthetic note-off, or `None` if the note ends (or the
/// data runs out without any bend) first.
pub fn scan<'a, I>(voice: &ScanVoice, mut timebase: TimeBase, events: I, tables: &Tables) -> Option<u64>
where
    I: IntoIterator<Item = &'a TimedEvent>,
{
    let base_offset = bend_offset(voice.bend, voice.bend_range);
    let mut increment = voice.increment.max(1) as u64;
    let mut distance = voice.distance;
    let mut now = voice.start_sample;
    let mut bent = false;

    for event in events.into_iter().take(MAX_SCAN_EVENTS) {
        let at = timebase.sample_at(event.tick).max(now);
        let travel = (at - now).saturating_mul(increment);
        if travel >= distance {
            if !bent {
                return None;
            }
            let crossing = now + distance.div_ceil(increment);
            return Some(crossing.saturating_sub(voice.release_samples).max(voice.start_sample));
        }
        distance -= travel;
        now = at;

        match event.event {
            MidiEvent::Tempo { micros_per_quarter } => timebase.set_tempo(event.tick, micros_per_quarter),
            MidiEvent::PitchBend { channel, value } if channel == voice.channel => {
                let delta = bend_offset(value, voice.bend_range) - base_offset;
                increment = apply_ratio(voice.increment.max(1) as u64, tables.pitch_ratio(delta)).max(1);
                bent = true;
            }
            MidiEvent::NoteOff { channel, key, .. } | MidiEvent::NoteOn { channel, key, velocity: 0 }
                if channel == voice.channel && key == voice.note =>
            {
                return None;
            }
            MidiEvent::EndOfTrack => return None,
            _ => {}
        }
    }
    None
}

/// Insert keeping `pending` sorted by time, stable for equal times.
pub fn schedule(pending: &mut Vec<PendingOff>, off: PendingOff) {
    let at = pending.partition_point(|p| p.at <= off.at);
    pending.insert(at, off);
}
