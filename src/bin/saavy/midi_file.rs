//! Standard MIDI file to engine events.
//!
//! All tracks are merged into one list. A track's `MidiPort` meta event moves
//! its channels up by 16 per port.

use color_eyre::eyre::{bail, Result as EyreResult, WrapErr};
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::path::Path;

use saavy_synth::io::{EventList, MidiEvent, SysEx, TimedEvent};

pub fn load(path: &Path) -> EyreResult<EventList> {
    let data = std::fs::read(path).wrap_err("failed to read MIDI file")?;
    let smf = Smf::parse(&data).wrap_err("failed to parse MIDI file")?;

    let division = match smf.header.timing {
        Timing::Metrical(ticks) => ticks.as_int(),
        Timing::Timecode(fps, sub) => bail!("SMPTE timing ({} fps, {sub} per frame) is not supported", fps.as_int()),
    };

    let mut events = Vec::new();
    for track in &smf.tracks {
        let mut tick = 0u64;
        let mut port = 0u8;
        for event in track {
            tick += event.delta.as_int() as u64;
            match event.kind {
                TrackEventKind::Midi { channel, message } => {
                    let channel = port.saturating_mul(16).saturating_add(channel.as_int());
                    events.push(TimedEvent::new(tick, convert(channel, message)));
                }
                TrackEventKind::SysEx(data) => match SysEx::parse(data) {
                    Some(sysex) => events.push(TimedEvent::new(tick, MidiEvent::SysEx(sysex))),
                    None => log::trace!("skipping unrecognised sysex at tick {tick} ({} bytes)", data.len()),
                },
                TrackEventKind::Meta(MetaMessage::Tempo(tempo)) => events.push(TimedEvent::new(
                    tick,
                    MidiEvent::Tempo {
                        micros_per_quarter: tempo.as_int(),
                    },
                )),
                TrackEventKind::Meta(MetaMessage::MidiPort(p)) => port = p.as_int(),
                TrackEventKind::Meta(MetaMessage::EndOfTrack) => events.push(TimedEvent::new(tick, MidiEvent::EndOfTrack)),
                _ => {}
            }
        }
    }

    log::debug!(
        "{}: {} tracks, {} events, {division} ticks per quarter",
        path.display(),
        smf.tracks.len(),
        events.len()
    );
    Ok(EventList::new(division, events))
}

fn convert(channel: u8, message: MidiMessage) -> MidiEvent {
    match message {
        MidiMessage::NoteOff { key, vel } => MidiEvent::NoteOff {
            channel,
            key: key.as_int(),
            velocity: vel.as_int(),
        },
        MidiMessage::NoteOn { key, vel } => MidiEvent::NoteOn {
            channel,
            key: key.as_int(),
            velocity: vel.as_int(),
        },
        MidiMessage::Aftertouch { key, vel } => MidiEvent::KeyPressure {
            channel,
            key: key.as_int(),
            pressure: vel.as_int(),
        },
        MidiMessage::Controller { controller, value } => MidiEvent::ControlChange {
            channel,
            controller: controller.as_int(),
            value: value.as_int(),
        },
        MidiMessage::ProgramChange { program } => MidiEvent::ProgramChange {
            channel,
            program: program.as_int(),
        },
        MidiMessage::ChannelAftertouch { vel } => MidiEvent::ChannelPressure {
            channel,
            pressure: vel.as_int(),
        },
        MidiMessage::PitchBend { bend } => MidiEvent::PitchBend {
            channel,
            value: bend.0.as_int() as i16 - 8192,
        },
    }
}
