use crate::synth::channel::{AssignMode, ModSource, NoteMask};
use crate::tables::Temperament;

/// One channel message or meta event. Closed set: the synth matches every
/// variant exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8, velocity: u8 },
    KeyPressure { channel: u8, key: u8, pressure: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    ChannelPressure { channel: u8, pressure: u8 },
    /// Centred bend, -8192..=8191.
    PitchBend { channel: u8, value: i16 },
    Tempo { micros_per_quarter: u32 },
    SysEx(SysEx),
    EndOfTrack,
}

impl MidiEvent {
    pub fn channel(&self) -> Option<u8> {
        match *self {
            MidiEvent::NoteOn { channel, .. }
            | MidiEvent::NoteOff { channel, .. }
            | MidiEvent::KeyPressure { channel, .. }
            | MidiEvent::ControlChange { channel, .. }
            | MidiEvent::ProgramChange { channel, .. }
            | MidiEvent::ChannelPressure { channel, .. }
            | MidiEvent::PitchBend { channel, .. } => Some(channel),
            MidiEvent::Tempo { .. } | MidiEvent::SysEx(_) | MidiEvent::EndOfTrack => None,
        }
    }

    /// Events that start sounds; a seek skips these while replaying state.
    pub fn is_note(&self) -> bool {
        matches!(self, MidiEvent::NoteOn { .. } | MidiEvent::NoteOff { .. })
    }
}

/// The system-exclusive messages the engine understands, already decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysEx {
    GmReset,
    GsReset,
    XgReset,
    /// 14-bit master volume.
    MasterVolume(u16),
    DrumChannel { channel: u8, drum: bool },
    /// Per pitch class, in cents.
    ScaleTuning { channel: u8, cents: [i8; 12] },
    Temperament { channel: u8, temperament: Temperament, key: u8 },
    AssignMode { channel: u8, mode: AssignMode },
    AltAssign { channel: u8, group: NoteMask },
    /// LFO pitch depth reached by a controller at full travel.
    ModDepth { channel: u8, source: ModSource, cents: u16 },
}

const ROLAND: u8 = 0x41;
const YAMAHA: u8 = 0x43;
const NON_COMMERCIAL: u8 = 0x7D;
const UNIVERSAL_NON_REALTIME: u8 = 0x7E;
const UNIVERSAL_REALTIME: u8 = 0x7F;

/// GS part number to channel: part 0 is the rhythm part on channel 10.
fn gs_part_channel(part: u8) -> u8 {
    match part {
        0 => 9,
        1..=9 => part - 1,
        _ => part,
    }
}

impl SysEx {
    /// Decode a raw message, with or without the F0/F7 framing.
    pub fn parse(raw: &[u8]) -> Option<SysEx> {
        let body = raw.strip_prefix(&[0xF0]).unwrap_or(raw);
        let body = body.strip_suffix(&[0xF7]).unwrap_or(body);
        match *body.first()? {
            UNIVERSAL_NON_REALTIME => match body.get(2..4)? {
                [0x09, 0x01] | [0x09, 0x03] => Some(SysEx::GmReset),
                _ => None,
            },
            UNIVERSAL_REALTIME => match body.get(2..)? {
                [0x04, 0x01, lsb, msb, ..] => Some(SysEx::MasterVolume(((*msb as u16) << 7) | *lsb as u16)),
                _ => None,
            },
            ROLAND => Self::parse_gs(body),
            YAMAHA => match body.get(2..)? {
                [0x4C, 0x00, 0x00, 0x7E, 0x00, ..] => Some(SysEx::XgReset),
                _ => None,
            },
            NON_COMMERCIAL => Self::parse_extension(body),
            _ => None,
        }
    }

    fn parse_gs(body: &[u8]) -> Option<SysEx> {
        // 41 dev 42 12 a1 a2 a3 data... checksum
        if body.get(2..4)? != [0x42, 0x12] || body.len() < 8 {
            return None;
        }
        let (payload, checksum) = body[4..].split_at(body.len() - 5);
        let sum: u32 = payload.iter().map(|&b| b as u32).sum::<u32>() + checksum[0] as u32;
        if sum % 128 != 0 {
            log::debug!("GS sysex with bad checksum ignored");
            return None;
        }
        let (address, data) = payload.split_at(3);
        let value = *data.first()?;
        match (address[0], address[1] & 0xF0, address[1] & 0x0F, address[2]) {
            (0x40, 0x00, 0x00, 0x7F) => Some(SysEx::GsReset),
            (0x40, 0x10, part, 0x15) => Some(SysEx::DrumChannel {
                channel: gs_part_channel(part),
                drum: value != 0,
            }),
            (0x40, 0x10, part, 0x14) => Some(SysEx::AssignMode {
                channel: gs_part_channel(part),
                mode: match value {
                    0 => AssignMode::Single,
                    1 => AssignMode::LimitedMulti,
                    _ => AssignMode::FullMulti,
                },
            }),
            (0x40, 0x10, part, 0x40) if data.len() >= 12 => {
                let mut cents = [0i8; 12];
                for (c, &v) in cents.iter_mut().zip(data) {
                    *c = (v.min(127) as i16 - 64) as i8;
                }
                Some(SysEx::ScaleTuning {
                    channel: gs_part_channel(part),
                    cents,
                })
            }
            (0x40, 0x20, part, offset @ (0x04 | 0x14 | 0x24)) => Some(SysEx::ModDepth {
                channel: gs_part_channel(part),
                source: match offset {
                    0x04 => ModSource::Wheel,
                    0x14 => ModSource::Bend,
                    _ => ModSource::Pressure,
                },
                cents: (value.min(127) as u16 * 600) / 127,
            }),
            _ => None,
        }
    }

    /// 7D 01 ch type key: temperament. 7D 02 ch notes...: alternate assign group.
    fn parse_extension(body: &[u8]) -> Option<SysEx> {
        let channel = *body.get(2)?;
        match *body.get(1)? {
            0x01 => {
                let temperament = match *body.get(3)? {
                    0 => Temperament::Equal,
                    1 => Temperament::Pythagorean,
                    2 => Temperament::MeanTone,
                    3 => Temperament::PureMajor,
                    4 => Temperament::PureMinor,
                    _ => return None,
                };
                let key = body.get(4).copied().unwrap_or(0) % 12;
                Some(SysEx::Temperament {
                    channel,
                    temperament,
                    key,
                })
            }
            0x02 => {
                let group = body[3..].iter().fold(NoteMask::EMPTY, |mask, &note| mask.with(note));
                Some(SysEx::AltAssign { channel, group })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedEvent {
    /// Absolute position in ticks.
    pub tick: u64,
    pub event: MidiEvent,
}

impl TimedEvent {
    pub fn new(tick: u64, event: MidiEvent) -> Self {
        Self { tick, event }
    }
}

/// A finite, time-ordered stream of events ending in [`MidiEvent::EndOfTrack`].
pub trait EventSource {
    /// Ticks per quarter note.
    fn division(&self) -> u16;

    /// Event `n` positions past the cursor, without consuming anything.
    fn peek_ahead(&self, n: usize) -> Option<&TimedEvent>;

    fn peek(&self) -> Option<&TimedEvent> {
        self.peek_ahead(0)
    }

    fn next_event(&mut self) -> Option<TimedEvent>;

    /// Move the cursor back to the first event.
    fn rewind(&mut self);
}

/// In-memory event source.
#[derive(Debug, Clone)]
pub struct EventList {
    events: Vec<TimedEvent>,
    cursor: usize,
    division: u16,
}

impl EventList {
    /// Sort `events` by tick (stable, so simultaneous events keep their order)
    /// and terminate the list with a single end marker. The marker sits at the
    /// latest end-of-track tick given, or at the last event if that is later,
    /// so trailing silence before a track's end survives.
    pub fn new(division: u16, mut events: Vec<TimedEvent>) -> Self {
        let declared_end = events
            .iter()
            .filter(|e| e.event == MidiEvent::EndOfTrack)
            .map(|e| e.tick)
            .max();
        events.retain(|e| e.event != MidiEvent::EndOfTrack);
        events.sort_by_key(|e| e.tick);
        let last = events.last().map_or(0, |e| e.tick);
        let end = declared_end.map_or(last, |declared| declared.max(last));
        events.push(TimedEvent::new(end, MidiEvent::EndOfTrack));
        Self {
            events,
            cursor: 0,
            division: division.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }
}

impl EventSource for EventList {
    fn division(&self) -> u16 {
        self.division
    }

    fn peek_ahead(&self, n: usize) -> Option<&TimedEvent> {
        self.events.get(self.cursor + n)
    }

    fn next_event(&mut self) -> Option<TimedEvent> {
        let event = self.events.get(self.cursor).copied();
        if event.is_some() {
            self.cursor += 1;
        }
        event
    }

    fn rewind(&mut self) {
        self.cursor = 0;
    }
}
