//! Per-channel controller state.

use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::dsp::pitch::bend_offset;
use crate::instrument::Instrument;
use crate::tables::{Tables, Temperament, RATIO_ONE};

/// What happens when a note starts while the same note is already sounding.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssignMode {
    /// The old voice is cut.
    Single,
    /// The old voice of the same layer is released and rings out.
    #[default]
    LimitedMulti,
    /// Voices overlap freely.
    FullMulti,
}

/// Controllers that can drive vibrato depth.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModSource {
    Wheel,
    Bend,
    Pressure,
}

/// Bit set over the 128 note numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct NoteMask(pub u128);

impl NoteMask {
    pub const EMPTY: NoteMask = NoteMask(0);

    pub fn with(self, note: u8) -> Self {
        NoteMask(self.0 | (1u128 << (note & 0x7F)))
    }

    pub fn contains(self, note: u8) -> bool {
        self.0 & (1u128 << (note & 0x7F)) != 0
    }

    pub fn union(self, other: NoteMask) -> Self {
        NoteMask(self.0 | other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Open, pedal and closed hi-hat choke each other on drum channels.
pub const HI_HAT_GROUP: NoteMask = NoteMask((1 << 42) | (1 << 44) | (1 << 46));

/// Vibrato depth, in cents, reached by each controller at full travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModRouting {
    pub wheel: u16,
    pub bend: u16,
    pub pressure: u16,
}

impl Default for ModRouting {
    fn default() -> Self {
        Self {
            wheel: 50,
            bend: 0,
            pressure: 0,
        }
    }
}

impl ModRouting {
    pub fn set(&mut self, source: ModSource, cents: u16) {
        match source {
            ModSource::Wheel => self.wheel = cents,
            ModSource::Bend => self.bend = cents,
            ModSource::Pressure => self.pressure = cents,
        }
    }
}

/// Per-note overrides of a drum channel. Offsets are centred on zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrumPart {
    pub coarse: i8,
    pub fine: i8,
    pub level: u8,
    pub pan: Option<u8>,
    pub reverb: Option<u8>,
    pub chorus: Option<u8>,
    pub delay: Option<u8>,
    pub cutoff: i8,
    pub resonance: i8,
    pub attack: i8,
    pub decay: i8,
}

impl Default for DrumPart {
    fn default() -> Self {
        Self {
            coarse: 0,
            fine: 0,
            level: 127,
            pan: None,
            reverb: None,
            chorus: None,
            delay: None,
            cutoff: 0,
            resonance: 0,
            attack: 0,
            decay: 0,
        }
    }
}

/// Channel-wide NRPN offsets, centred on zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelNrpn {
    pub vibrato_rate: i8,
    pub vibrato_depth: i8,
    pub vibrato_delay: i8,
    pub cutoff: i8,
    pub resonance: i8,
    pub attack: i8,
    pub decay: i8,
    pub release: i8,
}

/// Which parameter number the data-entry controllers address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamSelect {
    #[default]
    None,
    Rpn { msb: u8, lsb: u8 },
    Nrpn { msb: u8, lsb: u8 },
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub program: u8,
    pub bank_msb: u8,
    pub bank_lsb: u8,
    pub is_drum: bool,
    pub instrument: Option<Arc<Instrument>>,
    /// Last program load failed; don't ask the provider again until it changes.
    pub missing: bool,

    pub volume: u8,
    pub expression: u8,
    pub pan: u8,
    pub pitch_bend: i16,
    /// Bend sensitivity in cents.
    pub bend_range: u16,
    /// Fine tuning in 1/16 cent.
    pub fine_tune: i32,
    pub coarse_tune: i8,
    pub mod_wheel: u8,
    pub pressure: u8,
    pub modulation: ModRouting,

    pub sustain: bool,
    pub sostenuto: bool,
    pub soft_pedal: u8,

    pub portamento: bool,
    pub portamento_time: u8,
    /// CC84: glide the next note from this key.
    pub portamento_control: Option<u8>,
    pub last_note: Option<u8>,

    pub reverb_send: u8,
    pub chorus_send: u8,
    pub delay_send: u8,

    pub scale_tuning: [i8; 12],
    pub temperament: Temperament,
    pub temperament_key: u8,
    pub assign_mode: AssignMode,
    pub alt_assign: NoteMask,
    pub mono: bool,

    pub drums: Vec<DrumPart>,
    pub nrpn: ChannelNrpn,
    pub param: ParamSelect,
    pub data_msb: u8,

    pitch_factor: Option<(i16, u16, u64)>,
}

impl Channel {
    pub fn new(is_drum: bool) -> Self {
        Self {
            program: 0,
            bank_msb: 0,
            bank_lsb: 0,
            is_drum,
            instrument: None,
            missing: false,
            volume: 100,
            expression: 127,
            pan: 64,
            pitch_bend: 0,
            bend_range: 200,
            fine_tune: 0,
            coarse_tune: 0,
            mod_wheel: 0,
            pressure: 0,
            modulation: ModRouting::default(),
            sustain: false,
            sostenuto: false,
            soft_pedal: 0,
            portamento: false,
            portamento_time: 0,
            portamento_control: None,
            last_note: None,
            reverb_send: 40,
            chorus_send: 0,
            delay_send: 0,
            scale_tuning: [0; 12],
            temperament: Temperament::Equal,
            temperament_key: 0,
            assign_mode: AssignMode::default(),
            alt_assign: if is_drum { HI_HAT_GROUP } else { NoteMask::EMPTY },
            mono: false,
            drums: vec![DrumPart::default(); 128],
            nrpn: ChannelNrpn::default(),
            param: ParamSelect::None,
            data_msb: 0,
            pitch_factor: None,
        }
    }

    /// Back to power-on state, keeping the drum assignment.
    pub fn reset(&mut self) {
        let is_drum = self.is_drum;
        let drums = std::mem::take(&mut self.drums);
        *self = Self {
            drums,
            ..Self::new(is_drum)
        };
        self.drums.fill(DrumPart::default());
    }

    /// CC121: controllers only, program and tuning setup are kept.
    pub fn reset_controllers(&mut self) {
        self.expression = 127;
        self.pitch_bend = 0;
        self.mod_wheel = 0;
        self.pressure = 0;
        self.sustain = false;
        self.sostenuto = false;
        self.soft_pedal = 0;
        self.portamento_control = None;
        self.param = ParamSelect::None;
    }

    pub fn set_drum(&mut self, drum: bool) {
        if self.is_drum != drum {
            self.is_drum = drum;
            self.alt_assign = if drum { HI_HAT_GROUP } else { NoteMask::EMPTY };
            self.instrument = None;
            self.missing = false;
        }
    }

    /// Bank number as seen by instrument providers.
    pub fn bank(&self) -> u16 {
        ((self.bank_msb as u16) << 7) | self.bank_lsb as u16
    }

    pub fn drum(&self, note: u8) -> &DrumPart {
        &self.drums[(note & 0x7F) as usize]
    }

    pub fn drum_mut(&mut self, note: u8) -> &mut DrumPart {
        &mut self.drums[(note & 0x7F) as usize]
    }

    /// Bend ratio (Q32), cached until the bend or its range changes.
    pub fn pitch_factor(&mut self, tables: &Tables) -> u64 {
        match self.pitch_factor {
            Some((bend, range, ratio)) if bend == self.pitch_bend && range == self.bend_range => ratio,
            _ => {
                let ratio = if self.pitch_bend == 0 {
                    RATIO_ONE
                } else {
                    tables.pitch_ratio(bend_offset(self.pitch_bend, self.bend_range))
                };
                self.pitch_factor = Some((self.pitch_bend, self.bend_range, ratio));
                ratio
            }
        }
    }

    /// Vibrato depth requested by the controllers, in cents.
    pub fn controller_vibrato_cents(&self) -> i32 {
        let wheel = self.modulation.wheel as i32 * self.mod_wheel as i32 / 127;
        let pressure = self.modulation.pressure as i32 * self.pressure as i32 / 127;
        let bend = self.modulation.bend as i32 * (self.pitch_bend as i32).abs() / 8192;
        wheel + pressure + bend
    }

    pub fn assign_mode(&self) -> AssignMode {
        if self.mono {
            AssignMode::Single
        } else {
            self.assign_mode
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_mask_membership() {
        let mask = NoteMask::EMPTY.with(0).with(127).with(64);
        assert!(mask.contains(0) && mask.contains(127) && mask.contains(64));
        assert!(!mask.contains(63));
        assert!(HI_HAT_GROUP.contains(42) && HI_HAT_GROUP.contains(46));
    }

    #[test]
    fn pitch_factor_is_cached_per_bend() {
        let tables = Tables::new();
        let mut channel = Channel::new(false);
        assert_eq!(channel.pitch_factor(&tables), RATIO_ONE);
        channel.pitch_bend = 8191;
        let up = channel.pitch_factor(&tables);
        assert!(up > RATIO_ONE);
        assert_eq!(channel.pitch_factor(&tables), up);
        channel.bend_range = 1200;
        assert!(channel.pitch_factor(&tables) > up);
    }

    #[test]
    fn reset_keeps_drum_assignment() {
        let mut channel = Channel::new(true);
        channel.volume = 3;
        channel.drum_mut(38).level = 10;
        channel.reset();
        assert!(channel.is_drum);
        assert_eq!(channel.volume, 100);
        assert_eq!(channel.drum(38).level, 127);
        assert_eq!(channel.alt_assign, HI_HAT_GROUP);
    }

    #[test]
    fn mono_forces_single_assign() {
        let mut channel = Channel::new(false);
        assert_eq!(channel.assign_mode(), AssignMode::LimitedMulti);
        channel.mono = true;
        assert_eq!(channel.assign_mode(), AssignMode::Single);
    }
}
