//! Controller, parameter-number and SysEx handling for one channel.
//!
//! Everything here only touches [`Channel`] state. What the change means for
//! sounding voices comes back as a [`ControlAction`] that the synth carries
//! out, so this layer stays testable without a voice pool.

use crate::io::midi::SysEx;
use crate::tables::CENT_UNITS;

use super::channel::{Channel, ParamSelect};

/// Voice parameters that must be recomputed after a channel change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Recompute(u8);

impl Recompute {
    pub const NONE: Recompute = Recompute(0);
    pub const AMP: Recompute = Recompute(1);
    pub const PITCH: Recompute = Recompute(2);
    pub const FILTER: Recompute = Recompute(4);
    pub const ALL: Recompute = Recompute(7);

    pub fn union(self, other: Recompute) -> Self {
        Recompute(self.0 | other.0)
    }

    pub fn contains(self, other: Recompute) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    None,
    Recompute(Recompute),
    SustainReleased,
    SostenutoPressed,
    SostenutoReleased,
    AllSoundOff,
    AllNotesOff,
    ResetControllers,
    /// Drum assignment changed: the program must be loaded again.
    Reload,
}

pub mod cc {
    pub const BANK_SELECT: u8 = 0;
    pub const MODULATION: u8 = 1;
    pub const PORTAMENTO_TIME: u8 = 5;
    pub const DATA_ENTRY: u8 = 6;
    pub const VOLUME: u8 = 7;
    pub const PAN: u8 = 10;
    pub const EXPRESSION: u8 = 11;
    pub const BANK_SELECT_LSB: u8 = 32;
    pub const DATA_ENTRY_LSB: u8 = 38;
    pub const SUSTAIN: u8 = 64;
    pub const PORTAMENTO: u8 = 65;
    pub const SOSTENUTO: u8 = 66;
    pub const SOFT_PEDAL: u8 = 67;
    pub const PORTAMENTO_CONTROL: u8 = 84;
    pub const REVERB_SEND: u8 = 91;
    pub const CHORUS_SEND: u8 = 93;
    pub const DELAY_SEND: u8 = 94;
    pub const DATA_INCREMENT: u8 = 96;
    pub const DATA_DECREMENT: u8 = 97;
    pub const NRPN_LSB: u8 = 98;
    pub const NRPN_MSB: u8 = 99;
    pub const RPN_LSB: u8 = 100;
    pub const RPN_MSB: u8 = 101;
    pub const ALL_SOUND_OFF: u8 = 120;
    pub const RESET_CONTROLLERS: u8 = 121;
    pub const ALL_NOTES_OFF: u8 = 123;
    pub const OMNI_OFF: u8 = 124;
    pub const OMNI_ON: u8 = 125;
    pub const MONO_ON: u8 = 126;
    pub const POLY_ON: u8 = 127;
}

fn pedal(value: u8) -> bool {
    value >= 64
}

fn centred(value: u8) -> i8 {
    (value.min(127) as i16 - 64) as i8
}

/// Apply one control change. Out-of-range values are clamped, never rejected.
pub fn apply_controller(channel: &mut Channel, controller: u8, value: u8) -> ControlAction {
    let value = value.min(127);
    match controller {
        cc::BANK_SELECT => channel.bank_msb = value,
        cc::BANK_SELECT_LSB => channel.bank_lsb = value,
        cc::MODULATION => {
            channel.mod_wheel = value;
            return ControlAction::Recompute(Recompute::PITCH);
        }
        cc::PORTAMENTO_TIME => channel.portamento_time = value,
        cc::VOLUME => {
            channel.volume = value;
            return ControlAction::Recompute(Recompute::AMP);
        }
        cc::PAN => {
            channel.pan = value;
            return ControlAction::Recompute(Recompute::AMP);
        }
        cc::EXPRESSION => {
            channel.expression = value;
            return ControlAction::Recompute(Recompute::AMP);
        }
        cc::SUSTAIN => {
            let was = channel.sustain;
            channel.sustain = pedal(value);
            if was && !channel.sustain {
                return ControlAction::SustainReleased;
            }
        }
        cc::PORTAMENTO => channel.portamento = pedal(value),
        cc::SOSTENUTO => {
            let was = channel.sostenuto;
            channel.sostenuto = pedal(value);
            return match (was, channel.sostenuto) {
                (false, true) => ControlAction::SostenutoPressed,
                (true, false) => ControlAction::SostenutoReleased,
                _ => ControlAction::None,
            };
        }
        cc::SOFT_PEDAL => channel.soft_pedal = value,
        cc::PORTAMENTO_CONTROL => channel.portamento_control = Some(value),
        cc::REVERB_SEND => channel.reverb_send = value,
        cc::CHORUS_SEND => channel.chorus_send = value,
        cc::DELAY_SEND => channel.delay_send = value,
        cc::RPN_MSB => channel.param = select_rpn(channel.param, Some(value), None),
        cc::RPN_LSB => channel.param = select_rpn(channel.param, None, Some(value)),
        cc::NRPN_MSB => channel.param = select_nrpn(channel.param, Some(value), None),
        cc::NRPN_LSB => channel.param = select_nrpn(channel.param, None, Some(value)),
        cc::DATA_ENTRY => {
            channel.data_msb = value;
            return data_entry(channel, value, None);
        }
        cc::DATA_ENTRY_LSB => return data_entry(channel, channel.data_msb, Some(value)),
        cc::DATA_INCREMENT => {
            channel.data_msb = channel.data_msb.saturating_add(1).min(127);
            return data_entry(channel, channel.data_msb, None);
        }
        cc::DATA_DECREMENT => {
            channel.data_msb = channel.data_msb.saturating_sub(1);
            return data_entry(channel, channel.data_msb, None);
        }
        cc::ALL_SOUND_OFF => return ControlAction::AllSoundOff,
        cc::RESET_CONTROLLERS => {
            channel.reset_controllers();
            return ControlAction::ResetControllers;
        }
        cc::ALL_NOTES_OFF | cc::OMNI_OFF | cc::OMNI_ON => return ControlAction::AllNotesOff,
        cc::MONO_ON => {
            channel.mono = true;
            return ControlAction::AllNotesOff;
        }
        cc::POLY_ON => {
            channel.mono = false;
            return ControlAction::AllNotesOff;
        }
        other => log::trace!("unhandled controller {other}"),
    }
    ControlAction::None
}

fn select_rpn(current: ParamSelect, msb: Option<u8>, lsb: Option<u8>) -> ParamSelect {
    let (old_msb, old_lsb) = match current {
        ParamSelect::Rpn { msb, lsb } => (msb, lsb),
        _ => (127, 127),
    };
    match (msb.unwrap_or(old_msb), lsb.unwrap_or(old_lsb)) {
        (127, 127) => ParamSelect::None,
        (msb, lsb) => ParamSelect::Rpn { msb, lsb },
    }
}

fn select_nrpn(current: ParamSelect, msb: Option<u8>, lsb: Option<u8>) -> ParamSelect {
    let (old_msb, old_lsb) = match current {
        ParamSelect::Nrpn { msb, lsb } => (msb, lsb),
        _ => (127, 127),
    };
    ParamSelect::Nrpn {
        msb: msb.unwrap_or(old_msb),
        lsb: lsb.unwrap_or(old_lsb),
    }
}

const PITCH: ControlAction = ControlAction::Recompute(Recompute::PITCH);
const FILTER: ControlAction = ControlAction::Recompute(Recompute::FILTER);

fn data_entry(channel: &mut Channel, msb: u8, lsb: Option<u8>) -> ControlAction {
    match channel.param {
        ParamSelect::None => ControlAction::None,
        ParamSelect::Rpn { msb: 0, lsb: 0 } => {
            let semis = msb.min(24) as u16;
            let cents = lsb.map_or(channel.bend_range % 100, |c| c.min(99) as u16);
            channel.bend_range = semis * 100 + cents;
            PITCH
        }
        ParamSelect::Rpn { msb: 0, lsb: 1 } => {
            let value = ((msb as i32) << 7) | lsb.unwrap_or(0) as i32;
            channel.fine_tune = (value - 8192) * 100 * CENT_UNITS / 8192;
            PITCH
        }
        ParamSelect::Rpn { msb: 0, lsb: 2 } => {
            channel.coarse_tune = centred(msb).clamp(-24, 24);
            PITCH
        }
        ParamSelect::Rpn { msb: 0, lsb: 5 } => {
            let cents = msb as u16 * 100 + lsb.map_or(0, |l| l as u16 * 100 / 128);
            channel.modulation.wheel = cents;
            PITCH
        }
        ParamSelect::Rpn { .. } => ControlAction::None,
        ParamSelect::Nrpn { msb: param_msb, lsb: param_lsb } => {
            if lsb.is_some() {
                // NRPNs are 7-bit here.
                return ControlAction::None;
            }
            nrpn_entry(channel, param_msb, param_lsb, msb)
        }
    }
}

fn nrpn_entry(channel: &mut Channel, msb: u8, lsb: u8, value: u8) -> ControlAction {
    let offset = centred(value);
    if msb == 0x01 {
        let nrpn = &mut channel.nrpn;
        return match lsb {
            0x08 => {
                nrpn.vibrato_rate = offset;
                PITCH
            }
            0x09 => {
                nrpn.vibrato_depth = offset;
                PITCH
            }
            0x0A => {
                nrpn.vibrato_delay = offset;
                ControlAction::None
            }
            0x20 => {
                nrpn.cutoff = offset;
                FILTER
            }
            0x21 => {
                nrpn.resonance = offset;
                FILTER
            }
            0x63 => {
                nrpn.attack = offset;
                ControlAction::None
            }
            0x64 => {
                nrpn.decay = offset;
                ControlAction::None
            }
            0x66 => {
                nrpn.release = offset;
                ControlAction::None
            }
            _ => ControlAction::None,
        };
    }

    if !channel.is_drum || !(0x14..=0x1F).contains(&msb) {
        return ControlAction::None;
    }
    let part = channel.drum_mut(lsb);
    match msb {
        0x14 => part.cutoff = offset,
        0x15 => part.resonance = offset,
        0x16 => part.attack = offset,
        0x17 => part.decay = offset,
        0x18 => part.coarse = offset,
        0x19 => part.fine = offset,
        0x1A => part.level = value,
        // Zero asks for random panning; the sample's own pan is used instead.
        0x1C => part.pan = (value != 0).then_some(value),
        0x1D => part.reverb = Some(value),
        0x1E => part.chorus = Some(value),
        0x1F => part.delay = Some(value),
        _ => return ControlAction::None,
    }
    ControlAction::Recompute(Recompute::ALL)
}

/// Apply a channel-addressed SysEx. Global ones (resets, master volume) are
/// the synth's business and yield [`ControlAction::None`] here.
pub fn apply_sysex(channel: &mut Channel, sysex: &SysEx) -> ControlAction {
    match *sysex {
        SysEx::DrumChannel { drum, .. } => {
            if channel.is_drum == drum {
                return ControlAction::None;
            }
            channel.set_drum(drum);
            ControlAction::Reload
        }
        SysEx::ScaleTuning { cents, .. } => {
            channel.scale_tuning = cents;
            PITCH
        }
        SysEx::Temperament { temperament, key, .. } => {
            channel.temperament = temperament;
            channel.temperament_key = key;
            PITCH
        }
        SysEx::AssignMode { mode, .. } => {
            channel.assign_mode = mode;
            ControlAction::None
        }
        SysEx::AltAssign { group, .. } => {
            channel.alt_assign = group;
            ControlAction::None
        }
        SysEx::ModDepth { source, cents, .. } => {
            channel.modulation.set(source, cents);
            PITCH
        }
        SysEx::GmReset | SysEx::GsReset | SysEx::XgReset | SysEx::MasterVolume(_) => ControlAction::None,
    }
}

/// Channel a SysEx addresses, if any.
pub fn sysex_channel(sysex: &SysEx) -> Option<u8> {
    match *sysex {
        SysEx::DrumChannel { channel, .. }
        | SysEx::ScaleTuning { channel, .. }
        | SysEx::Temperament { channel, .. }
        | SysEx::AssignMode { channel, .. }
        | SysEx::AltAssign { channel, .. }
        | SysEx::ModDepth { channel, .. } => Some(channel),
        SysEx::GmReset | SysEx::GsReset | SysEx::XgReset | SysEx::MasterVolume(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::channel::{AssignMode, ModSource, NoteMask};
    use crate::tables::Temperament;

    fn rpn(channel: &mut Channel, msb: u8, lsb: u8) {
        apply_controller(channel, cc::RPN_MSB, msb);
        apply_controller(channel, cc::RPN_LSB, lsb);
    }

    #[test]
    fn volume_requests_amp_recompute() {
        let mut ch = Channel::new(false);
        assert_eq!(
            apply_controller(&mut ch, cc::VOLUME, 200),
            ControlAction::Recompute(Recompute::AMP)
        );
        assert_eq!(ch.volume, 127, "values are clamped");
    }

    #[test]
    fn bend_sensitivity_rpn() {
        let mut ch = Channel::new(false);
        rpn(&mut ch, 0, 0);
        apply_controller(&mut ch, cc::DATA_ENTRY, 12);
        assert_eq!(ch.bend_range, 1200);
        apply_controller(&mut ch, cc::DATA_ENTRY_LSB, 50);
        assert_eq!(ch.bend_range, 1250);
        apply_controller(&mut ch, cc::DATA_INCREMENT, 0);
        assert_eq!(ch.bend_range, 1350);
    }

    #[test]
    fn tuning_rpns() {
        let mut ch = Channel::new(false);
        rpn(&mut ch, 0, 2);
        apply_controller(&mut ch, cc::DATA_ENTRY, 66);
        assert_eq!(ch.coarse_tune, 2);
        rpn(&mut ch, 0, 1);
        apply_controller(&mut ch, cc::DATA_ENTRY, 96);
        assert_eq!(ch.fine_tune, 50 * CENT_UNITS);
    }

    #[test]
    fn rpn_null_disables_data_entry() {
        let mut ch = Channel::new(false);
        rpn(&mut ch, 0, 0);
        rpn(&mut ch, 127, 127);
        assert_eq!(ch.param, ParamSelect::None);
        apply_controller(&mut ch, cc::DATA_ENTRY, 24);
        assert_eq!(ch.bend_range, 200);
    }

    #[test]
    fn nrpn_cutoff_and_drum_parts() {
        let mut ch = Channel::new(true);
        apply_controller(&mut ch, cc::NRPN_MSB, 0x01);
        apply_controller(&mut ch, cc::NRPN_LSB, 0x20);
        assert_eq!(apply_controller(&mut ch, cc::DATA_ENTRY, 80), FILTER);
        assert_eq!(ch.nrpn.cutoff, 16);

        apply_controller(&mut ch, cc::NRPN_MSB, 0x18);
        apply_controller(&mut ch, cc::NRPN_LSB, 38);
        apply_controller(&mut ch, cc::DATA_ENTRY, 60);
        assert_eq!(ch.drum(38).coarse, -4);

        let mut melodic = Channel::new(false);
        apply_controller(&mut melodic, cc::NRPN_MSB, 0x18);
        apply_controller(&mut melodic, cc::NRPN_LSB, 38);
        assert_eq!(apply_controller(&mut melodic, cc::DATA_ENTRY, 60), ControlAction::None);
    }

    #[test]
    fn pedals_report_transitions() {
        let mut ch = Channel::new(false);
        assert_eq!(apply_controller(&mut ch, cc::SUSTAIN, 127), ControlAction::None);
        assert_eq!(apply_controller(&mut ch, cc::SUSTAIN, 0), ControlAction::SustainReleased);
        assert_eq!(apply_controller(&mut ch, cc::SUSTAIN, 0), ControlAction::None);
        assert_eq!(apply_controller(&mut ch, cc::SOSTENUTO, 100), ControlAction::SostenutoPressed);
        assert_eq!(apply_controller(&mut ch, cc::SOSTENUTO, 10), ControlAction::SostenutoReleased);
    }

    #[test]
    fn mode_messages() {
        let mut ch = Channel::new(false);
        assert_eq!(apply_controller(&mut ch, cc::MONO_ON, 1), ControlAction::AllNotesOff);
        assert_eq!(ch.assign_mode(), AssignMode::Single);
        apply_controller(&mut ch, cc::POLY_ON, 0);
        assert!(!ch.mono);
        ch.pitch_bend = 100;
        assert_eq!(apply_controller(&mut ch, cc::RESET_CONTROLLERS, 0), ControlAction::ResetControllers);
        assert_eq!(ch.pitch_bend, 0);
    }

    #[test]
    fn channel_sysex() {
        let mut ch = Channel::new(false);
        assert_eq!(
            apply_sysex(&mut ch, &SysEx::DrumChannel { channel: 0, drum: true }),
            ControlAction::Reload
        );
        assert!(ch.is_drum);
        apply_sysex(
            &mut ch,
            &SysEx::Temperament { channel: 0, temperament: Temperament::MeanTone, key: 3 },
        );
        assert_eq!(ch.temperament, Temperament::MeanTone);
        apply_sysex(&mut ch, &SysEx::AltAssign { channel: 0, group: NoteMask::EMPTY.with(1) });
        assert!(ch.alt_assign.contains(1));
        apply_sysex(&mut ch, &SysEx::ModDepth { channel: 0, source: ModSource::Pressure, cents: 30 });
        assert_eq!(ch.modulation.pressure, 30);
    }
}
