//! Channel state flowing into voices.
//!
//! These run on note start and whenever a controller touches the channel.
//! They write the static parts of a voice (base frequency, base amplitude,
//! pan, sends, filter inputs); the per-tick parts move on their own in
//! [`Voice::control_tick`](super::voice::Voice::control_tick).

use crate::dsp::lfo::{phase_step, DEFAULT_VIBRATO_MHZ};
use crate::dsp::pitch::{offset_frequency, PitchOffsets};
use crate::instrument::EnvelopeBias;
use crate::tables::{apply_ratio, Tables, CENT_UNITS, SEMITONE};

use super::channel::Channel;
use super::voice::Voice;

/// Filter cutoff change per NRPN step, in cents.
const CUTOFF_CENTS_PER_STEP: i32 = 50;
/// Resonance change per NRPN step, in centibels.
const RESONANCE_CB_PER_STEP: i32 = 5;
/// Envelope rate change per NRPN step, in cents.
const RATE_CENTS_PER_STEP: i32 = 50;
/// Pan distance of each chorus half from the channel pan.
const CHORUS_SPREAD: i16 = 24;

/// Read-only engine state the recompute steps need.
pub(crate) struct Context<'a> {
    pub tables: &'a Tables,
    pub sample_rate: u32,
    pub control_ratio: u32,
    /// Master volume, amplification and session offset combined.
    pub master_gain: f32,
}

/// `value * (64 + step) / 64`, the GS convention for relative NRPNs.
fn nrpn_scale(value: i64, step: i8) -> i64 {
    value * (64 + step as i64) / 64
}

/// Velocity after the soft pedal. Applied once, at note start.
pub(crate) fn soft_velocity(velocity: u8, soft_pedal: u8) -> u8 {
    let velocity = velocity.min(127) as u32;
    (velocity - velocity * soft_pedal.min(127) as u32 / 512).max(1) as u8
}

/// Envelope rate biases for a note starting now.
pub(crate) fn envelope_bias(channel: &Channel, note: u8) -> EnvelopeBias {
    let nrpn = &channel.nrpn;
    let (drum_attack, drum_decay) = if channel.is_drum {
        let part = channel.drum(note);
        (part.attack as i32, part.decay as i32)
    } else {
        (0, 0)
    };
    // Positive NRPN values mean longer stages, so slower rates.
    let soft = channel.soft_pedal as i32 * 600 / 127;
    EnvelopeBias {
        attack_cents: -(nrpn.attack as i32 + drum_attack) * RATE_CENTS_PER_STEP - soft,
        decay_cents: -(nrpn.decay as i32 + drum_decay) * RATE_CENTS_PER_STEP - soft,
        release_cents: -(nrpn.release as i32) * RATE_CENTS_PER_STEP,
    }
}

/// Vibrato delay in milliseconds after the channel NRPN.
pub(crate) fn vibrato_delay_ms(channel: &Channel, delay_ms: u32) -> u32 {
    nrpn_scale(delay_ms as i64, channel.nrpn.vibrato_delay).max(0) as u32
}

/// Base frequency, channel bend and vibrato depth and rate.
pub(crate) fn recompute_pitch(voice: &mut Voice, channel: &mut Channel, ctx: &Context<'_>) {
    let Some(sample) = voice.sample.clone() else {
        return;
    };
    let fixed = sample.is_fixed_pitch();
    let note = sample.note_to_use.unwrap_or(voice.note);

    let mut offsets = PitchOffsets {
        chorus: voice.detune,
        ..PitchOffsets::default()
    };
    if !fixed {
        offsets.tuning = channel.coarse_tune as i32 * SEMITONE + channel.fine_tune;
        offsets.temperament = channel.temperament.offset(channel.temperament_key, voice.note);
        offsets.scale_tuning = channel.scale_tuning[(voice.note % 12) as usize] as i32 * CENT_UNITS;
        offsets.key_scaling = (voice.note as i32 - sample.scale_note as i32) * (sample.scale_tuning - 100) * CENT_UNITS;
    }
    if channel.is_drum {
        let part = channel.drum(voice.note);
        offsets.drum = part.coarse as i32 * SEMITONE + part.fine as i32 * CENT_UNITS;
    }

    let mut freq = offset_frequency(ctx.tables, ctx.tables.note_freq(note), offsets.total());
    if !fixed {
        freq = apply_ratio(freq as u64, channel.pitch_factor(ctx.tables)).min(u32::MAX as u64) as u32;
    }
    voice.base_freq = freq;

    let depth_cents = if fixed {
        0
    } else {
        sample.vibrato.depth + channel.controller_vibrato_cents()
    };
    voice.vibrato_depth = nrpn_scale(depth_cents as i64, channel.nrpn.vibrato_depth) as i32 * CENT_UNITS;
    let rate_mhz = match sample.vibrato.rate_mhz {
        0 if voice.vibrato_depth != 0 => DEFAULT_VIBRATO_MHZ,
        rate => rate,
    };
    let rate_mhz = nrpn_scale(rate_mhz as i64, channel.nrpn.vibrato_rate).max(0) as u32;
    voice.vibrato.set_step(phase_step(rate_mhz, ctx.sample_rate, ctx.control_ratio));
}

/// Base amplitude, pan and effect sends.
pub(crate) fn recompute_amp(voice: &mut Voice, channel: &Channel, ctx: &Context<'_>) {
    let Some(sample) = voice.sample.as_ref() else {
        return;
    };
    let tables = ctx.tables;
    let mut amp = sample.volume
        * tables.volume(voice.velocity)
        * tables.volume(channel.volume)
        * tables.volume(channel.expression)
        * ctx.master_gain;

    let mut pan = channel.pan;
    let mut sends = [channel.reverb_send, channel.chorus_send, channel.delay_send];
    if let Some(p) = sample.panning {
        pan = p;
    }
    if channel.is_drum {
        let part = channel.drum(voice.note);
        amp *= part.level as f32 / 127.0;
        pan = part.pan.unwrap_or(pan);
        for (send, part_send) in sends.iter_mut().zip([part.reverb, part.chorus, part.delay]) {
            if let Some(level) = part_send {
                *send = level;
            }
        }
    }
    if voice.chorus_link.is_some() {
        let spread = if voice.detune >= 0 { CHORUS_SPREAD } else { -CHORUS_SPREAD };
        pan = (pan as i16 + spread).clamp(0, 127) as u8;
    }

    voice.base_amp = amp;
    voice.pan = pan;
    voice.sends = sends.map(|s| s.min(127) as f32 / 127.0);
}

/// Static filter inputs; the dynamic parts are refreshed every tick.
pub(crate) fn recompute_filter(voice: &mut Voice, channel: &Channel, ctx: &Context<'_>) {
    let Some(sample) = voice.sample.as_ref() else {
        return;
    };
    let f = &sample.filter;
    let (drum_cents, drum_resonance_cb) = if channel.is_drum {
        let part = channel.drum(voice.note);
        (
            part.cutoff as i32 * CUTOFF_CENTS_PER_STEP,
            part.resonance as i32 * RESONANCE_CB_PER_STEP,
        )
    } else {
        (0, 0)
    };
    let inputs = &mut voice.cutoff;
    inputs.base_cutoff_hz = f.cutoff_hz;
    inputs.base_resonance_cb = f.resonance_cb;
    inputs.channel_cents = channel.nrpn.cutoff as i32 * CUTOFF_CENTS_PER_STEP;
    inputs.channel_resonance_cb = channel.nrpn.resonance as i32 * RESONANCE_CB_PER_STEP;
    inputs.drum_cents = drum_cents;
    inputs.drum_resonance_cb = drum_resonance_cb;
    inputs.velocity = voice.velocity;
    inputs.vel_to_fc = f.vel_to_fc;
    inputs.vel_to_fc_threshold = f.vel_to_fc_threshold;
    inputs.vel_to_resonance_cb = f.vel_to_resonance_cb;
    inputs.note = voice.note;
    inputs.key_to_fc = f.key_to_fc;
    inputs.key_to_fc_break = f.key_to_fc_break;
    voice.apply_filter(ctx.tables, ctx.sample_rate);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::{Sample, Wave};
    use crate::synth::voice::VoiceStatus;
    use std::sync::Arc;

    const SAMPLE_RATE: u32 = 44_100;

    fn context(tables: &Tables) -> Context<'_> {
        Context {
            tables,
            sample_rate: SAMPLE_RATE,
            control_ratio: 44,
            master_gain: 1.0,
        }
    }

    fn voice_for(sample: Sample, note: u8) -> Voice {
        Voice {
            status: VoiceStatus::On,
            note,
            velocity: 127,
            increment: 1,
            wave: Some(sample.wave.clone()),
            sample: Some(Arc::new(sample)),
            ..Voice::default()
        }
    }

    fn sample() -> Sample {
        Sample::new(Wave {
            data: vec![0i16; 64].into(),
            sample_rate: SAMPLE_RATE,
            root_freq: 261_626,
            loop_start: 0,
            loop_end: 64,
        })
    }

    #[test]
    fn bend_moves_pitched_but_not_fixed_samples() {
        let tables = Tables::new();
        let ctx = context(&tables);
        let mut channel = Channel::new(false);
        channel.pitch_bend = 8191;
        channel.bend_range = 1200;

        let mut pitched = voice_for(sample(), 60);
        recompute_pitch(&mut pitched, &mut channel, &ctx);
        let ratio = pitched.base_freq as f64 / tables.note_freq(60) as f64;
        assert!((ratio - 2.0).abs() < 0.01, "octave bend, got ratio {ratio}");

        let mut drum = sample();
        drum.note_to_use = Some(60);
        let mut fixed = voice_for(drum, 38);
        recompute_pitch(&mut fixed, &mut channel, &ctx);
        assert_eq!(fixed.base_freq, tables.note_freq(60));
    }

    #[test]
    fn drum_part_overrides_pan_and_level() {
        let tables = Tables::new();
        let ctx = context(&tables);
        let mut channel = Channel::new(true);
        channel.drum_mut(38).pan = Some(10);
        channel.drum_mut(38).level = 0;
        channel.drum_mut(38).reverb = Some(127);

        let mut voice = voice_for(sample(), 38);
        recompute_amp(&mut voice, &channel, &ctx);
        assert_eq!(voice.pan, 10);
        assert_eq!(voice.base_amp, 0.0);
        assert_eq!(voice.sends[0], 1.0);
    }

    #[test]
    fn chorus_halves_straddle_channel_pan() {
        let tables = Tables::new();
        let ctx = context(&tables);
        let channel = Channel::new(false);
        let link = crate::synth::voice::VoiceLink { index: 1, generation: 1 };

        let mut up = voice_for(sample(), 60);
        up.detune = 6 * CENT_UNITS;
        up.chorus_link = Some(link);
        let mut down = voice_for(sample(), 60);
        down.detune = -6 * CENT_UNITS;
        down.chorus_link = Some(link);
        recompute_amp(&mut up, &channel, &ctx);
        recompute_amp(&mut down, &channel, &ctx);
        assert!(up.pan > channel.pan && down.pan < channel.pan);
        assert_eq!(up.pan - channel.pan, channel.pan - down.pan);
    }

    #[test]
    fn controller_vibrato_uses_default_rate() {
        let tables = Tables::new();
        let ctx = context(&tables);
        let mut channel = Channel::new(false);
        channel.mod_wheel = 127;

        let mut voice = voice_for(sample(), 60);
        recompute_pitch(&mut voice, &mut channel, &ctx);
        assert_eq!(voice.vibrato_depth, 50 * CENT_UNITS);
        assert!(voice.vibrato.is_running());
    }

    #[test]
    fn soft_pedal_softens() {
        assert_eq!(soft_velocity(100, 0), 100);
        assert!(soft_velocity(100, 127) < 100);
        assert_eq!(soft_velocity(1, 127), 1);
    }

    #[test]
    fn nrpn_cutoff_feeds_filter_inputs() {
        let tables = Tables::new();
        let ctx = context(&tables);
        let mut channel = Channel::new(false);
        channel.nrpn.cutoff = 10;
        let mut s = sample();
        s.filter.kind = crate::dsp::filter::FilterKind::StateVariable;
        s.filter.cutoff_hz = 1_000;
        let mut voice = voice_for(s, 60);
        voice.filter = crate::dsp::filter::VoiceFilter::new(crate::dsp::filter::FilterKind::StateVariable);
        recompute_filter(&mut voice, &channel, &ctx);
        let params = voice.filter.params().expect("filter configured");
        assert!(params.cutoff_hz > 1_000.0);
    }
}
