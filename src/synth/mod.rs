//! Channel state, voices and event application.

pub mod channel;
pub mod controller;
pub mod message;
pub(crate) mod recompute;
pub mod voice;

use std::sync::Arc;

use crate::config::SynthConfig;
use crate::dsp::envelope::{rate_from_time, Envelope};
use crate::dsp::filter::VoiceFilter;
use crate::dsp::lfo::{ms_to_ticks, phase_step, Lfo, LFO_ONE};
use crate::dsp::pitch::Portamento;
use crate::engine::allocator::{EvictionJudge, PoolStats, VoicePool};
use crate::engine::lookahead::ScanVoice;
use crate::engine::mixer::{EffectBus, Mixer, NoEffects};
use crate::error::ConfigError;
use crate::instrument::{Instrument, InstrumentProvider, Sample};
use crate::io::midi::{MidiEvent, SysEx};
use crate::tables::{portamento_time_ms, Tables, CENT_UNITS};
use crate::MAX_BLOCK_SIZE;

use self::channel::{AssignMode, Channel};
use self::controller::{apply_controller, apply_sysex, sysex_channel, ControlAction, Recompute};
use self::recompute::{
    envelope_bias, recompute_amp, recompute_filter, recompute_pitch, soft_velocity, vibrato_delay_ms, Context,
};
use self::voice::{VoiceLink, VoiceStatus};

/*
Synth
=====

One synthesis session: every piece of mutable state lives here, so two
sessions (an offline render and a live preview, say) never share anything
but immutable instruments.

    event ──→ Channel (controller state) ──→ ControlAction
                                                 │
                      recompute / pedal / kill ←─┘
                                 │
    note on ──→ VoicePool::allocate ──→ Voice (init + recompute)
                                 │
    render ──→ Mixer: voices ──→ dry mix + sends ──→ EffectBus

Note On
-------

  1. velocity 0 is a note off
  2. resolve the channel's instrument (a missing one is silence, logged once)
  3. choke the alternate-assign group, then apply the assign mode:
       Single        kill every voice already on this note
       LimitedMulti  release held voices on this note and layer
       FullMulti     let them ring
  4. one voice per matching layer, two when chorus doubling applies; the
     voices started for this note are spared by the allocator


Master Gain
-----------

    gain = amplification% * master volume (14 bit) * (100 + offset)%
*/

const MASTER_VOLUME_MAX: u16 = 16_383;

/// Channel state as seen by the allocator.
struct ChannelJudge<'a>(&'a [Channel]);

impl EvictionJudge for ChannelJudge<'_> {
    fn is_drum_channel(&self, channel: usize) -> bool {
        self.0.get(channel).is_some_and(|c| c.is_drum)
    }

    fn channel_pan(&self, channel: usize) -> u8 {
        self.0.get(channel).map_or(64, |c| c.pan)
    }
}

#[derive(Debug, Clone, Copy)]
struct NoteStart {
    channel: usize,
    key: u8,
    velocity: u8,
    layer: u8,
    glide: Option<(u8, u32)>,
}

fn context<'a>(tables: &'a Tables, config: &SynthConfig, master_gain: f32) -> Context<'a> {
    Context {
        tables,
        sample_rate: config.sample_rate,
        control_ratio: config.control_ratio,
        master_gain,
    }
}

pub struct Synth {
    config: SynthConfig,
    tables: Tables,
    channels: Vec<Channel>,
    pool: VoicePool,
    provider: Box<dyn InstrumentProvider + Send>,
    mixer: Mixer,
    effects: Box<dyn EffectBus + Send>,
    master_volume: u16,
    volume_offset: i16,
    master_gain: f32,
    kill_rate: i32,
    /// Sample clock: frames rendered since the start (or the seek target).
    now: u64,
    /// Voices started by the last note on.
    started: Vec<VoiceLink>,
    spare: Vec<usize>,
    /// Scratch list for per-channel voice scans.
    matched: Vec<usize>,
}

impl Synth {
    pub fn new(config: SynthConfig, provider: impl InstrumentProvider + Send + 'static) -> Result<Self, ConfigError> {
        config.validate()?;
        let channels = (0..config.channels)
            .map(|i| Channel::new(config.is_drum_channel(i)))
            .collect();
        let mut synth = Self {
            tables: Tables::new(),
            channels,
            pool: VoicePool::new(config.max_voices),
            provider: Box::new(provider),
            mixer: Mixer::new(config.sample_rate, config.control_ratio),
            effects: Box::new(NoEffects),
            master_volume: MASTER_VOLUME_MAX,
            volume_offset: 0,
            master_gain: 1.0,
            kill_rate: rate_from_time(config.kill_time_ms, config.sample_rate, config.control_ratio),
            now: 0,
            started: Vec::with_capacity(16),
            spare: Vec::with_capacity(16),
            matched: Vec::with_capacity(config.max_voices),
            config,
        };
        synth.update_master_gain();
        log::debug!(
            "synth: {} Hz, {} voices, control ratio {}",
            synth.config.sample_rate,
            synth.config.max_voices,
            synth.config.control_ratio
        );
        Ok(synth)
    }

    /// Route the send buses through `effects`.
    pub fn with_effects(mut self, effects: impl EffectBus + Send + 'static) -> Self {
        self.effects = Box::new(effects);
        self
    }

    pub fn config(&self) -> &SynthConfig {
        &self.config
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    pub fn pool(&self) -> &VoicePool {
        &self.pool
    }

    pub fn channel(&self, channel: usize) -> Option<&Channel> {
        self.channels.get(channel)
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub(crate) fn set_now(&mut self, sample: u64) {
        self.now = sample;
    }

    pub fn live_voices(&self) -> usize {
        self.pool.live_count()
    }

    /// Voices started by the most recent event, if it was a note on.
    pub fn started_voices(&self) -> &[VoiceLink] {
        &self.started
    }

    fn channel_index(&self, channel: u8) -> Option<usize> {
        let index = channel as usize;
        (index < self.channels.len()).then_some(index)
    }

    fn update_master_gain(&mut self) {
        let offset = (100 + self.volume_offset as i32).max(0) as f32 / 100.0;
        self.master_gain = self.config.amplification as f32 / 100.0
            * self.master_volume as f32
            / MASTER_VOLUME_MAX as f32
            * offset;
    }

    /// Apply one event at the current sample clock.
    pub fn apply_event(&mut self, event: &MidiEvent) {
        self.started.clear();
        match *event {
            MidiEvent::NoteOn { channel, key, velocity } => self.note_on(channel, key, velocity),
            MidiEvent::NoteOff { channel, key, .. } => self.note_off(channel, key),
            MidiEvent::KeyPressure { channel, key, pressure } => {
                log::trace!("key pressure {pressure} on {channel}:{key} ignored");
            }
            MidiEvent::ControlChange { channel, controller, value } => {
                if let Some(ch) = self.channel_index(channel) {
                    let action = apply_controller(&mut self.channels[ch], controller, value);
                    self.handle_action(ch, action);
                }
            }
            MidiEvent::ProgramChange { channel, program } => {
                if let Some(ch) = self.channel_index(channel) {
                    self.channels[ch].program = program.min(127);
                    self.load_program(ch);
                }
            }
            MidiEvent::ChannelPressure { channel, pressure } => {
                if let Some(ch) = self.channel_index(channel) {
                    self.channels[ch].pressure = pressure.min(127);
                    self.recompute_voices(Some(ch), Recompute::PITCH);
                }
            }
            MidiEvent::PitchBend { channel, value } => {
                if let Some(ch) = self.channel_index(channel) {
                    self.channels[ch].pitch_bend = value.clamp(-8192, 8191);
                    self.recompute_voices(Some(ch), Recompute::PITCH);
                }
            }
            MidiEvent::SysEx(ref sysex) => self.apply_sysex(sysex),
            MidiEvent::Tempo { .. } | MidiEvent::EndOfTrack => {}
        }
    }

    fn apply_sysex(&mut self, sysex: &SysEx) {
        match *sysex {
            SysEx::GmReset | SysEx::GsReset | SysEx::XgReset => {
                log::debug!("synth: {sysex:?}");
                self.release_all();
                self.reset_channels();
                self.master_volume = MASTER_VOLUME_MAX;
                self.update_master_gain();
            }
            SysEx::MasterVolume(volume) => {
                self.master_volume = volume.min(MASTER_VOLUME_MAX);
                self.update_master_gain();
                self.recompute_voices(None, Recompute::AMP);
            }
            _ => {
                let Some(ch) = sysex_channel(sysex).and_then(|c| self.channel_index(c)) else {
                    return;
                };
                let action = apply_sysex(&mut self.channels[ch], sysex);
                self.handle_action(ch, action);
            }
        }
    }

    fn handle_action(&mut self, ch: usize, action: ControlAction) {
        match action {
            ControlAction::None => {}
            ControlAction::Recompute(what) => self.recompute_voices(Some(ch), what),
            ControlAction::SustainReleased => self.for_channel_voices(ch, |synth, index| {
                let voice = synth.pool.voice(index);
                if voice.status == VoiceStatus::Sustained && !voice.sostenuto {
                    synth.finish_voice(index);
                }
            }),
            ControlAction::SostenutoPressed => self.for_channel_voices(ch, |synth, index| {
                let voice = synth.pool.voice_mut(index);
                if voice.status == VoiceStatus::On {
                    voice.sostenuto = true;
                }
            }),
            ControlAction::SostenutoReleased => {
                let sustain = self.channels[ch].sustain;
                self.for_channel_voices(ch, |synth, index| {
                    let voice = synth.pool.voice_mut(index);
                    voice.sostenuto = false;
                    if voice.status == VoiceStatus::Sustained && !sustain {
                        synth.finish_voice(index);
                    }
                });
            }
            ControlAction::AllSoundOff => self.for_channel_voices(ch, |synth, index| {
                synth.pool.kill(index, synth.kill_rate);
            }),
            ControlAction::AllNotesOff => self.for_channel_voices(ch, |synth, index| {
                if synth.pool.voice(index).status == VoiceStatus::On {
                    synth.release_voice(index);
                }
            }),
            ControlAction::ResetControllers => {
                self.for_channel_voices(ch, |synth, index| {
                    let voice = synth.pool.voice_mut(index);
                    voice.sostenuto = false;
                    if voice.status == VoiceStatus::Sustained {
                        synth.finish_voice(index);
                    }
                });
                self.recompute_voices(Some(ch), Recompute::ALL);
            }
            ControlAction::Reload => self.load_program(ch),
        }
    }

    /// Run `f` on every live voice slot of `ch`, in slot order. The slots are
    /// gathered up front into a scratch list sized to the pool, so `f` may
    /// free or kill voices without disturbing the walk.
    fn for_channel_voices(&mut self, ch: usize, mut f: impl FnMut(&mut Self, usize)) {
        let mut matched = std::mem::take(&mut self.matched);
        matched.clear();
        matched.extend(
            self.pool
                .voices()
                .iter()
                .enumerate()
                .filter(|(_, v)| v.status.is_live() && v.channel == ch)
                .map(|(i, _)| i),
        );
        for &index in &matched {
            f(self, index);
        }
        self.matched = matched;
    }

    fn load_program(&mut self, ch: usize) {
        let channel = &mut self.channels[ch];
        let instrument = self.provider.load(channel.is_drum, channel.bank(), channel.program);
        match &instrument {
            Some(inst) => log::debug!("channel {ch}: program {} is {}", channel.program, inst.name),
            None => log::warn!(
                "channel {ch}: no instrument for {} bank {} program {}, channel is silent",
                if channel.is_drum { "drum" } else { "melodic" },
                channel.bank(),
                channel.program
            ),
        }
        channel.missing = instrument.is_none();
        channel.instrument = instrument;
    }

    fn instrument_for(&mut self, ch: usize) -> Option<Arc<Instrument>> {
        let channel = &self.channels[ch];
        if channel.instrument.is_none() && !channel.missing {
            self.load_program(ch);
        }
        self.channels[ch].instrument.clone()
    }

    pub fn note_on(&mut self, channel: u8, key: u8, velocity: u8) {
        let Some(ch) = self.channel_index(channel) else {
            return;
        };
        let key = key.min(127);
        let velocity = velocity.min(127);
        if velocity == 0 {
            self.note_off(channel, key);
            return;
        }
        let Some(instrument) = self.instrument_for(ch) else {
            return;
        };

        let group = self.channels[ch].alt_assign;
        if group.contains(key) {
            self.pool.choke(ch, group, key, self.kill_rate);
        }
        let mode = self.channels[ch].assign_mode();
        if self.channels[ch].mono {
            self.for_channel_voices(ch, |synth, index| {
                if synth.pool.voice(index).status.is_held() {
                    synth.pool.kill(index, synth.kill_rate);
                }
            });
        } else if mode == AssignMode::Single {
            let mut from = 0;
            while let Some(index) = self.pool.find_same_note_for_retrigger(ch, key, from) {
                if self.pool.voice(index).status != VoiceStatus::Die {
                    self.pool.kill(index, self.kill_rate);
                }
                from = index + 1;
            }
        }

        let channel_state = &mut self.channels[ch];
        let glide_from = channel_state
            .portamento_control
            .take()
            .or(if channel_state.portamento { channel_state.last_note } else { None });
        let glide = glide_from.map(|from| (from, portamento_time_ms(channel_state.portamento_time)));
        let soft = soft_velocity(velocity, channel_state.soft_pedal);
        let chorus = self.config.chorus_doubling
            && channel_state.chorus_send > 0
            && !channel_state.is_drum
            && self.pool.limit() >= 2;
        let detune = self.config.chorus_detune_cents * CENT_UNITS;

        self.spare.clear();
        for (layer, sample) in instrument.layers(key, velocity) {
            if mode == AssignMode::LimitedMulti {
                self.for_channel_voices(ch, |synth, index| {
                    let voice = synth.pool.voice(index);
                    if voice.status.is_held() && voice.note == key && voice.layer == layer {
                        synth.finish_voice(index);
                    }
                });
            }
            let note = NoteStart {
                channel: ch,
                key,
                velocity: soft,
                layer,
                glide,
            };
            if chorus {
                let a = self.start_voice(&note, sample, detune, 0.5);
                let link_a = self.pool.voice(a).link(a);
                let b = self.start_voice(&note, sample, -detune, 0.5);
                if self.pool.get(link_a).is_some() && a != b {
                    self.pool.link(a, b);
                    self.refresh_amp(a);
                    self.refresh_amp(b);
                } else {
                    // Only one half survived allocation: play it undoubled.
                    let voice = self.pool.voice_mut(b);
                    voice.amp_scale = 1.0;
                    voice.detune = 0;
                    self.refresh_amp(b);
                }
            } else {
                self.start_voice(&note, sample, 0, 1.0);
            }
        }
        self.channels[ch].last_note = Some(key);
    }

    fn start_voice(&mut self, note: &NoteStart, sample: &Arc<Sample>, detune: i32, amp_scale: f32) -> usize {
        let index = self.pool.allocate(&ChannelJudge(&self.channels), &self.spare);
        self.spare.push(index);

        let wave = if self.config.pre_resample {
            self.provider.resampled(sample, note.key, self.config.sample_rate)
        } else {
            None
        }
        .unwrap_or_else(|| sample.wave.clone());

        let ctx = context(&self.tables, &self.config, self.master_gain);
        let (rate, cr) = (ctx.sample_rate, ctx.control_ratio);
        let channel = &mut self.channels[note.channel];
        let voice = self.pool.voice_mut(index);

        voice.channel = note.channel;
        voice.note = note.key;
        voice.velocity = note.velocity;
        voice.layer = note.layer;
        voice.started_at = self.now;
        voice.sample = Some(Arc::clone(sample));

        let reverse = sample.modes.reverse;
        voice.position = if reverse { (wave.end_position() - 1).max(0) } else { 0 };
        voice.increment = if reverse { -1 } else { 1 };
        voice.looping = sample.loops();
        voice.wave = Some(wave);

        let bias = envelope_bias(channel, note.key);
        voice.has_envelope = sample.modes.envelope;
        voice.amp_env = if sample.modes.envelope {
            let mut env = Envelope::new(sample.amp_env.rates(ctx.tables, note.key, note.velocity, bias, rate, cr));
            env.start();
            env
        } else {
            Envelope::constant(self.kill_rate)
        };
        voice.mod_env = if sample.mod_env_to_pitch != 0 || sample.mod_env_to_fc != 0 {
            let mut env = Envelope::new(sample.mod_env.rates(ctx.tables, note.key, note.velocity, bias, rate, cr));
            env.start();
            env
        } else {
            Envelope::idle()
        };
        voice.mod_env_to_pitch = sample.mod_env_to_pitch;
        voice.mod_env_to_fc = sample.mod_env_to_fc;

        voice.filter = VoiceFilter::new(sample.filter.kind);
        voice.vibrato = Lfo::new(
            0,
            ms_to_ticks(vibrato_delay_ms(channel, sample.vibrato.delay_ms), rate, cr),
            ms_to_ticks(sample.vibrato.sweep_ms, rate, cr),
        );
        voice.tremolo = Lfo::new(
            phase_step(sample.tremolo.rate_mhz, rate, cr),
            ms_to_ticks(sample.tremolo.delay_ms, rate, cr),
            ms_to_ticks(sample.tremolo.sweep_ms, rate, cr),
        );
        voice.tremolo_depth = sample.tremolo.depth.clamp(0, 255) * LFO_ONE / 255;
        voice.tremolo_to_pitch = sample.tremolo_to_pitch;
        voice.tremolo_to_fc = sample.tremolo_to_fc;

        voice.detune = detune;
        voice.amp_scale = amp_scale;
        voice.portamento = match note.glide {
            Some((from, time_ms)) if !sample.is_fixed_pitch() => Portamento::start(from, note.key, time_ms, rate, cr),
            _ => Portamento::default(),
        };
        voice.control_counter = 0;

        recompute_pitch(voice, channel, &ctx);
        recompute_amp(voice, channel, &ctx);
        recompute_filter(voice, channel, &ctx);
        voice.apply_pitch(ctx.tables, rate);
        voice.apply_gains(ctx.tables);

        self.started.push(voice.link(index));
        index
    }

    fn refresh_amp(&mut self, index: usize) {
        let ctx = context(&self.tables, &self.config, self.master_gain);
        let voice = self.pool.voice_mut(index);
        if let Some(channel) = self.channels.get_mut(voice.channel) {
            recompute_pitch(voice, channel, &ctx);
            recompute_amp(voice, channel, &ctx);
            voice.apply_pitch(ctx.tables, ctx.sample_rate);
            voice.apply_gains(ctx.tables);
        }
    }

    pub fn note_off(&mut self, channel: u8, key: u8) {
        let Some(ch) = self.channel_index(channel) else {
            return;
        };
        self.for_channel_voices(ch, |synth, index| {
            let voice = synth.pool.voice(index);
            if voice.status == VoiceStatus::On && voice.note == key {
                synth.release_voice(index);
            }
        });
    }

    /// Synthetic note off for one voice, ignoring the pedals.
    pub fn note_off_voice(&mut self, link: VoiceLink) {
        if self.pool.get(link).is_some_and(|v| v.status.is_held()) {
            self.finish_voice(link.index);
        }
    }

    /// Key released: hold under a pedal, otherwise start the release.
    fn release_voice(&mut self, index: usize) {
        let voice = self.pool.voice_mut(index);
        let sustain = self.channels.get(voice.channel).is_some_and(|c| c.sustain);
        if sustain || voice.sostenuto {
            voice.status = VoiceStatus::Sustained;
        } else {
            self.finish_voice(index);
        }
    }

    /// Held to Off. Envelope-less samples either stop (looping) or play out.
    fn finish_voice(&mut self, index: usize) {
        let voice = self.pool.voice_mut(index);
        if !voice.status.is_held() {
            return;
        }
        voice.sostenuto = false;
        if !voice.has_envelope {
            if voice.looping {
                self.pool.kill(index, self.kill_rate);
            } else {
                voice.status = VoiceStatus::Off;
            }
            return;
        }
        if voice.sample.as_ref().is_some_and(|s| s.modes.sustain) {
            voice.looping = false;
        }
        voice.status = VoiceStatus::Off;
        voice.amp_env.release();
        voice.mod_env.release();
    }

    /// Release every held voice regardless of pedals.
    pub fn release_all(&mut self) {
        for index in 0..self.pool.upper_bound() {
            self.finish_voice(index);
        }
    }

    /// Immediate silence and power-on channel state.
    pub fn reset(&mut self) {
        self.pool.reset();
        self.reset_channels();
        self.master_volume = MASTER_VOLUME_MAX;
        self.update_master_gain();
        self.started.clear();
        self.now = 0;
    }

    /// Immediate silence; channel state is kept.
    pub fn reset_voices(&mut self) {
        self.pool.reset();
        self.started.clear();
    }

    fn reset_channels(&mut self) {
        for (i, channel) in self.channels.iter_mut().enumerate() {
            channel.set_drum(self.config.is_drum_channel(i));
            channel.reset();
        }
    }

    /// Change the active voice limit; excess voices are evicted now.
    pub fn set_voice_limit(&mut self, limit: usize) {
        self.pool.set_limit(limit, &ChannelJudge(&self.channels));
        log::debug!("synth: voice limit {}", self.pool.limit());
    }

    /// Nudge the session volume by `delta` percent.
    pub fn adjust_volume(&mut self, delta: i16) {
        self.volume_offset = self.volume_offset.saturating_add(delta).clamp(-100, 400);
        self.update_master_gain();
        self.recompute_voices(None, Recompute::AMP);
    }

    pub fn volume_offset(&self) -> i16 {
        self.volume_offset
    }

    fn recompute_voices(&mut self, only: Option<usize>, what: Recompute) {
        let ctx = context(&self.tables, &self.config, self.master_gain);
        for index in 0..self.pool.upper_bound() {
            let voice = self.pool.voice_mut(index);
            if !voice.status.is_live() || only.is_some_and(|c| c != voice.channel) {
                continue;
            }
            let Some(channel) = self.channels.get_mut(voice.channel) else {
                continue;
            };
            if what.contains(Recompute::AMP) {
                recompute_amp(voice, channel, &ctx);
            }
            if what.contains(Recompute::PITCH) {
                recompute_pitch(voice, channel, &ctx);
                voice.apply_pitch(ctx.tables, ctx.sample_rate);
            }
            if what.contains(Recompute::FILTER) {
                recompute_filter(voice, channel, &ctx);
            }
            voice.apply_gains(ctx.tables);
        }
    }

    /// Snapshot for the early-end scan, for voices that can run out of data
    /// while held.
    pub(crate) fn scan_target(&self, link: VoiceLink) -> Option<ScanVoice> {
        let voice = self.pool.get(link)?;
        let sample = voice.sample.as_ref()?;
        let wave = voice.wave.as_ref()?;
        if voice.looping || !voice.has_envelope || sample.is_fixed_pitch() {
            return None;
        }
        let channel = self.channels.get(voice.channel)?;
        let distance = if voice.increment > 0 {
            wave.end_position() - voice.position
        } else {
            voice.position
        };
        let release_ticks = voice.amp_env.release_ticks_from(voice.amp_env.sustain_level());
        Some(ScanVoice {
            link,
            channel: voice.channel as u8,
            note: voice.note,
            distance: distance.max(0) as u64,
            increment: voice.increment.unsigned_abs(),
            bend: channel.pitch_bend,
            bend_range: channel.bend_range,
            release_samples: release_ticks * self.config.control_ratio as u64,
            start_sample: self.now,
        })
    }

    /// Render interleaved stereo into `out` and advance the sample clock.
    pub fn render(&mut self, out: &mut [f32]) {
        for chunk in out.chunks_mut(MAX_BLOCK_SIZE * 2) {
            self.mixer.render(&mut self.pool, &self.tables, &mut self.effects, chunk);
            self.now += (chunk.len() / 2) as u64;
        }
    }
}
