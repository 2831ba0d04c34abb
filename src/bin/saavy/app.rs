//! Player - wires the engine to the audio device and the keyboard

use color_eyre::eyre::{eyre, Result as EyreResult, WrapErr};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rtrb::RingBuffer;
use std::thread;

use saavy_synth::{
    config::DEFAULT_VOICES,
    instrument::ToneBank,
    io::{EventList, RingSink},
    synth::message::ControlCommand,
    Scheduler, Synth, SynthConfig,
};

use super::keys::{self, Transport};

/// Buffers held in the ring between the engine and the device callback.
const RING_BUFFERS: usize = 4;

pub struct Player {
    events: EventList,
    voices: usize,
    chorus_cents: Option<i32>,
    early_note_end: bool,
}

impl Player {
    pub fn new(events: EventList) -> Self {
        Self {
            events,
            voices: DEFAULT_VOICES,
            chorus_cents: None,
            early_note_end: true,
        }
    }

    pub fn voices(mut self, voices: usize) -> Self {
        self.voices = voices;
        self
    }

    /// Double notes on channels with chorus send, detuned by `cents`.
    pub fn chorus(mut self, cents: i32) -> Self {
        self.chorus_cents = Some(cents);
        self
    }

    pub fn early_note_end(mut self, enabled: bool) -> Self {
        self.early_note_end = enabled;
        self
    }

    /// Play to the end, or until the user quits.
    pub fn run(self) -> EyreResult<()> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| eyre!("no default output device available"))?;
        let config = device
            .default_output_config()
            .wrap_err("failed to fetch default output config")?;

        let sample_rate = config.sample_rate().0;
        let channels = config.channels() as usize;

        let mut synth_config = SynthConfig::new(sample_rate)
            .with_max_voices(self.voices)
            .with_early_note_end(self.early_note_end);
        if let Some(cents) = self.chorus_cents {
            synth_config = synth_config.with_chorus_doubling(cents);
        }
        let buffer_frames = synth_config.buffer_frames;
        let synth = Synth::new(synth_config, ToneBank::new()).wrap_err("invalid synth configuration")?;

        println!("=== saavy ===");
        println!("Sample rate: {sample_rate} Hz");
        println!("Channels: {channels}");
        println!("Voices: {}", self.voices);
        println!("Events: {}", self.events.len());
        println!();
        println!("space pause | +/- volume | <-/-> seek | [/] voices | q quit");
        println!();

        let (sink, mut audio_rx) =
            RingSink::for_buffers(buffer_frames, RING_BUFFERS).wrap_err("audio ring cannot hold one buffer")?;
        let (control_tx, control_rx) = RingBuffer::<ControlCommand>::new(64);

        let stream = device
            .build_output_stream(
                &config.into(),
                move |data: &mut [f32], _| {
                    for frame in data.chunks_mut(channels) {
                        let left = audio_rx.pop().unwrap_or(0.0);
                        let right = audio_rx.pop().unwrap_or(0.0);
                        match frame {
                            [l, r, rest @ ..] => {
                                *l = left;
                                *r = right;
                                rest.fill(0.0);
                            }
                            [mono] => *mono = 0.5 * (left + right),
                            [] => {}
                        }
                    }
                },
                |err| log::error!("audio stream error: {err}"),
                None,
            )
            .wrap_err("failed to build output stream")?;
        stream.play().wrap_err("failed to start output stream")?;

        let events = self.events;
        let engine = thread::Builder::new()
            .name("saavy-engine".into())
            .spawn(move || Scheduler::new(synth, events, sink).with_control(control_rx).play())
            .wrap_err("failed to spawn engine thread")?;

        let transport = Transport::new(sample_rate, self.voices);
        let keys_result = keys::run(control_tx, transport, || engine.is_finished());

        let outcome = engine
            .join()
            .map_err(|_| eyre!("engine thread panicked"))?
            .wrap_err("playback aborted")?;
        keys_result?;

        let seconds = outcome.samples_rendered as f64 / sample_rate as f64;
        if outcome.stopped_early {
            println!("Stopped after {seconds:.1} s");
        } else {
            println!("Finished, {seconds:.1} s rendered");
        }
        Ok(())
    }
}
