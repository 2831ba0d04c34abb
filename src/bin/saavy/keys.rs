//! Keyboard transport control
//!
//! Keys become [`ControlCommand`]s pushed to the engine, which picks them up
//! at its next buffer boundary.

use color_eyre::eyre::{Result as EyreResult, WrapErr};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use rtrb::Producer;
use std::time::{Duration, Instant};

use saavy_synth::synth::message::ControlCommand;

const SEEK_STEP: Duration = Duration::from_secs(5);
const VOLUME_STEP: i16 = 10;
const VOICE_STEP: usize = 8;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Send(ControlCommand),
    Quit,
}

/// Wall-clock estimate of the playback position, for relative seeks.
pub struct Transport {
    sample_rate: u32,
    played: Duration,
    resumed_at: Option<Instant>,
    voices: usize,
    max_voices: usize,
}

impl Transport {
    pub fn new(sample_rate: u32, max_voices: usize) -> Self {
        Self {
            sample_rate,
            played: Duration::ZERO,
            resumed_at: Some(Instant::now()),
            voices: max_voices,
            max_voices,
        }
    }

    fn position(&self) -> Duration {
        self.played + self.resumed_at.map_or(Duration::ZERO, |t| t.elapsed())
    }

    fn seek_to(&mut self, position: Duration) -> ControlCommand {
        self.played = position;
        if self.resumed_at.is_some() {
            self.resumed_at = Some(Instant::now());
        }
        let sample = position.as_millis() as u64 * self.sample_rate as u64 / 1000;
        ControlCommand::SeekTo(sample)
    }

    pub fn handle(&mut self, code: KeyCode, modifiers: KeyModifiers) -> Option<Action> {
        let command = match code {
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => return Some(Action::Quit),
            KeyCode::Char('q') | KeyCode::Esc => return Some(Action::Quit),
            KeyCode::Char(' ') => match self.resumed_at.take() {
                Some(started) => {
                    self.played += started.elapsed();
                    ControlCommand::Pause
                }
                None => {
                    self.resumed_at = Some(Instant::now());
                    ControlCommand::Resume
                }
            },
            KeyCode::Char('+') | KeyCode::Char('=') => ControlCommand::VolumeDelta(VOLUME_STEP),
            KeyCode::Char('-') => ControlCommand::VolumeDelta(-VOLUME_STEP),
            KeyCode::Right => self.seek_to(self.position() + SEEK_STEP),
            KeyCode::Left => self.seek_to(self.position().saturating_sub(SEEK_STEP)),
            KeyCode::Char(']') => {
                self.voices = (self.voices + VOICE_STEP).min(self.max_voices);
                ControlCommand::SetVoices(self.voices)
            }
            KeyCode::Char('[') => {
                self.voices = self.voices.saturating_sub(VOICE_STEP).max(1);
                ControlCommand::SetVoices(self.voices)
            }
            _ => return None,
        };
        Some(Action::Send(command))
    }
}

/// Read keys until the engine finishes. Quitting sends a stop and keeps
/// waiting for the engine to wind down.
pub fn run(mut control: Producer<ControlCommand>, mut transport: Transport, finished: impl Fn() -> bool) -> EyreResult<()> {
    terminal::enable_raw_mode().wrap_err("failed to enable raw terminal mode")?;
    let result = read_keys(&mut control, &mut transport, &finished);
    terminal::disable_raw_mode().wrap_err("failed to restore terminal")?;
    result
}

fn read_keys(
    control: &mut Producer<ControlCommand>,
    transport: &mut Transport,
    finished: &impl Fn() -> bool,
) -> EyreResult<()> {
    while !finished() {
        if !event::poll(POLL_INTERVAL)? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        let command = match transport.handle(key.code, key.modifiers) {
            Some(Action::Send(command)) => command,
            Some(Action::Quit) => ControlCommand::Stop,
            None => continue,
        };
        if control.push(command).is_err() {
            log::warn!("control queue full, dropped {command:?}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_keys_stay_in_range() {
        let mut transport = Transport::new(48_000, 16);
        assert_eq!(
            transport.handle(KeyCode::Char(']'), KeyModifiers::NONE),
            Some(Action::Send(ControlCommand::SetVoices(16)))
        );
        for _ in 0..4 {
            transport.handle(KeyCode::Char('['), KeyModifiers::NONE);
        }
        assert_eq!(transport.voices, 1);
    }

    #[test]
    fn pause_toggles() {
        let mut transport = Transport::new(48_000, 16);
        assert_eq!(
            transport.handle(KeyCode::Char(' '), KeyModifiers::NONE),
            Some(Action::Send(ControlCommand::Pause))
        );
        assert_eq!(
            transport.handle(KeyCode::Char(' '), KeyModifiers::NONE),
            Some(Action::Send(ControlCommand::Resume))
        );
    }

    #[test]
    fn seeking_back_from_start_clamps_to_zero() {
        let mut transport = Transport::new(48_000, 16);
        transport.resumed_at = None;
        assert_eq!(
            transport.handle(KeyCode::Left, KeyModifiers::NONE),
            Some(Action::Send(ControlCommand::SeekTo(0)))
        );
        assert_eq!(
            transport.handle(KeyCode::Right, KeyModifiers::NONE),
            Some(Action::Send(ControlCommand::SeekTo(240_000)))
        );
    }
}
