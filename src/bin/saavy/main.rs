//! saavy - play a standard MIDI file through the synthesis engine
//!
//! Run with: cargo run -- song.mid [--voices N] [--chorus CENTS] [--no-early-end]

mod app;
mod keys;
mod midi_file;

use color_eyre::eyre::{bail, eyre, Result as EyreResult, WrapErr};
use std::path::PathBuf;

use app::Player;

struct Args {
    path: PathBuf,
    voices: Option<usize>,
    chorus_cents: Option<i32>,
    early_note_end: bool,
}

fn parse_args() -> EyreResult<Args> {
    let mut path = None;
    let mut voices = None;
    let mut chorus_cents = None;
    let mut early_note_end = true;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--voices" => {
                let value = args.next().ok_or_else(|| eyre!("--voices needs a count"))?;
                voices = Some(value.parse().wrap_err("--voices expects a number")?);
            }
            "--chorus" => {
                let value = args.next().ok_or_else(|| eyre!("--chorus needs a detune in cents"))?;
                chorus_cents = Some(value.parse().wrap_err("--chorus expects cents")?);
            }
            "--no-early-end" => early_note_end = false,
            flag if flag.starts_with("--") => bail!("unknown option {flag}"),
            _ => path = Some(PathBuf::from(arg)),
        }
    }

    let Some(path) = path else {
        bail!("usage: saavy <file.mid> [--voices N] [--chorus CENTS] [--no-early-end]");
    };
    Ok(Args {
        path,
        voices,
        chorus_cents,
        early_note_end,
    })
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = parse_args()?;
    let events = midi_file::load(&args.path)
        .wrap_err_with(|| format!("failed to load {}", args.path.display()))?;

    let mut player = Player::new(events).early_note_end(args.early_note_end);
    if let Some(voices) = args.voices {
        player = player.voices(voices);
    }
    if let Some(cents) = args.chorus_cents {
        player = player.chorus(cents);
    }
    player.run()
}
