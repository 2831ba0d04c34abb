//! Walks the event stream, renders the audio between events and hands full
//! buffers to the output sink.

/*
Scheduler
=========

    Idle ──→ EventApplied ⇄ BufferBoundary ──→ EndOfStream
               (render up to the next event, flush when the buffer fills)

Each step does one of:

  - render up to the next due time (event or synthetic note off), stopping
    early if the buffer fills: flush, poll control, BufferBoundary
  - apply the synthetic note off that is due, or else the next event:
    EventApplied
  - after the end marker, render release tails until every voice is free
    (or the tail limit is hit), flush what is left: EndOfStream

Events at the same sample are applied back to back with nothing rendered in
between, so chords start sample-accurately. A synthetic note off due at the
same sample as a real event goes first.

Control commands are only looked at right after a flush, never mid-buffer.
*/

use std::thread;
use std::time::Duration;

use crate::engine::lookahead::{self, PendingOff};
use crate::engine::timebase::TimeBase;
use crate::error::{SinkError, SynthError};
use crate::io::midi::{EventSource, MidiEvent, TimedEvent};
use crate::io::sink::{OutputSink, SinkMode, WriteStatus};
use crate::synth::message::{ControlCommand, ControlReceiver, NoControl};
use crate::synth::Synth;

const RETRY_INTERVAL: Duration = Duration::from_millis(1);
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Nothing consumed yet.
    Idle,
    EventApplied,
    /// A buffer was flushed and control was polled.
    BufferBoundary,
    EndOfStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackOutcome {
    /// Frames handed to the sink.
    pub samples_rendered: u64,
    /// Playback ended on a stop command rather than the end of the stream.
    pub stopped_early: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Events,
    /// Stream ended; render release tails up to `until`.
    Tail { until: u64 },
    Done,
}

pub struct Scheduler<S, O, C = NoControl> {
    synth: Synth,
    source: S,
    sink: O,
    control: C,
    timebase: TimeBase,
    state: SchedulerState,
    phase: Phase,
    buffer: Vec<f32>,
    /// Frames in `buffer` not yet handed to the sink.
    filled: usize,
    pending: Vec<PendingOff>,
    paused: bool,
    rendered: u64,
    stopped_early: bool,
}

impl<S: EventSource, O: OutputSink> Scheduler<S, O, NoControl> {
    pub fn new(synth: Synth, source: S, sink: O) -> Self {
        let timebase = TimeBase::new(synth.config().sample_rate, source.division());
        let frames = synth.config().buffer_frames;
        Self {
            synth,
            source,
            sink,
            control: NoControl,
            timebase,
            state: SchedulerState::Idle,
            phase: Phase::Events,
            buffer: vec![0.0; frames * 2],
            filled: 0,
            pending: Vec::new(),
            paused: false,
            rendered: 0,
            stopped_early: false,
        }
    }
}

impl<S: EventSource, O: OutputSink, C: ControlReceiver> Scheduler<S, O, C> {
    /// Poll `control` at every buffer boundary.
    pub fn with_control<C2: ControlReceiver>(self, control: C2) -> Scheduler<S, O, C2> {
        Scheduler {
            synth: self.synth,
            source: self.source,
            sink: self.sink,
            control,
            timebase: self.timebase,
            state: self.state,
            phase: self.phase,
            buffer: self.buffer,
            filled: self.filled,
            pending: self.pending,
            paused: self.paused,
            rendered: self.rendered,
            stopped_early: self.stopped_early,
        }
    }

    pub fn synth(&self) -> &Synth {
        &self.synth
    }

    pub fn synth_mut(&mut self) -> &mut Synth {
        &mut self.synth
    }

    pub fn sink(&self) -> &O {
        &self.sink
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn timebase(&self) -> &TimeBase {
        &self.timebase
    }

    /// Synthetic note offs not yet applied, earliest first.
    pub fn pending_offs(&self) -> &[PendingOff] {
        &self.pending
    }

    pub fn outcome(&self) -> PlaybackOutcome {
        PlaybackOutcome {
            samples_rendered: self.rendered,
            stopped_early: self.stopped_early,
        }
    }

    pub fn into_parts(self) -> (Synth, S, O) {
        (self.synth, self.source, self.sink)
    }

    /// Run to the end of the stream (or a stop command).
    pub fn play(&mut self) -> Result<PlaybackOutcome, SynthError> {
        log::debug!("scheduler: playback started");
        while self.step()? != SchedulerState::EndOfStream {}
        let outcome = self.outcome();
        log::debug!("scheduler: playback finished, {outcome:?}");
        Ok(outcome)
    }

    /// Step until the sample clock reaches `sample` or the stream ends.
    pub fn run_until(&mut self, sample: u64) -> Result<SchedulerState, SynthError> {
        while self.synth.now() < sample {
            if self.step()? == SchedulerState::EndOfStream {
                break;
            }
        }
        Ok(self.state)
    }

    pub fn step(&mut self) -> Result<SchedulerState, SynthError> {
        let state = match self.phase {
            Phase::Done => SchedulerState::EndOfStream,
            Phase::Events => self.step_events()?,
            Phase::Tail { until } => self.step_tail(until)?,
        };
        self.state = state;
        Ok(state)
    }

    fn step_events(&mut self) -> Result<SchedulerState, SynthError> {
        let next_event = self.source.peek().map(|e| self.timebase.sample_at(e.tick));
        let next_off = self.pending.first().map(|p| p.at);
        let due = match (next_event, next_off) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => {
                // Source ran dry without an end marker.
                self.end_of_track();
                return Ok(SchedulerState::EventApplied);
            }
        };

        let now = self.synth.now();
        if due > now {
            let space = self.capacity() - self.filled;
            let frames = (due - now).min(space as u64) as usize;
            self.render_frames(frames);
            if self.filled == self.capacity() {
                return self.buffer_boundary();
            }
        }

        if next_off.is_some_and(|at| at <= self.synth.now()) {
            let off = self.pending.remove(0);
            self.synth.note_off_voice(off.link);
            return Ok(SchedulerState::EventApplied);
        }
        match self.source.next_event() {
            Some(event) => self.apply(event),
            None => self.end_of_track(),
        }
        Ok(SchedulerState::EventApplied)
    }

    fn step_tail(&mut self, until: u64) -> Result<SchedulerState, SynthError> {
        let now = self.synth.now();
        if self.synth.live_voices() == 0 || now >= until {
            self.finish()?;
            return Ok(SchedulerState::EndOfStream);
        }
        let space = self.capacity() - self.filled;
        let frames = (until - now).min(space as u64) as usize;
        self.render_frames(frames);
        if self.filled == self.capacity() {
            return self.buffer_boundary();
        }
        Ok(SchedulerState::EventApplied)
    }

    fn apply(&mut self, event: TimedEvent) {
        match event.event {
            MidiEvent::Tempo { micros_per_quarter } => {
                self.timebase.set_tempo(event.tick, micros_per_quarter);
                log::debug!("scheduler: tempo {micros_per_quarter} us/quarter at tick {}", event.tick);
            }
            MidiEvent::EndOfTrack => self.end_of_track(),
            ref other => {
                self.synth.apply_event(other);
                let starts_note = matches!(other, MidiEvent::NoteOn { velocity, .. } if *velocity > 0);
                if starts_note && self.synth.config().early_note_end {
                    self.scan_started();
                }
            }
        }
    }

    /// Schedule synthetic note offs for voices that a pitch bend pushes past
    /// the end of their data before the key is released.
    fn scan_started(&mut self) {
        for &link in self.synth.started_voices() {
            let Some(target) = self.synth.scan_target(link) else {
                continue;
            };
            let events = (0..).map_while(|n| self.source.peek_ahead(n));
            if let Some(at) = lookahead::scan(&target, self.timebase, events, self.synth.tables()) {
                log::trace!("scheduler: early note end for voice {} at sample {at}", link.index);
                lookahead::schedule(&mut self.pending, PendingOff { at, link });
            }
        }
    }

    fn end_of_track(&mut self) {
        let config = self.synth.config();
        let tail = config.max_tail_ms as u64 * config.sample_rate as u64 / 1000;
        let until = self.synth.now() + tail;
        self.pending.clear();
        self.synth.release_all();
        self.phase = Phase::Tail { until };
        log::debug!("scheduler: end of stream at sample {}, rendering tails", self.synth.now());
    }

    fn capacity(&self) -> usize {
        self.buffer.len() / 2
    }

    fn render_frames(&mut self, frames: usize) {
        let start = self.filled * 2;
        let end = start + frames * 2;
        self.synth.render(&mut self.buffer[start..end]);
        self.filled += frames;
        self.rendered += frames as u64;
    }

    fn buffer_boundary(&mut self) -> Result<SchedulerState, SynthError> {
        self.flush_buffer()?;
        self.poll_control()?;
        Ok(match self.phase {
            Phase::Done => SchedulerState::EndOfStream,
            _ => SchedulerState::BufferBoundary,
        })
    }

    /// Hand the filled part of the buffer to the sink, waiting while a
    /// realtime sink pushes back.
    fn flush_buffer(&mut self) -> Result<(), SynthError> {
        if self.filled == 0 {
            return Ok(());
        }
        let samples = &self.buffer[..self.filled * 2];
        loop {
            match self.sink.write(samples) {
                Ok(WriteStatus::Written) => break,
                Ok(WriteStatus::WouldBlock) => {
                    debug_assert_eq!(self.sink.mode(), SinkMode::Realtime);
                    thread::sleep(RETRY_INTERVAL);
                }
                Err(e) => return Err(self.abort(e)),
            }
        }
        self.filled = 0;
        Ok(())
    }

    /// Flush whatever is buffered and close the sink.
    fn finish(&mut self) -> Result<(), SynthError> {
        self.flush_buffer()?;
        if let Err(e) = self.sink.flush() {
            return Err(self.abort(e));
        }
        self.phase = Phase::Done;
        Ok(())
    }

    /// Sink failure ends the session: release everything and stop.
    fn abort(&mut self, error: SinkError) -> SynthError {
        log::warn!("scheduler: output sink failed, stopping playback: {error}");
        self.synth.release_all();
        self.pending.clear();
        self.phase = Phase::Done;
        SynthError::Sink(error)
    }

    fn poll_control(&mut self) -> Result<(), SynthError> {
        loop {
            while let Some(command) = self.control.poll() {
                self.handle_command(command)?;
                if self.phase == Phase::Done {
                    return Ok(());
                }
            }
            if !self.paused {
                return Ok(());
            }
            thread::sleep(PAUSE_POLL_INTERVAL);
        }
    }

    fn handle_command(&mut self, command: ControlCommand) -> Result<(), SynthError> {
        log::debug!("scheduler: {command:?}");
        match command {
            ControlCommand::VolumeDelta(delta) => self.synth.adjust_volume(delta),
            ControlCommand::SeekTo(sample) => self.seek(sample),
            ControlCommand::Pause => self.paused = true,
            ControlCommand::Resume => self.paused = false,
            ControlCommand::SetVoices(limit) => self.synth.set_voice_limit(limit),
            ControlCommand::Stop => {
                self.synth.reset_voices();
                self.pending.clear();
                self.paused = false;
                self.stopped_early = true;
                self.finish()?;
            }
        }
        Ok(())
    }

    /// Rewind and replay everything but notes up to `target` without
    /// rendering, so controllers, programs and tempo are as they would be
    /// had playback reached it normally.
    fn seek(&mut self, target: u64) {
        self.source.rewind();
        self.synth.reset();
        self.timebase.reset();
        self.pending.clear();
        self.phase = Phase::Events;
        while let Some(event) = self.source.peek() {
            let at = self.timebase.sample_at(event.tick);
            if at >= target || event.event == MidiEvent::EndOfTrack {
                break;
            }
            let Some(event) = self.source.next_event() else {
                break;
            };
            match event.event {
                MidiEvent::Tempo { micros_per_quarter } => self.timebase.set_tempo(event.tick, micros_per_quarter),
                ref other if other.is_note() => {}
                ref other => self.synth.apply_event(other),
            }
        }
        self.synth.set_now(target);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use crate::config::SynthConfig;
    use crate::instrument::ToneBank;
    use crate::io::midi::EventList;
    use crate::io::sink::BufferSink;

    const RATE: u32 = 48_000;

    fn on(tick: u64, key: u8) -> TimedEvent {
        TimedEvent::new(tick, MidiEvent::NoteOn { channel: 0, key, velocity: 100 })
    }

    fn off(tick: u64, key: u8) -> TimedEvent {
        TimedEvent::new(tick, MidiEvent::NoteOff { channel: 0, key, velocity: 0 })
    }

    // 24 ticks per quarter at 120 bpm: one tick is 1000 samples at 48 kHz.
    fn scheduler(events: Vec<TimedEvent>) -> Scheduler<EventList, BufferSink> {
        let config = SynthConfig::new(RATE).with_max_voices(16).with_buffer_frames(256);
        let synth = Synth::new(config, ToneBank::new()).unwrap();
        Scheduler::new(synth, EventList::new(24, events), BufferSink::new())
    }

    #[test]
    fn starts_idle() {
        let s = scheduler(vec![on(0, 60)]);
        assert_eq!(s.state(), SchedulerState::Idle);
    }

    #[test]
    fn chord_is_applied_without_rendering() {
        let mut s = scheduler(vec![on(0, 60), on(0, 64), on(0, 67), off(10, 60)]);
        for _ in 0..3 {
            assert_eq!(s.step().unwrap(), SchedulerState::EventApplied);
        }
        assert_eq!(s.synth().now(), 0);
        assert_eq!(s.synth().live_voices(), 3);
    }

    #[test]
    fn renders_until_the_next_event() {
        let mut s = scheduler(vec![on(0, 60), off(2, 60)]);
        s.run_until(2_000).unwrap();
        assert_eq!(s.synth().now(), 2_000);
        // 2000 frames through a 256-frame buffer: seven full flushes.
        assert_eq!(s.sink().writes(), 7);
    }

    #[test]
    fn plays_to_the_end() {
        let mut s = scheduler(vec![on(0, 60), off(1, 60)]);
        let outcome = s.play().unwrap();
        assert!(outcome.samples_rendered >= 1_000);
        assert!(!outcome.stopped_early);
        assert_eq!(s.synth().live_voices(), 0);
        assert!(s.sink().is_flushed());
        assert_eq!(s.sink().frames() as u64, outcome.samples_rendered);
        assert_eq!(s.step().unwrap(), SchedulerState::EndOfStream);
    }

    #[test]
    fn tempo_change_only_affects_later_ticks() {
        let events = vec![
            on(0, 60),
            TimedEvent::new(4, MidiEvent::Tempo { micros_per_quarter: 250_000 }),
            off(8, 60),
        ];
        let mut s = scheduler(events);
        s.run_until(4_000).unwrap();
        assert_eq!(s.timebase().sample_at(4), 4_000);
        while s.synth().now() < 4_000 || s.timebase().tempo() != 250_000 {
            s.step().unwrap();
        }
        assert_eq!(s.timebase().sample_at(4), 4_000);
        assert_eq!(s.timebase().sample_at(8), 6_000);
    }

    #[test]
    fn stop_command_ends_playback() {
        let mut s = scheduler(vec![on(0, 60), off(100, 60)])
            .with_control(VecDeque::from([ControlCommand::Stop]));
        let outcome = s.play().unwrap();
        assert!(outcome.stopped_early);
        assert_eq!(outcome.samples_rendered, 256);
        assert_eq!(s.synth().live_voices(), 0);
    }

    #[test]
    fn seek_replays_controllers_but_not_notes() {
        let events = vec![
            TimedEvent::new(0, MidiEvent::ControlChange { channel: 0, controller: 7, value: 33 }),
            on(0, 60),
            TimedEvent::new(20, MidiEvent::ControlChange { channel: 0, controller: 7, value: 99 }),
            off(40, 60),
        ];
        let mut s = scheduler(events).with_control(VecDeque::from([ControlCommand::SeekTo(10_000)]));
        s.run_until(256).unwrap();
        assert_eq!(s.state(), SchedulerState::BufferBoundary);
        assert_eq!(s.synth().now(), 10_000);
        assert_eq!(s.synth().live_voices(), 0);
        assert_eq!(s.synth().channel(0).unwrap().volume, 33);
    }

    #[test]
    fn set_voices_clamps_the_pool() {
        let mut s = scheduler(vec![on(0, 60), on(0, 64), on(0, 67), off(100, 60)])
            .with_control(VecDeque::from([ControlCommand::SetVoices(1)]));
        s.run_until(256).unwrap();
        assert_eq!(s.synth().pool().limit(), 1);
        assert!(s.synth().live_voices() <= 1);
    }

    struct Broken;

    impl OutputSink for Broken {
        fn mode(&self) -> SinkMode {
            SinkMode::Batch
        }

        fn write(&mut self, _samples: &[f32]) -> Result<WriteStatus, SinkError> {
            Err(SinkError::Disconnected)
        }
    }

    #[test]
    fn sink_failure_aborts() {
        let config = SynthConfig::new(RATE).with_buffer_frames(64);
        let synth = Synth::new(config, ToneBank::new()).unwrap();
        let mut s = Scheduler::new(synth, EventList::new(24, vec![on(0, 60), off(10, 60)]), Broken);
        assert_eq!(s.play(), Err(SynthError::Sink(SinkError::Disconnected)));
        assert_eq!(s.step().unwrap(), SchedulerState::EndOfStream);
        assert!(s
            .synth()
            .pool()
            .voices()
            .iter()
            .all(|v| !v.status.is_held()));
    }
}
