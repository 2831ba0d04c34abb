use std::collections::VecDeque;

#[cfg(feature = "rtrb")]
use rtrb::Consumer;

/// Commands from outside the render loop. The scheduler polls for them
/// once per output buffer, never in the middle of one.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Master volume change, in percent.
    VolumeDelta(i16),
    /// Jump to an absolute sample position.
    SeekTo(u64),
    Pause,
    Resume,
    /// New active voice limit, clamped to the pool capacity.
    SetVoices(usize),
    Stop,
}

pub trait ControlReceiver {
    /// Next pending command, without blocking.
    fn poll(&mut self) -> Option<ControlCommand>;
}

#[cfg(feature = "rtrb")]
impl ControlReceiver for Consumer<ControlCommand> {
    fn poll(&mut self) -> Option<ControlCommand> {
        Consumer::pop(self).ok()
    }
}

impl ControlReceiver for VecDeque<ControlCommand> {
    fn poll(&mut self) -> Option<ControlCommand> {
        self.pop_front()
    }
}

/// No external control.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoControl;

impl ControlReceiver for NoControl {
    fn poll(&mut self) -> Option<ControlCommand> {
        None
    }
}
