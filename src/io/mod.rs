// Purpose - event stream and output sink contracts

pub mod midi;
pub mod sink;

pub use midi::{EventList, EventSource, MidiEvent, SysEx, TimedEvent};
pub use sink::{BufferSink, OutputSink, SinkMode, WriteStatus};
#[cfg(feature = "rtrb")]
pub use sink::RingSink;
