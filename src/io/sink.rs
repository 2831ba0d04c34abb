//! Where rendered buffers go.
//!
//! A sink either takes a whole buffer or reports that it cannot right now.
//! Batch sinks (files, memory) never push back; a realtime sink in front of
//! an audio device does, and the scheduler waits and retries.

use crate::error::SinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    /// Never returns [`WriteStatus::WouldBlock`].
    Batch,
    /// May push back while the device catches up.
    Realtime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Written,
    /// Nothing was written; try the same buffer again later.
    WouldBlock,
}

/// Consumer of interleaved stereo `f32` buffers.
pub trait OutputSink {
    fn mode(&self) -> SinkMode;

    /// Accept all of `samples` or none of it.
    fn write(&mut self, samples: &[f32]) -> Result<WriteStatus, SinkError>;

    /// Called once when the stream ends or playback stops.
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<O: OutputSink + ?Sized> OutputSink for Box<O> {
    fn mode(&self) -> SinkMode {
        (**self).mode()
    }

    fn write(&mut self, samples: &[f32]) -> Result<WriteStatus, SinkError> {
        (**self).write(samples)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }
}

/// Collects everything in memory. Used for offline renders and tests.
#[derive(Debug, Default, Clone)]
pub struct BufferSink {
    samples: Vec<f32>,
    writes: usize,
    flushed: bool,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }

    /// Number of buffers handed over so far.
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }
}

impl OutputSink for BufferSink {
    fn mode(&self) -> SinkMode {
        SinkMode::Batch
    }

    fn write(&mut self, samples: &[f32]) -> Result<WriteStatus, SinkError> {
        self.samples.extend_from_slice(samples);
        self.writes += 1;
        Ok(WriteStatus::Written)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.flushed = true;
        Ok(())
    }
}

/// Realtime sink feeding an audio callback through a lock-free ring.
#[cfg(feature = "rtrb")]
pub struct RingSink {
    producer: rtrb::Producer<f32>,
    capacity: usize,
}

#[cfg(feature = "rtrb")]
impl RingSink {
    pub fn new(producer: rtrb::Producer<f32>) -> Self {
        let capacity = producer.slots();
        Self { producer, capacity }
    }

    /// A sink and the consumer end for the device callback, holding
    /// `capacity` samples. The capacity seen by the sink is whatever is free
    /// when it is built, so build it before anything is written.
    pub fn with_capacity(capacity: usize) -> (Self, rtrb::Consumer<f32>) {
        let (producer, consumer) = rtrb::RingBuffer::new(capacity);
        (Self::new(producer), consumer)
    }

    /// A ring with room for `buffers` stereo buffers of `buffer_frames`
    /// frames. Fails up front if not even one buffer would fit.
    pub fn for_buffers(buffer_frames: usize, buffers: usize) -> Result<(Self, rtrb::Consumer<f32>), SinkError> {
        let buffer = buffer_frames.saturating_mul(2);
        let capacity = buffer.saturating_mul(buffers);
        if buffer == 0 || capacity < buffer {
            return Err(SinkError::Capacity { buffer, capacity });
        }
        Ok(Self::with_capacity(capacity))
    }

    /// Whether a whole buffer of `frames` stereo frames fits the ring.
    pub fn accepts(&self, frames: usize) -> bool {
        frames.saturating_mul(2) <= self.capacity
    }
}

#[cfg(feature = "rtrb")]
impl OutputSink for RingSink {
    fn mode(&self) -> SinkMode {
        SinkMode::Realtime
    }

    fn write(&mut self, samples: &[f32]) -> Result<WriteStatus, SinkError> {
        if self.producer.is_abandoned() {
            return Err(SinkError::Disconnected);
        }
        if samples.len() > self.capacity {
            return Err(SinkError::Capacity {
                buffer: samples.len(),
                capacity: self.capacity,
            });
        }
        if self.producer.slots() < samples.len() {
            return Ok(WriteStatus::WouldBlock);
        }
        let chunk = self
            .producer
            .write_chunk_uninit(samples.len())
            .map_err(|e| SinkError::Io(e.to_string()))?;
        chunk.fill_from_iter(samples.iter().copied());
        Ok(WriteStatus::Written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_sink_collects_in_order() {
        let mut sink = BufferSink::new();
        assert_eq!(sink.write(&[0.1, 0.2]), Ok(WriteStatus::Written));
        assert_eq!(sink.write(&[0.3, 0.4]), Ok(WriteStatus::Written));
        sink.flush().unwrap();
        assert_eq!(sink.samples(), &[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(sink.frames(), 2);
        assert_eq!(sink.writes(), 2);
        assert!(sink.is_flushed());
    }

    #[cfg(feature = "rtrb")]
    #[test]
    fn ring_sink_is_all_or_nothing() {
        let (mut sink, mut consumer) = RingSink::with_capacity(4);
        assert_eq!(sink.write(&[1.0, 2.0, 3.0]), Ok(WriteStatus::Written));
        assert_eq!(sink.write(&[4.0, 5.0]), Ok(WriteStatus::WouldBlock));
        assert_eq!(consumer.pop(), Ok(1.0));
        assert_eq!(sink.write(&[4.0, 5.0]), Ok(WriteStatus::Written));
        let drained: Vec<f32> = std::iter::from_fn(|| consumer.pop().ok()).collect();
        assert_eq!(drained, vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[cfg(feature = "rtrb")]
    #[test]
    fn ring_sink_is_sized_for_whole_buffers() {
        let (sink, _consumer) = RingSink::for_buffers(256, 4).unwrap();
        assert!(sink.accepts(256));
        assert!(sink.accepts(1024));
        assert!(!sink.accepts(1025));

        assert_eq!(
            RingSink::for_buffers(256, 0).err(),
            Some(SinkError::Capacity { buffer: 512, capacity: 0 })
        );
        assert!(RingSink::for_buffers(0, 4).is_err());

        let (mut small, _consumer) = RingSink::with_capacity(4);
        assert!(!small.accepts(3));
        assert_eq!(
            small.write(&[0.0; 6]),
            Err(SinkError::Capacity { buffer: 6, capacity: 4 })
        );
    }

    #[cfg(feature = "rtrb")]
    #[test]
    fn ring_sink_reports_disconnect() {
        let (mut sink, consumer) = RingSink::with_capacity(4);
        drop(consumer);
        assert_eq!(sink.write(&[0.0]), Err(SinkError::Disconnected));
    }
}
