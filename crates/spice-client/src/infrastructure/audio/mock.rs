//! Recording playback sink for tests.
//!
//! Every call is pushed into a shared `Mutex<Vec<SinkCall>>` so a test can
//! keep a clone and assert on exactly what the channel delivered, in order.
//! Set `should_fail` to make every call return an error.

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use spice_proto::protocol::AudioFormat;

use crate::channel::{PlaybackSink, SinkError};

/// One recorded sink call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Start {
        format: AudioFormat,
        channels: u32,
        frequency: u32,
        time: u32,
    },
    Data {
        time: u32,
        data: Bytes,
    },
    Stop,
}

/// A sink that records calls without producing sound.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    pub calls: Arc<Mutex<Vec<SinkCall>>>,
    pub should_fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of the calls so far.
    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, call: SinkCall) -> Result<(), SinkError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        if self.should_fail {
            return Err(SinkError::Unsupported("simulated sink failure".to_string()));
        }
        Ok(())
    }
}

impl PlaybackSink for RecordingSink {
    fn start(
        &mut self,
        format: AudioFormat,
        channels: u32,
        frequency: u32,
        time: u32,
    ) -> Result<(), SinkError> {
        self.record(SinkCall::Start {
            format,
            channels,
            frequency,
            time,
        })
    }

    fn data(&mut self, time: u32, data: &Bytes) -> Result<(), SinkError> {
        self.record(SinkCall::Data {
            time,
            data: data.clone(),
        })
    }

    fn stop(&mut self) -> Result<(), SinkError> {
        self.record(SinkCall::Stop)
    }
}
