//! Audio output adapters implementing [`PlaybackSink`].
//!
//! - [`PcmFileSink`] appends raw S16LE samples to a file, which any audio
//!   tool can play back (`aplay -f S16_LE -c 2 -r 44100 playback.pcm`).
//! - [`mock::RecordingSink`] records every call for tests.

pub mod mock;

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use spice_proto::protocol::AudioFormat;
use tracing::{debug, info};

use crate::channel::{PlaybackSink, SinkError};

/// Writes PCM packets to a file.
pub struct PcmFileSink {
    path: PathBuf,
    out: Option<BufWriter<File>>,
    bytes_written: u64,
}

impl PcmFileSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            out: None,
            bytes_written: 0,
        }
    }

    /// Total sample bytes written across all streams.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl PlaybackSink for PcmFileSink {
    fn start(
        &mut self,
        format: AudioFormat,
        channels: u32,
        frequency: u32,
        _time: u32,
    ) -> Result<(), SinkError> {
        if format != AudioFormat::S16 {
            return Err(SinkError::Unsupported(format!("sample format {format:?}")));
        }
        if self.out.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.out = Some(BufWriter::new(file));
        }
        info!(
            "playing {channels}ch {frequency}Hz S16LE into {}",
            self.path.display()
        );
        Ok(())
    }

    fn data(&mut self, _time: u32, data: &Bytes) -> Result<(), SinkError> {
        let Some(out) = self.out.as_mut() else {
            return Err(SinkError::Unsupported("data before start".to_string()));
        };
        out.write_all(data)?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SinkError> {
        if let Some(out) = self.out.as_mut() {
            out.flush()?;
        }
        debug!("stream stopped after {} bytes", self.bytes_written);
        Ok(())
    }
}
