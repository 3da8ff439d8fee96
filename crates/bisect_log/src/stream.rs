//! Streaming trace loader.
//!
//! Reads one line at a time so a large trace never has to be materialized.
//! The loader is a single-pass iterator; restarting requires reopening the
//! source.

use crate::decode::{Decoded, LineDecoder};
use crate::event::CheckpointEvent;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Per-source load counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadStats {
    /// Lines read, including blank and malformed ones
    pub lines: u64,
    /// Events produced
    pub events: u64,
    /// Malformed lines dropped
    pub dropped: u64,
    /// Well-formed records rejected by the event filter
    pub filtered: u64,
    /// Blank lines skipped
    pub blank: u64,
}

impl LoadStats {
    /// Merge counters from another source
    pub fn merge(&mut self, other: &LoadStats) {
        self.lines += other.lines;
        self.events += other.events;
        self.dropped += other.dropped;
        self.filtered += other.filtered;
        self.blank += other.blank;
    }
}

/// Loader errors
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The source exists but could not be read
    #[error("I/O error reading {path}: {error}")]
    Io {
        /// Source label
        path: String,
        /// Underlying error
        error: io::Error,
    },
}

/// Lazy, single-pass iterator of checkpoint events over a line reader
pub struct TraceLoader<R> {
    reader: R,
    decoder: LineDecoder,
    label: String,
    stats: LoadStats,
    buffer: Vec<u8>,
    pending: VecDeque<CheckpointEvent>,
    error: Option<io::Error>,
}

impl TraceLoader<BufReader<File>> {
    /// Open a trace file.
    ///
    /// A missing file is not an error: it yields `Ok(None)`, meaning zero
    /// events from this source.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be opened
    pub fn open(path: &Path, decoder: LineDecoder) -> Result<Option<Self>, LoadError> {
        match File::open(path) {
            Ok(file) => Ok(Some(Self::new(
                BufReader::new(file),
                decoder,
                path.display().to_string(),
            ))),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "trace source not found, treating as empty");
                Ok(None)
            }
            Err(error) => Err(LoadError::Io {
                path: path.display().to_string(),
                error,
            }),
        }
    }
}

impl<R: BufRead> TraceLoader<R> {
    /// Create a loader over any buffered reader
    pub fn new(reader: R, decoder: LineDecoder, label: impl Into<String>) -> Self {
        Self {
            reader,
            decoder,
            label: label.into(),
            stats: LoadStats::default(),
            buffer: Vec::new(),
            pending: VecDeque::new(),
            error: None,
        }
    }

    /// Source label used in diagnostics
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Counters so far
    #[must_use]
    pub fn stats(&self) -> LoadStats {
        self.stats
    }

    /// Finish loading and report counters.
    ///
    /// # Errors
    ///
    /// Returns error if reading stopped on an I/O failure
    pub fn finish(self) -> Result<LoadStats, LoadError> {
        match self.error {
            Some(error) => Err(LoadError::Io {
                path: self.label,
                error,
            }),
            None => {
                tracing::info!(
                    source = %self.label,
                    lines = self.stats.lines,
                    events = self.stats.events,
                    dropped = self.stats.dropped,
                    filtered = self.stats.filtered,
                    "trace loaded"
                );
                Ok(self.stats)
            }
        }
    }
}

impl<R: BufRead> Iterator for TraceLoader<R> {
    type Item = CheckpointEvent;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(event) = self.pending.pop_front() {
            return Some(event);
        }
        if self.error.is_some() {
            return None;
        }

        loop {
            self.buffer.clear();
            match self.reader.read_until(b'\n', &mut self.buffer) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    self.error = Some(error);
                    return None;
                }
            }
            self.stats.lines += 1;

            // Invalid UTF-8 is a bad line, not a bad source
            let Ok(line) = std::str::from_utf8(&self.buffer) else {
                self.stats.dropped += 1;
                tracing::debug!(source = %self.label, line = self.stats.lines, "dropped non-UTF-8 line");
                continue;
            };

            match self.decoder.decode_line(line) {
                Ok(Decoded::Event(event)) => {
                    self.stats.events += 1;
                    return Some(event);
                }
                Ok(Decoded::Split(events)) => {
                    self.stats.events += events.len() as u64;
                    self.pending.extend(events);
                    if let Some(event) = self.pending.pop_front() {
                        return Some(event);
                    }
                }
                Ok(Decoded::Filtered) => self.stats.filtered += 1,
                Ok(Decoded::Blank) => self.stats.blank += 1,
                Err(err) => {
                    self.stats.dropped += 1;
                    tracing::debug!(
                        source = %self.label,
                        line = self.stats.lines,
                        error = %err,
                        "dropped malformed line"
                    );
                }
            }
        }
    }
}
