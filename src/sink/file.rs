//! File-backed shared log.
//!
//! Independent `flood` and `tui` invocations append to one well-known path.
//! Each append opens the file with `O_APPEND` and issues a single write of
//! one complete line, so concurrent writers interleave whole records and
//! never tear one. Readers only tail the file; no locking on either side.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use super::{LogRecord, RecordSink, SinkError};

/// Append-only multi-writer log file.
///
/// A write failure is reported once per session (`warn!`) and disables the
/// sink for the rest of the session: flooding and rendering carry on with
/// logging off rather than dying on diagnostics.
#[derive(Debug)]
pub struct SharedLog {
    path: PathBuf,
    failed: AtomicBool,
}

impl SharedLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            failed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a write failure has disabled this sink.
    pub fn disabled(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    /// Parse the whole log back into records.
    ///
    /// For the round-trip guarantee and external tooling parity; live
    /// consumers tail the file instead.
    pub fn read_records(&self) -> Result<Vec<LogRecord>, SinkError> {
        let data = std::fs::read_to_string(&self.path)?;

        let mut records = Vec::new();
        for (idx, line) in data.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let record = LogRecord::from_line(line).map_err(|source| SinkError::Corrupted {
                line: idx + 1,
                source,
            })?;
            records.push(record);
        }

        Ok(records)
    }

    fn try_append(&self, record: &LogRecord) -> Result<(), SinkError> {
        let mut line = record.to_line()?.into_bytes();
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        // One write per record: a line is far below the page-size atomicity
        // bound for O_APPEND regular-file writes, so records from other
        // processes can interleave between lines but never inside one.
        file.write_all(&line)?;

        Ok(())
    }
}

impl RecordSink for SharedLog {
    fn append(&self, record: &LogRecord) -> Result<(), SinkError> {
        if self.failed.load(Ordering::Relaxed) {
            return Ok(());
        }

        match self.try_append(record) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.failed.store(true, Ordering::Relaxed);
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "shared log write failed; logging disabled for this session",
                );
                Err(e)
            }
        }
    }
}
