//! Record sinks for sampled scheduling statistics.
//!
//! All writers — flood sessions and TUI invocations alike — emit
//! [`LogRecord`]s through the [`RecordSink`] seam. Production uses the
//! file-backed [`SharedLog`]; tests substitute [`MemorySink`]. The sink a
//! component uses is always injected (via config for the file path), never a
//! process-wide global.

pub mod file;

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::file::SharedLog;
use crate::sampler::SchedSnapshot;
use crate::sched::{Nice, SchedPolicy};

/// Errors from appending to or reading back a sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("shared log I/O failed")]
    Io(#[from] std::io::Error),

    #[error("log record encoding failed")]
    Encode(#[source] serde_json::Error),

    #[error("log line {line} is corrupted")]
    Corrupted {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// One line of the shared log: a sampled snapshot plus the writer's session
/// tag.
///
/// Encoded as a single JSON object per line so independent tooling can tail
/// and parse the log. Ordering within one writer is causal (timestamps are
/// monotonic); ordering across writers is arrival order, and consumers that
/// need a global order merge by `timestamp_ns`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Identifies the writing invocation, see [`session_tag`].
    pub session: String,
    /// Process or thread id the sample was taken from.
    pub target: i32,
    /// CLOCK_MONOTONIC nanoseconds at sample time.
    pub timestamp_ns: u64,
    pub vruntime_ns: Option<u64>,
    pub nr_switches: u64,
    pub weight: u64,
    pub policy: SchedPolicy,
    pub nice: Nice,
}

impl LogRecord {
    pub fn from_snapshot(session: &str, snap: &SchedSnapshot) -> Self {
        Self {
            session: session.to_string(),
            target: snap.target,
            timestamp_ns: snap.timestamp_ns,
            vruntime_ns: snap.vruntime_ns,
            nr_switches: snap.nr_switches,
            weight: snap.weight,
            policy: snap.policy,
            nice: snap.nice,
        }
    }

    /// Encode as one log line (without the trailing newline).
    pub fn to_line(&self) -> Result<String, SinkError> {
        serde_json::to_string(self).map_err(SinkError::Encode)
    }

    /// Decode one log line.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Destination for sampled records.
pub trait RecordSink: Send + Sync {
    /// Append one record. Implementations must keep concurrently appended
    /// records whole; interleaving across writers is acceptable, torn
    /// records are not.
    fn append(&self, record: &LogRecord) -> Result<(), SinkError>;
}

/// In-memory sink for tests and headless use.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }
}

impl RecordSink for MemorySink {
    fn append(&self, record: &LogRecord) -> Result<(), SinkError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Tag distinguishing this invocation's records in the shared log.
pub fn session_tag() -> String {
    let epoch_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    format!("{}-{}", std::process::id(), epoch_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> LogRecord {
        LogRecord {
            session: "4242-1700000000".to_string(),
            target: 12345,
            timestamp_ns: 987_654_321_000,
            vruntime_ns: Some(6_051_258_752),
            nr_switches: 1029,
            weight: 110,
            policy: SchedPolicy::Other,
            nice: Nice::new(10).expect("valid"),
        }
    }

    #[test]
    fn test_record_line_round_trip_is_exact() {
        let record = sample_record();
        let line = record.to_line().expect("encode");
        let decoded = LogRecord::from_line(&line).expect("decode");
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_record_line_round_trip_without_vruntime() {
        let record = LogRecord {
            vruntime_ns: None,
            ..sample_record()
        };
        let line = record.to_line().expect("encode");
        let decoded = LogRecord::from_line(&line).expect("decode");
        assert_eq!(decoded, record);
        assert_eq!(decoded.vruntime_ns, None);
    }

    #[test]
    fn test_record_line_carries_stable_policy_tag() {
        let line = sample_record().to_line().expect("encode");
        assert!(line.contains("\"SCHED_OTHER\""), "line was: {line}");
    }

    #[test]
    fn test_memory_sink_collects_in_order() {
        let sink = MemorySink::new();
        let mut record = sample_record();

        for i in 0..3 {
            record.timestamp_ns = i;
            sink.append(&record).expect("append");
        }

        let records = sink.records();
        assert_eq!(records.len(), 3);
        assert_eq!(
            records.iter().map(|r| r.timestamp_ns).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_session_tag_embeds_pid() {
        let tag = session_tag();
        assert!(tag.starts_with(&std::process::id().to_string()));
    }
}
