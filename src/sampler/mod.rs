//! Scheduling-statistics sampler.
//!
//! [`StatSampler::poll`] reads a target's kernel scheduling accounting at the
//! moment of the call and normalizes it into an immutable [`SchedSnapshot`].
//! Cadence is entirely caller-controlled; the sampler keeps no timers and no
//! state beyond the per-target last timestamp used to enforce that every
//! stream's timestamps are strictly increasing.

pub mod parse;

use std::collections::HashMap;
use std::io;

use thiserror::Error;

use self::parse::{parse_sched_text, ParseError};
use crate::sched::{self, Nice, NiceError, SchedPolicy};

/// The kernel scales `se.load.weight` by 2^10 (`SCHED_FIXEDPOINT_SHIFT`);
/// unscaling puts snapshot weights in the same domain as
/// [`sched::weight_for_nice`].
const LOAD_WEIGHT_SHIFT: u32 = 10;

/// Point-in-time record of one target's scheduling statistics.
///
/// Never mutated after creation. `vruntime_ns` and `nr_switches` are the
/// kernel's own monotonically non-decreasing counters, passed through
/// untouched; deltas and rates are computed by consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedSnapshot {
    /// Process or thread id the sample was taken from.
    pub target: i32,
    /// CLOCK_MONOTONIC nanoseconds at sample time.
    pub timestamp_ns: u64,
    /// Virtual runtime in nanoseconds; `None` when the kernel does not
    /// expose it (never fabricated).
    pub vruntime_ns: Option<u64>,
    /// Cumulative context switches.
    pub nr_switches: u64,
    /// CFS load weight, unscaled to the `sched_prio_to_weight` domain.
    pub weight: u64,
    pub policy: SchedPolicy,
    pub nice: Nice,
}

/// Errors from polling a target.
#[derive(Error, Debug)]
pub enum SampleError {
    /// The target exited. Terminal for that stream; callers must not retry
    /// indefinitely.
    #[error("target {pid} not found (process exited)")]
    TargetNotFound { pid: i32 },

    /// The monotonic clock reported a non-increasing timestamp for a stream.
    /// The sample is dropped and never delivered; sampling continues.
    #[error(
        "non-monotonic sample for target {pid} dropped \
         (last {last_ns}ns, observed {observed_ns}ns)"
    )]
    ClockRegression {
        pid: i32,
        last_ns: u64,
        observed_ns: u64,
    },

    #[error("reading sched accounting for target {pid}")]
    Io {
        pid: i32,
        #[source]
        source: io::Error,
    },

    #[error("parsing sched accounting for target {pid}")]
    Parse {
        pid: i32,
        #[source]
        source: ParseError,
    },

    #[error(transparent)]
    Nice(#[from] NiceError),
}

/// Polls per-task scheduling statistics on demand.
#[derive(Debug, Default)]
pub struct StatSampler {
    /// Last delivered timestamp per target, for the strictly-increasing
    /// stream invariant.
    last_seen: HashMap<i32, u64>,
}

impl StatSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sample the target's scheduling statistics right now.
    pub fn poll(&mut self, pid: i32) -> Result<SchedSnapshot, SampleError> {
        let text = read_sched_file(pid)?;
        let raw = parse_sched_text(&text).map_err(|source| SampleError::Parse { pid, source })?;

        let nice = match sched::niceness_of(pid) {
            Ok(nice) => nice,
            // Exited between the file read and the priority query.
            Err(NiceError::NoSuchProcess { .. }) => {
                return Err(SampleError::TargetNotFound { pid })
            }
            Err(e) => return Err(e.into()),
        };

        let timestamp_ns = sched::monotonic_now_ns();
        if let Some(&last_ns) = self.last_seen.get(&pid) {
            if timestamp_ns <= last_ns {
                return Err(SampleError::ClockRegression {
                    pid,
                    last_ns,
                    observed_ns: timestamp_ns,
                });
            }
        }
        self.last_seen.insert(pid, timestamp_ns);

        Ok(SchedSnapshot {
            target: pid,
            timestamp_ns,
            vruntime_ns: raw.vruntime_ms.map(ms_to_ns),
            nr_switches: raw.nr_switches,
            weight: raw.load_weight >> LOAD_WEIGHT_SHIFT,
            policy: SchedPolicy::from_raw(raw.policy),
            nice,
        })
    }

    /// Drop a target's stream state, e.g. after [`SampleError::TargetNotFound`].
    pub fn forget(&mut self, pid: i32) {
        self.last_seen.remove(&pid);
    }
}

fn ms_to_ns(ms: f64) -> u64 {
    (ms * 1_000_000.0) as u64
}

#[cfg(target_os = "linux")]
fn read_sched_file(pid: i32) -> Result<String, SampleError> {
    let path = format!("/proc/{pid}/sched");

    std::fs::read_to_string(&path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => SampleError::TargetNotFound { pid },
        _ => SampleError::Io { pid, source: e },
    })
}

#[cfg(not(target_os = "linux"))]
fn read_sched_file(_pid: i32) -> Result<String, SampleError> {
    Err(SampleError::Nice(NiceError::Unsupported))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ms_to_ns_conversion() {
        assert_eq!(ms_to_ns(0.0), 0);
        assert_eq!(ms_to_ns(1.0), 1_000_000);
        assert_eq!(ms_to_ns(6051.258752), 6_051_258_752);
    }

    #[cfg(target_os = "linux")]
    mod linux {
        use super::super::*;

        fn sched_accounting_available() -> bool {
            std::path::Path::new("/proc/self/sched").exists()
        }

        #[test]
        fn test_poll_self_produces_consistent_snapshot() {
            if !sched_accounting_available() {
                eprintln!("skipping: kernel does not expose /proc/<pid>/sched");
                return;
            }

            let pid = std::process::id() as i32;
            let mut sampler = StatSampler::new();
            let snap = sampler.poll(pid).expect("sampling self succeeds");

            assert_eq!(snap.target, pid);
            assert!(snap.timestamp_ns > 0);
            assert_eq!(snap.weight, sched::weight_for_nice(snap.nice));
        }

        #[test]
        fn test_poll_timestamps_strictly_increase() {
            if !sched_accounting_available() {
                eprintln!("skipping: kernel does not expose /proc/<pid>/sched");
                return;
            }

            let pid = std::process::id() as i32;
            let mut sampler = StatSampler::new();

            let mut last = 0u64;
            for _ in 0..5 {
                let snap = sampler.poll(pid).expect("sampling self succeeds");
                assert!(snap.timestamp_ns > last);
                last = snap.timestamp_ns;
            }
        }

        #[test]
        fn test_poll_counters_never_decrease() {
            if !sched_accounting_available() {
                eprintln!("skipping: kernel does not expose /proc/<pid>/sched");
                return;
            }

            let pid = std::process::id() as i32;
            let mut sampler = StatSampler::new();

            let first = sampler.poll(pid).expect("first sample");
            let second = sampler.poll(pid).expect("second sample");
            assert!(second.nr_switches >= first.nr_switches);
        }

        #[test]
        fn test_poll_missing_target() {
            let mut sampler = StatSampler::new();
            // Kernel pid limit is below 2^22; this pid cannot exist.
            let err = sampler.poll(i32::MAX).expect_err("no such pid");
            assert!(matches!(err, SampleError::TargetNotFound { .. }));
        }

        #[test]
        fn test_regressed_sample_is_dropped() {
            if !sched_accounting_available() {
                eprintln!("skipping: kernel does not expose /proc/<pid>/sched");
                return;
            }

            let pid = std::process::id() as i32;
            let mut sampler = StatSampler::new();

            // Seed a last-seen timestamp from the far future; the next
            // observation must be rejected, not delivered.
            sampler.last_seen.insert(pid, u64::MAX);
            let err = sampler.poll(pid).expect_err("regressed sample");
            assert!(matches!(err, SampleError::ClockRegression { .. }));

            // Forgetting the stream recovers it.
            sampler.forget(pid);
            sampler.poll(pid).expect("stream sampled fresh");
        }
    }
}
