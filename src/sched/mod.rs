//! OS scheduling boundary.
//!
//! Every niceness-setting syscall, `/proc`-independent accounting query and
//! signal delivery goes through this module, so the kernel-facing (and
//! Linux-specific) surface has exactly one implementation point. Nothing here
//! reads kernel structs from memory; the stable userspace interfaces
//! (`setpriority`, `getpriority`, `CLOCK_MONOTONIC`) are the only sources.

use std::fmt;
use std::str::FromStr;

use nix::errno::Errno;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the niceness/scheduling primitives.
#[derive(Error, Debug)]
pub enum NiceError {
    #[error("niceness must be an integer in -20..=19, got {input:?}")]
    Invalid { input: String },

    #[error("niceness {value} out of range -20..=19")]
    OutOfRange { value: i64 },

    #[error(
        "the kernel refused to set niceness {nice}: the caller lacks CAP_SYS_NICE \
         (negative niceness requires elevated privilege, e.g. sudo)"
    )]
    PermissionDenied { nice: i8 },

    #[error("no such process: {pid}")]
    NoSuchProcess { pid: i32 },

    #[error("scheduling syscall failed: {errno}")]
    Os { errno: Errno },

    #[error("scheduling primitives are only supported on Linux")]
    Unsupported,
}

/// A validated niceness level.
///
/// Construction is the only bounds check in the crate; everything downstream
/// can rely on the `-20..=19` range. Out-of-range input is rejected at the
/// edge, never clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nice(i8);

impl Nice {
    pub const MIN: Nice = Nice(-20);
    pub const MAX: Nice = Nice(19);

    /// Construct a niceness level, returning `None` when out of range.
    pub const fn new(value: i8) -> Option<Self> {
        if value >= -20 && value <= 19 {
            Some(Self(value))
        } else {
            None
        }
    }

    pub const fn get(self) -> i8 {
        self.0
    }
}

impl fmt::Display for Nice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Nice {
    type Err = NiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i64 = s.trim().parse().map_err(|_| NiceError::Invalid {
            input: s.to_string(),
        })?;

        i8::try_from(value)
            .ok()
            .and_then(Nice::new)
            .ok_or(NiceError::OutOfRange { value })
    }
}

/// Scheduling policy of a task, as reported by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedPolicy {
    /// `SCHED_OTHER` (also called `SCHED_NORMAL`), the CFS default.
    #[serde(rename = "SCHED_OTHER")]
    Other,
    #[serde(rename = "SCHED_FIFO")]
    Fifo,
    #[serde(rename = "SCHED_RR")]
    RoundRobin,
    #[serde(rename = "SCHED_BATCH")]
    Batch,
    #[serde(rename = "SCHED_IDLE")]
    Idle,
    #[serde(rename = "SCHED_DEADLINE")]
    Deadline,
    /// A policy number this build does not know about.
    #[serde(rename = "SCHED_UNKNOWN")]
    Unknown,
}

impl SchedPolicy {
    /// Map the numeric `policy` field of the sched accounting file.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Self::Other,
            1 => Self::Fifo,
            2 => Self::RoundRobin,
            3 => Self::Batch,
            5 => Self::Idle,
            6 => Self::Deadline,
            _ => Self::Unknown,
        }
    }

    /// Stable tag used in the shared log and the TUI.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Other => "SCHED_OTHER",
            Self::Fifo => "SCHED_FIFO",
            Self::RoundRobin => "SCHED_RR",
            Self::Batch => "SCHED_BATCH",
            Self::Idle => "SCHED_IDLE",
            Self::Deadline => "SCHED_DEADLINE",
            Self::Unknown => "SCHED_UNKNOWN",
        }
    }
}

impl fmt::Display for SchedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kernel's `sched_prio_to_weight` mapping, indexed by `nice + 20`.
///
/// Nice 0 is 1024 and each step is ~1.25x. Snapshot weights are compared
/// against this table, so it has to match the kernel's own values exactly.
const NICE_TO_WEIGHT: [u64; 40] = [
    // -20..-16
    88761, 71755, 56483, 46273, 36291,
    // -15..-11
    29154, 23254, 18705, 14949, 11916,
    // -10..-6
    9548, 7620, 6100, 4904, 3906,
    // -5..-1
    3121, 2501, 1991, 1586, 1277,
    // 0..4
    1024, 820, 655, 526, 423,
    // 5..9
    335, 272, 215, 172, 137,
    // 10..14
    110, 87, 70, 56, 45,
    // 15..19
    36, 29, 23, 18, 15,
];

/// CFS load weight for a niceness level.
///
/// Strictly monotonically decreasing in niceness: a lower niceness means a
/// higher weight and a larger share of runtime.
pub fn weight_for_nice(nice: Nice) -> u64 {
    NICE_TO_WEIGHT[(nice.get() + 20) as usize]
}

/// Set the calling thread's niceness.
///
/// `setpriority(PRIO_PROCESS, 0)` applies to the calling thread on Linux,
/// which is what a per-worker niceness needs. `EACCES`/`EPERM` surface as
/// [`NiceError::PermissionDenied`]; there is no silent fallback.
#[cfg(target_os = "linux")]
pub fn set_current_niceness(nice: Nice) -> Result<(), NiceError> {
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, libc::c_int::from(nice.get())) };

    if rc == -1 {
        return Err(match Errno::last() {
            Errno::EACCES | Errno::EPERM => NiceError::PermissionDenied { nice: nice.get() },
            errno => NiceError::Os { errno },
        });
    }

    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn set_current_niceness(_nice: Nice) -> Result<(), NiceError> {
    Err(NiceError::Unsupported)
}

/// Current niceness of the given process or thread id.
#[cfg(target_os = "linux")]
pub fn niceness_of(pid: i32) -> Result<Nice, NiceError> {
    // getpriority can legitimately return -1, so errno has to be cleared
    // before the call and inspected after.
    Errno::clear();
    let prio = unsafe { libc::getpriority(libc::PRIO_PROCESS, pid as libc::id_t) };

    if prio == -1 {
        match Errno::last() {
            Errno::UnknownErrno => {}
            Errno::ESRCH => return Err(NiceError::NoSuchProcess { pid }),
            errno => return Err(NiceError::Os { errno }),
        }
    }

    i8::try_from(prio)
        .ok()
        .and_then(Nice::new)
        .ok_or(NiceError::OutOfRange {
            value: i64::from(prio),
        })
}

#[cfg(not(target_os = "linux"))]
pub fn niceness_of(_pid: i32) -> Result<Nice, NiceError> {
    Err(NiceError::Unsupported)
}

/// Kernel thread id of the calling thread.
#[cfg(target_os = "linux")]
pub fn current_tid() -> i32 {
    nix::unistd::gettid().as_raw()
}

#[cfg(not(target_os = "linux"))]
pub fn current_tid() -> i32 {
    std::process::id() as i32
}

/// Deliver SIGTERM to a process.
pub fn terminate(pid: i32) -> Result<(), NiceError> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Err(NiceError::NoSuchProcess { pid }),
        Err(errno) => Err(NiceError::Os { errno }),
    }
}

/// CLOCK_MONOTONIC in nanoseconds.
///
/// Boot-relative, so independent nicetop invocations on one host share a
/// timebase and their interleaved log records can be merge-sorted.
pub fn monotonic_now_ns() -> u64 {
    let ts = nix::time::clock_gettime(nix::time::ClockId::CLOCK_MONOTONIC)
        .expect("CLOCK_MONOTONIC is always available");

    ts.tv_sec() as u64 * 1_000_000_000 + ts.tv_nsec() as u64
}
