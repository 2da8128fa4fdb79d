//! nicetop: an educational demonstrator for the Linux Completely Fair
//! Scheduler.
//!
//! The `flood` subcommand saturates the CPUs with busy-loop workers pinned to
//! a chosen niceness, and the `tui` subcommand renders a live side-by-side
//! comparison of two processes' kernel scheduling statistics (vruntime,
//! context switches, load weight, policy). Independent invocations correlate
//! through a shared append-only log of timestamped samples.

pub mod config;
pub mod flood;
pub mod sampler;
pub mod sched;
pub mod sink;
pub mod tui;
