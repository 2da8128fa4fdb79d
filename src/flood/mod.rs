//! Synthetic CPU load generation.
//!
//! [`FloodController::start`] spawns N OS threads that set their own
//! niceness and then busy-spin until cancelled, saturating the CPUs. The
//! resulting system-wide load is the intended, user-visible effect. A
//! session-owned monitor thread samples the workers into the injected record
//! sink so independent invocations can be correlated through the shared log.

use std::num::NonZeroUsize;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::FloodConfig;
use crate::sampler::{SampleError, StatSampler};
use crate::sched::{self, Nice, NiceError};
use crate::sink::{LogRecord, RecordSink};

/// Cancellation is checked once per this many spin iterations: often enough
/// for sub-second shutdown, rare enough to add no measurable idle time.
const CANCEL_CHECK_ITERS: u64 = 20_000_000;

/// Errors from starting a flood.
#[derive(Error, Debug)]
pub enum FloodError {
    #[error("worker count must be at least 1")]
    ZeroWorkers,

    /// Requests above the safety bound are refused before any thread is
    /// spawned; capping silently would hide how close the host is to
    /// freezing.
    #[error(
        "refusing to spawn {requested} workers: the safety bound is {max} \
         ({cores} logical cores x {factor} per core); flooding past it can freeze the host"
    )]
    ExcessiveLoad {
        requested: usize,
        max: usize,
        cores: usize,
        factor: usize,
    },

    #[error(transparent)]
    Nice(#[from] NiceError),

    #[error("spawning worker thread")]
    Spawn(#[source] std::io::Error),

    #[error("a worker exited during startup without reporting")]
    WorkerStartup,
}

/// Handle to one running niceness worker, owned by its session.
#[derive(Debug)]
struct WorkerHandle {
    tid: i32,
    requested_nice: Nice,
    join: JoinHandle<()>,
}

/// Spawns and owns flood sessions.
pub struct FloodController {
    cfg: FloodConfig,
}

impl FloodController {
    pub fn new(cfg: FloodConfig) -> Self {
        Self { cfg }
    }

    /// Spawn `count` busy-loop workers at the given niceness.
    ///
    /// Fails with [`FloodError::ExcessiveLoad`] before any thread exists
    /// when `count` exceeds the configured bound, and with a privilege error
    /// (joining every already-spawned worker first) when the kernel refuses
    /// the niceness — no worker thread outlives a failed start.
    pub fn start(
        &self,
        count: usize,
        nice: Nice,
        sink: Arc<dyn RecordSink>,
    ) -> Result<FloodSession, FloodError> {
        if count == 0 {
            return Err(FloodError::ZeroWorkers);
        }

        let cores = available_cores();
        let max = cores.saturating_mul(self.cfg.max_threads_per_core);
        if count > max {
            return Err(FloodError::ExcessiveLoad {
                requested: count,
                max,
                cores,
                factor: self.cfg.max_threads_per_core,
            });
        }

        let cancel = CancellationToken::new();
        let (ready_tx, ready_rx) = mpsc::channel();

        let mut joins = Vec::with_capacity(count);
        for i in 0..count {
            let cancel = cancel.clone();
            let ready_tx = ready_tx.clone();

            let worker_cancel = cancel.clone();
            let join = thread::Builder::new()
                .name(format!("flood-worker-{i}"))
                .spawn(move || worker_main(nice, worker_cancel, ready_tx));

            match join {
                Ok(join) => joins.push(join),
                Err(e) => {
                    cancel.cancel();
                    join_all(joins);
                    return Err(FloodError::Spawn(e));
                }
            }
        }
        drop(ready_tx);

        // Every worker reports exactly once before entering its loop; the
        // whole start fails if any of them could not take the niceness.
        let mut tids = Vec::with_capacity(count);
        let mut first_err = None;
        for _ in 0..joins.len() {
            match ready_rx.recv() {
                Ok(Ok(tid)) => tids.push(tid),
                Ok(Err(e)) => {
                    first_err.get_or_insert(e);
                }
                Err(_) => break,
            }
        }

        if let Some(e) = first_err {
            cancel.cancel();
            join_all(joins);
            return Err(e.into());
        }

        if tids.len() != joins.len() {
            cancel.cancel();
            join_all(joins);
            return Err(FloodError::WorkerStartup);
        }

        let workers: Vec<WorkerHandle> = tids
            .iter()
            .zip(joins)
            .map(|(&tid, join)| WorkerHandle {
                tid,
                requested_nice: nice,
                join,
            })
            .collect();

        info!(
            workers = workers.len(),
            nice = nice.get(),
            "flood session started",
        );

        let monitor = spawn_monitor(
            tids,
            sink,
            self.cfg.monitor_interval,
            cancel.clone(),
        );

        Ok(FloodSession {
            cancel,
            workers,
            monitor,
        })
    }
}

/// A running flood: workers plus their monitor.
///
/// Dropping the session (or calling [`FloodSession::stop`]) cancels and
/// joins everything; no worker thread outlives it.
#[derive(Debug)]
pub struct FloodSession {
    cancel: CancellationToken,
    workers: Vec<WorkerHandle>,
    monitor: Option<JoinHandle<()>>,
}

impl FloodSession {
    /// Kernel thread ids of all workers, e.g. for sampling.
    pub fn worker_tids(&self) -> Vec<i32> {
        self.workers.iter().map(|w| w.tid).collect()
    }

    /// The niceness every worker runs at.
    pub fn requested_nice(&self) -> Option<Nice> {
        self.workers.first().map(|w| w.requested_nice)
    }

    /// Signal all workers and join them; returns once none are left.
    pub fn stop(mut self) {
        self.shutdown();
        info!("flood session stopped");
    }

    fn shutdown(&mut self) {
        self.cancel.cancel();

        for worker in self.workers.drain(..) {
            if worker.join.join().is_err() {
                warn!(tid = worker.tid, "flood worker panicked");
            }
        }

        if let Some(monitor) = self.monitor.take() {
            if monitor.join().is_err() {
                warn!("flood monitor panicked");
            }
        }
    }
}

impl Drop for FloodSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn available_cores() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

fn join_all(joins: Vec<JoinHandle<()>>) {
    for join in joins {
        let _ = join.join();
    }
}

fn worker_main(nice: Nice, cancel: CancellationToken, ready_tx: mpsc::Sender<Result<i32, NiceError>>) {
    if let Err(e) = sched::set_current_niceness(nice) {
        let _ = ready_tx.send(Err(e));
        return;
    }

    let tid = sched::current_tid();
    debug!(tid, nice = nice.get(), "flood worker running");
    let _ = ready_tx.send(Ok(tid));

    busy_loop(&cancel);
}

/// Spin until cancelled.
///
/// The loop never blocks, sleeps or yields: the fairness demonstration
/// depends on these threads ceding the CPU through preemption only, so a
/// voluntary yield here would invalidate it. Cancellation is checked at a
/// bounded iteration interval instead.
fn busy_loop(cancel: &CancellationToken) {
    let mut acc = 0u64;
    loop {
        for _ in 0..CANCEL_CHECK_ITERS {
            acc = std::hint::black_box(acc.wrapping_add(1));
        }

        if cancel.is_cancelled() {
            break;
        }
    }
    std::hint::black_box(acc);
}

/// Sample every worker at a fixed cadence into the sink.
///
/// Runs beside the workers, not inside them: the busy loops must stay free
/// of I/O. Sampling failures degrade to diagnostics; they never stop the
/// flood.
fn spawn_monitor(
    tids: Vec<i32>,
    sink: Arc<dyn RecordSink>,
    interval: Duration,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    let session = crate::sink::session_tag();

    let spawned = thread::Builder::new()
        .name("flood-monitor".to_string())
        .spawn(move || {
            let mut sampler = StatSampler::new();

            while !cancel.is_cancelled() {
                for &tid in &tids {
                    match sampler.poll(tid) {
                        Ok(snap) => {
                            let record = LogRecord::from_snapshot(&session, &snap);
                            if let Err(e) = sink.append(&record) {
                                debug!(error = %e, "worker sample not logged");
                            }
                        }
                        Err(e @ SampleError::ClockRegression { .. }) => {
                            warn!(tid, error = %e, "worker sample dropped");
                        }
                        Err(e) => {
                            debug!(tid, error = %e, "worker sample failed");
                        }
                    }
                }

                thread::sleep(interval);
            }
        });

    match spawned {
        Ok(join) => Some(join),
        Err(e) => {
            warn!(error = %e, "flood monitor not started; workers run unlogged");
            None
        }
    }
}
