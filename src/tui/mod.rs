//! Live side-by-side comparison of two targets' scheduling statistics.
//!
//! The TUI owns the terminal while it runs. Each tick it polls both targets
//! through [`StatSampler`] under a per-target timeout budget, folds the
//! outcomes into per-pane display state, appends successful samples to the
//! shared log and redraws. A target that exits goes to a terminal `stopped`
//! state; a target that misses its budget renders `stale`; the sibling
//! column is never stalled by either.

pub mod view;

use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen};
use parking_lot::Mutex;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::sampler::{SampleError, SchedSnapshot, StatSampler};
use crate::sched::{self, Nice};
use crate::sink::{LogRecord, RecordSink};

type Term = Terminal<CrosstermBackend<io::Stdout>>;

/// How the two comparison targets are obtained. The CLI keeps the modes
/// mutually exclusive; there is no implicit fallback between them.
#[derive(Debug, Clone, Copy)]
pub enum TargetSpec {
    /// Attach to two already-running processes.
    Existing { pid1: i32, pid2: i32 },
    /// Spawn two single-worker flood processes of this binary at the given
    /// niceness levels.
    Spawn { nice1: Nice, nice2: Nice },
}

/// Display status of one pane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneStatus {
    /// Polled successfully on the last tick.
    Live,
    /// Missed its poll budget or failed transiently; showing the last
    /// snapshot.
    Stale,
    /// Target exited. Terminal: the pane is no longer polled.
    Stopped,
}

/// Outcome of one poll attempt, already classified for display.
#[derive(Debug)]
pub enum PollOutcome {
    Snapshot(SchedSnapshot),
    NotFound,
    /// Non-monotonic sample dropped; the stream continues.
    Regressed,
    TimedOut,
    Failed,
}

/// Consumer-side values derived from two consecutive snapshots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Derived {
    /// Context switches per second since the previous tick.
    pub switch_rate: f64,
    /// Virtual runtime accrued since the previous tick, when exposed.
    pub vruntime_delta_ns: Option<u64>,
}

/// Per-target display state.
#[derive(Debug)]
pub struct Pane {
    pub pid: i32,
    pub label: String,
    pub status: PaneStatus,
    pub current: Option<SchedSnapshot>,
    pub previous: Option<SchedSnapshot>,
}

impl Pane {
    fn new(pid: i32, label: String) -> Self {
        Self {
            pid,
            label,
            status: PaneStatus::Live,
            current: None,
            previous: None,
        }
    }

    /// Fold one poll outcome into the pane.
    ///
    /// `Stopped` is terminal; every other status follows the latest outcome.
    /// A dropped (regressed) sample leaves the pane exactly as it was.
    pub fn apply(&mut self, outcome: PollOutcome) {
        if self.status == PaneStatus::Stopped {
            return;
        }

        match outcome {
            PollOutcome::Snapshot(snap) => {
                self.previous = self.current.take();
                self.current = Some(snap);
                self.status = PaneStatus::Live;
            }
            PollOutcome::NotFound => {
                self.status = PaneStatus::Stopped;
            }
            PollOutcome::TimedOut | PollOutcome::Failed => {
                self.status = PaneStatus::Stale;
            }
            PollOutcome::Regressed => {}
        }
    }

    /// Rates and deltas between the two most recent snapshots.
    pub fn derived(&self) -> Option<Derived> {
        let current = self.current.as_ref()?;
        let previous = self.previous.as_ref()?;

        let dt_ns = current.timestamp_ns.saturating_sub(previous.timestamp_ns);
        if dt_ns == 0 {
            return None;
        }

        let switches = current.nr_switches.saturating_sub(previous.nr_switches);
        let vruntime_delta_ns = match (current.vruntime_ns, previous.vruntime_ns) {
            (Some(cur), Some(prev)) => Some(cur.saturating_sub(prev)),
            _ => None,
        };

        Some(Derived {
            switch_rate: switches as f64 * 1e9 / dt_ns as f64,
            vruntime_delta_ns,
        })
    }
}

/// The comparison TUI: target resolution, tick loop, rendering, shutdown.
pub struct ComparisonTui {
    cfg: Config,
    sink: Arc<dyn RecordSink>,
    session: String,
    cancel: CancellationToken,
    panes: [Pane; 2],
    samplers: [Arc<Mutex<StatSampler>>; 2],
    children: Vec<Child>,
}

impl ComparisonTui {
    /// Resolve the two targets (attaching or spawning) and build the TUI.
    ///
    /// All fatal resolution errors happen here, before the terminal is
    /// touched, so a failed start leaves nothing to clean up on screen.
    pub fn new(
        cfg: Config,
        config_path: Option<PathBuf>,
        spec: TargetSpec,
        sink: Arc<dyn RecordSink>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let mut children = Vec::new();

        let panes = match spec {
            TargetSpec::Existing { pid1, pid2 } => {
                // Fail attaching to dead pids up front.
                for pid in [pid1, pid2] {
                    sched::niceness_of(pid)
                        .with_context(|| format!("attaching to pid {pid}"))?;
                }
                [
                    Pane::new(pid1, format!("Proc-{pid1}")),
                    Pane::new(pid2, format!("Proc-{pid2}")),
                ]
            }
            TargetSpec::Spawn { nice1, nice2 } => {
                let child1 = spawn_flood_child(nice1, config_path.as_deref())
                    .context("spawning first sample process")?;
                let child2 = spawn_flood_child(nice2, config_path.as_deref())
                    .context("spawning second sample process")?;

                let pid1 = child1.id() as i32;
                let pid2 = child2.id() as i32;
                info!(pid1, pid2, "spawned sample processes");

                children.push(child1);
                children.push(child2);

                [
                    Pane::new(pid1, format!("Proc-{pid1} (nice {nice1})")),
                    Pane::new(pid2, format!("Proc-{pid2} (nice {nice2})")),
                ]
            }
        };

        Ok(Self {
            cfg,
            sink,
            session: crate::sink::session_tag(),
            cancel,
            panes,
            samplers: [
                Arc::new(Mutex::new(StatSampler::new())),
                Arc::new(Mutex::new(StatSampler::new())),
            ],
            children,
        })
    }

    /// Run until the user quits or cancellation fires.
    ///
    /// The terminal is restored and spawned children are reaped on success
    /// and error paths alike.
    pub async fn run(mut self) -> Result<()> {
        let result = match init_terminal().context("initializing terminal") {
            Ok(mut terminal) => {
                let result = self.event_loop(&mut terminal).await;
                restore_terminal();
                result
            }
            Err(e) => Err(e),
        };

        self.shutdown_children();

        result
    }

    async fn event_loop(&mut self, terminal: &mut Term) -> Result<()> {
        let mut ticker = tokio::time::interval(self.cfg.sampler.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("interrupted, shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.poll_targets().await;

                    terminal
                        .draw(|frame| view::draw(frame, &self.panes))
                        .context("drawing frame")?;

                    if drain_quit_keys()? {
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Poll both targets concurrently so a slow or hung one cannot stall its
    /// sibling, then fold outcomes and log successful samples.
    async fn poll_targets(&mut self) {
        let budget = self.cfg.sampler.poll_budget;

        let (first, second) = tokio::join!(
            poll_one(&self.panes[0], &self.samplers[0], budget),
            poll_one(&self.panes[1], &self.samplers[1], budget),
        );

        for (pane, outcome) in self.panes.iter_mut().zip([first, second]) {
            let Some(outcome) = outcome else {
                continue;
            };

            if let PollOutcome::Snapshot(snap) = &outcome {
                let record = LogRecord::from_snapshot(&self.session, snap);
                if let Err(e) = self.sink.append(&record) {
                    debug!(error = %e, "sample not logged");
                }
            }

            if matches!(outcome, PollOutcome::NotFound) {
                info!(pid = pane.pid, "target exited, pane stopped");
            }

            pane.apply(outcome);
        }
    }

    /// SIGTERM and reap every child this TUI spawned.
    fn shutdown_children(&mut self) {
        for child in &mut self.children {
            let pid = child.id() as i32;
            if let Err(e) = sched::terminate(pid) {
                debug!(pid, error = %e, "terminating sample process");
            }
        }

        for mut child in self.children.drain(..) {
            let pid = child.id();
            match child.wait() {
                Ok(status) => debug!(pid, %status, "sample process reaped"),
                Err(e) => warn!(pid, error = %e, "reaping sample process"),
            }
        }
    }
}

impl Drop for ComparisonTui {
    fn drop(&mut self) {
        // Idempotent: run() already drained the children on its way out.
        self.shutdown_children();
    }
}

/// Poll one pane's target on the blocking pool under the tick budget.
/// Returns `None` for panes that are no longer polled.
async fn poll_one(
    pane: &Pane,
    sampler: &Arc<Mutex<StatSampler>>,
    budget: Duration,
) -> Option<PollOutcome> {
    if pane.status == PaneStatus::Stopped {
        return None;
    }

    let pid = pane.pid;
    let sampler = Arc::clone(sampler);
    let poll = tokio::task::spawn_blocking(move || sampler.lock().poll(pid));

    let outcome = match tokio::time::timeout(budget, poll).await {
        Err(_) => PollOutcome::TimedOut,
        Ok(Err(join_err)) => {
            warn!(pid, error = %join_err, "poll task failed");
            PollOutcome::Failed
        }
        Ok(Ok(Ok(snap))) => PollOutcome::Snapshot(snap),
        Ok(Ok(Err(SampleError::TargetNotFound { .. }))) => PollOutcome::NotFound,
        Ok(Ok(Err(e @ SampleError::ClockRegression { .. }))) => {
            warn!(error = %e, "sample dropped");
            PollOutcome::Regressed
        }
        Ok(Ok(Err(e))) => {
            debug!(pid, error = %e, "sample failed");
            PollOutcome::Failed
        }
    };

    Some(outcome)
}

/// Spawn one single-worker flood process of this binary.
fn spawn_flood_child(nice: Nice, config_path: Option<&std::path::Path>) -> Result<Child> {
    let exe = std::env::current_exe().context("locating own executable")?;

    let mut command = Command::new(exe);
    if let Some(path) = config_path {
        command.arg("--config").arg(path);
    }
    command
        .arg("flood")
        .arg("--thread-count")
        .arg("1")
        .arg("--nice")
        .arg(nice.to_string())
        // The terminal belongs to the TUI; children must not write to it.
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    command.spawn().context("spawning flood child")
}

/// Non-blockingly drain pending key events; true means quit.
fn drain_quit_keys() -> Result<bool> {
    while crossterm::event::poll(Duration::ZERO)? {
        let Event::Key(key) = crossterm::event::read()? else {
            continue;
        };

        if key.kind != KeyEventKind::Press {
            continue;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(true),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Ok(true)
            }
            _ => {}
        }
    }

    Ok(false)
}

fn init_terminal() -> Result<Term> {
    crossterm::terminal::enable_raw_mode()?;
    crossterm::execute!(io::stdout(), EnterAlternateScreen)?;
    let terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;
    Ok(terminal)
}

/// Best-effort restore; runs on every exit path so no failure mode leaves
/// the terminal in raw mode.
fn restore_terminal() {
    if let Err(e) = crossterm::execute!(io::stdout(), LeaveAlternateScreen) {
        warn!(error = %e, "leaving alternate screen");
    }
    if let Err(e) = crossterm::terminal::disable_raw_mode() {
        warn!(error = %e, "disabling raw mode");
    }
}
