use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use nicetop::config::Config;
use nicetop::flood::FloodController;
use nicetop::sched::Nice;
use nicetop::sink::SharedLog;
use nicetop::tui::{ComparisonTui, TargetSpec};

/// Terminal demonstrator for the Linux Completely Fair Scheduler.
#[derive(Parser)]
#[command(name = "nicetop", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    /// Defaults to info, or warn while the TUI owns the terminal.
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Saturate the CPUs with busy-loop workers at a fixed niceness.
    Flood(FloodArgs),

    /// Compare two processes' scheduling statistics side by side.
    Tui(TuiArgs),

    /// Print version information and exit.
    Version,
}

#[derive(Args)]
struct FloodArgs {
    /// Number of worker threads.
    #[arg(short, long, value_name = "N", conflicts_with = "count")]
    thread_count: Option<usize>,

    /// Positional worker count, alternative to --thread-count.
    #[arg(value_name = "N")]
    count: Option<usize>,

    /// Niceness for every worker; negative values need elevated privilege.
    #[arg(short, long, allow_negative_numbers = true)]
    nice: Nice,
}

impl FloodArgs {
    fn worker_count(&self) -> Result<usize> {
        match (self.thread_count, self.count) {
            (Some(n), None) | (None, Some(n)) => Ok(n),
            _ => bail!("worker count required: --thread-count <N> or a positional <N>"),
        }
    }
}

#[derive(Args)]
struct TuiArgs {
    /// Niceness for the first spawned sample process.
    #[arg(
        long,
        allow_negative_numbers = true,
        requires = "nice2",
        conflicts_with_all = ["pid1", "pid2"]
    )]
    nice1: Option<Nice>,

    /// Niceness for the second spawned sample process.
    #[arg(long, allow_negative_numbers = true, requires = "nice1")]
    nice2: Option<Nice>,

    /// Attach to this existing process instead of spawning one.
    #[arg(long, requires = "pid2")]
    pid1: Option<i32>,

    /// Attach to this existing process instead of spawning one.
    #[arg(long, requires = "pid1")]
    pid2: Option<i32>,
}

impl TuiArgs {
    /// The two modes are mutually exclusive and one must be chosen
    /// explicitly; there is no fallback between them.
    fn target_spec(&self) -> Result<TargetSpec> {
        match (self.nice1, self.nice2, self.pid1, self.pid2) {
            (Some(nice1), Some(nice2), None, None) => Ok(TargetSpec::Spawn { nice1, nice2 }),
            (None, None, Some(pid1), Some(pid2)) => Ok(TargetSpec::Existing { pid1, pid2 }),
            _ => bail!("choose targets with either --nice1/--nice2 or --pid1/--pid2"),
        }
    }
}

/// Build-time version info.
mod version {
    /// Release version string.
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version before anything else.
    if let Command::Version = &cli.command {
        println!("nicetop {}", version::full());
        return Ok(());
    }

    // Initialize tracing. Logs go to stderr; the TUI owns the terminal via
    // stdout, so its default level is quieter.
    let default_level = match &cli.command {
        Command::Tui(_) => "warn",
        _ => "info",
    };
    let level = cli.log_level.as_deref().unwrap_or(default_level);
    let filter =
        EnvFilter::try_new(level).with_context(|| format!("invalid log level: {level}"))?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    // Config is optional; defaults cover every field.
    let cfg = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(async { run(cli, cfg).await })
}

async fn run(cli: Cli, cfg: Config) -> Result<()> {
    match cli.command {
        Command::Flood(args) => run_flood(cfg, args).await,
        Command::Tui(args) => run_tui(cfg, cli.config, args).await,
        Command::Version => Ok(()),
    }
}

async fn run_flood(cfg: Config, args: FloodArgs) -> Result<()> {
    let count = args.worker_count()?;

    let sink = Arc::new(SharedLog::new(cfg.log.path.clone()));
    let controller = FloodController::new(cfg.flood.clone());
    let session = controller.start(count, args.nice, sink)?;

    info!(
        workers = count,
        nice = args.nice.get(),
        log = %cfg.log.path.display(),
        "flood running; Ctrl-C to stop",
    );

    wait_for_shutdown_signal().await;
    session.stop();

    info!("nicetop flood stopped");

    Ok(())
}

async fn run_tui(cfg: Config, config_path: Option<PathBuf>, args: TuiArgs) -> Result<()> {
    let spec = args.target_spec()?;
    let sink = Arc::new(SharedLog::new(cfg.log.path.clone()));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            cancel.cancel();
        });
    }

    // Target resolution happens before the terminal is touched, so fatal
    // startup errors never leave a half-drawn screen behind.
    let tui = ComparisonTui::new(cfg, config_path, spec, sink, cancel)?;
    tui.run().await
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    tokio::select! {
        _ = ctrl_c => {
            info!("received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
        }
    }
}
