use crate::discovery;
use crate::error::ConfigError;
use crate::exit::{self, ExitMode, DRAIN_FALLBACK, INTERRUPTED_EXIT_CODE};
use crate::loader::{interface, DefinitionCache};
use crate::model::{GrepFilter, RunConfig};
use crate::orchestrator::{
    interrupt_signal, run_single, run_watch, spawn_command_reader, Harness, WatchExit,
    WatchOrchestrator,
};
use crate::output::{self, spawn_output_writer};
use crate::reporter::{self, ReporterOptions};
use crate::watcher;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "testrun",
    version,
    about = "Run shell-defined test suites once or on every file change"
)]
pub struct Cli {
    /// Test files or directories
    #[arg(default_value = "test")]
    pub files: Vec<PathBuf>,

    /// Re-run tests whenever a watched file changes
    #[arg(short, long)]
    pub watch: bool,

    /// Extensions watched for changes (defaults to --extension)
    #[arg(long, value_delimiter = ',')]
    pub watch_extensions: Vec<String>,

    /// Extensions of test files inside directories
    #[arg(long, value_delimiter = ',', default_value = "tests")]
    pub extension: Vec<String>,

    /// Descend into subdirectories
    #[arg(long)]
    pub recursive: bool,

    /// Only run tests whose full title matches this regex
    #[arg(short, long)]
    pub grep: Option<String>,

    /// Only run tests whose full title contains this string
    #[arg(short, long)]
    pub fgrep: Option<String>,

    /// Invert the --grep/--fgrep match
    #[arg(short, long)]
    pub invert: bool,

    /// Stop after the first failure
    #[arg(short, long)]
    pub bail: bool,

    /// Per-test timeout (0 disables)
    #[arg(short, long, default_value = "2s")]
    pub timeout: humantime::Duration,

    /// Tests slower than this are flagged as slow
    #[arg(short, long, default_value = "75ms")]
    pub slow: humantime::Duration,

    /// Disable per-test timeouts
    #[arg(long)]
    pub no_timeouts: bool,

    /// Retry failed tests this many times
    #[arg(long, default_value_t = 0)]
    pub retries: u32,

    /// Ask tests to check for leaked globals (TESTRUN_CHECK_LEAKS)
    #[arg(long)]
    pub check_leaks: bool,

    /// Ask tests to reject synchronous bodies (TESTRUN_ASYNC_ONLY)
    #[arg(short = 'A', long)]
    pub async_only: bool,

    /// Ask tests to delay their root suite (TESTRUN_DELAY)
    #[arg(long)]
    pub delay: bool,

    /// Treat a test that cannot be spawned as a fatal run error
    #[arg(long)]
    pub allow_uncaught: bool,

    /// Fail if any test is marked `only`
    #[arg(long)]
    pub forbid_only: bool,

    /// Fail if any test is pending
    #[arg(long)]
    pub forbid_pending: bool,

    /// Definition interface
    #[arg(short, long, default_value = "manifest")]
    pub ui: String,

    /// Reporter
    #[arg(short = 'R', long, default_value = "spec")]
    pub reporter: String,

    /// Reporter options as key=value[,key=value]
    #[arg(short = 'O', long)]
    pub reporter_option: Vec<String>,

    /// Force the process to exit once the run completes
    #[arg(long)]
    pub exit: bool,

    /// List available interfaces and exit
    #[arg(long)]
    pub list_interfaces: bool,

    /// List available reporters and exit
    #[arg(long)]
    pub list_reporters: bool,

    /// Debug logging on stderr
    #[arg(short, long)]
    pub verbose: bool,
}

fn grep_filter(args: &Cli) -> Result<Option<GrepFilter>, ConfigError> {
    let filter = match (&args.grep, &args.fgrep) {
        (Some(_), Some(_)) => return Err(ConfigError::ConflictingGrep),
        (Some(p), None) => GrepFilter::pattern(p.clone()),
        (None, Some(s)) => GrepFilter::fixed(s.clone()),
        (None, None) if args.invert => return Err(ConfigError::InvertWithoutGrep),
        (None, None) => return Ok(None),
    };
    let filter = filter.inverted(args.invert);
    filter.matcher()?;
    Ok(Some(filter))
}

/// Build a `RunConfig` from CLI arguments and the discovered files.
pub fn build_config(args: &Cli, files: Vec<PathBuf>) -> Result<RunConfig, ConfigError> {
    interface::resolve(&args.ui)?;
    Ok(RunConfig {
        files,
        interface: args.ui.clone(),
        grep: grep_filter(args)?,
        timeout: Duration::from(args.timeout),
        slow: Duration::from(args.slow),
        timeouts_enabled: !args.no_timeouts,
        retries: args.retries,
        bail: args.bail,
        check_leaks: args.check_leaks,
        async_only: args.async_only,
        delay: args.delay,
        allow_uncaught: args.allow_uncaught,
        forbid_only: args.forbid_only,
        forbid_pending: args.forbid_pending,
    })
}

pub fn exit_mode(args: &Cli) -> ExitMode {
    if args.exit {
        ExitMode::Immediate
    } else {
        ExitMode::Deferred
    }
}

/// Run the invocation and return the process exit code.
pub async fn run(args: Cli) -> Result<u8> {
    if args.list_interfaces {
        for i in interface::INTERFACES {
            println!("{:<10} {}", i.name, i.description);
        }
        return Ok(0);
    }
    if args.list_reporters {
        for r in reporter::REPORTERS {
            println!("{:<10} {}", r.name, r.description);
        }
        return Ok(0);
    }

    let reporter = reporter::resolve(&args.reporter)?;
    let reporter_options = ReporterOptions::parse(&args.reporter_option)?;
    let discovery = discovery::resolve_files(&args.files, &args.extension, args.recursive)
        .context("test discovery failed")?;
    debug!(
        files = discovery.files.len(),
        unmatched = discovery.unmatched.len(),
        "discovered test files"
    );
    let cfg = build_config(&args, discovery.files)?;

    let (output, out_handle) = spawn_output_writer();
    let harness = Harness {
        cache: DefinitionCache::new(),
        reporter,
        reporter_options,
        output,
    };

    if args.watch {
        return run_watch_mode(&args, cfg, harness, out_handle).await;
    }

    let res = run_single(cfg, &harness, exit_mode(&args), interrupt_signal()).await;
    drop(harness);
    let _ = out_handle.await;
    let state = res.context("test run failed")?;
    Ok(exit::finish(&state).await)
}

async fn run_watch_mode(
    args: &Cli,
    cfg: RunConfig,
    harness: Harness,
    out_handle: JoinHandle<()>,
) -> Result<u8> {
    let root = std::env::current_dir().context("cannot determine working directory")?;
    let extensions = if args.watch_extensions.is_empty() {
        &args.extension
    } else {
        &args.watch_extensions
    };
    let watched = discovery::watch_set(&root, &cfg.files, extensions);

    let (change_tx, change_rx) = mpsc::unbounded_channel();
    let _watcher = watcher::watch(&watched, change_tx).context("failed to start file watcher")?;
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    spawn_command_reader(cmd_tx);
    harness
        .output
        .error("Watching for changes (rs: rerun, g <pattern>: filter, q: quit)");

    let mut orch = WatchOrchestrator::new(&harness, cfg, watched);
    let res = run_watch(&mut orch, change_rx, cmd_rx, interrupt_signal()).await;
    drop(orch);
    drop(harness);
    // An aborted run that never finished may still hold a sink clone.
    let _ = tokio::time::timeout(DRAIN_FALLBACK, out_handle).await;

    match res.context("watch mode failed")? {
        WatchExit::Quit => Ok(0),
        WatchExit::Interrupted => {
            output::restore_terminal();
            std::process::exit(i32::from(INTERRUPTED_EXIT_CODE));
        }
    }
}
