//! Watch-mode run lifecycle.
//!
//! Owns start/abort/restart orchestration: file changes abort the active run
//! and schedule exactly one restart, which runs against freshly loaded
//! definitions once the aborted run has completed.

use super::session::{Harness, RunSlot};
use crate::error::{ConfigError, RunError};
use crate::loader;
use crate::model::{GrepFilter, RunConfig, RunSummary};
use crate::watcher::FileChange;
use std::future::Future;
use std::io::BufRead;
use std::path::PathBuf;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Duration;
use tracing::{debug, info, warn};

/// How long an interrupt waits for the aborted run before giving up on it.
const ABORT_GRACE: Duration = Duration::from_secs(1);

/// Commands typed on stdin while watching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WatchCommand {
    Rerun,
    /// Rerun once with a title filter.
    Grep(String),
    Quit,
}

pub(crate) fn parse_command(line: &str) -> Option<WatchCommand> {
    match line.trim() {
        "rs" => Some(WatchCommand::Rerun),
        "q" | "quit" => Some(WatchCommand::Quit),
        other => other
            .strip_prefix("g ")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| WatchCommand::Grep(p.to_string())),
    }
}

/// Read commands from stdin on a detached thread so a blocked read never
/// holds up shutdown.
pub(crate) fn spawn_command_reader(tx: UnboundedSender<WatchCommand>) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if let Some(cmd) = parse_command(&line) {
                if tx.send(cmd).is_err() {
                    break;
                }
            }
        }
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchExit {
    Quit,
    Interrupted,
}

pub(crate) struct WatchOrchestrator<'a> {
    harness: &'a Harness,
    /// Invocation settings; every run starts from a clone of these.
    base: RunConfig,
    watched: Vec<PathBuf>,
    slot: RunSlot,
    restart_pending: bool,
    live_grep: Option<GrepFilter>,
}

impl<'a> WatchOrchestrator<'a> {
    pub fn new(harness: &'a Harness, base: RunConfig, watched: Vec<PathBuf>) -> Self {
        Self {
            harness,
            base,
            watched,
            slot: RunSlot::default(),
            restart_pending: false,
            live_grep: None,
        }
    }

    #[cfg(test)]
    pub fn restart_pending(&self) -> bool {
        self.restart_pending
    }

    pub fn set_live_grep(&mut self, filter: GrepFilter) {
        self.live_grep = Some(filter);
    }

    /// Rerun with a one-off title filter. An invalid pattern is reported and
    /// leaves the active run untouched.
    pub fn request_grep(&mut self, pattern: String) -> Result<bool, RunError> {
        let filter = GrepFilter::pattern(pattern.as_str());
        if let Err(e) = filter.matcher() {
            let detail = match e {
                ConfigError::InvalidPattern { source, .. } => source.to_string(),
                other => other.to_string(),
            };
            self.harness
                .output
                .error(format!("Ignoring `g {pattern}`: {detail}"));
            return Ok(false);
        }
        self.set_live_grep(filter);
        self.on_change()?;
        Ok(true)
    }

    /// Config for the next run. A live filter applies to that run only; the
    /// invocation filter is kept otherwise.
    fn next_config(&mut self) -> RunConfig {
        let mut cfg = self.base.clone();
        if let Some(grep) = self.live_grep.take() {
            cfg.grep = Some(grep);
        }
        cfg
    }

    /// Start a run. Every run after the first forgets the watched files so
    /// edits are picked up.
    pub fn start_run(&mut self) -> Result<(), RunError> {
        if self.slot.runs_started() > 0 {
            loader::invalidate(&self.harness.cache, &self.watched);
        }
        let cfg = self.next_config();
        self.slot.start(cfg, self.harness)
    }

    /// A watched file changed or a rerun was requested.
    pub fn on_change(&mut self) -> Result<(), RunError> {
        if !self.slot.is_running() {
            return self.start_run();
        }
        if self.restart_pending {
            debug!("change absorbed, restart already pending");
            return Ok(());
        }
        self.restart_pending = true;
        if self.slot.abort() {
            self.harness.output.error("Cancelling…");
        }
        Ok(())
    }

    /// The active run finished; restart right away if one is owed.
    pub fn on_completion(&mut self, res: Result<RunSummary, RunError>) -> Result<(), RunError> {
        match res {
            Ok(summary) => info!(
                failures = summary.failures,
                aborted = summary.aborted,
                "run completed"
            ),
            Err(e) => self.harness.output.error(format!("Run failed: {e:#}")),
        }
        if std::mem::take(&mut self.restart_pending) {
            self.harness.output.error("Restarting…");
            self.start_run()?;
        }
        Ok(())
    }

    fn report(&self, res: Result<(), RunError>) {
        if let Err(e) = res {
            warn!(error = %e, "could not start run");
            self.harness.output.error(format!("Run failed: {e:#}"));
        }
    }
}

/// Drive the orchestrator until quit or interrupt.
///
/// The interrupt future is polled for the orchestrator's whole lifetime; it
/// aborts whichever run is active at the time.
pub(crate) async fn run_watch<I>(
    orch: &mut WatchOrchestrator<'_>,
    mut changes: UnboundedReceiver<FileChange>,
    mut commands: UnboundedReceiver<WatchCommand>,
    interrupt: I,
) -> Result<WatchExit, RunError>
where
    I: Future<Output = ()>,
{
    // A broken first run is fatal; later ones are reported and wait for the next change.
    orch.start_run()?;
    tokio::pin!(interrupt);
    let mut changes_open = true;
    let mut commands_open = true;
    let mut quit_pending = false;

    let exit = loop {
        tokio::select! {
            change = changes.recv(), if changes_open && !quit_pending => match change {
                Some(FileChange { path }) => {
                    debug!(path = %path.display(), "file changed");
                    let res = orch.on_change();
                    orch.report(res);
                }
                None => {
                    warn!("file watcher stopped");
                    changes_open = false;
                }
            },
            cmd = commands.recv(), if commands_open && !quit_pending => match cmd {
                Some(WatchCommand::Rerun) => {
                    let res = orch.on_change();
                    orch.report(res);
                }
                Some(WatchCommand::Grep(pattern)) => {
                    let res = orch.request_grep(pattern).map(drop);
                    orch.report(res);
                }
                Some(WatchCommand::Quit) => {
                    // Quit waits for the current run so its output is complete.
                    quit_pending = true;
                    orch.restart_pending = false;
                    if !orch.slot.is_running() {
                        break WatchExit::Quit;
                    }
                    orch.slot.abort();
                }
                None => commands_open = false,
            },
            res = orch.slot.completion() => {
                if quit_pending {
                    break WatchExit::Quit;
                }
                let res = orch.on_completion(res);
                orch.report(res);
            }
            _ = &mut interrupt => {
                if orch.slot.is_running() {
                    orch.slot.abort();
                    if tokio::time::timeout(ABORT_GRACE, orch.slot.completion()).await.is_err() {
                        warn!("aborted run did not finish in time");
                    }
                }
                break WatchExit::Interrupted;
            }
        }
    };
    Ok(exit)
}
