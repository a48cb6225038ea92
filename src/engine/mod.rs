//! Test engine: definition tree, per-run context and the sequential runner.

mod process;

use crate::error::RunError;
use crate::model::{RunConfig, RunSummary, TestEvent, TestReport};
use process::Outcome;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone)]
pub enum EngineControl {
    /// Stop at the next opportunity; a running child is killed.
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestCommand {
    /// Run through `sh -c`.
    Shell(String),
    /// Execute the file directly.
    Exec(PathBuf),
}

impl TestCommand {
    pub fn display(&self) -> String {
        match self {
            TestCommand::Shell(cmd) => cmd.clone(),
            TestCommand::Exec(path) => path.display().to_string(),
        }
    }
}

/// One test definition as registered by an interface loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestDef {
    pub title: String,
    pub file: PathBuf,
    /// `None` marks a pending test.
    pub command: Option<TestCommand>,
    pub exclusive: bool,
}

impl TestDef {
    pub fn full_title(&self) -> String {
        format!("{} {}", self.file.display(), self.title)
    }

    fn report(&self) -> TestReport {
        TestReport {
            title: self.title.clone(),
            full_title: self.full_title(),
            file: self.file.clone(),
        }
    }
}

/// Top-level definition tree. A fresh one is built for every run.
#[derive(Debug, Default)]
pub struct Suite {
    files: Vec<PathBuf>,
    tests: Vec<TestDef>,
}

impl Suite {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn add_file(&mut self, path: &Path, defs: &[TestDef]) {
        self.files.push(path.to_path_buf());
        self.tests.extend_from_slice(defs);
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn tests(&self) -> &[TestDef] {
        &self.tests
    }

    pub fn has_exclusive(&self) -> bool {
        self.tests.iter().any(|t| t.exclusive)
    }
}

/// Mutable execution state of one run. Never carried over to the next.
#[derive(Debug)]
struct RunContext {
    started: Instant,
    started_at: String,
    passes: usize,
    failures: usize,
    pending: usize,
    aborted: bool,
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            started_at: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "now".into()),
            passes: 0,
            failures: 0,
            pending: 0,
            aborted: false,
        }
    }
}

impl RunContext {
    fn summary(&self) -> RunSummary {
        RunSummary {
            started_at: self.started_at.clone(),
            passes: self.passes,
            failures: self.failures,
            pending: self.pending,
            duration: self.started.elapsed(),
            aborted: self.aborted,
        }
    }
}

pub struct Runner {
    cfg: Arc<RunConfig>,
    suite: Suite,
}

impl Runner {
    pub fn new(cfg: Arc<RunConfig>, suite: Suite) -> Self {
        Self { cfg, suite }
    }

    /// Tests to execute, in definition order.
    fn selected(&self) -> Result<Vec<&TestDef>, RunError> {
        let matcher = self.cfg.grep.as_ref().map(|g| g.matcher()).transpose()?;
        let exclusive_only = self.suite.has_exclusive();
        Ok(self
            .suite
            .tests()
            .iter()
            .filter(|t| !exclusive_only || t.exclusive)
            .filter(|t| matcher.as_ref().map_or(true, |m| m.is_match(&t.full_title())))
            .collect())
    }

    pub async fn run(
        self,
        event_tx: mpsc::UnboundedSender<TestEvent>,
        mut control_rx: mpsc::UnboundedReceiver<EngineControl>,
    ) -> Result<RunSummary, RunError> {
        let abort = Arc::new(AtomicBool::new(false));
        let mut ctx = RunContext::default();
        let selected = self.selected()?;

        // Control listener.
        let abort2 = abort.clone();
        let control_handle = tokio::spawn(async move {
            while let Some(msg) = control_rx.recv().await {
                match msg {
                    EngineControl::Abort => {
                        abort2.store(true, Ordering::Relaxed);
                        break;
                    }
                }
            }
        });

        let _ = event_tx.send(TestEvent::RunStarted {
            total: selected.len(),
        });

        if self.cfg.forbid_only && self.suite.has_exclusive() {
            ctx.failures += 1;
            let _ = event_tx.send(TestEvent::Info(
                "`only` tests are forbidden by --forbid-only".into(),
            ));
        }

        let result = self
            .run_tests(&selected, &mut ctx, &event_tx, &abort)
            .await;
        control_handle.abort();
        result?;

        let summary = ctx.summary();
        debug!(
            passes = summary.passes,
            failures = summary.failures,
            aborted = summary.aborted,
            "run finished"
        );
        let _ = event_tx.send(TestEvent::RunCompleted {
            summary: summary.clone(),
        });
        Ok(summary)
    }

    async fn run_tests(
        &self,
        selected: &[&TestDef],
        ctx: &mut RunContext,
        event_tx: &mpsc::UnboundedSender<TestEvent>,
        abort: &AtomicBool,
    ) -> Result<(), RunError> {
        for def in selected {
            if abort.load(Ordering::Relaxed) {
                ctx.aborted = true;
                break;
            }

            let Some(command) = def.command.as_ref() else {
                ctx.pending += 1;
                let _ = event_tx.send(TestEvent::TestPending { test: def.report() });
                if self.cfg.forbid_pending {
                    ctx.failures += 1;
                    let _ = event_tx.send(TestEvent::TestFailed {
                        test: def.report(),
                        duration: Default::default(),
                        reason: "pending test forbidden by --forbid-pending".into(),
                        attempts: 0,
                    });
                }
                continue;
            };

            let mut attempts = 0;
            loop {
                attempts += 1;
                let start = Instant::now();
                match process::run_test(command, &self.cfg, abort).await? {
                    Outcome::Passed => {
                        let duration = start.elapsed();
                        ctx.passes += 1;
                        let _ = event_tx.send(TestEvent::TestPassed {
                            test: def.report(),
                            duration,
                            slow: duration > self.cfg.slow,
                        });
                        break;
                    }
                    Outcome::Failed(reason) if attempts <= self.cfg.retries => {
                        debug!(test = %def.full_title(), attempts, %reason, "retrying");
                    }
                    Outcome::Failed(reason) => {
                        ctx.failures += 1;
                        let _ = event_tx.send(TestEvent::TestFailed {
                            test: def.report(),
                            duration: start.elapsed(),
                            reason,
                            attempts,
                        });
                        break;
                    }
                    Outcome::Aborted => {
                        ctx.aborted = true;
                        break;
                    }
                }
            }

            if ctx.aborted || (self.cfg.bail && ctx.failures > 0) {
                break;
            }
        }
        Ok(())
    }
}
