//! A single execution of the engine and the slot that serializes them.

use crate::engine::{EngineControl, Runner};
use crate::error::RunError;
use crate::loader::{self, DefinitionCache};
use crate::model::{RunConfig, RunSummary, TestEvent};
use crate::output::OutputSink;
use crate::reporter::{self, ReporterOptions, ReporterSpec};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::debug;

/// Everything that outlives individual runs.
pub(crate) struct Harness {
    pub cache: DefinitionCache,
    pub reporter: &'static ReporterSpec,
    pub reporter_options: ReporterOptions,
    pub output: OutputSink,
}

/// Internal handle for a running test task.
pub(crate) struct RunSession {
    cfg: Arc<RunConfig>,
    ctrl_tx: UnboundedSender<EngineControl>,
    handle: Option<JoinHandle<Result<RunSummary, RunError>>>,
    aborting: bool,
}

impl RunSession {
    /// Load a fresh suite for `cfg` and spawn its runner.
    ///
    /// Construction problems (unknown interface, unreadable or malformed
    /// definition files) are returned here, before anything runs.
    fn start(cfg: RunConfig, harness: &Harness) -> Result<Self, RunError> {
        let suite = loader::load_suite(&cfg, &harness.cache)?;
        if let Ok(json) = serde_json::to_string(&cfg) {
            debug!(config = %json, "starting run");
        }
        let cfg = Arc::new(cfg);
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TestEvent>();
        let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel::<EngineControl>();

        let reporter = reporter::spawn_reporter(
            harness.reporter.build(&harness.reporter_options),
            event_rx,
            harness.output.clone(),
        );
        let runner = Runner::new(cfg.clone(), suite);
        let handle = tokio::spawn(async move {
            // The runner drops its event sender on return, which ends the reporter.
            let res = runner.run(event_tx, ctrl_rx).await;
            let _ = reporter.await;
            res
        });

        Ok(Self {
            cfg,
            ctrl_tx,
            handle: Some(handle),
            aborting: false,
        })
    }

    /// Request early termination. Only the first request is forwarded.
    fn abort(&mut self) -> bool {
        if self.aborting {
            return false;
        }
        self.aborting = true;
        let _ = self.ctrl_tx.send(EngineControl::Abort);
        true
    }

    // Do not take the JoinHandle before it resolves; otherwise it is lost when
    // a competing select branch wins and completion is never observed.
    async fn join(&mut self) -> Result<RunSummary, RunError> {
        let Some(handle) = self.handle.as_mut() else {
            return futures::future::pending().await;
        };
        let joined = handle.await;
        self.handle = None;
        joined?
    }
}

/// Holds at most one running session.
#[derive(Default)]
pub(crate) struct RunSlot {
    active: Option<RunSession>,
    started: usize,
}

impl RunSlot {
    pub fn start(&mut self, cfg: RunConfig, harness: &Harness) -> Result<(), RunError> {
        if self.active.is_some() {
            return Err(RunError::AlreadyRunning);
        }
        self.active = Some(RunSession::start(cfg, harness)?);
        self.started += 1;
        debug!(run = self.started, "run started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    #[cfg(test)]
    pub fn is_aborting(&self) -> bool {
        self.active.as_ref().is_some_and(|s| s.aborting)
    }

    /// Abort the active run. `false` when idle or already aborting.
    pub fn abort(&mut self) -> bool {
        self.active.as_mut().is_some_and(RunSession::abort)
    }

    pub fn runs_started(&self) -> usize {
        self.started
    }

    #[cfg(test)]
    pub fn config(&self) -> Option<&RunConfig> {
        self.active.as_ref().map(|s| s.cfg.as_ref())
    }

    /// Resolves once the active run completes and frees the slot. Never
    /// resolves while idle. Safe to use as a `select!` branch.
    pub async fn completion(&mut self) -> Result<RunSummary, RunError> {
        let Some(session) = self.active.as_mut() else {
            return futures::future::pending().await;
        };
        let res = session.join().await;
        self.active = None;
        res
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    pub fn harness() -> Harness {
        let (output, _rx) = OutputSink::capture();
        Harness {
            cache: DefinitionCache::new(),
            reporter: reporter::resolve("json").unwrap(),
            reporter_options: ReporterOptions::default(),
            output,
        }
    }

    pub fn manifest(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn second_start_is_rejected_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let file = manifest(dir.path(), "a.tests", "waits: sleep 5\n");
        let h = harness();
        let mut slot = RunSlot::default();

        slot.start(RunConfig::for_tests(vec![file.clone()]), &h).unwrap();
        let err = slot
            .start(RunConfig::for_tests(vec![file.clone()]), &h)
            .unwrap_err();
        assert!(matches!(err, RunError::AlreadyRunning));
        assert_eq!(slot.runs_started(), 1);

        assert!(slot.abort());
        assert!(!slot.abort(), "second abort is a no-op");
        let summary = tokio::time::timeout(Duration::from_secs(2), slot.completion())
            .await
            .unwrap()
            .unwrap();
        assert!(summary.aborted);
        assert!(!slot.is_running());

        // Idle again: a new start is accepted.
        slot.start(RunConfig::for_tests(vec![file]), &h).unwrap();
        slot.abort();
        slot.completion().await.unwrap();
    }

    #[tokio::test]
    async fn construction_error_surfaces_from_start() {
        let dir = tempfile::tempdir().unwrap();
        let file = manifest(dir.path(), "bad.tests", "no separator here\n");
        let mut slot = RunSlot::default();
        let err = slot
            .start(RunConfig::for_tests(vec![file]), &harness())
            .unwrap_err();
        assert!(matches!(err, RunError::Load(_)));
        assert!(!slot.is_running());
        assert_eq!(slot.runs_started(), 0);
    }

    #[tokio::test]
    async fn completion_reports_failure_count() {
        let dir = tempfile::tempdir().unwrap();
        let file = manifest(dir.path(), "a.tests", "one: true\ntwo: false\n");
        let mut slot = RunSlot::default();
        slot.start(RunConfig::for_tests(vec![file]), &harness())
            .unwrap();
        let summary = slot.completion().await.unwrap();
        assert_eq!((summary.passes, summary.failures), (1, 1));
    }
}
