use super::session::{Harness, RunSlot};
use crate::error::RunError;
use crate::exit::{ExitMode, ExitState};
use crate::model::RunConfig;
use std::future::Future;
use tracing::{info, warn};

/// Run the suite once and settle the exit state.
///
/// An interrupt while running aborts the session and pins the outcome to the
/// interrupted code; the aborted run is still awaited so its output drains.
pub(crate) async fn run_single<I>(
    cfg: RunConfig,
    harness: &Harness,
    mode: ExitMode,
    interrupt: I,
) -> Result<ExitState, RunError>
where
    I: Future<Output = ()>,
{
    let mut slot = RunSlot::default();
    let mut state = ExitState::new(mode);
    slot.start(cfg, harness)?;
    tokio::pin!(interrupt);

    let summary = loop {
        tokio::select! {
            res = slot.completion() => break res?,
            _ = &mut interrupt, if !state.is_interrupted() => {
                warn!("interrupted, aborting run");
                state.interrupt();
                slot.abort();
            }
        }
    };

    info!(
        passes = summary.passes,
        failures = summary.failures,
        pending = summary.pending,
        "run complete"
    );
    state.record(summary.failures);
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::INTERRUPTED_EXIT_CODE;
    use crate::orchestrator::session::tests::{harness, manifest};
    use std::time::Duration;

    fn never() -> futures::future::Pending<()> {
        futures::future::pending()
    }

    #[tokio::test]
    async fn passing_run_exits_zero() {
        let dir = tempfile::tempdir().unwrap();
        let file = manifest(dir.path(), "a.tests", "adds: test 1 -eq 1\nsubtracts: true\n");
        let state = run_single(
            RunConfig::for_tests(vec![file]),
            &harness(),
            ExitMode::Deferred,
            never(),
        )
        .await
        .unwrap();
        assert_eq!(state.code(), 0);
    }

    #[tokio::test]
    async fn failure_count_becomes_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let file = manifest(
            dir.path(),
            "a.tests",
            "one: false\ntwo: exit 2\nthree: test 1 -eq 2\nfour: true\n",
        );
        let state = run_single(
            RunConfig::for_tests(vec![file]),
            &harness(),
            ExitMode::Immediate,
            never(),
        )
        .await
        .unwrap();
        assert_eq!(state.code(), 3);
        assert_eq!(state.mode(), ExitMode::Immediate);
    }

    #[tokio::test]
    async fn failure_count_clamps_at_255() {
        let dir = tempfile::tempdir().unwrap();
        let body: String = (0..260).map(|i| format!("t{i}: false\n")).collect();
        let file = manifest(dir.path(), "many.tests", &body);
        let state = run_single(
            RunConfig::for_tests(vec![file]),
            &harness(),
            ExitMode::Deferred,
            never(),
        )
        .await
        .unwrap();
        assert_eq!(state.code(), 255);
    }

    #[tokio::test]
    async fn interrupt_aborts_and_exits_130() {
        let dir = tempfile::tempdir().unwrap();
        let file = manifest(dir.path(), "a.tests", "first: false\nhangs: sleep 5\n");
        let state = tokio::time::timeout(
            Duration::from_secs(3),
            run_single(
                RunConfig::for_tests(vec![file]),
                &harness(),
                ExitMode::Deferred,
                tokio::time::sleep(Duration::from_millis(200)),
            ),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(state.is_interrupted());
        assert_eq!(state.code(), INTERRUPTED_EXIT_CODE);
    }
}
