//! Process termination: exit-code derivation and output draining.

use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Failure counts above this are reported as this value.
pub const MAX_EXIT_CODE: u8 = 255;
/// Conventional status for a run cut short by Ctrl-C.
pub const INTERRUPTED_EXIT_CODE: u8 = 130;
/// How long the drain waits for a stream before exiting anyway.
pub const DRAIN_FALLBACK: Duration = Duration::from_secs(2);

pub fn exit_code(failures: usize) -> u8 {
    u8::try_from(failures).unwrap_or(MAX_EXIT_CODE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitMode {
    /// Drain output and exit as soon as the run completes (`--exit`).
    Immediate,
    /// Hand the code back to `main` and let the process end on its own.
    Deferred,
}

/// Outcome of the single non-watch run, finalized once.
#[derive(Debug)]
pub struct ExitState {
    mode: ExitMode,
    failures: usize,
    interrupted: bool,
}

impl ExitState {
    pub fn new(mode: ExitMode) -> Self {
        Self {
            mode,
            failures: 0,
            interrupted: false,
        }
    }

    /// Record the run's failure count. Ignored once interrupted.
    pub fn record(&mut self, failures: usize) {
        if !self.interrupted {
            self.failures = failures;
        }
    }

    pub fn interrupt(&mut self) {
        self.interrupted = true;
        self.failures = usize::from(INTERRUPTED_EXIT_CODE);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn mode(&self) -> ExitMode {
        self.mode
    }

    pub fn code(&self) -> u8 {
        exit_code(self.failures)
    }
}

/// Barrier over a fixed number of outstanding flushes.
#[derive(Debug)]
pub struct DrainGate {
    pending: usize,
}

impl DrainGate {
    pub fn new(pending: usize) -> Self {
        Self { pending }
    }

    /// Acknowledge one operation. Returns `true` once nothing is outstanding.
    pub fn release(&mut self) -> bool {
        self.pending = self.pending.saturating_sub(1);
        self.is_open()
    }

    pub fn is_open(&self) -> bool {
        self.pending == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Drained,
    TimedOut,
}

async fn flush_stream<W: AsyncWrite + Unpin>(stream: &mut W) {
    // A failed write still counts as acknowledged; there is nobody left to tell.
    if let Err(e) = stream.write_all(b"").await {
        debug!(error = %e, "drain write failed");
    }
    if let Err(e) = stream.flush().await {
        debug!(error = %e, "drain flush failed");
    }
}

/// Issue an empty write and flush on both streams, returning once both completed
/// or `fallback` elapsed.
pub async fn drain<O, E>(mut stdout: O, mut stderr: E, fallback: Duration) -> DrainOutcome
where
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let mut gate = DrainGate::new(2);
    let out = flush_stream(&mut stdout);
    let err = flush_stream(&mut stderr);
    let deadline = tokio::time::sleep(fallback);
    tokio::pin!(out, err, deadline);
    let (mut out_done, mut err_done) = (false, false);

    while !gate.is_open() {
        tokio::select! {
            _ = &mut out, if !out_done => {
                out_done = true;
                gate.release();
            }
            _ = &mut err, if !err_done => {
                err_done = true;
                gate.release();
            }
            _ = &mut deadline => {
                warn!("output drain timed out, exiting anyway");
                return DrainOutcome::TimedOut;
            }
        }
    }
    DrainOutcome::Drained
}

/// Drain both streams, then call `exit` with `code`.
pub async fn terminate<O, E, F>(code: u8, stdout: O, stderr: E, fallback: Duration, exit: F)
where
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
    F: FnOnce(i32),
{
    let outcome = drain(stdout, stderr, fallback).await;
    debug!(code, ?outcome, "terminating");
    exit(i32::from(code));
}

/// Finish a non-watch run according to its exit mode.
///
/// In [`ExitMode::Immediate`] this never returns: the process exits once the
/// standard streams drained. Otherwise the code is returned for `main`.
pub async fn finish(state: &ExitState) -> u8 {
    let code = state.code();
    if state.mode() == ExitMode::Immediate {
        terminate(
            code,
            tokio::io::stdout(),
            tokio::io::stderr(),
            DRAIN_FALLBACK,
            |c| std::process::exit(c),
        )
        .await;
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::task::{Context, Poll};

    #[test]
    fn exit_code_clamps_failure_count() {
        assert_eq!(exit_code(0), 0);
        assert_eq!(exit_code(3), 3);
        assert_eq!(exit_code(255), 255);
        assert_eq!(exit_code(256), 255);
        assert_eq!(exit_code(9999), 255);
        for f in [1usize, 17, 254, 1000, usize::MAX] {
            assert_eq!(usize::from(exit_code(f)), f.min(255));
        }
    }

    #[test]
    fn interrupt_overrides_recorded_failures() {
        let mut state = ExitState::new(ExitMode::Deferred);
        state.interrupt();
        state.record(2);
        assert!(state.is_interrupted());
        assert_eq!(state.code(), INTERRUPTED_EXIT_CODE);

        let mut state = ExitState::new(ExitMode::Immediate);
        state.record(9999);
        assert_eq!(state.code(), 255);
    }

    #[test]
    fn gate_opens_when_all_released() {
        let mut gate = DrainGate::new(2);
        assert!(!gate.is_open());
        assert!(!gate.release());
        assert!(gate.release());
        assert!(gate.release());
    }

    /// Writer that records flushes into a shared log, optionally never completing.
    struct LogWriter {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        stall: bool,
    }

    impl AsyncWrite for LogWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            if self.stall {
                return Poll::Pending;
            }
            self.log.lock().push(format!("{} flushed", self.name));
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn writer(name: &'static str, log: &Arc<Mutex<Vec<String>>>, stall: bool) -> LogWriter {
        LogWriter {
            name,
            log: log.clone(),
            stall,
        }
    }

    #[tokio::test]
    async fn both_streams_flush_before_exit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let exit_log = log.clone();
        terminate(
            3,
            writer("stdout", &log, false),
            writer("stderr", &log, false),
            DRAIN_FALLBACK,
            move |code| exit_log.lock().push(format!("exit {code}")),
        )
        .await;
        let log = log.lock();
        assert_eq!(log.len(), 3);
        assert!(log.contains(&"stdout flushed".to_string()));
        assert!(log.contains(&"stderr flushed".to_string()));
        assert_eq!(log[2], "exit 3");
    }

    #[tokio::test]
    async fn stalled_stream_falls_back_to_exit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let outcome = drain(
            writer("stdout", &log, false),
            writer("stderr", &log, true),
            Duration::from_millis(50),
        )
        .await;
        assert_eq!(outcome, DrainOutcome::TimedOut);
        assert_eq!(*log.lock(), vec!["stdout flushed".to_string()]);
    }
}
