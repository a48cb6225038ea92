use super::TestCommand;
use crate::error::RunError;
use crate::model::RunConfig;
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::Command;

/// Result of one attempt at a test.
#[derive(Debug)]
pub(crate) enum Outcome {
    Passed,
    Failed(String),
    Aborted,
}

/// Lines of captured output kept in a failure reason.
const REASON_TAIL_LINES: usize = 10;

fn build_command(command: &TestCommand, cfg: &RunConfig) -> Command {
    let mut cmd = match command {
        TestCommand::Shell(line) => {
            let mut c = Command::new("sh");
            c.arg("-c").arg(line);
            c
        }
        TestCommand::Exec(path) => Command::new(path),
    };

    // Flags the engine cannot enforce itself are handed to the test process.
    for (key, on) in [
        ("TESTRUN_CHECK_LEAKS", cfg.check_leaks),
        ("TESTRUN_ASYNC_ONLY", cfg.async_only),
        ("TESTRUN_DELAY", cfg.delay),
        ("TESTRUN_ALLOW_UNCAUGHT", cfg.allow_uncaught),
    ] {
        if on {
            cmd.env(key, "1");
        }
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Run one attempt. Dropping the wait future on timeout or abort kills the child.
pub(crate) async fn run_test(
    command: &TestCommand,
    cfg: &RunConfig,
    abort: &AtomicBool,
) -> Result<Outcome, RunError> {
    let child = match build_command(command, cfg).spawn() {
        Ok(c) => c,
        Err(source) if cfg.allow_uncaught => {
            return Err(RunError::Spawn {
                command: command.display(),
                source,
            });
        }
        Err(e) => return Ok(Outcome::Failed(format!("failed to spawn: {e}"))),
    };

    let timeout = cfg.effective_timeout();
    tokio::select! {
        res = child.wait_with_output() => Ok(match res {
            Ok(output) if output.status.success() => Outcome::Passed,
            Ok(output) => Outcome::Failed(failure_reason(&output)),
            Err(e) => Outcome::Failed(format!("failed to wait for test process: {e}")),
        }),
        _ = deadline(timeout) => Ok(Outcome::Failed(format!(
            "timeout of {}ms exceeded",
            timeout.map(|t| t.as_millis()).unwrap_or_default()
        ))),
        _ = wait_for_abort(abort) => Ok(Outcome::Aborted),
    }
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(t) => tokio::time::sleep(t).await,
        None => futures::future::pending().await,
    }
}

async fn wait_for_abort(abort: &AtomicBool) {
    while !abort.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn failure_reason(output: &Output) -> String {
    let status = match output.status.code() {
        Some(code) => format!("exited with status {code}"),
        None => "terminated by signal".to_string(),
    };
    // Prefer stderr; fall back to stdout for tools that report failures there.
    let captured = if output.stderr.is_empty() {
        &output.stdout
    } else {
        &output.stderr
    };
    let text = String::from_utf8_lossy(captured);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let tail = &lines[lines.len().saturating_sub(REASON_TAIL_LINES)..];
    if tail.is_empty() {
        status
    } else {
        format!("{status}\n{}", tail.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    fn output(code: i32, stdout: &str, stderr: &str) -> Output {
        Output {
            status: std::process::ExitStatus::from_raw(code << 8),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn failure_reason_prefers_stderr_tail() {
        let reason = failure_reason(&output(2, "noise\n", "expected 1\ngot 2\n"));
        assert_eq!(reason, "exited with status 2\nexpected 1\ngot 2");
    }

    #[test]
    fn failure_reason_falls_back_to_stdout() {
        let reason = failure_reason(&output(1, "not ok 1\n", ""));
        assert_eq!(reason, "exited with status 1\nnot ok 1");
    }

    #[tokio::test]
    async fn spawn_failure_counts_as_failure_unless_uncaught_allowed() {
        let missing = TestCommand::Exec("/nonexistent/testrun-binary".into());
        let abort = AtomicBool::new(false);
        let mut cfg = RunConfig::for_tests(vec![]);
        let outcome = run_test(&missing, &cfg, &abort).await.unwrap();
        assert!(matches!(outcome, Outcome::Failed(_)));

        cfg.allow_uncaught = true;
        let err = run_test(&missing, &cfg, &abort).await.unwrap_err();
        assert!(matches!(err, RunError::Spawn { .. }));
    }

    #[tokio::test]
    async fn flags_reach_the_child_environment() {
        let mut cfg = RunConfig::for_tests(vec![]);
        cfg.check_leaks = true;
        let abort = AtomicBool::new(false);
        let probe = TestCommand::Shell("test \"$TESTRUN_CHECK_LEAKS\" = 1".into());
        let outcome = run_test(&probe, &cfg, &abort).await.unwrap();
        assert!(matches!(outcome, Outcome::Passed));
    }
}
