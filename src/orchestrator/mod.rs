//! Application-level orchestration.
//!
//! This module owns the run lifecycle (start/abort/restart) for both the single
//! run and watch mode. The CLI layer wires inputs (signals, file changes, stdin)
//! into it and decides how the process ends.

mod session;
mod single;
mod watch;

pub(crate) use session::Harness;
pub(crate) use single::run_single;
pub(crate) use watch::{run_watch, spawn_command_reader, WatchExit, WatchOrchestrator};

/// Resolves on the first Ctrl-C. Stays pending forever if the handler cannot
/// be installed.
pub(crate) async fn interrupt_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "cannot listen for interrupts");
        futures::future::pending::<()>().await;
    }
}
