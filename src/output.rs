//! Blocking stdout/stderr writer fed by a channel.
//!
//! Reporters never touch the terminal directly; they push [`OutputLine`]s and a
//! dedicated blocking task does the writing so async tasks never stall on I/O.

use crossterm::{cursor, execute};
use std::io::Write;
use tokio::sync::mpsc;

/// Output routing for the writer task.
#[derive(Debug)]
pub(crate) enum OutputLine {
    Stdout(String),
    /// Written without a trailing newline and flushed right away.
    StdoutPartial(String),
    Stderr(String),
    Cursor { visible: bool },
}

/// Cheap handle reporters write through.
#[derive(Debug, Clone)]
pub(crate) struct OutputSink {
    tx: mpsc::UnboundedSender<OutputLine>,
}

impl OutputSink {
    pub fn line(&self, msg: impl Into<String>) {
        let _ = self.tx.send(OutputLine::Stdout(msg.into()));
    }

    pub fn partial(&self, msg: impl Into<String>) {
        let _ = self.tx.send(OutputLine::StdoutPartial(msg.into()));
    }

    pub fn error(&self, msg: impl Into<String>) {
        let _ = self.tx.send(OutputLine::Stderr(msg.into()));
    }

    pub fn cursor(&self, visible: bool) {
        let _ = self.tx.send(OutputLine::Cursor { visible });
    }

    /// Sink backed by a plain channel instead of the terminal.
    #[cfg(test)]
    pub fn capture() -> (Self, mpsc::UnboundedReceiver<OutputLine>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

/// Spawn the writer. It exits and flushes once every sink clone is dropped.
pub(crate) fn spawn_output_writer() -> (OutputSink, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        // Streams are not locked for the writer's lifetime; the interrupt path
        // needs to reach the terminal while this task is idle.
        let mut out = std::io::stdout();
        let mut err = std::io::stderr();

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::StdoutPartial(msg) => {
                    let _ = write!(out, "{}", msg);
                    let _ = out.flush();
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
                OutputLine::Cursor { visible: true } => {
                    let _ = execute!(out, cursor::Show);
                }
                OutputLine::Cursor { visible: false } => {
                    let _ = execute!(out, cursor::Hide);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (OutputSink { tx }, handle)
}

/// Restore the terminal after an interrupt: show the cursor and end the line.
pub(crate) fn restore_terminal() {
    let mut out = std::io::stdout();
    let _ = execute!(out, cursor::Show);
    let _ = writeln!(out);
    let _ = out.flush();
}
