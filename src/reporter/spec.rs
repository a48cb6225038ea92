use super::{format_duration, write_epilogue, Reporter, ReporterOptions};
use crate::model::TestEvent;
use crate::output::OutputSink;
use std::path::{Path, PathBuf};

pub(crate) struct SpecReporter {
    hide_slow: bool,
    current_file: Option<PathBuf>,
    failures: Vec<(String, String)>,
}

impl SpecReporter {
    pub fn new(options: &ReporterOptions) -> Self {
        Self {
            hide_slow: options.flag("hide-slow"),
            current_file: None,
            failures: Vec::new(),
        }
    }

    fn heading(&mut self, file: &Path, out: &OutputSink) {
        if self.current_file.as_deref() != Some(file) {
            out.line(format!("  {}", file.display()));
            self.current_file = Some(file.to_path_buf());
        }
    }
}

impl Reporter for SpecReporter {
    fn report(&mut self, event: &TestEvent, out: &OutputSink) {
        match event {
            TestEvent::RunStarted { .. } => out.line(""),
            TestEvent::TestPassed {
                test,
                duration,
                slow,
            } => {
                self.heading(&test.file, out);
                if *slow && !self.hide_slow {
                    out.line(format!(
                        "    ✓ {} ({})",
                        test.title,
                        format_duration(*duration)
                    ));
                } else {
                    out.line(format!("    ✓ {}", test.title));
                }
            }
            TestEvent::TestFailed { test, reason, .. } => {
                self.heading(&test.file, out);
                self.failures.push((test.full_title.clone(), reason.clone()));
                out.line(format!("    {}) {}", self.failures.len(), test.title));
            }
            TestEvent::TestPending { test } => {
                self.heading(&test.file, out);
                out.line(format!("    - {}", test.title));
            }
            TestEvent::Info(msg) => out.error(msg.clone()),
            TestEvent::RunCompleted { summary } => {
                write_epilogue(summary, &self.failures, out);
            }
        }
    }
}
