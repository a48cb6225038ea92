use super::{write_epilogue, Reporter};
use crate::model::TestEvent;
use crate::output::OutputSink;

/// Dot matrix: `.` pass, `!` fail, `,` pending. Hides the cursor while running.
#[derive(Default)]
pub(crate) struct DotReporter {
    failures: Vec<(String, String)>,
}

impl Reporter for DotReporter {
    fn report(&mut self, event: &TestEvent, out: &OutputSink) {
        match event {
            TestEvent::RunStarted { .. } => {
                out.cursor(false);
                out.partial("  ");
            }
            TestEvent::TestPassed { .. } => out.partial("."),
            TestEvent::TestFailed { test, reason, .. } => {
                self.failures.push((test.full_title.clone(), reason.clone()));
                out.partial("!");
            }
            TestEvent::TestPending { .. } => out.partial(","),
            TestEvent::Info(msg) => out.error(msg.clone()),
            TestEvent::RunCompleted { summary } => {
                out.line("");
                out.cursor(true);
                write_epilogue(summary, &self.failures, out);
            }
        }
    }
}
