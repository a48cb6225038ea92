use super::Reporter;
use crate::model::{RunSummary, TestEvent, TestReport};
use crate::output::OutputSink;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Serialize)]
struct JsonTest {
    title: String,
    full_title: String,
    file: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    err: Option<String>,
}

impl JsonTest {
    fn new(test: &TestReport, duration_ms: Option<u128>, err: Option<String>) -> Self {
        Self {
            title: test.title.clone(),
            full_title: test.full_title.clone(),
            file: test.file.clone(),
            duration_ms,
            err,
        }
    }
}

#[derive(Serialize)]
struct JsonDocument<'a> {
    stats: &'a RunSummary,
    passes: &'a [JsonTest],
    failures: &'a [JsonTest],
    pending: &'a [JsonTest],
}

/// Buffers every result and prints one document at the end of the run.
#[derive(Default)]
pub(crate) struct JsonReporter {
    passes: Vec<JsonTest>,
    failures: Vec<JsonTest>,
    pending: Vec<JsonTest>,
}

impl Reporter for JsonReporter {
    fn report(&mut self, event: &TestEvent, out: &OutputSink) {
        match event {
            TestEvent::RunStarted { .. } => {}
            TestEvent::TestPassed { test, duration, .. } => {
                self.passes
                    .push(JsonTest::new(test, Some(duration.as_millis()), None));
            }
            TestEvent::TestFailed {
                test,
                duration,
                reason,
                ..
            } => {
                self.failures.push(JsonTest::new(
                    test,
                    Some(duration.as_millis()),
                    Some(reason.clone()),
                ));
            }
            TestEvent::TestPending { test } => self.pending.push(JsonTest::new(test, None, None)),
            TestEvent::Info(msg) => out.error(msg.clone()),
            TestEvent::RunCompleted { summary } => {
                let doc = JsonDocument {
                    stats: summary,
                    passes: &self.passes,
                    failures: &self.failures,
                    pending: &self.pending,
                };
                match serde_json::to_string_pretty(&doc) {
                    Ok(s) => out.line(s),
                    Err(e) => out.error(format!("failed to serialize results: {e}")),
                }
            }
        }
    }
}
