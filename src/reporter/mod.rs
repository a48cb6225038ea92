//! Reporters turn engine events into terminal output.

mod dot;
mod json;
mod spec;

use crate::error::ConfigError;
use crate::model::{RunSummary, TestEvent};
use crate::output::OutputSink;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;

pub(crate) trait Reporter: Send {
    fn report(&mut self, event: &TestEvent, out: &OutputSink);
}

/// `--reporter-option` values, `key=value` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ReporterOptions(BTreeMap<String, String>);

impl ReporterOptions {
    /// Each entry may hold several comma-separated pairs.
    pub fn parse(entries: &[String]) -> Result<Self, ConfigError> {
        let mut map = BTreeMap::new();
        for pair in entries.iter().flat_map(|e| e.split(',')) {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(ConfigError::MalformedReporterOption(pair.to_string()));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(ConfigError::MalformedReporterOption(pair.to_string()));
            }
            map.insert(key.to_string(), value.trim().to_string());
        }
        Ok(Self(map))
    }

    pub fn flag(&self, key: &str) -> bool {
        self.0.get(key).is_some_and(|v| v == "true")
    }
}

pub(crate) struct ReporterSpec {
    pub name: &'static str,
    pub description: &'static str,
    build: fn(&ReporterOptions) -> Box<dyn Reporter>,
}

impl ReporterSpec {
    pub fn build(&self, options: &ReporterOptions) -> Box<dyn Reporter> {
        (self.build)(options)
    }
}

pub(crate) const REPORTERS: &[ReporterSpec] = &[
    ReporterSpec {
        name: "spec",
        description: "hierarchical view of every test",
        build: build_spec,
    },
    ReporterSpec {
        name: "dot",
        description: "one character per test",
        build: build_dot,
    },
    ReporterSpec {
        name: "json",
        description: "single JSON document once the run completes",
        build: build_json,
    },
];

fn build_spec(options: &ReporterOptions) -> Box<dyn Reporter> {
    Box::new(spec::SpecReporter::new(options))
}

fn build_dot(_: &ReporterOptions) -> Box<dyn Reporter> {
    Box::new(dot::DotReporter::default())
}

fn build_json(_: &ReporterOptions) -> Box<dyn Reporter> {
    Box::new(json::JsonReporter::default())
}

pub(crate) fn lookup(name: &str) -> Option<&'static ReporterSpec> {
    REPORTERS.iter().find(|r| r.name == name)
}

pub(crate) fn resolve(name: &str) -> Result<&'static ReporterSpec, ConfigError> {
    lookup(name).ok_or_else(|| ConfigError::UnknownReporter {
        name: name.to_string(),
        available: REPORTERS
            .iter()
            .map(|r| r.name)
            .collect::<Vec<_>>()
            .join(", "),
    })
}

/// Drive `reporter` until the event channel closes.
pub(crate) fn spawn_reporter(
    mut reporter: Box<dyn Reporter>,
    mut event_rx: mpsc::UnboundedReceiver<TestEvent>,
    out: OutputSink,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            reporter.report(&ev, &out);
        }
    })
}

pub(crate) fn format_duration(d: Duration) -> String {
    let rounded = Duration::from_millis(u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
    if rounded.is_zero() {
        return "0ms".into();
    }
    humantime::format_duration(rounded).to_string()
}

/// Counts and failure details shared by the text reporters.
fn write_epilogue(summary: &RunSummary, failures: &[(String, String)], out: &OutputSink) {
    out.line("");
    out.line(format!(
        "  {} passing ({})",
        summary.passes,
        format_duration(summary.duration)
    ));
    if summary.pending > 0 {
        out.line(format!("  {} pending", summary.pending));
    }
    if summary.failures > 0 {
        out.line(format!("  {} failing", summary.failures));
    }
    if summary.aborted {
        out.line("  run aborted");
    }
    for (idx, (title, reason)) in failures.iter().enumerate() {
        out.line("");
        out.line(format!("  {}) {}:", idx + 1, title));
        for line in reason.lines() {
            out.line(format!("     {line}"));
        }
    }
    out.line("");
}
