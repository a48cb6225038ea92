use crate::error::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Immutable snapshot handed to a single run. Watch mode rebuilds one per restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub files: Vec<PathBuf>,
    pub interface: String,
    #[serde(default)]
    pub grep: Option<GrepFilter>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub slow: Duration,
    pub timeouts_enabled: bool,
    pub retries: u32,
    pub bail: bool,
    pub check_leaks: bool,
    pub async_only: bool,
    pub delay: bool,
    pub allow_uncaught: bool,
    pub forbid_only: bool,
    pub forbid_pending: bool,
}

impl RunConfig {
    /// Per-test deadline, or `None` when timeouts are switched off.
    pub fn effective_timeout(&self) -> Option<Duration> {
        (self.timeouts_enabled && !self.timeout.is_zero()).then_some(self.timeout)
    }

    #[cfg(test)]
    pub fn for_tests(files: Vec<PathBuf>) -> Self {
        Self {
            files,
            interface: "manifest".into(),
            grep: None,
            timeout: Duration::from_secs(5),
            slow: Duration::from_secs(5),
            timeouts_enabled: true,
            retries: 0,
            bail: false,
            check_leaks: false,
            async_only: false,
            delay: false,
            allow_uncaught: false,
            forbid_only: false,
            forbid_pending: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrepKind {
    Pattern(String),
    Fixed(String),
}

/// Title filter applied when selecting tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrepFilter {
    pub kind: GrepKind,
    #[serde(default)]
    pub invert: bool,
}

impl GrepFilter {
    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self {
            kind: GrepKind::Pattern(pattern.into()),
            invert: false,
        }
    }

    pub fn fixed(text: impl Into<String>) -> Self {
        Self {
            kind: GrepKind::Fixed(text.into()),
            invert: false,
        }
    }

    pub fn inverted(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }

    /// Compile the filter; an invalid regex is a configuration error.
    pub fn matcher(&self) -> Result<GrepMatcher, ConfigError> {
        let inner = match &self.kind {
            GrepKind::Pattern(p) => {
                MatcherKind::Regex(Regex::new(p).map_err(|source| ConfigError::InvalidPattern {
                    pattern: p.clone(),
                    source,
                })?)
            }
            GrepKind::Fixed(s) => MatcherKind::Fixed(s.clone()),
        };
        Ok(GrepMatcher {
            inner,
            invert: self.invert,
        })
    }
}

enum MatcherKind {
    Regex(Regex),
    Fixed(String),
}

pub struct GrepMatcher {
    inner: MatcherKind,
    invert: bool,
}

impl GrepMatcher {
    pub fn is_match(&self, full_title: &str) -> bool {
        let hit = match &self.inner {
            MatcherKind::Regex(re) => re.is_match(full_title),
            MatcherKind::Fixed(s) => full_title.contains(s.as_str()),
        };
        hit != self.invert
    }
}

/// A single test as reported to presentation layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub title: String,
    pub full_title: String,
    pub file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TestEvent {
    RunStarted {
        total: usize,
    },
    TestPassed {
        test: TestReport,
        #[serde(with = "humantime_serde")]
        duration: Duration,
        slow: bool,
    },
    TestFailed {
        test: TestReport,
        #[serde(with = "humantime_serde")]
        duration: Duration,
        reason: String,
        attempts: u32,
    },
    TestPending {
        test: TestReport,
    },
    /// Engine notices that are not tied to one test.
    Info(String),
    RunCompleted {
        summary: RunSummary,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    #[serde(default)]
    pub started_at: String,
    pub passes: usize,
    pub failures: usize,
    pub pending: usize,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub aborted: bool,
}
