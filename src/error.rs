use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Problems with the invocation itself. Fatal before any file is loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("--grep and --fgrep are mutually exclusive")]
    ConflictingGrep,
    #[error("--invert requires --grep or --fgrep")]
    InvertWithoutGrep,
    #[error("invalid --grep pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("unknown reporter {name:?} (available: {available})")]
    UnknownReporter { name: String, available: String },
    #[error("unknown interface {name:?} (available: {available})")]
    UnknownInterface { name: String, available: String },
    #[error("malformed reporter option {0:?}, expected key=value")]
    MalformedReporterOption(String),
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("no test files found")]
    NoTestFiles,
}

/// Reading or parsing a definition file failed.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}:{line}: expected `title: command`", path.display())]
    Malformed { path: PathBuf, line: usize },
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("a test run is already in progress")]
    AlreadyRunning,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("run task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
