//! Definition interfaces: how a file on disk turns into test definitions.

use crate::engine::{TestCommand, TestDef};
use crate::error::{ConfigError, LoadError};
use std::path::Path;

pub struct Interface {
    pub name: &'static str,
    pub description: &'static str,
    parse: fn(&Path) -> Result<Vec<TestDef>, LoadError>,
}

impl Interface {
    pub fn parse(&self, path: &Path) -> Result<Vec<TestDef>, LoadError> {
        (self.parse)(path)
    }
}

pub const INTERFACES: &[Interface] = &[
    Interface {
        name: "manifest",
        description: "one `title: command` test per line",
        parse: parse_manifest_file,
    },
    Interface {
        name: "exec",
        description: "each file is an executable test",
        parse: parse_exec_file,
    },
];

pub fn lookup(name: &str) -> Option<&'static Interface> {
    INTERFACES.iter().find(|i| i.name == name)
}

pub fn resolve(name: &str) -> Result<&'static Interface, ConfigError> {
    lookup(name).ok_or_else(|| ConfigError::UnknownInterface {
        name: name.to_string(),
        available: INTERFACES
            .iter()
            .map(|i| i.name)
            .collect::<Vec<_>>()
            .join(", "),
    })
}

fn parse_exec_file(path: &Path) -> Result<Vec<TestDef>, LoadError> {
    // Stat now so a vanished file fails at load time rather than mid-run.
    std::fs::metadata(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(vec![TestDef {
        title,
        file: path.to_path_buf(),
        command: Some(TestCommand::Exec(path.to_path_buf())),
        exclusive: false,
    }])
}

fn parse_manifest_file(path: &Path) -> Result<Vec<TestDef>, LoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_manifest(path, &text)
}

/// Parse manifest text.
///
/// ```text
/// # comment
/// adds numbers: ./calc 1 + 1
/// only parses input: ./calc --parse
/// skip slow path: ./calc --slow
/// documents the cli:
/// ```
pub fn parse_manifest(path: &Path, text: &str) -> Result<Vec<TestDef>, LoadError> {
    let mut defs = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((head, command)) = line.split_once(':') else {
            return Err(LoadError::Malformed {
                path: path.to_path_buf(),
                line: idx + 1,
            });
        };

        let (title, exclusive, skipped) = if let Some(rest) = head.strip_prefix("only ") {
            (rest, true, false)
        } else if let Some(rest) = head.strip_prefix("skip ") {
            (rest, false, true)
        } else {
            (head, false, false)
        };
        let title = title.trim();
        if title.is_empty() {
            return Err(LoadError::Malformed {
                path: path.to_path_buf(),
                line: idx + 1,
            });
        }

        let command = command.trim();
        defs.push(TestDef {
            title: title.to_string(),
            file: path.to_path_buf(),
            command: (!skipped && !command.is_empty())
                .then(|| TestCommand::Shell(command.to_string())),
            exclusive,
        });
    }
    Ok(defs)
}
