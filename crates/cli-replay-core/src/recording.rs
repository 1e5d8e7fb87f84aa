//! Recording log model and scenario synthesis.
//!
//! During recording each intercepted call appends one JSON object to a
//! JSONL log (`CLI_REPLAY_RECORDING_LOG`). The record subcommand then folds
//! the log into scenario YAML with one literal step per call.

use crate::scenario::{MatchSpec, Meta, Response, ScenarioDoc, Step, StepElement};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One intercepted call, as written to the recording log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC3339 UTC.
    pub timestamp: DateTime<Utc>,
    pub argv: Vec<String>,
    pub exit: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("failed to read recording log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid recording log {path} at line {line}: {source}")]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Parse a JSONL recording log. Blank lines are skipped.
pub fn read_log(path: &Path) -> Result<Vec<LogEntry>, RecordError> {
    let text = std::fs::read_to_string(path).map_err(|source| RecordError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut entries = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(line).map_err(|source| RecordError::Parse {
            path: path.to_path_buf(),
            line: i + 1,
            source,
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Append one entry to the recording log, creating it if needed.
pub fn append_entry(path: &Path, entry: &LogEntry) -> Result<(), RecordError> {
    use std::io::Write;
    let io_err = |source| RecordError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io_err)?;
    let mut line = serde_json::to_vec(entry).map_err(|source| RecordError::Parse {
        path: path.to_path_buf(),
        line: 0,
        source,
    })?;
    line.push(b'\n');
    file.write_all(&line).map_err(io_err)
}

/// Fold recorded calls into a scenario document: one literal step per call
/// in recorded order.
pub fn synthesize(entries: &[LogEntry], name: &str, description: Option<&str>) -> ScenarioDoc {
    let steps = entries
        .iter()
        .map(|entry| {
            StepElement::Step(Step {
                r#match: MatchSpec {
                    argv: entry.argv.clone(),
                    stdin: entry.stdin.clone(),
                },
                respond: Response {
                    exit: entry.exit,
                    stdout: (!entry.stdout.is_empty()).then(|| entry.stdout.clone()),
                    stderr: (!entry.stderr.is_empty()).then(|| entry.stderr.clone()),
                    ..Response::default()
                },
                calls: None,
                when: None,
            })
        })
        .collect();
    ScenarioDoc {
        meta: Meta {
            name: name.to_string(),
            description: description.map(|d| d.to_string()),
            vars: Default::default(),
            security: None,
            session: None,
        },
        steps,
    }
}
