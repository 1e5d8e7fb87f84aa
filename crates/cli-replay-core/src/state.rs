//! Persistent per-session replay state.
//!
//! One JSON state file exists per (scenario, session) pair, named by the
//! SHA-256 of `{absolute_scenario_path}\0{session_id}` in the platform temp
//! directory, so parallel sessions never collide. Every mutation is a full
//! read-modify-atomic-write cycle: serialize to a sibling temp file, rename
//! over the target, fsync the directory on POSIX. Within a process the
//! writer is serialized by a single sentinel lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Filename prefix for state files; the TTL sweep keys off it.
pub const STATE_FILE_PREFIX: &str = "cli-replay-state-";

/// Environment variable holding the session id.
pub const SESSION_ENV: &str = "CLI_REPLAY_SESSION";

static WRITE_SENTINEL: Mutex<()> = Mutex::new(());

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state file not found: {path}")]
    Missing { path: PathBuf },
    #[error("failed to access state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt state file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Persisted replay progress for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawState")]
pub struct ReplayState {
    pub scenario_path: PathBuf,
    pub scenario_hash: String,
    /// Flat index of the step currently accepting commands.
    pub current_step: usize,
    pub total_steps: usize,
    /// `step_counts[i]` is how many times flat step `i` has matched.
    pub step_counts: Vec<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub captures: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_group: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intercept_dir: Option<PathBuf>,
    pub last_updated: DateTime<Utc>,
}

/// On-disk shape, including the legacy `consumed_steps` boolean array that
/// older releases wrote. Read-compatible, never written back.
#[derive(Debug, Deserialize)]
struct RawState {
    scenario_path: PathBuf,
    scenario_hash: String,
    current_step: usize,
    total_steps: usize,
    #[serde(default)]
    step_counts: Option<Vec<u32>>,
    #[serde(default)]
    consumed_steps: Option<Vec<bool>>,
    #[serde(default)]
    captures: BTreeMap<String, String>,
    #[serde(default)]
    active_group: Option<usize>,
    #[serde(default)]
    intercept_dir: Option<PathBuf>,
    last_updated: DateTime<Utc>,
}

impl From<RawState> for ReplayState {
    fn from(raw: RawState) -> Self {
        let step_counts = match (raw.step_counts, raw.consumed_steps) {
            (Some(counts), _) => counts,
            (None, Some(consumed)) => consumed.iter().map(|&c| u32::from(c)).collect(),
            (None, None) => vec![0; raw.total_steps],
        };
        Self {
            scenario_path: raw.scenario_path,
            scenario_hash: raw.scenario_hash,
            current_step: raw.current_step,
            total_steps: raw.total_steps,
            step_counts,
            captures: raw.captures,
            active_group: raw.active_group,
            intercept_dir: raw.intercept_dir,
            last_updated: raw.last_updated,
        }
    }
}

impl ReplayState {
    /// Fresh state for a newly initialised session.
    pub fn new(scenario_path: PathBuf, scenario_hash: String, total_steps: usize) -> Self {
        Self {
            scenario_path,
            scenario_hash,
            current_step: 0,
            total_steps,
            step_counts: vec![0; total_steps],
            captures: BTreeMap::new(),
            active_group: None,
            intercept_dir: None,
            last_updated: Utc::now(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, StateError> {
        let bytes = std::fs::read(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                StateError::Missing {
                    path: path.to_path_buf(),
                }
            } else {
                StateError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        serde_json::from_slice(&bytes).map_err(|source| StateError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Atomic write: temp sibling + rename, directory flushed on POSIX.
    /// Stamps `last_updated`.
    pub fn save(&mut self, path: &Path) -> Result<(), StateError> {
        let _guard = WRITE_SENTINEL
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.last_updated = Utc::now();
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let io_err = |source| StateError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        let json = serde_json::to_vec(self).map_err(|source| StateError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        #[cfg(unix)]
        {
            if let Ok(dir_file) = std::fs::File::open(dir) {
                let _ = dir_file.sync_all();
            }
        }
        Ok(())
    }

    /// Remove the state file. Already-gone is a silent no-op.
    pub fn delete(path: &Path) -> Result<(), StateError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StateError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// Session id from `CLI_REPLAY_SESSION`; absent means the default session.
pub fn session_from_env() -> String {
    std::env::var(SESSION_ENV).unwrap_or_default()
}

/// State file path for a (scenario, session) pair, in the platform temp
/// directory.
pub fn state_path(scenario_path: &Path, session: &str) -> PathBuf {
    state_path_in(&std::env::temp_dir(), scenario_path, session)
}

pub fn state_path_in(dir: &Path, scenario_path: &Path, session: &str) -> PathBuf {
    let abs = scenario_path
        .canonicalize()
        .unwrap_or_else(|_| scenario_path.to_path_buf());
    let mut hasher = Sha256::new();
    hasher.update(abs.as_os_str().as_encoded_bytes());
    hasher.update([0u8]);
    hasher.update(session.as_bytes());
    let digest = hex::encode(hasher.finalize());
    dir.join(format!("{STATE_FILE_PREFIX}{digest}.json"))
}

/// Outcome of one TTL sweep.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed: usize,
    pub warnings: Vec<String>,
}

/// Remove state files (and their intercept dirs) whose `last_updated` is
/// older than `ttl`. Future timestamps are treated as active and warned
/// about. Concurrent deletion by another process is tolerated.
pub fn cleanup_expired(ttl: Duration) -> CleanupReport {
    cleanup_expired_in(&std::env::temp_dir(), ttl)
}

pub fn cleanup_expired_in(dir: &Path, ttl: Duration) -> CleanupReport {
    let mut report = CleanupReport::default();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return report;
    };
    let now = Utc::now();
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(STATE_FILE_PREFIX) || !name.ends_with(".json") {
            continue;
        }
        let path = entry.path();
        let state = match ReplayState::load(&path) {
            Ok(state) => state,
            // Deleted concurrently, or not ours: leave it alone.
            Err(StateError::Missing { .. }) => continue,
            Err(_) => continue,
        };
        let age = now.signed_duration_since(state.last_updated);
        if age < chrono::Duration::zero() {
            let warning = format!(
                "state file {} has a future last_updated ({}); treating as active",
                path.display(),
                state.last_updated.to_rfc3339()
            );
            tracing::warn!("{warning}");
            report.warnings.push(warning);
            continue;
        }
        if age <= ttl {
            continue;
        }
        if let Some(intercept_dir) = &state.intercept_dir {
            match std::fs::remove_dir_all(intercept_dir) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => report.warnings.push(format!(
                    "could not remove intercept dir {}: {e}",
                    intercept_dir.display()
                )),
            }
        }
        match std::fs::remove_file(&path) {
            Ok(()) => report.removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => report
                .warnings
                .push(format!("could not remove {}: {e}", path.display())),
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(total: usize) -> ReplayState {
        ReplayState::new(PathBuf::from("/tmp/s.yaml"), "deadbeef".into(), total)
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = sample(3);
        state.step_counts = vec![1, 3, 0];
        state.current_step = 2;
        state
            .captures
            .insert("rg_id".into(), "/subs/abc/rg/demo".into());
        state.save(&path).unwrap();

        let loaded = ReplayState::load(&path).unwrap();
        assert_eq!(loaded.step_counts, vec![1, 3, 0]);
        assert_eq!(loaded.current_step, 2);
        assert_eq!(loaded.captures["rg_id"], "/subs/abc/rg/demo");
        assert_eq!(loaded.total_steps, 3);
    }

    #[test]
    fn legacy_consumed_steps_migrates_to_counts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let legacy = serde_json::json!({
            "scenario_path": "/tmp/s.yaml",
            "scenario_hash": "deadbeef",
            "current_step": 1,
            "total_steps": 3,
            "consumed_steps": [true, false, true],
            "last_updated": "2026-01-01T00:00:00Z",
        });
        std::fs::write(&path, legacy.to_string()).unwrap();

        let mut state = ReplayState::load(&path).unwrap();
        assert_eq!(state.step_counts, vec![1, 0, 1]);

        // Writing back emits step_counts only.
        state.save(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("step_counts"));
        assert!(!text.contains("consumed_steps"));
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = sample(1);
        state.save(&path).unwrap();
        ReplayState::delete(&path).unwrap();
        ReplayState::delete(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn missing_state_is_a_distinct_error() {
        let err = ReplayState::load(Path::new("/nonexistent/state.json")).unwrap_err();
        assert!(matches!(err, StateError::Missing { .. }));
    }

    #[test]
    fn distinct_sessions_have_distinct_paths() {
        let dir = tempdir().unwrap();
        let scenario = Path::new("/tmp/s.yaml");
        let a = state_path_in(dir.path(), scenario, "session-a");
        let b = state_path_in(dir.path(), scenario, "session-b");
        let default = state_path_in(dir.path(), scenario, "");
        assert_ne!(a, b);
        assert_ne!(a, default);
    }

    #[test]
    fn ttl_sweep_removes_stale_and_keeps_fresh() {
        let dir = tempdir().unwrap();
        let scenario = Path::new("/tmp/s.yaml");

        let stale_path = state_path_in(dir.path(), scenario, "stale");
        let mut stale = sample(1);
        stale.save(&stale_path).unwrap();
        // Age it by rewriting with an old timestamp.
        let mut doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&stale_path).unwrap()).unwrap();
        doc["last_updated"] = serde_json::json!("2020-01-01T00:00:00Z");
        std::fs::write(&stale_path, doc.to_string()).unwrap();

        let fresh_path = state_path_in(dir.path(), scenario, "fresh");
        sample(1).save(&fresh_path).unwrap();

        let report = cleanup_expired_in(dir.path(), Duration::from_secs(3600));
        assert_eq!(report.removed, 1);
        assert!(!stale_path.exists());
        assert!(fresh_path.exists());
    }

    #[test]
    fn ttl_sweep_warns_on_future_timestamp() {
        let dir = tempdir().unwrap();
        let path = state_path_in(dir.path(), Path::new("/tmp/s.yaml"), "skewed");
        let mut state = sample(1);
        state.save(&path).unwrap();
        let mut doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        doc["last_updated"] = serde_json::json!("2099-01-01T00:00:00Z");
        std::fs::write(&path, doc.to_string()).unwrap();

        let report = cleanup_expired_in(dir.path(), Duration::from_secs(1));
        assert_eq!(report.removed, 0);
        assert!(path.exists());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("future"));
    }

    #[test]
    fn ttl_sweep_removes_intercept_dir_with_state() {
        let dir = tempdir().unwrap();
        let intercept = dir.path().join("intercept-x");
        std::fs::create_dir(&intercept).unwrap();
        let path = state_path_in(dir.path(), Path::new("/tmp/s.yaml"), "x");
        let mut state = sample(1);
        state.intercept_dir = Some(intercept.clone());
        state.save(&path).unwrap();
        let mut doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        doc["last_updated"] = serde_json::json!("2020-01-01T00:00:00Z");
        std::fs::write(&path, doc.to_string()).unwrap();

        let report = cleanup_expired_in(dir.path(), Duration::from_secs(60));
        assert_eq!(report.removed, 1);
        assert!(!intercept.exists());
    }
}
