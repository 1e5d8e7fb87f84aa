//! Session setup shared by the exec, run, and record subcommands.

use cli_replay_core::platform;
use cli_replay_core::scenario::Scenario;
use cli_replay_core::state::{self, ReplayState};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Unique session id: short hex derived from pid and a clock sample.
pub fn new_session_id() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let seed = format!("{}:{nanos}", std::process::id());
    hex::encode(Sha256::digest(seed.as_bytes()))[..16].to_string()
}

/// Everything a live session owns on disk.
pub struct SessionSetup {
    pub session_id: String,
    pub intercept_dir: PathBuf,
    pub state_path: PathBuf,
}

/// Create the intercept directory, one entry per intercepted command, and
/// the initial state file.
pub fn initialise(
    scenario: &Scenario,
    scenario_path: &Path,
) -> anyhow::Result<SessionSetup> {
    let session_id = new_session_id();
    let intercept_dir = platform::create_intercept_dir(&session_id)?;
    let self_exe = std::env::current_exe()?;
    for command in scenario.intercepted_commands() {
        platform::create_intercept_entry(&intercept_dir, &command, &self_exe)?;
    }

    let state_path = state::state_path(scenario_path, &session_id);
    let mut replay_state = ReplayState::new(
        scenario_path.to_path_buf(),
        scenario.content_hash.clone(),
        scenario.flat_steps().len(),
    );
    replay_state.intercept_dir = Some(intercept_dir.clone());
    replay_state.save(&state_path)?;

    Ok(SessionSetup {
        session_id,
        intercept_dir,
        state_path,
    })
}

/// Run the TTL sweep when the scenario declares one. Afterwards a fresh
/// session initialises; expiry never aborts the operation.
pub fn sweep_expired(scenario: &Scenario) {
    if let Some(ttl) = scenario.session_ttl() {
        let report = state::cleanup_expired(ttl);
        for warning in &report.warnings {
            eprintln!("cli-replay: warning: {warning}");
        }
        if report.removed > 0 {
            tracing::info!("removed {} expired session(s)", report.removed);
        }
    }
}

/// Idempotent teardown of a session's on-disk resources. The sentinel makes
/// the normal-exit and signal paths safe to run in either order.
pub struct CleanupGuard {
    state_path: PathBuf,
    intercept_dir: PathBuf,
    done: std::sync::atomic::AtomicBool,
}

impl CleanupGuard {
    pub fn new(setup: &SessionSetup) -> Self {
        Self {
            state_path: setup.state_path.clone(),
            intercept_dir: setup.intercept_dir.clone(),
            done: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Best-effort: individual failures are reported but never escalate.
    pub fn run(&self) {
        if self.done.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        if let Err(e) = ReplayState::delete(&self.state_path) {
            eprintln!("cli-replay: warning: {e}");
        }
        match std::fs::remove_dir_all(&self.intercept_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => eprintln!(
                "cli-replay: warning: could not remove intercept dir {}: {e}",
                self.intercept_dir.display()
            ),
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique_hex() {
        let a = new_session_id();
        let b = new_session_id();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn cleanup_guard_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("state.json");
        let intercept = dir.path().join("intercept");
        std::fs::create_dir(&intercept).unwrap();
        std::fs::write(&state_path, "{}").unwrap();
        let setup = SessionSetup {
            session_id: "x".into(),
            intercept_dir: intercept.clone(),
            state_path: state_path.clone(),
        };
        let guard = CleanupGuard::new(&setup);
        guard.run();
        assert!(!state_path.exists());
        assert!(!intercept.exists());
        // Second run (and the Drop backstop) is a no-op.
        guard.run();
    }
}
