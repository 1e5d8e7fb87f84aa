//! `clean` subcommand: remove session state and intercept directories.
//!
//! Without `--recursive` the target is a scenario file and the clean is an
//! idempotent no-op when nothing exists. With `--recursive` the target is a
//! tree root; every directory in it is swept with the mandatory `--ttl`.

use crate::cli::args::CleanArgs;
use crate::exit_codes;
use cli_replay_core::state::{self, ReplayState, StateError};

pub fn run(args: CleanArgs) -> anyhow::Result<i32> {
    if args.recursive {
        let Some(ttl) = &args.ttl else {
            eprintln!("cli-replay: --recursive requires --ttl");
            return Ok(exit_codes::FAILURE);
        };
        let ttl = match humantime::parse_duration(ttl) {
            Ok(d) => d,
            Err(e) => {
                eprintln!("cli-replay: invalid --ttl '{ttl}': {e}");
                return Ok(exit_codes::FAILURE);
            }
        };
        let mut removed = 0usize;
        let mut stack = vec![args.target.clone()];
        while let Some(dir) = stack.pop() {
            let report = state::cleanup_expired_in(&dir, ttl);
            removed += report.removed;
            for warning in report.warnings {
                eprintln!("cli-replay: warning: {warning}");
            }
            if let Ok(entries) = std::fs::read_dir(&dir) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.is_dir() {
                        stack.push(path);
                    }
                }
            }
        }
        if removed > 0 {
            eprintln!("cli-replay: removed {removed} expired session(s)");
        }
        return Ok(exit_codes::SUCCESS);
    }

    // Single-scenario clean of the current/default session.
    let session = state::session_from_env();
    let path = state::state_path(&args.target, &session);
    let ttl = match &args.ttl {
        Some(ttl) => match humantime::parse_duration(ttl) {
            Ok(d) => Some(d),
            Err(e) => {
                eprintln!("cli-replay: invalid --ttl '{ttl}': {e}");
                return Ok(exit_codes::FAILURE);
            }
        },
        None => None,
    };
    match ReplayState::load(&path) {
        Ok(replay_state) => {
            if let Some(ttl) = ttl {
                let age = chrono::Utc::now().signed_duration_since(replay_state.last_updated);
                let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
                if age <= ttl {
                    return Ok(exit_codes::SUCCESS);
                }
            }
            if let Some(intercept_dir) = &replay_state.intercept_dir {
                match std::fs::remove_dir_all(intercept_dir) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => eprintln!(
                        "cli-replay: warning: could not remove intercept dir {}: {e}",
                        intercept_dir.display()
                    ),
                }
            }
            ReplayState::delete(&path)?;
        }
        // Second clean for the same scenario: silent no-op.
        Err(StateError::Missing { .. }) => {}
        Err(e) => {
            eprintln!("cli-replay: warning: {e}");
            let _ = ReplayState::delete(&path);
        }
    }
    Ok(exit_codes::SUCCESS)
}
