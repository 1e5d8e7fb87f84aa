//! Intercept-mode entry: the binary invoked under a tool's name.
//!
//! A shim or symlink on PATH routes `kubectl ...` here. The scenario comes
//! from `CLI_REPLAY_SCENARIO`, the session (and therefore the state file)
//! from `CLI_REPLAY_SESSION`. With `CLI_REPLAY_RECORDING_LOG` set the same
//! entry point instead wraps the real tool and logs the call.

use crate::exit_codes;
use cli_replay_core::engine::{self, STDIN_CAP};
use cli_replay_core::platform;
use cli_replay_core::recording::{self, LogEntry};
use cli_replay_core::scenario::{base_name, Scenario};
use cli_replay_core::state::{self, ReplayState, StateError};
use std::io::{IsTerminal, Read, Write};
use std::path::PathBuf;

const MANAGEMENT_NAME: &str = "cli-replay";

/// The alias this process was invoked as, when it was not invoked by its
/// own management name. Windows `.cmd` delegators pass the alias through
/// `CLI_REPLAY_ALIAS` because argv[0] is the interpreter there.
pub fn alias_invocation() -> Option<String> {
    if let Ok(alias) = std::env::var("CLI_REPLAY_ALIAS") {
        if !alias.is_empty() {
            return Some(alias);
        }
    }
    let argv0 = std::env::args().next()?;
    let base = base_name(&argv0);
    if base.eq_ignore_ascii_case(MANAGEMENT_NAME) {
        None
    } else {
        Some(base)
    }
}

/// Handle one intercepted invocation. Never returns normally to the caller
/// flow; the result is the process exit code.
pub fn run(alias: &str, args: &[String]) -> i32 {
    if std::env::var_os("CLI_REPLAY_RECORDING_LOG").is_some() {
        return record_wrap(alias, args);
    }

    let Some(scenario_path) = std::env::var_os("CLI_REPLAY_SCENARIO") else {
        eprintln!("cli-replay: intercepted '{alias}' but CLI_REPLAY_SCENARIO is not set");
        return exit_codes::MISMATCH;
    };
    let scenario_path = PathBuf::from(scenario_path);
    let scenario = match Scenario::load_file(&scenario_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("cli-replay: {e}");
            return exit_codes::MISMATCH;
        }
    };

    let mut argv = Vec::with_capacity(args.len() + 1);
    argv.push(alias.to_string());
    argv.extend(args.iter().cloned());

    let stdin = read_stdin_capped();

    let session = state::session_from_env();
    let path = state::state_path(&scenario_path, &session);
    let mut replay_state = match ReplayState::load(&path) {
        Ok(s) => s,
        // No state yet (crash recovery or bare setup): start fresh.
        Err(StateError::Missing { .. }) => ReplayState::new(
            scenario_path.clone(),
            scenario.content_hash.clone(),
            scenario.flat_steps().len(),
        ),
        Err(e) => {
            eprintln!("cli-replay: {e}");
            return exit_codes::MISMATCH;
        }
    };

    let result = engine::replay(&scenario, &mut replay_state, &argv, &stdin);

    // Persist in both paths: a mismatch still records the attempt and
    // keeps prior progress.
    if let Err(e) = replay_state.save(&path) {
        eprintln!("cli-replay: {e}");
        return exit_codes::MISMATCH;
    }

    match result {
        Ok(outcome) => {
            if let Some(delay) = outcome.delay {
                std::thread::sleep(delay);
            }
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(outcome.stdout.as_bytes());
            let _ = stdout.flush();
            let _ = std::io::stderr().write_all(outcome.stderr.as_bytes());
            outcome.exit
        }
        Err(e) => {
            eprintln!("{e}");
            exit_codes::MISMATCH
        }
    }
}

fn read_stdin_capped() -> String {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return String::new();
    }
    let mut buf = Vec::with_capacity(4096);
    let _ = stdin.lock().take(STDIN_CAP as u64).read_to_end(&mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

/// Recording mode: run the real tool, mirror its output, and append a log
/// entry. `CLI_REPLAY_IN_SHIM` guards against a shim resolving to itself.
fn record_wrap(alias: &str, args: &[String]) -> i32 {
    let shim_dir = std::env::var_os("CLI_REPLAY_SHIM_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);

    let Some(real) = platform::resolve_real_command(alias, &shim_dir) else {
        eprintln!("cli-replay: cannot find real '{alias}' on PATH outside the shim directory");
        return exit_codes::NOT_FOUND;
    };
    if std::env::var("CLI_REPLAY_IN_SHIM").ok().as_deref() == Some("1") {
        // Recursive entry: hand off without logging.
        let status = std::process::Command::new(&real).args(args).status();
        return status.ok().and_then(|s| s.code()).unwrap_or(exit_codes::FAILURE);
    }

    let stdin = read_stdin_capped();

    let mut cmd = std::process::Command::new(&real);
    cmd.args(args)
        .env("CLI_REPLAY_IN_SHIM", "1")
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            eprintln!("cli-replay: cannot execute {}: {e}", real.display());
            return exit_codes::NOT_EXECUTABLE;
        }
        Err(e) => {
            eprintln!("cli-replay: cannot execute {}: {e}", real.display());
            return exit_codes::NOT_FOUND;
        }
    };
    if let Some(mut child_stdin) = child.stdin.take() {
        let _ = child_stdin.write_all(stdin.as_bytes());
    }
    let output = match child.wait_with_output() {
        Ok(output) => output,
        Err(e) => {
            eprintln!("cli-replay: failed to wait for {}: {e}", real.display());
            return exit_codes::FAILURE;
        }
    };

    // Mirror the real tool's behaviour to the caller.
    let _ = std::io::stdout().write_all(&output.stdout);
    let _ = std::io::stderr().write_all(&output.stderr);
    let code = output.status.code().unwrap_or(exit_codes::FAILURE);

    if let Some(log_path) = std::env::var_os("CLI_REPLAY_RECORDING_LOG") {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(alias.to_string());
        argv.extend(args.iter().cloned());
        let entry = LogEntry {
            timestamp: chrono::Utc::now(),
            argv,
            exit: code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            stdin: (!stdin.is_empty()).then_some(stdin),
        };
        if let Err(e) = recording::append_entry(&PathBuf::from(log_path), &entry) {
            eprintln!("cli-replay: {e}");
        }
    }
    code
}
