//! `exec` subcommand: single-command lifecycle.
//!
//! Load and validate, create the intercept session, spawn the child with
//! PATH and control variables injected, forward signals to the child's
//! process group, wait, verify, and tear down. The child's exit code
//! dominates; a verification shortfall only surfaces as exit 1 when the
//! child itself succeeded.

use crate::cli::args::{ExecArgs, ReportFormat};
use crate::exit_codes;
use crate::session::{self, CleanupGuard, SessionSetup};
use cli_replay_core::report;
use cli_replay_core::scenario::Scenario;
use cli_replay_core::state::ReplayState;
use cli_replay_core::verify::{build_result, error_result};
use std::process::{ExitStatus, Stdio};

pub async fn run(args: ExecArgs) -> anyhow::Result<i32> {
    // Load failures exit before any side effect.
    let scenario = match Scenario::load_file(&args.scenario) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("cli-replay: {e}");
            return Ok(exit_codes::FAILURE);
        }
    };
    if let Err(e) = scenario.check_allowlist(args.allowed_commands.as_deref()) {
        eprintln!("cli-replay: {e}");
        return Ok(exit_codes::FAILURE);
    }

    let scenario_abs = args
        .scenario
        .canonicalize()
        .unwrap_or_else(|_| args.scenario.clone());

    if args.dry_run {
        println!(
            "cli-replay: would intercept [{}] and run: {}",
            scenario.intercepted_commands().join(", "),
            args.command.join(" ")
        );
        return Ok(exit_codes::SUCCESS);
    }

    session::sweep_expired(&scenario);
    let setup = session::initialise(&scenario, &scenario_abs)?;
    let guard = CleanupGuard::new(&setup);

    let mut child = match spawn_child(&args.command, &setup, &scenario_abs) {
        Ok(child) => child,
        Err(e) => {
            let code = match e.kind() {
                std::io::ErrorKind::NotFound => exit_codes::NOT_FOUND,
                _ => exit_codes::NOT_EXECUTABLE,
            };
            eprintln!("cli-replay: cannot execute '{}': {e}", args.command[0]);
            guard.run();
            return Ok(code);
        }
    };
    let pgid = child.id().unwrap_or(0);

    let status = wait_with_signals(&mut child, pgid).await?;
    let child_code = exit_code_of(status);

    // Verification reads the state before cleanup deletes it.
    let passed = emit_report(&scenario, &setup, &args)?;

    // Reap any stragglers the child left in its group, then tear down.
    #[cfg(unix)]
    if pgid != 0 {
        cli_replay_core::platform::terminate_process_group(pgid);
    }
    guard.run();

    if child_code != 0 {
        if !passed {
            eprintln!("cli-replay: verification failed (child already exited non-zero)");
        }
        return Ok(child_code);
    }
    Ok(if passed {
        exit_codes::SUCCESS
    } else {
        exit_codes::FAILURE
    })
}

fn spawn_child(
    command: &[String],
    setup: &SessionSetup,
    scenario_abs: &std::path::Path,
) -> std::io::Result<tokio::process::Child> {
    let mut cmd = std::process::Command::new(&command[0]);
    cmd.args(&command[1..]);

    let old_path = std::env::var_os("PATH").unwrap_or_default();
    let new_path = std::env::join_paths(
        std::iter::once(setup.intercept_dir.clone()).chain(std::env::split_paths(&old_path)),
    )
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    cmd.env("PATH", new_path)
        .env("CLI_REPLAY_SESSION", &setup.session_id)
        .env("CLI_REPLAY_SCENARIO", scenario_abs)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    // The child leads a fresh process group so signals reach the whole
    // tree it spawns.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    tokio::process::Command::from(cmd).spawn()
}

#[cfg(unix)]
async fn wait_with_signals(
    child: &mut tokio::process::Child,
    pgid: u32,
) -> std::io::Result<ExitStatus> {
    use cli_replay_core::platform::kill_process_group;
    use nix::sys::signal::Signal;
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    loop {
        tokio::select! {
            status = child.wait() => return status,
            _ = sigint.recv() => kill_process_group(pgid, Signal::SIGINT),
            _ = sigterm.recv() => kill_process_group(pgid, Signal::SIGTERM),
        }
    }
}

#[cfg(not(unix))]
async fn wait_with_signals(
    child: &mut tokio::process::Child,
    _pgid: u32,
) -> std::io::Result<ExitStatus> {
    loop {
        tokio::select! {
            status = child.wait() => return status,
            _ = tokio::signal::ctrl_c() => {
                // No job object on this path: only the direct child can be
                // addressed; grandchildren may leak.
                let _ = child.start_kill();
            }
        }
    }
}

fn exit_code_of(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return exit_codes::SIGNAL_BASE + signal;
        }
    }
    exit_codes::FAILURE
}

/// Emit the verification report; returns whether the scenario passed.
fn emit_report(scenario: &Scenario, setup: &SessionSetup, args: &ExecArgs) -> anyhow::Result<bool> {
    let result = match ReplayState::load(&setup.state_path) {
        Ok(replay_state) => build_result(scenario, &replay_state, &setup.session_id),
        Err(e) => error_result(scenario.name(), &setup.session_id, e.to_string()),
    };

    eprint!("{}", report::console::render(&result));

    if let Some(format) = args.format {
        let scenario_path = args.scenario.display().to_string();
        let text = match format {
            ReportFormat::Json => format!("{}\n", report::json::render(&result)),
            ReportFormat::Junit => report::junit::render(&result, &scenario_path),
        };
        match &args.report_file {
            Some(path) => std::fs::write(path, text)?,
            None => print!("{text}"),
        }
    }
    Ok(result.passed)
}
