//! `record` subcommand: run a command with recording shims on PATH, then
//! fold the JSONL log into scenario YAML.
//!
//! The shims are the same dual-mode binary: with `CLI_REPLAY_RECORDING_LOG`
//! set, an intercepted call resolves the real tool (excluding the shim
//! directory), runs it, mirrors its output, and appends a log entry.

use crate::cli::args::RecordArgs;
use crate::exit_codes;
use crate::session;
use cli_replay_core::platform;
use cli_replay_core::recording;
use std::process::Stdio;

pub async fn run(args: RecordArgs) -> anyhow::Result<i32> {
    let session_id = session::new_session_id();
    let shim_dir = platform::create_intercept_dir(&format!("record-{session_id}"))?;
    let log_path = shim_dir.join("recording.jsonl");

    let self_exe = std::env::current_exe()?;
    for command in &args.commands {
        platform::create_intercept_entry(&shim_dir, command, &self_exe)?;
    }

    let old_path = std::env::var_os("PATH").unwrap_or_default();
    let new_path = std::env::join_paths(
        std::iter::once(shim_dir.clone()).chain(std::env::split_paths(&old_path)),
    )?;

    let mut cmd = tokio::process::Command::new(&args.child[0]);
    cmd.args(&args.child[1..])
        .env("PATH", new_path)
        .env("CLI_REPLAY_RECORDING_LOG", &log_path)
        .env("CLI_REPLAY_SHIM_DIR", &shim_dir)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    let status = match cmd.spawn() {
        Ok(mut child) => child.wait().await?,
        Err(e) => {
            eprintln!("cli-replay: cannot execute '{}': {e}", args.child[0]);
            let _ = std::fs::remove_dir_all(&shim_dir);
            return Ok(match e.kind() {
                std::io::ErrorKind::NotFound => exit_codes::NOT_FOUND,
                _ => exit_codes::NOT_EXECUTABLE,
            });
        }
    };
    let child_code = status.code().unwrap_or(exit_codes::FAILURE);

    let entries = if log_path.exists() {
        recording::read_log(&log_path)?
    } else {
        Vec::new()
    };
    let name = args.name.as_deref().unwrap_or("recorded");
    let doc = recording::synthesize(&entries, name, args.description.as_deref());
    let yaml = serde_yaml::to_string(&doc)?;
    std::fs::write(&args.output, yaml)?;
    eprintln!(
        "cli-replay: recorded {} call(s) into {}",
        entries.len(),
        args.output.display()
    );

    let _ = std::fs::remove_dir_all(&shim_dir);
    Ok(child_code)
}
