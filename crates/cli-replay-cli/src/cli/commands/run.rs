//! `run` subcommand: set up a session and print eval-style shell code.
//!
//! Usage pattern: `eval "$(cli-replay run scenario.yaml)"`. For bash-family
//! shells the emitted code installs a sentinel-guarded cleanup trap on
//! `EXIT INT TERM`; PowerShell and cmd have no trap equivalent, so their
//! output tells the user to clean explicitly.

use crate::cli::args::{RunArgs, ShellKind};
use crate::exit_codes;
use crate::session;
use cli_replay_core::scenario::Scenario;

pub fn run(args: RunArgs) -> anyhow::Result<i32> {
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
        eprintln!(
            "cli-replay: would intercept [{}] for scenario '{}'",
            scenario.intercepted_commands().join(", "),
            scenario.name()
        );
        return Ok(exit_codes::SUCCESS);
    }

    session::sweep_expired(&scenario);
    let setup = session::initialise(&scenario, &scenario_abs)?;

    let dir = setup.intercept_dir.display();
    let scen = scenario_abs.display();
    let sess = &setup.session_id;
    let self_exe = std::env::current_exe()?;
    let exe = self_exe.display();
    match args.shell {
        ShellKind::Bash => {
            println!("export PATH=\"{dir}:$PATH\"");
            println!("export CLI_REPLAY_SCENARIO=\"{scen}\"");
            println!("export CLI_REPLAY_SESSION=\"{sess}\"");
            println!("_cli_replay_cleaned=0");
            println!("_cli_replay_clean() {{");
            println!("  if [ \"$_cli_replay_cleaned\" = \"1\" ]; then return 0; fi");
            println!("  _cli_replay_cleaned=1");
            println!(
                "  CLI_REPLAY_SESSION=\"{sess}\" command \"{exe}\" clean \"{scen}\" || true"
            );
            println!("}}");
            println!("trap _cli_replay_clean EXIT INT TERM");
        }
        ShellKind::Powershell => {
            println!("$env:PATH = \"{dir};$env:PATH\"");
            println!("$env:CLI_REPLAY_SCENARIO = \"{scen}\"");
            println!("$env:CLI_REPLAY_SESSION = \"{sess}\"");
            println!("# PowerShell has no EXIT trap; run 'cli-replay clean \"{scen}\"' when done");
        }
        ShellKind::Cmd => {
            println!("set \"PATH={dir};%PATH%\"");
            println!("set \"CLI_REPLAY_SCENARIO={scen}\"");
            println!("set \"CLI_REPLAY_SESSION={sess}\"");
            println!("rem cmd has no EXIT trap; run 'cli-replay clean \"{scen}\"' when done");
        }
    }
    Ok(exit_codes::SUCCESS)
}
