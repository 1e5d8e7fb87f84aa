//! `verify` subcommand: report a session's progress against its scenario.

use crate::cli::args::{VerifyArgs, VerifyFormat};
use crate::exit_codes;
use cli_replay_core::report;
use cli_replay_core::scenario::Scenario;
use cli_replay_core::state::{self, ReplayState, StateError};
use cli_replay_core::verify::{build_result, error_result};

pub fn run(args: VerifyArgs) -> anyhow::Result<i32> {
    let scenario = match Scenario::load_file(&args.scenario) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("cli-replay: {e}");
            return Ok(exit_codes::FAILURE);
        }
    };

    let session = args.session.unwrap_or_else(state::session_from_env);
    let path = state::state_path(&args.scenario, &session);
    let result = match ReplayState::load(&path) {
        Ok(replay_state) => build_result(&scenario, &replay_state, &session),
        Err(e @ StateError::Missing { .. }) => {
            error_result(scenario.name(), &session, e.to_string())
        }
        Err(e) => {
            eprintln!("cli-replay: {e}");
            return Ok(exit_codes::FAILURE);
        }
    };

    let scenario_path = args.scenario.display().to_string();
    match args.format {
        VerifyFormat::Text => eprint!("{}", report::console::render(&result)),
        VerifyFormat::Json => println!("{}", report::json::render(&result)),
        VerifyFormat::Junit => print!("{}", report::junit::render(&result, &scenario_path)),
    }

    Ok(if result.passed {
        exit_codes::SUCCESS
    } else {
        exit_codes::FAILURE
    })
}
