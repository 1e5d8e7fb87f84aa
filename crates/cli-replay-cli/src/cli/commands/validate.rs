//! `validate` subcommand: load and check scenario files without touching
//! any state. Also verifies that response file paths exist, which load-time
//! validation deliberately skips.

use crate::cli::args::{ValidateArgs, ValidateFormat};
use crate::exit_codes;
use cli_replay_core::scenario::Scenario;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct FileResult {
    file: String,
    valid: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
}

pub fn run(args: ValidateArgs) -> anyhow::Result<i32> {
    let mut results = Vec::with_capacity(args.files.len());
    for file in &args.files {
        let mut errors = Vec::new();
        match Scenario::load_file(file) {
            Ok(scenario) => errors.extend(scenario.check_response_files()),
            Err(e) => errors.push(e.to_string()),
        }
        results.push(FileResult {
            file: file.display().to_string(),
            valid: errors.is_empty(),
            errors,
        });
    }

    let all_valid = results.iter().all(|r| r.valid);
    match args.format {
        ValidateFormat::Text => {
            for result in &results {
                if result.valid {
                    println!("{}: OK", result.file);
                } else {
                    println!("{}: INVALID", result.file);
                    for error in &result.errors {
                        println!("  {error}");
                    }
                }
            }
        }
        ValidateFormat::Json => {
            println!("{}", serde_json::to_string(&results)?);
        }
    }

    Ok(if all_valid {
        exit_codes::SUCCESS
    } else {
        exit_codes::FAILURE
    })
}
