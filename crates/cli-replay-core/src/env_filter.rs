//! Scenario variable merging with environment overrides.
//!
//! `meta.vars` values can be overridden by same-named process environment
//! variables, so one scenario can run against different clusters or
//! subscriptions without editing YAML. `security.deny_env_vars` blocks that
//! override channel for sensitive keys with `*` glob patterns. The replay
//! control variables are always exempt; they are never treated as scenario
//! overrides.

use globset::Glob;
use std::collections::BTreeMap;

/// Control variables owned by cli-replay itself. Deny patterns never apply
/// to these names.
pub const INTERNAL_CONTROL_VARS: &[&str] = &[
    "CLI_REPLAY_SESSION",
    "CLI_REPLAY_SCENARIO",
    "CLI_REPLAY_RECORDING_LOG",
    "CLI_REPLAY_SHIM_DIR",
    "CLI_REPLAY_TRACE",
];

/// True when per-call trace diagnostics are enabled.
pub fn trace_enabled() -> bool {
    std::env::var("CLI_REPLAY_TRACE").ok().as_deref() == Some("1")
}

fn matches_any(key: &str, patterns: &[String]) -> bool {
    for pattern in patterns {
        // Invalid patterns are skipped (fail-open).
        let Ok(glob) = Glob::new(pattern) else {
            continue;
        };
        if glob.compile_matcher().is_match(key) {
            return true;
        }
    }
    false
}

/// Merge scenario vars with environment overrides under a deny-list.
///
/// For every key in `vars`, a same-named environment variable overrides the
/// scenario value unless the key matches a deny pattern. Keys without an
/// environment override always keep their scenario value. Environment
/// variables that do not correspond to a scenario key are ignored entirely.
pub fn merge_vars_filtered(
    vars: &BTreeMap<String, String>,
    deny_patterns: &[String],
) -> BTreeMap<String, String> {
    let mut merged = vars.clone();
    let trace = trace_enabled();
    for (key, value) in merged.iter_mut() {
        let Ok(env_value) = std::env::var(key) else {
            continue;
        };
        let exempt = INTERNAL_CONTROL_VARS.contains(&key.as_str());
        if !exempt && matches_any(key, deny_patterns) {
            if trace {
                eprintln!("cli-replay[trace]: denied env var {key}");
            }
            continue;
        }
        *value = env_value;
    }
    merged
}
