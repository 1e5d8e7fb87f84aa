//! The replay state machine.
//!
//! One engine invocation per intercepted command call. The engine mutates
//! the in-memory [`ReplayState`]; the caller persists it afterwards in both
//! the success and the failure path, so a mismatch still records the
//! attempt and keeps prior progress.

use crate::env_filter::{merge_vars_filtered, trace_enabled};
use crate::matcher::{self, MismatchReport};
use crate::scenario::{GroupRange, Scenario, Step};
use crate::state::ReplayState;
use crate::template::{self, TemplateError};
use std::collections::BTreeMap;
use std::time::Duration;

/// Cap on piped stdin; excess bytes are truncated before matching.
pub const STDIN_CAP: usize = 1024 * 1024;

/// What to write back to the intercepted caller.
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    /// Flat index of the step that matched.
    pub step_index: usize,
    pub stdout: String,
    pub stderr: String,
    pub exit: i32,
    /// Artificial latency to apply before responding.
    pub delay: Option<Duration>,
}

/// An unconsumed candidate listed in a group mismatch.
#[derive(Debug, Clone)]
pub struct GroupCandidate {
    /// 1-based flat step number.
    pub step_number: usize,
    pub argv: Vec<String>,
    pub count: u32,
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("{}", .0.render(matcher::use_color()))]
    Mismatch(MismatchReport),
    #[error(
        "stdin did not match at step {step_number}:\n  expected: {expected:.200}\n  received: {received:.200}"
    )]
    StdinMismatch {
        step_number: usize,
        expected: String,
        received: String,
    },
    #[error("no step in group '{group}' matched; unconsumed candidates:\n{}",
        .candidates.iter().map(|c| format!(
            "  step {}: {} (called {} of {}..{})",
            c.step_number, c.argv.join(" "), c.count, c.min, c.max
        )).collect::<Vec<_>>().join("\n"))]
    GroupMismatch {
        group: String,
        candidates: Vec<GroupCandidate>,
    },
    #[error("all scenario steps are exhausted; unexpected command: {}", .received.join(" "))]
    Exhausted { received: Vec<String> },
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
    #[error("failed to read response file {path}: {source}")]
    ResponseFile {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Normalize piped stdin for comparison: CRLF to LF, then strip one
/// trailing newline.
pub fn normalize_stdin(input: &str) -> String {
    let unified = input.replace("\r\n", "\n");
    unified
        .strip_suffix('\n')
        .map(|s| s.to_string())
        .unwrap_or(unified)
}

/// Run one intercepted invocation against the scenario.
pub fn replay(
    scenario: &Scenario,
    state: &mut ReplayState,
    argv: &[String],
    stdin: &str,
) -> Result<ReplayOutcome, ReplayError> {
    let flat = scenario.flat_steps();
    let n = flat.len();
    let vars = merge_vars_filtered(&scenario.doc.meta.vars, scenario.deny_env_vars());
    let ranges = scenario.group_ranges();

    loop {
        // Fast-forward past exhausted steps. After crash recovery a step can
        // legitimately be at budget without the pointer having moved.
        while state.current_step < n
            && state.step_counts[state.current_step] >= flat[state.current_step].effective_calls().max
        {
            state.current_step += 1;
        }
        if state.current_step >= n {
            return Err(ReplayError::Exhausted {
                received: argv.to_vec(),
            });
        }

        let group = ranges
            .iter()
            .enumerate()
            .find(|(_, r)| r.contains(state.current_step));

        match group {
            Some((group_index, range)) => {
                state.active_group = Some(group_index);
                match replay_in_group(scenario, state, &flat, range, argv, stdin, &vars)? {
                    GroupStep::Matched(outcome) => return Ok(outcome),
                    GroupStep::BarrierLifted => {
                        // All minimums met and nothing matched: lift the
                        // barrier and retry past the group.
                        state.current_step = range.end;
                        state.active_group = None;
                        continue;
                    }
                }
            }
            None => {
                state.active_group = None;
                return replay_ordered(scenario, state, &flat, &ranges, argv, stdin, &vars);
            }
        }
    }
}

enum GroupStep {
    Matched(ReplayOutcome),
    BarrierLifted,
}

#[allow(clippy::too_many_arguments)]
fn replay_in_group(
    scenario: &Scenario,
    state: &mut ReplayState,
    flat: &[&Step],
    range: &GroupRange,
    argv: &[String],
    stdin: &str,
    vars: &BTreeMap<String, String>,
) -> Result<GroupStep, ReplayError> {
    // Declaration order scan; first match wins.
    for i in range.start..range.end {
        let step = flat[i];
        if state.step_counts[i] >= step.effective_calls().max {
            continue;
        }
        if !matcher::argv_match(&step.r#match.argv, argv, vars)? {
            continue;
        }
        check_stdin(step, i, stdin)?;
        state.step_counts[i] += 1;
        // Group is exhausted once every member hits its max.
        let exhausted = (range.start..range.end)
            .all(|j| state.step_counts[j] >= flat[j].effective_calls().max);
        if exhausted {
            state.current_step = range.end;
            state.active_group = None;
        }
        return Ok(GroupStep::Matched(finish_match(scenario, state, flat, i, argv, vars)?));
    }

    let all_mins_met =
        (range.start..range.end).all(|j| state.step_counts[j] >= flat[j].effective_calls().min);
    if all_mins_met {
        return Ok(GroupStep::BarrierLifted);
    }

    let candidates = (range.start..range.end)
        .filter(|&j| state.step_counts[j] < flat[j].effective_calls().max)
        .map(|j| {
            let bounds = flat[j].effective_calls();
            GroupCandidate {
                step_number: j + 1,
                argv: flat[j].r#match.argv.clone(),
                count: state.step_counts[j],
                min: bounds.min,
                max: bounds.max,
            }
        })
        .collect();
    Err(ReplayError::GroupMismatch {
        group: range.name.clone(),
        candidates,
    })
}

#[allow(clippy::too_many_arguments)]
fn replay_ordered(
    scenario: &Scenario,
    state: &mut ReplayState,
    flat: &[&Step],
    ranges: &[GroupRange],
    argv: &[String],
    stdin: &str,
    vars: &BTreeMap<String, String>,
) -> Result<ReplayOutcome, ReplayError> {
    let current = state.current_step;
    let step = flat[current];

    check_stdin(step, current, stdin)?;

    if matcher::argv_match(&step.r#match.argv, argv, vars)? {
        state.step_counts[current] += 1;
        if state.step_counts[current] >= step.effective_calls().max {
            state.current_step += 1;
        }
        return finish_match(scenario, state, flat, current, argv, vars);
    }

    let bounds = step.effective_calls();
    if state.step_counts[current] < bounds.min {
        // Hard mismatch: the current step's minimum is unmet.
        return Err(ReplayError::Mismatch(MismatchReport {
            scenario: scenario.name().to_string(),
            received: argv.to_vec(),
            attempts: vec![MismatchReport::attempt(
                argv,
                current + 1,
                &step.r#match.argv,
                vars,
            )],
            soft_advanced: false,
        }));
    }

    // Soft advance: the current step has met its minimum, so the very next
    // step is tried once. Single-step only; scanning further would be
    // confusing.
    let next = current + 1;
    if next < flat.len() && !ranges.iter().any(|r| r.contains(next)) {
        let next_step = flat[next];
        let stdin_ok = match &next_step.r#match.stdin {
            Some(expected) => normalize_stdin(expected) == normalize_stdin(stdin),
            None => true,
        };
        if stdin_ok && matcher::argv_match(&next_step.r#match.argv, argv, vars)? {
            state.current_step = next;
            state.step_counts[next] += 1;
            if state.step_counts[next] >= next_step.effective_calls().max {
                state.current_step += 1;
            }
            return finish_match(scenario, state, flat, next, argv, vars);
        }
        return Err(ReplayError::Mismatch(MismatchReport {
            scenario: scenario.name().to_string(),
            received: argv.to_vec(),
            attempts: vec![
                MismatchReport::attempt(argv, current + 1, &step.r#match.argv, vars),
                MismatchReport::attempt(argv, next + 1, &next_step.r#match.argv, vars),
            ],
            soft_advanced: true,
        }));
    }

    Err(ReplayError::Mismatch(MismatchReport {
        scenario: scenario.name().to_string(),
        received: argv.to_vec(),
        attempts: vec![MismatchReport::attempt(
            argv,
            current + 1,
            &step.r#match.argv,
            vars,
        )],
        soft_advanced: false,
    }))
}

fn check_stdin(step: &Step, flat_index: usize, stdin: &str) -> Result<(), ReplayError> {
    if let Some(expected) = &step.r#match.stdin {
        let expected_norm = normalize_stdin(expected);
        let received_norm = normalize_stdin(stdin);
        if expected_norm != received_norm {
            return Err(ReplayError::StdinMismatch {
                step_number: flat_index + 1,
                expected: expected_norm,
                received: received_norm,
            });
        }
    }
    Ok(())
}

fn finish_match(
    scenario: &Scenario,
    state: &mut ReplayState,
    flat: &[&Step],
    index: usize,
    argv: &[String],
    vars: &BTreeMap<String, String>,
) -> Result<ReplayOutcome, ReplayError> {
    let step = flat[index];
    let respond = &step.respond;

    let stdout = render_channel(scenario, &respond.stdout, &respond.stdout_file, state, vars)?;
    let stderr = render_channel(scenario, &respond.stderr, &respond.stderr_file, state, vars)?;

    let delay = respond
        .delay
        .as_deref()
        .and_then(|d| humantime::parse_duration(d).ok());

    // Captures merge only after rendering, so a step never sees its own.
    for (id, value) in &respond.capture {
        state.captures.insert(id.clone(), value.clone());
    }

    if trace_enabled() {
        eprintln!(
            "[cli-replay] step={index} argv={argv:?} exit={}",
            respond.exit
        );
    }

    Ok(ReplayOutcome {
        step_index: index,
        stdout,
        stderr,
        exit: respond.exit,
        delay,
    })
}

fn render_channel(
    scenario: &Scenario,
    inline: &Option<String>,
    file: &Option<std::path::PathBuf>,
    state: &ReplayState,
    vars: &BTreeMap<String, String>,
) -> Result<String, ReplayError> {
    let text = match (inline, file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => {
            let resolved = if path.is_absolute() {
                path.clone()
            } else {
                scenario
                    .source_path
                    .as_deref()
                    .and_then(|p| p.parent())
                    .map(|dir| dir.join(path))
                    .unwrap_or_else(|| path.clone())
            };
            std::fs::read_to_string(&resolved).map_err(|source| ReplayError::ResponseFile {
                path: resolved,
                source,
            })?
        }
        (None, None) => return Ok(String::new()),
    };
    Ok(template::render_with_captures(&text, vars, &state.captures)?)
}
