//! Per-step completion checks.
//!
//! Verification is a pure function of scenario + state: a step passes when
//! its call count reached the effective minimum. The resulting
//! [`VerifyResult`] feeds all three reporters.

use crate::scenario::Scenario;
use crate::state::ReplayState;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct VerifyResult {
    pub scenario: String,
    pub session: String,
    pub passed: bool,
    pub total_steps: usize,
    pub consumed_steps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub steps: Vec<StepResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub index: usize,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub call_count: u32,
    pub min: u32,
    pub max: u32,
    pub passed: bool,
}

/// Build the verification result for one (scenario, state) pair.
pub fn build_result(scenario: &Scenario, state: &ReplayState, session: &str) -> VerifyResult {
    let flat = scenario.flat_steps();
    let ranges = scenario.group_ranges();
    let mut steps = Vec::with_capacity(flat.len());
    let mut consumed = 0usize;
    let mut all_passed = true;

    for (i, step) in flat.iter().enumerate() {
        let bounds = step.effective_calls();
        let count = state.step_counts.get(i).copied().unwrap_or(0);
        let group = ranges.iter().find(|r| r.contains(i)).map(|r| r.name.clone());
        let label = match &group {
            Some(name) => format!("[group:{name}] {}", step.label()),
            None => step.label(),
        };
        let passed = count >= bounds.min;
        if count >= 1 {
            consumed += 1;
        }
        all_passed &= passed;
        steps.push(StepResult {
            index: i,
            label,
            group,
            call_count: count,
            min: bounds.min,
            max: bounds.max,
            passed,
        });
    }

    VerifyResult {
        scenario: scenario.name().to_string(),
        session: session.to_string(),
        passed: all_passed,
        total_steps: flat.len(),
        consumed_steps: consumed,
        error: None,
        steps,
    }
}

/// Result for a session whose state file is missing or unreadable.
pub fn error_result(scenario_name: &str, session: &str, error: String) -> VerifyResult {
    VerifyResult {
        scenario: scenario_name.to_string(),
        session: session.to_string(),
        passed: false,
        total_steps: 0,
        consumed_steps: 0,
        error: Some(error),
        steps: Vec::new(),
    }
}
