//! Human-readable verification summary (stderr).

use crate::verify::VerifyResult;

pub fn render(result: &VerifyResult) -> String {
    let mut out = String::new();
    let verdict = if result.passed { "PASSED" } else { "FAILED" };
    let session = if result.session.is_empty() {
        String::new()
    } else {
        format!(" (session {})", result.session)
    };
    out.push_str(&format!(
        "scenario '{}'{session}: {verdict}, {}/{} steps consumed\n",
        result.scenario, result.consumed_steps, result.total_steps
    ));
    if let Some(error) = &result.error {
        out.push_str(&format!("  error: {error}\n"));
        return out;
    }
    for step in &result.steps {
        let mark = if step.passed { "✓" } else { "✗" };
        out.push_str(&format!(
            "  {mark} step {}: {} (called {} of {}..{})",
            step.index + 1,
            step.label,
            step.call_count,
            step.min,
            step.max
        ));
        if !step.passed {
            out.push_str(&format!(
                ": called {} times, minimum {} required",
                step.call_count, step.min
            ));
        }
        out.push('\n');
    }
    out
}
