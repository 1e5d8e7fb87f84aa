//! JUnit XML verification output (stdout).
//!
//! Shape: `<testsuites name="cli-replay">` wrapping one `<testsuite>` per
//! scenario, one `<testcase>` per flat step. Unmet steps carry a
//! `<failure type="VerificationFailure">`; optional steps that were never
//! called carry `<skipped/>`; a missing state file becomes a single
//! `<failure type="StateError">`.

use crate::verify::VerifyResult;
use chrono::Utc;

pub fn render(result: &VerifyResult, scenario_path: &str) -> String {
    let failures = if result.error.is_some() {
        1
    } else {
        result.steps.iter().filter(|s| !s.passed).count()
    };
    let tests = if result.error.is_some() {
        1
    } else {
        result.total_steps
    };

    let mut xml = String::new();
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push('\n');
    xml.push_str(&format!(
        r#"<testsuites name="cli-replay" tests="{tests}" failures="{failures}" errors="0" time="0.000">"#
    ));
    xml.push('\n');
    xml.push_str(&format!(
        r#"  <testsuite name="{}" tests="{tests}" failures="{failures}" errors="0" timestamp="{}">"#,
        escape(&result.scenario),
        Utc::now().format("%Y-%m-%dT%H:%M:%S"),
    ));
    xml.push('\n');

    if let Some(error) = &result.error {
        xml.push_str(&format!(
            r#"    <testcase name="state" classname="{}" time="0.000"><failure message="{}" type="StateError"/></testcase>"#,
            escape(scenario_path),
            escape(error),
        ));
        xml.push('\n');
    } else {
        for step in &result.steps {
            xml.push_str(&format!(
                r#"    <testcase name="step[{}]: {}" classname="{}" time="0.000">"#,
                step.index,
                escape(&step.label),
                escape(scenario_path),
            ));
            if !step.passed {
                xml.push_str(&format!(
                    r#"<failure message="called {} times, minimum {} required" type="VerificationFailure"/>"#,
                    step.call_count, step.min
                ));
            } else if step.min == 0 && step.call_count == 0 {
                xml.push_str(r#"<skipped/>"#);
            }
            xml.push_str("</testcase>\n");
        }
    }

    xml.push_str("  </testsuite>\n");
    xml.push_str("</testsuites>\n");
    xml
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::Scenario;
    use crate::state::ReplayState;
    use crate::verify::{build_result, error_result};
    use std::path::PathBuf;

    #[test]
    fn incomplete_scenario_reports_failures() {
        let yaml = r#"
meta: {name: partial}
steps:
  - match: {argv: [a]}
  - match: {argv: [b]}
  - match: {argv: [c]}
  - match: {argv: [d]}
"#;
        let s = Scenario::from_yaml_str(yaml).unwrap();
        let mut state = ReplayState::new(PathBuf::from("/tmp/s.yaml"), s.content_hash.clone(), 4);
        state.step_counts = vec![1, 0, 1, 0];
        let xml = render(&build_result(&s, &state, ""), "scenarios/partial.yaml");
        assert!(xml.contains(r#"tests="4""#), "{xml}");
        assert!(xml.contains(r#"failures="2""#), "{xml}");
        assert_eq!(
            xml.matches(r#"<failure message="called 0 times, minimum 1 required" type="VerificationFailure"/>"#)
                .count(),
            2,
            "{xml}"
        );
        assert!(xml.contains(r#"classname="scenarios/partial.yaml""#), "{xml}");
        assert!(xml.contains(r#"name="step[0]: a""#), "{xml}");
    }

    #[test]
    fn optional_uncalled_step_is_skipped() {
        let yaml = r#"
meta: {name: opt}
steps:
  - match: {argv: [a]}
    calls: {min: 0, max: 2}
"#;
        let s = Scenario::from_yaml_str(yaml).unwrap();
        let state = ReplayState::new(PathBuf::from("/tmp/s.yaml"), s.content_hash.clone(), 1);
        let xml = render(&build_result(&s, &state, ""), "opt.yaml");
        assert!(xml.contains("<skipped/>"), "{xml}");
        assert!(xml.contains(r#"failures="0""#), "{xml}");
    }

    #[test]
    fn missing_state_is_a_state_error() {
        let xml = render(
            &error_result("gone", "sess", "state file not found".into()),
            "gone.yaml",
        );
        assert!(xml.contains(r#"type="StateError""#), "{xml}");
        assert!(xml.contains(r#"failures="1""#), "{xml}");
    }

    #[test]
    fn labels_are_xml_escaped() {
        let yaml = r#"
meta: {name: esc}
steps:
  - match: {argv: [tool, "--filter", "a<b"]}
"#;
        let s = Scenario::from_yaml_str(yaml).unwrap();
        let state = ReplayState::new(PathBuf::from("/tmp/s.yaml"), s.content_hash.clone(), 1);
        let xml = render(&build_result(&s, &state, ""), "esc.yaml");
        assert!(xml.contains("a&lt;b"), "{xml}");
    }
}
