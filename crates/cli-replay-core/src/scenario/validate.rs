//! Semantic validation of loaded scenarios.
//!
//! Schema shape is already enforced by strict serde; this layer checks the
//! rules serde cannot express: group modes, call-bound ranges, capture
//! identifier hygiene, forward references, and the command allowlist.

use super::{base_name, Scenario, ScenarioError, Step, StepElement};
use crate::template;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static IDENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("constant regex pattern is valid")
});

impl Scenario {
    /// Run all load-time invariants. `cli_allowlist` is the optional
    /// `--allowed-commands` list; when both it and the YAML allowlist are
    /// present the intersection (the stricter set) wins.
    pub fn validate(&self, cli_allowlist: Option<&[String]>) -> Result<(), ScenarioError> {
        if self.doc.meta.name.trim().is_empty() {
            return Err(ScenarioError::Invalid("meta.name must not be empty".into()));
        }

        for pattern in self.deny_env_vars() {
            if pattern.is_empty() {
                return Err(ScenarioError::Invalid(
                    "security.deny_env_vars entries must not be empty".into(),
                ));
            }
        }

        if let Some(session) = &self.doc.meta.session {
            humantime::parse_duration(&session.ttl).map_err(|e| {
                ScenarioError::Invalid(format!("meta.session.ttl '{}': {e}", session.ttl))
            })?;
        }

        for element in &self.doc.steps {
            if let StepElement::Group(g) = element {
                if g.group.mode != "unordered" {
                    return Err(ScenarioError::Invalid(format!(
                        "group mode '{}' is not supported (only 'unordered')",
                        g.group.mode
                    )));
                }
                if g.group.steps.is_empty() {
                    return Err(ScenarioError::Invalid(
                        "groups must contain at least one step".into(),
                    ));
                }
            }
        }

        let mut defined_captures: BTreeSet<String> = BTreeSet::new();
        for (i, step) in self.flat_steps().iter().enumerate() {
            let number = i + 1;
            self.validate_step(step, number)?;

            // Forward-reference check: respond templates may only name
            // captures defined by earlier steps in flat order.
            for text in [&step.respond.stdout, &step.respond.stderr]
                .into_iter()
                .flatten()
            {
                for capture in template::capture_refs(text) {
                    if !defined_captures.contains(&capture) {
                        return Err(ScenarioError::Invalid(format!(
                            "step {number} references capture '{capture}' before it is defined"
                        )));
                    }
                }
            }
            for id in step.respond.capture.keys() {
                if !IDENT.is_match(id) {
                    return Err(ScenarioError::Invalid(format!(
                        "step {number}: capture identifier '{id}' is not a valid identifier"
                    )));
                }
                if self.doc.meta.vars.contains_key(id) {
                    return Err(ScenarioError::Invalid(format!(
                        "step {number}: capture '{id}' shadows meta.vars key '{id}'"
                    )));
                }
                defined_captures.insert(id.clone());
            }
        }

        self.check_allowlist(cli_allowlist)?;
        Ok(())
    }

    fn validate_step(&self, step: &Step, number: usize) -> Result<(), ScenarioError> {
        if step.r#match.argv.is_empty() {
            return Err(ScenarioError::Invalid(format!(
                "step {number}: match.argv must not be empty"
            )));
        }
        if !(0..=255).contains(&step.respond.exit) {
            return Err(ScenarioError::Invalid(format!(
                "step {number}: respond.exit {} is out of range 0..255",
                step.respond.exit
            )));
        }
        if step.respond.stdout.is_some() && step.respond.stdout_file.is_some() {
            return Err(ScenarioError::Invalid(format!(
                "step {number}: respond.stdout and respond.stdout_file are mutually exclusive"
            )));
        }
        if step.respond.stderr.is_some() && step.respond.stderr_file.is_some() {
            return Err(ScenarioError::Invalid(format!(
                "step {number}: respond.stderr and respond.stderr_file are mutually exclusive"
            )));
        }
        if let Some(delay) = &step.respond.delay {
            humantime::parse_duration(delay).map_err(|e| {
                ScenarioError::Invalid(format!("step {number}: respond.delay '{delay}': {e}"))
            })?;
        }
        if let Some(spec) = &step.calls {
            // Reject max=0 explicitly rather than letting the defaulting
            // rule produce the nonsensical {0,0}.
            if spec.max == Some(0) {
                return Err(ScenarioError::Invalid(format!(
                    "step {number}: calls.max must be >= 1"
                )));
            }
            let bounds = step.effective_calls();
            if bounds.max < 1 {
                return Err(ScenarioError::Invalid(format!(
                    "step {number}: calls.max must be >= 1"
                )));
            }
            if bounds.max < bounds.min {
                return Err(ScenarioError::Invalid(format!(
                    "step {number}: calls.max ({}) must be >= calls.min ({})",
                    bounds.max, bounds.min
                )));
            }
        }
        Ok(())
    }

    /// Allowlist check; callable again once the CLI list is known.
    pub fn check_allowlist(&self, cli_allowlist: Option<&[String]>) -> Result<(), ScenarioError> {
        let yaml_list: Option<BTreeSet<String>> = self
            .doc
            .meta
            .security
            .as_ref()
            .and_then(|s| s.allowed_commands.as_ref())
            .map(|cmds| cmds.iter().cloned().collect());
        let cli_list: Option<BTreeSet<String>> =
            cli_allowlist.map(|cmds| cmds.iter().cloned().collect());

        let effective = match (yaml_list, cli_list) {
            (Some(a), Some(b)) => Some(a.intersection(&b).cloned().collect::<BTreeSet<_>>()),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
        let Some(allowed) = effective else {
            return Ok(());
        };

        for step in self.flat_steps() {
            if let Some(first) = step.r#match.argv.first() {
                let base = base_name(first);
                if !allowed.contains(&base) {
                    return Err(ScenarioError::Allowlist {
                        command: base,
                        allowed: allowed.iter().cloned().collect(),
                    });
                }
            }
        }
        Ok(())
    }

    /// The validate subcommand's extra check: response file paths must
    /// exist. Relative paths resolve against the scenario's directory.
    pub fn check_response_files(&self) -> Vec<String> {
        let base_dir = self
            .source_path
            .as_deref()
            .and_then(|p| p.parent())
            .map(|p| p.to_path_buf());
        let mut problems = Vec::new();
        for (i, step) in self.flat_steps().iter().enumerate() {
            for file in [&step.respond.stdout_file, &step.respond.stderr_file]
                .into_iter()
                .flatten()
            {
                let resolved = if file.is_absolute() {
                    file.clone()
                } else if let Some(dir) = &base_dir {
                    dir.join(file)
                } else {
                    file.clone()
                };
                if !resolved.exists() {
                    problems.push(format!(
                        "step {}: response file not found: {}",
                        i + 1,
                        resolved.display()
                    ));
                }
            }
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(yaml: &str) -> Result<Scenario, ScenarioError> {
        Scenario::from_yaml_str(yaml)
    }

    #[test]
    fn empty_name_rejects() {
        let err = load("meta: {name: \"\"}\nsteps: []\n").unwrap_err();
        assert!(err.to_string().contains("meta.name"), "{err}");
    }

    #[test]
    fn ordered_group_mode_rejects() {
        let yaml = r#"
meta: {name: x}
steps:
  - group:
      mode: ordered
      steps:
        - match: {argv: [ls]}
"#;
        let err = load(yaml).unwrap_err();
        assert!(err.to_string().contains("unordered"), "{err}");
    }

    #[test]
    fn empty_group_rejects() {
        let yaml = "meta: {name: x}\nsteps:\n  - group:\n      mode: unordered\n      steps: []\n";
        let err = load(yaml).unwrap_err();
        assert!(err.to_string().contains("at least one step"), "{err}");
    }

    #[test]
    fn max_zero_rejects_with_clear_message() {
        let yaml = r#"
meta: {name: x}
steps:
  - match: {argv: [ls]}
    calls: {max: 0}
"#;
        let err = load(yaml).unwrap_err();
        assert!(err.to_string().contains("calls.max must be >= 1"), "{err}");
    }

    #[test]
    fn min_greater_than_max_rejects() {
        let yaml = r#"
meta: {name: x}
steps:
  - match: {argv: [ls]}
    calls: {min: 3, max: 2}
"#;
        let err = load(yaml).unwrap_err();
        assert!(err.to_string().contains("calls.max"), "{err}");
    }

    #[test]
    fn min_only_zero_rejects() {
        // {min: 0} normalises to {0,0}, which violates max >= 1.
        let yaml = r#"
meta: {name: x}
steps:
  - match: {argv: [ls]}
    calls: {min: 0}
"#;
        assert!(load(yaml).is_err());
    }

    #[test]
    fn exit_out_of_range_rejects() {
        let yaml = r#"
meta: {name: x}
steps:
  - match: {argv: [ls]}
    respond: {exit: 300}
"#;
        let err = load(yaml).unwrap_err();
        assert!(err.to_string().contains("out of range"), "{err}");
    }

    #[test]
    fn stdout_and_stdout_file_conflict() {
        let yaml = r#"
meta: {name: x}
steps:
  - match: {argv: [ls]}
    respond: {stdout: hi, stdout_file: out.txt}
"#;
        let err = load(yaml).unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"), "{err}");
    }

    #[test]
    fn forward_capture_reference_rejects() {
        let yaml = r#"
meta: {name: x}
steps:
  - match: {argv: [a]}
    respond: {stdout: "{{ .capture.later }}"}
  - match: {argv: [b]}
    respond: {capture: {later: value}}
"#;
        let err = load(yaml).unwrap_err();
        assert!(err.to_string().contains("before it is defined"), "{err}");
    }

    #[test]
    fn backward_capture_reference_is_fine() {
        let yaml = r#"
meta: {name: x}
steps:
  - match: {argv: [a]}
    respond: {capture: {rg: value}}
  - match: {argv: [b]}
    respond: {stdout: "got {{ .capture.rg }}"}
"#;
        assert!(load(yaml).is_ok());
    }

    #[test]
    fn self_capture_reference_rejects() {
        // Captures merge after rendering; a step cannot see its own.
        let yaml = r#"
meta: {name: x}
steps:
  - match: {argv: [a]}
    respond: {stdout: "{{ .capture.me }}", capture: {me: v}}
"#;
        assert!(load(yaml).is_err());
    }

    #[test]
    fn capture_shadowing_var_rejects() {
        let yaml = r#"
meta:
  name: x
  vars: {region: eastus}
steps:
  - match: {argv: [a]}
    respond: {capture: {region: other}}
"#;
        let err = load(yaml).unwrap_err();
        assert!(err.to_string().contains("shadows"), "{err}");
    }

    #[test]
    fn bad_capture_identifier_rejects() {
        let yaml = r#"
meta: {name: x}
steps:
  - match: {argv: [a]}
    respond: {capture: {"1bad": v}}
"#;
        let err = load(yaml).unwrap_err();
        assert!(err.to_string().contains("identifier"), "{err}");
    }

    #[test]
    fn empty_deny_pattern_rejects() {
        let yaml = r#"
meta:
  name: x
  security:
    deny_env_vars: [""]
steps: []
"#;
        let err = load(yaml).unwrap_err();
        assert!(err.to_string().contains("deny_env_vars"), "{err}");
    }

    #[test]
    fn yaml_allowlist_violation_names_command() {
        let yaml = r#"
meta:
  name: x
  security:
    allowed_commands: [kubectl]
steps:
  - match: {argv: [docker, info]}
"#;
        let err = load(yaml).unwrap_err();
        match err {
            ScenarioError::Allowlist { command, allowed } => {
                assert_eq!(command, "docker");
                assert_eq!(allowed, vec!["kubectl".to_string()]);
            }
            other => panic!("expected allowlist error, got {other}"),
        }
    }

    #[test]
    fn cli_allowlist_intersects_with_yaml() {
        let yaml = r#"
meta:
  name: x
  security:
    allowed_commands: [kubectl, docker]
steps:
  - match: {argv: [docker, info]}
"#;
        // YAML alone permits docker; the CLI list removes it.
        let s = load(yaml).unwrap();
        assert!(s.check_allowlist(Some(&["kubectl".to_string()])).is_err());
        assert!(s
            .check_allowlist(Some(&["kubectl".to_string(), "docker".to_string()]))
            .is_ok());
    }

    #[test]
    fn bad_ttl_rejects() {
        let yaml = "meta:\n  name: x\n  session: {ttl: nonsense}\nsteps: []\n";
        assert!(load(yaml).is_err());
    }

    #[test]
    fn bad_delay_rejects() {
        let yaml = r#"
meta: {name: x}
steps:
  - match: {argv: [a]}
    respond: {delay: soon}
"#;
        assert!(load(yaml).is_err());
    }

    #[test]
    fn missing_response_file_is_reported_by_file_check() {
        let yaml = r#"
meta: {name: x}
steps:
  - match: {argv: [a]}
    respond: {stdout_file: does-not-exist.txt}
"#;
        let s = load(yaml).unwrap();
        let problems = s.check_response_files();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("does-not-exist.txt"));
    }
}
