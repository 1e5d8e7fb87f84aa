//! Scenario model and loader.
//!
//! Scenarios are strict YAML: unknown fields reject at load time
//! (`deny_unknown_fields` on every schema type), then semantic validation
//! runs before anything touches the filesystem or process environment.
//!
//! The steps sequence mixes leaf steps and unordered groups. Internally the
//! canonical view is the *flat index*: leaf steps in declaration order with
//! group children inlined, numbered `[0, N)`. That index space is the only
//! one the state store uses.

mod validate;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("failed to read scenario {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse scenario {path}: {message}")]
    Yaml { path: PathBuf, message: String },
    #[error("invalid scenario: {0}")]
    Invalid(String),
    #[error("command '{command}' is not in the allowed list [{}]", .allowed.join(", "))]
    Allowlist {
        command: String,
        allowed: Vec<String>,
    },
}

/// A loaded, validated scenario plus its content digest.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub doc: ScenarioDoc,
    /// Absolute path the scenario was loaded from, when file-backed.
    pub source_path: Option<PathBuf>,
    /// SHA-256 hex digest of the raw YAML bytes.
    pub content_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioDoc {
    pub meta: Meta,
    pub steps: Vec<StepElement>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Meta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<Security>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionCfg>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Security {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_commands: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny_env_vars: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionCfg {
    /// Session TTL as a duration string (`"30m"`, `"2h"`).
    pub ttl: String,
}

/// One entry in `steps`: either an unordered group or a leaf step. The
/// loader dispatches on key presence (`group` vs `match`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepElement {
    Group(GroupElement),
    Step(Step),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupElement {
    pub group: Group,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Group {
    /// Only `"unordered"` is valid.
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Leaf steps only; groups do not nest.
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    pub r#match: MatchSpec,
    #[serde(default)]
    pub respond: Response,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calls: Option<CallBoundsSpec>,
    /// Reserved; parsed but never evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchSpec {
    pub argv: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Response {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub exit: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr_file: Option<PathBuf>,
    /// Artificial response latency as a duration string (`"250ms"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub capture: BTreeMap<String, String>,
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}

/// Raw call bounds as written in YAML. [`Step::effective_calls`] applies
/// the defaulting rules.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallBoundsSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
}

/// Normalised call bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallBounds {
    pub min: u32,
    pub max: u32,
}

impl Step {
    /// Defaulting: absent → `{1,1}`; only `min` → `max := min`; only `max`
    /// → `min := 0`.
    pub fn effective_calls(&self) -> CallBounds {
        match self.calls {
            None | Some(CallBoundsSpec { min: None, max: None }) => CallBounds { min: 1, max: 1 },
            Some(CallBoundsSpec {
                min: Some(m),
                max: None,
            }) => CallBounds { min: m, max: m },
            Some(CallBoundsSpec {
                min: None,
                max: Some(x),
            }) => CallBounds { min: 0, max: x },
            Some(CallBoundsSpec {
                min: Some(m),
                max: Some(x),
            }) => CallBounds { min: m, max: x },
        }
    }

    /// Human label: the argv joined with spaces.
    pub fn label(&self) -> String {
        self.r#match.argv.join(" ")
    }
}

/// Derived (never persisted) flat-index span of one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRange {
    /// First flat index inside the group.
    pub start: usize,
    /// One past the last flat index.
    pub end: usize,
    pub name: String,
    /// Index of the group's element in the top-level steps sequence.
    pub top_index: usize,
}

impl GroupRange {
    pub fn contains(&self, flat_index: usize) -> bool {
        flat_index >= self.start && flat_index < self.end
    }
}

impl Scenario {
    pub fn load_file(path: &Path) -> Result<Self, ScenarioError> {
        let bytes = std::fs::read(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let doc: ScenarioDoc =
            serde_yaml::from_slice(&bytes).map_err(|e| ScenarioError::Yaml {
                path: path.to_path_buf(),
                message: format_yaml_error(e),
            })?;
        let abs = path
            .canonicalize()
            .unwrap_or_else(|_| path.to_path_buf());
        let scenario = Self {
            doc,
            source_path: Some(abs),
            content_hash: hex::encode(Sha256::digest(&bytes)),
        };
        scenario.validate(None)?;
        Ok(scenario)
    }

    /// Parse from a string (tests and the validate subcommand).
    pub fn from_yaml_str(content: &str) -> Result<Self, ScenarioError> {
        let doc: ScenarioDoc =
            serde_yaml::from_str(content).map_err(|e| ScenarioError::Yaml {
                path: PathBuf::from("<inline>"),
                message: format_yaml_error(e),
            })?;
        let scenario = Self {
            doc,
            source_path: None,
            content_hash: hex::encode(Sha256::digest(content.as_bytes())),
        };
        scenario.validate(None)?;
        Ok(scenario)
    }

    /// Leaf steps in declaration order with group children inlined.
    pub fn flat_steps(&self) -> Vec<&Step> {
        let mut flat = Vec::new();
        for element in &self.doc.steps {
            match element {
                StepElement::Step(step) => flat.push(step),
                StepElement::Group(g) => flat.extend(g.group.steps.iter()),
            }
        }
        flat
    }

    /// Flat-index spans of each group. Unnamed groups are auto-named
    /// `group-K`, K 1-based among all declared groups.
    pub fn group_ranges(&self) -> Vec<GroupRange> {
        let mut ranges = Vec::new();
        let mut flat = 0usize;
        let mut group_ordinal = 0usize;
        for (top_index, element) in self.doc.steps.iter().enumerate() {
            match element {
                StepElement::Step(_) => flat += 1,
                StepElement::Group(g) => {
                    group_ordinal += 1;
                    let len = g.group.steps.len();
                    let name = g
                        .group
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("group-{group_ordinal}"));
                    ranges.push(GroupRange {
                        start: flat,
                        end: flat + len,
                        name,
                        top_index,
                    });
                    flat += len;
                }
            }
        }
        ranges
    }

    /// The group range containing a flat index, if any.
    pub fn group_of(&self, flat_index: usize) -> Option<GroupRange> {
        self.group_ranges()
            .into_iter()
            .find(|r| r.contains(flat_index))
    }

    pub fn name(&self) -> &str {
        &self.doc.meta.name
    }

    pub fn deny_env_vars(&self) -> &[String] {
        self.doc
            .meta
            .security
            .as_ref()
            .map(|s| s.deny_env_vars.as_slice())
            .unwrap_or(&[])
    }

    /// Session TTL, when declared.
    pub fn session_ttl(&self) -> Option<std::time::Duration> {
        let ttl = &self.doc.meta.session.as_ref()?.ttl;
        humantime::parse_duration(ttl).ok()
    }

    /// Base names of the commands this scenario intercepts, in first-use
    /// order: the distinct `argv[0]` values of all leaf steps.
    pub fn intercepted_commands(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for step in self.flat_steps() {
            if let Some(first) = step.r#match.argv.first() {
                let base = base_name(first);
                if !seen.contains(&base) {
                    seen.push(base);
                }
            }
        }
        seen
    }
}

/// Base name of a command path, with a trailing `.exe` stripped.
pub fn base_name(command: &str) -> String {
    let base = Path::new(command)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| command.to_string());
    base.strip_suffix(".exe").unwrap_or(&base).to_string()
}

fn format_yaml_error(e: serde_yaml::Error) -> String {
    let msg = e.to_string();
    if msg.contains("unknown field") {
        return format!("unknown field rejected (scenarios are strict YAML): {msg}");
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: &str = r#"
meta:
  name: deploy
steps:
  - match: {argv: [kubectl, apply, -f, deploy.yaml]}
    respond: {stdout: "deployment configured\n"}
  - group:
      mode: unordered
      steps:
        - match: {argv: [az, account, show]}
        - match: {argv: [docker, info]}
  - match: {argv: [kubectl, get, deployment]}
"#;

    #[test]
    fn parses_and_flattens() {
        let s = Scenario::from_yaml_str(BASIC).unwrap();
        assert_eq!(s.name(), "deploy");
        assert_eq!(s.flat_steps().len(), 4);
        let ranges = s.group_ranges();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].start, 1);
        assert_eq!(ranges[0].end, 3);
        assert_eq!(ranges[0].name, "group-1");
        assert!(s.group_of(2).is_some());
        assert!(s.group_of(3).is_none());
    }

    #[test]
    fn unknown_top_level_field_rejects() {
        let err = Scenario::from_yaml_str("meta:\n  name: x\nsteps: []\nbogus: 1\n").unwrap_err();
        assert!(err.to_string().contains("unknown field"), "{err}");
    }

    #[test]
    fn unknown_step_field_rejects() {
        let yaml = r#"
meta: {name: x}
steps:
  - match: {argv: [ls]}
    responde: {stdout: oops}
"#;
        assert!(Scenario::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn nested_group_rejects() {
        let yaml = r#"
meta: {name: x}
steps:
  - group:
      mode: unordered
      steps:
        - group:
            mode: unordered
            steps:
              - match: {argv: [ls]}
"#;
        assert!(Scenario::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn call_bounds_defaulting() {
        let absent = Step {
            r#match: MatchSpec {
                argv: vec!["x".into()],
                stdin: None,
            },
            respond: Response::default(),
            calls: None,
            when: None,
        };
        assert_eq!(absent.effective_calls(), CallBounds { min: 1, max: 1 });

        let mut only_min = absent.clone();
        only_min.calls = Some(CallBoundsSpec {
            min: Some(3),
            max: None,
        });
        assert_eq!(only_min.effective_calls(), CallBounds { min: 3, max: 3 });

        let mut only_max = absent.clone();
        only_max.calls = Some(CallBoundsSpec {
            min: None,
            max: Some(5),
        });
        assert_eq!(only_max.effective_calls(), CallBounds { min: 0, max: 5 });
    }

    #[test]
    fn group_auto_naming_counts_named_groups() {
        let yaml = r#"
meta: {name: x}
steps:
  - group:
      mode: unordered
      name: pre
      steps:
        - match: {argv: [a]}
  - group:
      mode: unordered
      steps:
        - match: {argv: [b]}
"#;
        let s = Scenario::from_yaml_str(yaml).unwrap();
        let ranges = s.group_ranges();
        assert_eq!(ranges[0].name, "pre");
        assert_eq!(ranges[1].name, "group-2");
    }

    #[test]
    fn content_hash_is_stable() {
        let a = Scenario::from_yaml_str(BASIC).unwrap();
        let b = Scenario::from_yaml_str(BASIC).unwrap();
        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.content_hash.len(), 64);
    }

    #[test]
    fn intercepted_commands_are_distinct_base_names() {
        let s = Scenario::from_yaml_str(BASIC).unwrap();
        assert_eq!(s.intercepted_commands(), vec!["kubectl", "az", "docker"]);
    }

    #[test]
    fn base_name_strips_dirs_and_exe() {
        assert_eq!(base_name("/usr/bin/kubectl"), "kubectl");
        assert_eq!(base_name("kubectl.exe"), "kubectl");
        assert_eq!(base_name("az"), "az");
    }
}
