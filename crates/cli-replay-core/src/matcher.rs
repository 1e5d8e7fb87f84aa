//! Element-wise argv matching.
//!
//! Each expected argv element is one of: a literal string, the wildcard
//! `{{ .any }}`, a `{{ .regex "<pattern>" }}` pattern, or a literal with
//! `{{ .var }}` references rendered from scenario vars. Regex patterns are
//! compiled with the `regex` crate, which guarantees linear-time matching;
//! user-supplied scenarios cannot introduce catastrophic backtracking.

use crate::template::{self, TemplateError};
use regex::Regex;
use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static ANY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\{\{\s*\.any\s*\}\}$").expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static REGEX_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\{\{\s*\.regex\s+(?:"(?<dq>.*)"|`(?<bt>.*)`)\s*\}\}$"#)
        .expect("constant regex pattern is valid")
});

/// How an expected element was interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Literal,
    Any,
    Regex,
    Template,
}

/// Per-element diagnostic, built on mismatch.
#[derive(Debug, Clone)]
pub struct ElementDetail {
    pub matched: bool,
    pub kind: ElementKind,
    pub pattern_text: String,
    pub fail_reason: Option<String>,
}

enum Parsed {
    Literal,
    Any,
    Regex(String),
    Template,
}

fn parse_element(pattern: &str) -> Parsed {
    if !pattern.contains("{{") {
        return Parsed::Literal;
    }
    let trimmed = pattern.trim();
    if ANY_PATTERN.is_match(trimmed) {
        return Parsed::Any;
    }
    if let Some(caps) = REGEX_PATTERN.captures(trimmed) {
        let pat = caps
            .name("dq")
            .or_else(|| caps.name("bt"))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        return Parsed::Regex(pat);
    }
    if template::has_refs(pattern) {
        return Parsed::Template;
    }
    // Contains `{{` but is neither a wildcard nor a reference: plain text.
    Parsed::Literal
}

/// Match one expected element against one received value.
///
/// Var rendering failures (undefined `{{ .var }}` in the pattern) are hard
/// errors, not mismatches.
pub fn element_match(
    pattern: &str,
    value: &str,
    vars: &BTreeMap<String, String>,
) -> Result<bool, TemplateError> {
    // Fast path: the common case is an exact literal.
    if pattern == value {
        return Ok(true);
    }
    match parse_element(pattern) {
        Parsed::Literal => Ok(false),
        Parsed::Any => Ok(true),
        Parsed::Regex(pat) => match Regex::new(&pat) {
            Ok(re) => Ok(re.is_match(value)),
            Err(_) => Ok(false),
        },
        Parsed::Template => Ok(template::render(pattern, vars)? == value),
    }
}

/// True iff lengths are equal and every element matches positionally.
pub fn argv_match(
    expected: &[String],
    received: &[String],
    vars: &BTreeMap<String, String>,
) -> Result<bool, TemplateError> {
    if expected.len() != received.len() {
        return Ok(false);
    }
    for (pattern, value) in expected.iter().zip(received) {
        if !element_match(pattern, value, vars)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Build the diagnostic for one element pair. Called on mismatch only.
pub fn element_detail(
    pattern: &str,
    value: &str,
    vars: &BTreeMap<String, String>,
) -> ElementDetail {
    let (kind, matched, fail_reason) = match parse_element(pattern) {
        Parsed::Literal => {
            let ok = pattern == value;
            (ElementKind::Literal, ok, (!ok).then(|| "literal mismatch".to_string()))
        }
        Parsed::Any => (ElementKind::Any, true, None),
        Parsed::Regex(pat) => match Regex::new(&pat) {
            Ok(re) => {
                let ok = re.is_match(value);
                (
                    ElementKind::Regex,
                    ok,
                    (!ok).then(|| format!("value does not match /{pat}/")),
                )
            }
            Err(e) => (
                ElementKind::Regex,
                false,
                Some(format!("invalid regex /{pat}/: {e}")),
            ),
        },
        Parsed::Template => match template::render(pattern, vars) {
            Ok(rendered) => {
                let ok = rendered == value;
                (
                    ElementKind::Template,
                    ok,
                    (!ok).then(|| format!("rendered to {rendered:?}")),
                )
            }
            Err(e) => (ElementKind::Template, false, Some(e.to_string())),
        },
    };
    ElementDetail {
        matched,
        kind,
        pattern_text: pattern.to_string(),
        fail_reason,
    }
}

/// One attempted step in a mismatch report.
#[derive(Debug, Clone)]
pub struct StepAttempt {
    /// 1-based step number in flat order.
    pub step_number: usize,
    pub expected: Vec<String>,
    pub details: Vec<ElementDetail>,
}

/// Diagnostic for an argv mismatch, covering the current step and (after a
/// soft advance) the next step attempted.
#[derive(Debug, Clone)]
pub struct MismatchReport {
    pub scenario: String,
    pub received: Vec<String>,
    pub attempts: Vec<StepAttempt>,
    pub soft_advanced: bool,
}

/// Context window on either side of the first differing element when argv
/// is long enough to truncate.
const CONTEXT: usize = 2;
const TRUNCATE_OVER: usize = 12;

impl MismatchReport {
    pub fn attempt(
        received: &[String],
        step_number: usize,
        expected: &[String],
        vars: &BTreeMap<String, String>,
    ) -> StepAttempt {
        let n = expected.len().min(received.len());
        let mut details = Vec::with_capacity(n);
        for i in 0..n {
            details.push(element_detail(&expected[i], &received[i], vars));
        }
        StepAttempt {
            step_number,
            expected: expected.to_vec(),
            details,
        }
    }

    /// First index where the element-level match fails, so wildcard and
    /// regex positions never produce spurious diffs. `None` means the
    /// compared prefix matches and the lengths differ.
    fn first_diff(attempt: &StepAttempt) -> Option<usize> {
        attempt.details.iter().position(|d| !d.matched)
    }

    pub fn render(&self, color: bool) -> String {
        let (red, green, bold, reset) = if color {
            ("\x1b[31m", "\x1b[32m", "\x1b[1m", "\x1b[0m")
        } else {
            ("", "", "", "")
        };
        let mut out = String::new();
        out.push_str(&format!(
            "{bold}cli-replay: command did not match scenario '{}'{reset}\n",
            self.scenario
        ));
        out.push_str(&format!("  received: {}\n", shell_join(&self.received)));
        for attempt in &self.attempts {
            out.push_str(&format!(
                "  step {} expected: {}\n",
                attempt.step_number,
                shell_join(&attempt.expected)
            ));
            let diff = Self::first_diff(attempt);
            match diff {
                Some(i) => {
                    let window = if self.received.len().max(attempt.expected.len()) > TRUNCATE_OVER
                    {
                        Some((i.saturating_sub(CONTEXT), i + CONTEXT + 1))
                    } else {
                        None
                    };
                    for (j, d) in attempt.details.iter().enumerate() {
                        if let Some((lo, hi)) = window {
                            if j < lo || j >= hi {
                                continue;
                            }
                        }
                        let mark = if d.matched {
                            format!("{green}=={reset}")
                        } else {
                            format!("{red}!={reset}")
                        };
                        out.push_str(&format!(
                            "    [{j}] {:?} {mark} {:?}",
                            d.pattern_text, self.received[j]
                        ));
                        if let Some(reason) = &d.fail_reason {
                            out.push_str(&format!("  ({reason})"));
                        }
                        out.push('\n');
                    }
                    if let Some((lo, hi)) = window {
                        if lo > 0 || hi < attempt.details.len() {
                            out.push_str("    (argv truncated to mismatch context)\n");
                        }
                    }
                }
                None => {
                    // Lengths differ; the compared prefix matched.
                    let exp = attempt.expected.len();
                    let got = self.received.len();
                    if got > exp {
                        out.push_str(&format!(
                            "    {red}extra arguments:{reset} {}\n",
                            shell_join(&self.received[exp..])
                        ));
                    } else {
                        out.push_str(&format!(
                            "    {red}missing arguments:{reset} {}\n",
                            shell_join(&attempt.expected[got..])
                        ));
                    }
                }
            }
        }
        if self.soft_advanced {
            out.push_str("  (current step had met its minimum; the next step was also tried)\n");
        }
        out
    }
}

fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|a| {
            if a.contains(' ') || a.is_empty() {
                format!("{a:?}")
            } else {
                a.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether diagnostics should use ANSI color. `CLI_REPLAY_COLOR=1` forces
/// color on; otherwise color requires a terminal on stderr and `NO_COLOR`
/// unset.
pub fn use_color() -> bool {
    if std::env::var("CLI_REPLAY_COLOR").ok().as_deref() == Some("1") {
        return true;
    }
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    std::io::stderr().is_terminal()
}
