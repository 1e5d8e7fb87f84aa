//! Response and argv template rendering.
//!
//! Templates reference scenario variables as `{{ .name }}` and captured
//! values as `{{ .capture.name }}`. Two modes exist: [`render`] treats any
//! unresolved reference as a hard error (argv patterns, top-level vars),
//! while [`render_with_captures`] resolves missing capture references to the
//! empty string, because captures from unexecuted sibling group steps or
//! optional steps may legitimately be absent.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static REF_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\.([a-zA-Z_][a-zA-Z0-9_]*)(\.[a-zA-Z_][a-zA-Z0-9_]*)?\s*\}\}")
        .expect("constant regex pattern is valid")
});

/// One parsed template token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Literal text, emitted verbatim.
    Text(String),
    /// `{{ .name }}`: top-level variable reference.
    Var(String),
    /// `{{ .capture.name }}`: captured value reference.
    CaptureRef(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("undefined variable {{{{ .{0} }}}}")]
    UndefinedVar(String),
    #[error("undefined capture {{{{ .capture.{0} }}}}")]
    UndefinedCapture(String),
}

/// Parse a template into tokens. Text that does not form a
/// `{{ .identifier }}` or `{{ .capture.identifier }}` reference is kept
/// literal, including stray `{{`.
pub fn parse(tmpl: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut last = 0;
    for caps in REF_PATTERN.captures_iter(tmpl) {
        let m = caps.get(0).unwrap();
        if m.start() > last {
            tokens.push(Token::Text(tmpl[last..m.start()].to_string()));
        }
        let head = &caps[1];
        match caps.get(2) {
            Some(tail) => {
                // `.capture.<id>` is the only nested namespace.
                let id = tail.as_str().trim_start_matches('.').to_string();
                if head == "capture" {
                    tokens.push(Token::CaptureRef(id));
                } else {
                    // Not a recognised namespace: literal text.
                    tokens.push(Token::Text(m.as_str().to_string()));
                }
            }
            None => tokens.push(Token::Var(head.to_string())),
        }
        last = m.end();
    }
    if last < tmpl.len() {
        tokens.push(Token::Text(tmpl[last..].to_string()));
    }
    tokens
}

/// True when the template contains at least one variable or capture
/// reference.
pub fn has_refs(tmpl: &str) -> bool {
    parse(tmpl)
        .iter()
        .any(|t| !matches!(t, Token::Text(_)))
}

/// Names of all `{{ .capture.X }}` references in the template.
pub fn capture_refs(tmpl: &str) -> Vec<String> {
    parse(tmpl)
        .into_iter()
        .filter_map(|t| match t {
            Token::CaptureRef(id) => Some(id),
            _ => None,
        })
        .collect()
}

/// Render with a flat variable map. Any unresolved reference is an error;
/// capture references are not available in this mode.
pub fn render(tmpl: &str, vars: &BTreeMap<String, String>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(tmpl.len());
    for token in parse(tmpl) {
        match token {
            Token::Text(t) => out.push_str(&t),
            Token::Var(name) => match vars.get(&name) {
                Some(v) => out.push_str(v),
                None => return Err(TemplateError::UndefinedVar(name)),
            },
            Token::CaptureRef(id) => return Err(TemplateError::UndefinedCapture(id)),
        }
    }
    Ok(out)
}

/// Render with flat vars plus the `capture` namespace. Top-level variable
/// misses remain hard errors; missing captures render as the empty string.
pub fn render_with_captures(
    tmpl: &str,
    vars: &BTreeMap<String, String>,
    captures: &BTreeMap<String, String>,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(tmpl.len());
    for token in parse(tmpl) {
        match token {
            Token::Text(t) => out.push_str(&t),
            Token::Var(name) => match vars.get(&name) {
                Some(v) => out.push_str(v),
                None => return Err(TemplateError::UndefinedVar(name)),
            },
            Token::CaptureRef(id) => {
                if let Some(v) = captures.get(&id) {
                    out.push_str(v);
                }
            }
        }
    }
    Ok(out)
}
