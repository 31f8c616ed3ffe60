//! Validator for the flowscript line grammar.
//!
//! Statements, one per line:
//!
//! ```text
//! node <id> [label text…]
//! <id> -> <id> [: label text…]
//! # comment
//! ```
//!
//! Ids are `[A-Za-z_][A-Za-z0-9_-]*`. Relations may reference ids declared
//! anywhere in the file, so a relation-only second phase appended below an
//! entity phase validates as a whole.

use std::fmt;

/// First defect found in a flowscript source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowScriptError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for FlowScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for FlowScriptError {}

/// Counts of accepted statements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowStats {
    pub nodes: usize,
    pub edges: usize,
}

/// Validate a flowscript source, returning statement counts or the first
/// defect. Empty input is trivially valid.
pub fn validate_flowscript(content: &str) -> Result<FlowStats, FlowScriptError> {
    let mut declared: Vec<&str> = Vec::new();
    let mut stats = FlowStats::default();

    // First pass: collect declarations so relations may come in any order.
    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("node ").or_else(|| {
            (line == "node").then_some("")
        }) {
            let mut words = rest.split_whitespace();
            let Some(id) = words.next() else {
                return Err(FlowScriptError {
                    line: number + 1,
                    message: "node declaration is missing an id".to_string(),
                });
            };
            if !is_ident(id) {
                return Err(FlowScriptError {
                    line: number + 1,
                    message: format!("invalid node id '{id}'"),
                });
            }
            if declared.contains(&id) {
                return Err(FlowScriptError {
                    line: number + 1,
                    message: format!("duplicate node '{id}'"),
                });
            }
            declared.push(id);
            stats.nodes += 1;
        }
    }

    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line == "node" || line.starts_with("node ") {
            continue;
        }
        let Some((from, rest)) = line.split_once("->") else {
            return Err(FlowScriptError {
                line: number + 1,
                message: format!("unrecognized statement '{line}'"),
            });
        };
        let from = from.trim();
        let to = rest.split(':').next().unwrap_or("").trim();
        for endpoint in [from, to] {
            if !is_ident(endpoint) {
                return Err(FlowScriptError {
                    line: number + 1,
                    message: format!("invalid node id '{endpoint}'"),
                });
            }
            if !declared.contains(&endpoint) {
                return Err(FlowScriptError {
                    line: number + 1,
                    message: format!("unknown node '{endpoint}'"),
                });
            }
        }
        stats.edges += 1;
    }

    Ok(stats)
}

fn is_ident(text: &str) -> bool {
    let mut bytes = text.bytes();
    match bytes.next() {
        Some(first) if first.is_ascii_alphabetic() || first == b'_' => {}
        _ => return false,
    }
    bytes.all(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-'))
}
