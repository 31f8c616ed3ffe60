//! Splitting an accumulated model response buffer into plan and code.
//!
//! Called repeatedly on the full buffer as the stream grows; deterministic
//! and side-effect free. The plan is surfaced only once its closing marker
//! has streamed in, so callers can treat "planning complete" as a discrete
//! event.

use serde::Serialize;

/// Opening marker of the plan narrative block.
pub const PLAN_OPEN: &str = "<plan>";

/// Closing marker of the plan narrative block.
pub const PLAN_CLOSE: &str = "</plan>";

const FENCES: [&str; 2] = ["```", "~~~"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedResponse {
    pub plan: Option<String>,
    pub code: Option<String>,
}

/// Split the accumulated buffer into plan narrative and code payload.
///
/// Plan text is the content between [`PLAN_OPEN`] and [`PLAN_CLOSE`]; while
/// the block is unterminated both fields stay `None`, even if partial plan
/// text is visible. Code is everything after the plan block (or the whole
/// buffer without plan markers), with surrounding code fences stripped.
#[must_use]
pub fn parse_response(buffer: &str) -> ParsedResponse {
    if buffer.is_empty() {
        return ParsedResponse::default();
    }
    match buffer.find(PLAN_OPEN) {
        Some(open) => {
            let after_open = &buffer[open + PLAN_OPEN.len()..];
            match after_open.find(PLAN_CLOSE) {
                Some(close) => ParsedResponse {
                    plan: Some(after_open[..close].trim().to_string()),
                    code: extract_code(&after_open[close + PLAN_CLOSE.len()..]),
                },
                // Plan still streaming.
                None => ParsedResponse::default(),
            }
        }
        None => ParsedResponse {
            plan: None,
            code: extract_code(buffer),
        },
    }
}

fn extract_code(region: &str) -> Option<String> {
    let body = strip_fences(region).trim();
    if body.is_empty() {
        None
    } else {
        Some(body.to_string())
    }
}

/// Slice out the body of the first fenced block, tolerating a closing fence
/// that has not streamed in yet. The first recognized fence style wins.
fn strip_fences(region: &str) -> &str {
    let mut offset = 0;
    for line in region.split_inclusive('\n') {
        let stripped = line.trim_start();
        if let Some(fence) = FENCES.iter().find(|fence| stripped.starts_with(**fence)) {
            let body = &region[offset + line.len()..];
            return match closing_fence(body, fence) {
                Some(close) => &body[..close],
                None => body,
            };
        }
        offset += line.len();
    }
    region
}

/// Byte offset of the last line consisting solely of `fence`, so fences
/// embedded in the payload do not end the block early.
fn closing_fence(body: &str, fence: &str) -> Option<usize> {
    let mut offset = 0;
    let mut close = None;
    for line in body.split_inclusive('\n') {
        if line.trim() == fence {
            close = Some(offset);
        }
        offset += line.len();
    }
    close
}
