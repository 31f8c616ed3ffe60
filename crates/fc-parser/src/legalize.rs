//! Fragment legalization: truncate a partial markup fragment to its largest
//! well-formed prefix and re-wrap it so the result always parses standalone.

use crate::scan::{RawToken, Tokenizer, is_wrapper};

/// Canonical wrapper emitted around legalized content.
pub const WRAPPER_OPEN: &str = "<scene>";
pub const WRAPPER_CLOSE: &str = "</scene>";

/// Truncate `fragment` to its largest well-formed prefix.
///
/// The scan keeps an open-element stack and treats tag characters inside
/// quoted attribute values as plain text. A leading recognized wrapper tag
/// (`scene`, `doc`, `root`, `diagram`, nested arbitrarily) is transparent:
/// its children are the top-level content. Everything after the last
/// completed top-level element is discarded, which drops any element whose
/// closing tag has not arrived and any nested element under an unfinished
/// ancestor. Idempotent: `legalize(legalize(x)) == legalize(x)`.
#[must_use]
pub fn legalize(fragment: &str) -> String {
    let retained = retained_content(fragment);
    let mut out = String::with_capacity(WRAPPER_OPEN.len() + retained.len() + WRAPPER_CLOSE.len());
    out.push_str(WRAPPER_OPEN);
    out.push_str(retained);
    out.push_str(WRAPPER_CLOSE);
    out
}

fn retained_content(fragment: &str) -> &str {
    let mut content_start = 0;
    let mut last_complete = None;
    let mut depth = 0usize;
    let mut in_preamble = true;

    for item in Tokenizer::new(fragment) {
        let Ok((token, range)) = item else {
            // Input ended mid-token; nothing after the last boundary survives.
            break;
        };
        if in_preamble {
            match &token {
                RawToken::Text { text } if text.trim().is_empty() => continue,
                RawToken::Comment | RawToken::Instruction => continue,
                // Transparent wrapper (self-closing wrappers are consumed too).
                RawToken::Open { name, .. } if is_wrapper(name) => continue,
                _ => {
                    in_preamble = false;
                    content_start = range.start;
                }
            }
        }
        match token {
            RawToken::Open { self_closing, .. } => {
                if self_closing {
                    if depth == 0 {
                        last_complete = Some(range.end);
                    }
                } else {
                    depth += 1;
                }
            }
            RawToken::Close { .. } => {
                // A close at depth zero belongs to the unwrapped wrapper (or
                // is stray); it never completes a content element.
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        last_complete = Some(range.end);
                    }
                }
            }
            RawToken::Text { .. } | RawToken::Comment | RawToken::Instruction => {}
        }
    }

    match last_complete {
        Some(end) => &fragment[content_start..end],
        None => "",
    }
}
