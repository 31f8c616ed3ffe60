//! Markup ⇄ [`Document`] codec.
//!
//! The wrapper tag carries canvas metadata attributes; element nesting (or an
//! explicit `parent` attribute) becomes parent references; `source`/`target`
//! attributes become graph-edge endpoints; `<point/>` children become
//! waypoints. The writer emits flat, deterministic markup so that
//! `parse_markup(&write_markup(doc)) == doc` for normalized documents.

use std::fmt::Write as _;

use fc_core::{CanvasMeta, Document, Element, Point};
use thiserror::Error;

use crate::scan::{RawToken, Tokenizer, is_wrapper};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MarkupError {
    #[error("markup ended inside a token at byte {at}")]
    Truncated { at: usize },
    #[error("unclosed element <{tag}> at end of input")]
    Unclosed { tag: String },
}

enum Frame {
    Wrapper,
    Element(usize),
    Passive,
}

fn innermost_element(stack: &[Frame]) -> Option<usize> {
    stack.iter().rev().find_map(|frame| match frame {
        Frame::Element(index) => Some(*index),
        _ => None,
    })
}

/// Parse markup text into a [`Document`].
///
/// Lenient where the legalizer is lenient: close tags match the innermost
/// open element regardless of name, text at wrapper level is ignored, and
/// unknown wrapper attributes are skipped.
pub fn parse_markup(text: &str) -> Result<Document, MarkupError> {
    let mut doc = Document {
        canvas: CanvasMeta::default(),
        elements: Vec::new(),
    };
    let mut stack: Vec<Frame> = Vec::new();

    for item in Tokenizer::new(text) {
        let (token, _) = item.map_err(|t| MarkupError::Truncated { at: t.at })?;
        match token {
            RawToken::Open {
                name,
                attrs,
                self_closing,
            } => {
                let only_wrappers_open =
                    stack.iter().all(|frame| matches!(frame, Frame::Wrapper));
                if is_wrapper(name) && only_wrappers_open {
                    apply_canvas_attrs(&mut doc.canvas, &attrs);
                    if !self_closing {
                        stack.push(Frame::Wrapper);
                    }
                } else if name == "point" {
                    if let Some(index) = innermost_element(&stack) {
                        let x = attr_f64(&attrs, "x").unwrap_or(0.0);
                        let y = attr_f64(&attrs, "y").unwrap_or(0.0);
                        doc.elements[index].waypoints.push(Point::new(x, y));
                    }
                    if !self_closing {
                        stack.push(Frame::Passive);
                    }
                } else {
                    let mut element = Element {
                        tag: name.to_string(),
                        ..Default::default()
                    };
                    element.parent = innermost_element(&stack)
                        .map(|index| doc.elements[index].id.clone())
                        .filter(|id| !id.is_empty());
                    for (attr_name, raw) in &attrs {
                        let value = unescape(raw);
                        match *attr_name {
                            "id" => element.id = value,
                            "parent" => element.parent = Some(value),
                            "source" => element.source = Some(value),
                            "target" => element.target = Some(value),
                            _ => {
                                element.attributes.insert((*attr_name).to_string(), value);
                            }
                        }
                    }
                    let index = doc.elements.len();
                    doc.elements.push(element);
                    if !self_closing {
                        stack.push(Frame::Element(index));
                    }
                }
            }
            RawToken::Close { .. } => {
                stack.pop();
            }
            RawToken::Text { text } => {
                let trimmed = text.trim();
                if !trimmed.is_empty()
                    && let Some(index) = innermost_element(&stack)
                {
                    let element = &mut doc.elements[index];
                    if !element.attributes.contains_key("label") {
                        element
                            .attributes
                            .insert("label".to_string(), unescape(trimmed));
                    }
                }
            }
            RawToken::Comment | RawToken::Instruction => {}
        }
    }

    let unclosed = stack.iter().find_map(|frame| match frame {
        Frame::Element(index) => Some(doc.elements[*index].tag.clone()),
        _ => None,
    });
    match unclosed {
        Some(tag) => Err(MarkupError::Unclosed { tag }),
        None => Ok(doc),
    }
}

/// Serialize a [`Document`] to markup text.
#[must_use]
pub fn write_markup(doc: &Document) -> String {
    let mut out = String::new();
    let canvas = &doc.canvas;
    let _ = write!(
        out,
        "<scene dx=\"{}\" dy=\"{}\" zoom=\"{}\" grid=\"{}\" grid-size=\"{}\" page-width=\"{}\" page-height=\"{}\">",
        canvas.dx,
        canvas.dy,
        canvas.zoom,
        u8::from(canvas.grid),
        canvas.grid_size,
        canvas.page_width,
        canvas.page_height
    );
    for element in &doc.elements {
        out.push_str("\n  ");
        write_element(&mut out, element);
    }
    out.push_str("\n</scene>\n");
    out
}

fn write_element(out: &mut String, element: &Element) {
    let _ = write!(out, "<{} id=\"{}\"", element.tag, escape(&element.id));
    if let Some(parent) = &element.parent {
        let _ = write!(out, " parent=\"{}\"", escape(parent));
    }
    if let Some(source) = &element.source {
        let _ = write!(out, " source=\"{}\"", escape(source));
    }
    if let Some(target) = &element.target {
        let _ = write!(out, " target=\"{}\"", escape(target));
    }
    for (name, value) in &element.attributes {
        if !is_attr_name(name) {
            continue;
        }
        let _ = write!(out, " {}=\"{}\"", name, escape(value));
    }
    if element.waypoints.is_empty() {
        out.push_str("/>");
    } else {
        out.push('>');
        for point in &element.waypoints {
            let _ = write!(out, "\n    <point x=\"{}\" y=\"{}\"/>", point.x, point.y);
        }
        let _ = write!(out, "\n  </{}>", element.tag);
    }
}

fn is_attr_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-' | b':' | b'.'))
}

fn apply_canvas_attrs(canvas: &mut CanvasMeta, attrs: &[(&str, &str)]) {
    for (name, raw) in attrs {
        match *name {
            "dx" => apply_f64(&mut canvas.dx, raw),
            "dy" => apply_f64(&mut canvas.dy, raw),
            "zoom" => apply_f64(&mut canvas.zoom, raw),
            "grid" => canvas.grid = matches!(raw.trim(), "1" | "true"),
            "grid-size" => apply_f64(&mut canvas.grid_size, raw),
            "page-width" => apply_f64(&mut canvas.page_width, raw),
            "page-height" => apply_f64(&mut canvas.page_height, raw),
            _ => {}
        }
    }
}

fn apply_f64(slot: &mut f64, raw: &str) {
    if let Ok(value) = raw.trim().parse::<f64>() {
        *slot = value;
    }
}

fn attr_f64(attrs: &[(&str, &str)], name: &str) -> Option<f64> {
    attrs
        .iter()
        .find(|(attr_name, _)| *attr_name == name)
        .and_then(|(_, raw)| raw.trim().parse::<f64>().ok())
}

pub(crate) fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

pub(crate) fn unescape(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        if let Some(semi) = rest.find(';') {
            let entity = &rest[1..semi];
            let replacement = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity.strip_prefix('#').and_then(|digits| {
                    let code = if let Some(hex) =
                        digits.strip_prefix('x').or_else(|| digits.strip_prefix('X'))
                    {
                        u32::from_str_radix(hex, 16).ok()
                    } else {
                        digits.parse().ok()
                    };
                    code.and_then(char::from_u32)
                }),
            };
            if let Some(ch) = replacement {
                out.push(ch);
                rest = &rest[semi + 1..];
                continue;
            }
        }
        out.push('&');
        rest = &rest[1..];
    }
    out.push_str(rest);
    out
}
