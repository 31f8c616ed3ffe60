#![forbid(unsafe_code)]

mod session;

pub use session::{
    ChatMessage, ContentPart, GenerationSession, RepairAttempt, Role, SessionStatus,
};

use std::collections::BTreeMap;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Id of the base layer synthesized into every default scaffold.
pub const BASE_LAYER_ID: &str = "layer-0";

/// Tag name of scaffold layer elements.
pub const LAYER_TAG: &str = "layer";

/// Tag name of graph-edge elements.
pub const EDGE_TAG: &str = "edge";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Viewport and page state of the user's canvas.
///
/// Lives on the document root, outside the element list. Content-only
/// operations (legalize, merge of generated content) must never alter it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanvasMeta {
    pub dx: f64,
    pub dy: f64,
    pub zoom: f64,
    pub page_width: f64,
    pub page_height: f64,
    pub grid: bool,
    pub grid_size: f64,
}

impl Default for CanvasMeta {
    fn default() -> Self {
        Self {
            dx: 0.0,
            dy: 0.0,
            zoom: 1.0,
            page_width: 850.0,
            page_height: 1100.0,
            grid: true,
            grid_size: 10.0,
        }
    }
}

/// One node of the document tree.
///
/// `parent` is an id reference to the containing element; `source`/`target`
/// are graph-edge endpoint references; `waypoints` is the ordered list of
/// control points for routed edges.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Element {
    pub id: String,
    pub tag: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub waypoints: Vec<Point>,
}

impl Element {
    #[must_use]
    pub fn new(tag: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tag: tag.into(),
            ..Default::default()
        }
    }

    /// Create a node element parented to the base layer.
    #[must_use]
    pub fn node(id: impl Into<String>) -> Self {
        Self::new("node", id).with_parent(BASE_LAYER_ID)
    }

    /// Create an edge element between two endpoint ids.
    #[must_use]
    pub fn edge(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        let mut element = Self::new(EDGE_TAG, id).with_parent(BASE_LAYER_ID);
        element.source = Some(source.into());
        element.target = Some(target.into());
        element
    }

    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    #[must_use]
    pub fn with_waypoint(mut self, x: f64, y: f64) -> Self {
        self.waypoints.push(Point::new(x, y));
        self
    }

    /// An element is a graph-edge if it uses the edge tag or names an endpoint.
    #[must_use]
    pub fn is_edge(&self) -> bool {
        self.tag == EDGE_TAG || self.source.is_some() || self.target.is_some()
    }

    /// Scaffold elements (layers) are preserved across merges; content is not.
    #[must_use]
    pub fn is_scaffold(&self) -> bool {
        self.tag == LAYER_TAG
    }

    /// The user-visible text of this element, if any.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.attributes
            .get("label")
            .map(String::as_str)
            .filter(|label| !label.is_empty())
    }
}

/// The structured diagram content being synthesized: canvas metadata plus a
/// flat element list linked by id references.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Document {
    pub canvas: CanvasMeta,
    pub elements: Vec<Element>,
}

impl Document {
    /// The default empty document: canvas defaults plus the base layer.
    #[must_use]
    pub fn scaffold() -> Self {
        Self {
            canvas: CanvasMeta::default(),
            elements: vec![Element::new(LAYER_TAG, BASE_LAYER_ID)],
        }
    }

    #[must_use]
    pub fn find(&self, id: &str) -> Option<&Element> {
        self.elements.iter().find(|element| element.id == id)
    }

    #[must_use]
    pub fn contains_id(&self, id: &str) -> bool {
        self.elements.iter().any(|element| element.id == id)
    }

    /// Set of all element ids currently in the document.
    #[must_use]
    pub fn id_set(&self) -> FxHashSet<&str> {
        self.elements
            .iter()
            .map(|element| element.id.as_str())
            .collect()
    }

    /// Id of the first layer element, if any.
    #[must_use]
    pub fn base_layer_id(&self) -> Option<&str> {
        self.elements
            .iter()
            .find(|element| element.is_scaffold())
            .map(|element| element.id.as_str())
    }

    /// Iterate non-scaffold elements.
    pub fn content(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter().filter(|element| !element.is_scaffold())
    }

    /// True when the document holds no content beyond its scaffold.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content().next().is_none()
    }
}

/// The three diagram-format families this pipeline serves.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum EngineKind {
    /// Node/edge markup documents; full legalize/merge/repair machinery.
    #[default]
    Markup,
    /// Line-oriented textual grammars; external validator plus the bounded
    /// auto-repair retry loop.
    Grammar,
    /// Freeform sketch documents; no validation.
    Sketch,
}

impl EngineKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Markup => "markup",
            Self::Grammar => "grammar",
            Self::Sketch => "sketch",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SynthErrorCode {
    #[default]
    Transport,
    Merge,
    Validation,
    Preview,
}

impl SynthErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "canvas/error/transport",
            Self::Merge => "canvas/error/merge",
            Self::Validation => "canvas/error/validation",
            Self::Preview => "canvas/error/preview",
        }
    }
}

/// Error taxonomy for the synthesis pipeline.
///
/// Only `Transport` and exhausted `Validation` errors are fatal to a session;
/// `Merge` and `Preview` failures are absorbed locally and logged.
#[derive(Debug, Clone, Serialize, Deserialize, Error, PartialEq, Eq)]
pub enum SynthError {
    #[error("transport failure: {message}")]
    Transport { message: String },
    #[error("merge tick failed: {message}")]
    Merge { message: String },
    #[error("validation failed after {attempts} repair attempt(s): {message}")]
    Validation { message: String, attempts: usize },
    #[error("preview rendering failed: {message}")]
    Preview { message: String },
}

impl SynthError {
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn merge(message: impl Into<String>) -> Self {
        Self::Merge {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn validation(message: impl Into<String>, attempts: usize) -> Self {
        Self::Validation {
            message: message.into(),
            attempts,
        }
    }

    #[must_use]
    pub fn preview(message: impl Into<String>) -> Self {
        Self::Preview {
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn code(&self) -> SynthErrorCode {
        match self {
            Self::Transport { .. } => SynthErrorCode::Transport,
            Self::Merge { .. } => SynthErrorCode::Merge,
            Self::Validation { .. } => SynthErrorCode::Validation,
            Self::Preview { .. } => SynthErrorCode::Preview,
        }
    }

    /// Whether this error ends the session and is surfaced to the user.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Validation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::{
        BASE_LAYER_ID, CanvasMeta, Document, Element, EngineKind, SynthError, SynthErrorCode,
    };

    #[test]
    fn scaffold_has_base_layer_and_no_content() {
        let doc = Document::scaffold();
        assert_eq!(doc.base_layer_id(), Some(BASE_LAYER_ID));
        assert!(doc.is_empty());
        assert_eq!(doc.canvas, CanvasMeta::default());
    }

    #[test]
    fn edge_classification_covers_tag_and_endpoints() {
        assert!(Element::edge("e1", "a", "b").is_edge());
        assert!(!Element::node("a").is_edge());

        let mut stray = Element::new("node", "s");
        stray.target = Some("b".to_string());
        assert!(stray.is_edge());
    }

    #[test]
    fn label_ignores_empty_text() {
        let labeled = Element::node("a").with_attr("label", "Start");
        assert_eq!(labeled.label(), Some("Start"));

        let blank = Element::node("b").with_attr("label", "");
        assert_eq!(blank.label(), None);
    }

    #[test]
    fn id_set_and_lookup_agree() {
        let mut doc = Document::scaffold();
        doc.elements.push(Element::node("a"));
        doc.elements.push(Element::edge("e1", "a", "a"));

        let ids = doc.id_set();
        assert!(ids.contains("a"));
        assert!(ids.contains("e1"));
        assert!(ids.contains(BASE_LAYER_ID));
        assert!(doc.contains_id("e1"));
        assert!(doc.find("missing").is_none());
    }

    #[test]
    fn error_codes_are_stable() {
        let expectations = [
            (SynthError::transport("x").code(), "canvas/error/transport"),
            (SynthError::merge("x").code(), "canvas/error/merge"),
            (SynthError::validation("x", 3).code(), "canvas/error/validation"),
            (SynthError::preview("x").code(), "canvas/error/preview"),
        ];
        for (code, expected) in expectations {
            assert_eq!(code.as_str(), expected);
        }
    }

    #[test]
    fn fatality_split_matches_taxonomy() {
        assert!(SynthError::transport("gone").is_fatal());
        assert!(SynthError::validation("bad", 3).is_fatal());
        assert!(!SynthError::merge("tick").is_fatal());
        assert!(!SynthError::preview("thumb").is_fatal());
    }

    #[test]
    fn engine_kind_names_are_stable() {
        assert_eq!(EngineKind::Markup.as_str(), "markup");
        assert_eq!(EngineKind::Grammar.as_str(), "grammar");
        assert_eq!(EngineKind::Sketch.as_str(), "sketch");
    }
}
