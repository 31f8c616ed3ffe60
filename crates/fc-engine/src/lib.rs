#![forbid(unsafe_code)]

//! Per-format capability sets.
//!
//! Behavior that varies by diagram format lives behind [`EngineProfile`],
//! selected once per generation session instead of branching inline: whether
//! fragments can be legalized mid-stream, whether generation is split into an
//! entity phase and a relation phase, and how final content is validated.

mod flowscript;

pub use flowscript::{FlowScriptError, FlowStats, validate_flowscript};

use std::sync::Arc;

use fc_core::EngineKind;
use fc_parser::{legalize, parse_markup};
use serde::Serialize;

/// Outcome of an engine-level validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineVerdict {
    pub valid: bool,
    pub error: Option<String>,
}

impl EngineVerdict {
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    #[must_use]
    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
        }
    }
}

/// Capability set of one diagram format, chosen once per session.
pub trait EngineProfile: Send + Sync {
    fn kind(&self) -> EngineKind;

    fn name(&self) -> &'static str;

    /// Whether truncated fragments can be legalized and rendered mid-stream.
    fn legalize_supported(&self) -> bool {
        matches!(self.kind(), EngineKind::Markup)
    }

    /// Whether generation separates entity layout from relational layout.
    fn two_phase(&self) -> bool {
        false
    }

    fn validate(&self, content: &str) -> EngineVerdict;
}

/// Node/edge markup documents. Validity follows from legalize + parse; the
/// repair stage upstream has already converged semantic defects.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkupEngine;

impl EngineProfile for MarkupEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Markup
    }

    fn name(&self) -> &'static str {
        "markup"
    }

    fn validate(&self, content: &str) -> EngineVerdict {
        match parse_markup(&legalize(content)) {
            Ok(_) => EngineVerdict::ok(),
            Err(error) => EngineVerdict::invalid(error.to_string()),
        }
    }
}

/// The built-in line-grammar format: entity declarations plus arrow
/// relations. Stands in for any external grammar parser; generation is
/// two-phase (entities first, relations second).
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowScriptEngine;

impl EngineProfile for FlowScriptEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Grammar
    }

    fn name(&self) -> &'static str {
        "flowscript"
    }

    fn two_phase(&self) -> bool {
        true
    }

    fn validate(&self, content: &str) -> EngineVerdict {
        match validate_flowscript(content) {
            Ok(_) => EngineVerdict::ok(),
            Err(error) => EngineVerdict::invalid(error.to_string()),
        }
    }
}

/// Freeform sketch documents: nothing to validate.
#[derive(Debug, Clone, Copy, Default)]
pub struct SketchEngine;

impl EngineProfile for SketchEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Sketch
    }

    fn name(&self) -> &'static str {
        "sketch"
    }

    fn validate(&self, _content: &str) -> EngineVerdict {
        EngineVerdict::ok()
    }
}

/// Resolve a built-in engine by name.
#[must_use]
pub fn engine_for(name: &str) -> Option<Arc<dyn EngineProfile>> {
    match name {
        "markup" => Some(Arc::new(MarkupEngine)),
        "flowscript" => Some(Arc::new(FlowScriptEngine)),
        "sketch" => Some(Arc::new(SketchEngine)),
        _ => None,
    }
}
