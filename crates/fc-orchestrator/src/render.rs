//! The canvas-widget boundary: where throttled preview updates land.

use std::sync::Mutex;

use fc_core::Document;

/// Receives best-effort preview updates during streaming and the final
/// committed state. Markup-family sessions deliver parsed documents;
/// grammar/sketch sessions deliver raw source.
pub trait RenderSink: Send + Sync {
    fn render_document(&self, _document: &Document) {}

    fn render_code(&self, _code: &str) {}
}

/// Sink that ignores every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl RenderSink for NullSink {}

/// Sink that records every update, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingSink {
    documents: Mutex<Vec<Document>>,
    codes: Mutex<Vec<String>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn documents(&self) -> Vec<Document> {
        self.documents.lock().map(|d| d.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn codes(&self) -> Vec<String> {
        self.codes.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl RenderSink for RecordingSink {
    fn render_document(&self, document: &Document) {
        if let Ok(mut documents) = self.documents.lock() {
            documents.push(document.clone());
        }
    }

    fn render_code(&self, code: &str) {
        if let Ok(mut codes) = self.codes.lock() {
            codes.push(code.to_string());
        }
    }
}
