//! The persistence collaborator boundary: receives only the final committed
//! content plus a human-readable change summary.

use std::sync::Mutex;

pub trait DocumentStore: Send + Sync {
    fn commit(&self, content: &str, summary: &str);
}

/// Store that discards commits.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

impl DocumentStore for NullStore {
    fn commit(&self, _content: &str, _summary: &str) {}
}

/// Store that keeps commits in memory, for tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemoryStore {
    commits: Mutex<Vec<(String, String)>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed `(content, summary)` pairs in commit order.
    #[must_use]
    pub fn commits(&self) -> Vec<(String, String)> {
        self.commits.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl DocumentStore for MemoryStore {
    fn commit(&self, content: &str, summary: &str) {
        if let Ok(mut commits) = self.commits.lock() {
            commits.push((content.to_string(), summary.to_string()));
        }
    }
}
