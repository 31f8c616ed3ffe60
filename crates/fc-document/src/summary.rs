//! Human-readable change summaries for the persistence collaborator.

use fc_core::{Document, Element};
use rustc_hash::FxHashMap;

/// Describe the content delta between `base` and `updated` in one sentence,
/// e.g. `"Added 3 nodes and 1 edge; removed 1 node; updated 2 elements"`.
#[must_use]
pub fn summarize_change(base: &Document, updated: &Document) -> String {
    let before: FxHashMap<&str, &Element> = base
        .content()
        .map(|element| (element.id.as_str(), element))
        .collect();
    let after: FxHashMap<&str, &Element> = updated
        .content()
        .map(|element| (element.id.as_str(), element))
        .collect();

    let mut added_nodes = 0usize;
    let mut added_edges = 0usize;
    let mut updated_elements = 0usize;
    for (id, element) in &after {
        match before.get(id) {
            None => {
                if element.is_edge() {
                    added_edges += 1;
                } else {
                    added_nodes += 1;
                }
            }
            Some(previous) if previous != element => updated_elements += 1,
            Some(_) => {}
        }
    }
    let mut removed_nodes = 0usize;
    let mut removed_edges = 0usize;
    for (id, element) in &before {
        if !after.contains_key(id) {
            if element.is_edge() {
                removed_edges += 1;
            } else {
                removed_nodes += 1;
            }
        }
    }

    let mut parts: Vec<String> = Vec::new();
    if added_nodes + added_edges > 0 {
        parts.push(format!(
            "Added {}",
            join_counts(added_nodes, added_edges)
        ));
    }
    if removed_nodes + removed_edges > 0 {
        parts.push(format!(
            "removed {}",
            join_counts(removed_nodes, removed_edges)
        ));
    }
    if updated_elements > 0 {
        parts.push(format!(
            "updated {updated_elements} element{}",
            plural(updated_elements)
        ));
    }
    if parts.is_empty() {
        return "No content changes".to_string();
    }
    let mut summary = parts.join("; ");
    if !summary.starts_with(|c: char| c.is_ascii_uppercase()) {
        // Happens when nothing was added; capitalize the leading clause.
        let mut chars = summary.chars();
        if let Some(first) = chars.next() {
            summary = first.to_ascii_uppercase().to_string() + chars.as_str();
        }
    }
    summary
}

fn join_counts(nodes: usize, edges: usize) -> String {
    match (nodes, edges) {
        (n, 0) => format!("{n} node{}", plural(n)),
        (0, e) => format!("{e} edge{}", plural(e)),
        (n, e) => format!("{n} node{} and {e} edge{}", plural(n), plural(e)),
    }
}

const fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}
