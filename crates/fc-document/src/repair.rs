//! Bounded, idempotent repair of parseable but semantically broken
//! documents. Convergence, not perfection: this stage never errors; pass/fail
//! authority rests with the engine validator.

use fc_core::{BASE_LAYER_ID, Document, Element, LAYER_TAG};
use fc_parser::{parse_markup, write_markup};
use rustc_hash::FxHashSet;

/// Default number of rule passes before giving up on convergence.
pub const DEFAULT_REPAIR_PASSES: usize = 5;

/// What each rule changed, summed across passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub passes: usize,
    pub scaffold_fixes: usize,
    pub id_fixes: usize,
    pub dropped_edges: usize,
    pub style_fixes: usize,
    pub converged: bool,
}

impl RepairReport {
    #[must_use]
    pub const fn total_fixes(&self) -> usize {
        self.scaffold_fixes + self.id_fixes + self.dropped_edges + self.style_fixes
    }
}

/// Repair a markup document string with the default pass budget.
#[must_use]
pub fn repair(doc: &str) -> String {
    repair_with_budget(doc, DEFAULT_REPAIR_PASSES)
}

/// Repair a markup document string, applying at most `budget` rule passes.
///
/// Input is expected to be parseable (the output of legalize/merge); if it is
/// not, the input is returned unchanged rather than erroring.
#[must_use]
pub fn repair_with_budget(doc: &str, budget: usize) -> String {
    match parse_markup(doc) {
        Ok(mut parsed) => {
            let report = repair_document_with_budget(&mut parsed, budget);
            if report.total_fixes() > 0 {
                tracing::debug!(
                    passes = report.passes,
                    fixes = report.total_fixes(),
                    converged = report.converged,
                    "repaired document"
                );
            }
            write_markup(&parsed)
        }
        Err(error) => {
            tracing::warn!(%error, "repair skipped: input did not parse");
            doc.to_string()
        }
    }
}

/// Repair a parsed document in place with the default pass budget.
pub fn repair_document(doc: &mut Document) -> RepairReport {
    repair_document_with_budget(doc, DEFAULT_REPAIR_PASSES)
}

/// Repair a parsed document in place, applying at most `budget` passes of the
/// fixed rule order: scaffold, ids, edges, text style.
pub fn repair_document_with_budget(doc: &mut Document, budget: usize) -> RepairReport {
    let mut report = RepairReport::default();
    for pass in 0..budget.max(1) {
        let mut changed = false;
        changed |= ensure_scaffold(doc, &mut report);
        changed |= normalize_ids(doc, &mut report);
        changed |= drop_dangling_edges(doc, &mut report);
        changed |= ensure_wrap_flags(doc, &mut report);
        report.passes = pass + 1;
        if !changed {
            report.converged = true;
            break;
        }
    }
    report
}

/// Rule 1: mandatory scaffold exists and every element hangs off a live
/// parent chain.
fn ensure_scaffold(doc: &mut Document, report: &mut RepairReport) -> bool {
    let mut changed = false;
    if !doc.elements.iter().any(Element::is_scaffold) {
        doc.elements
            .insert(0, Element::new(LAYER_TAG, BASE_LAYER_ID));
        report.scaffold_fixes += 1;
        changed = true;
    }
    let layer_id = doc
        .base_layer_id()
        .unwrap_or(BASE_LAYER_ID)
        .to_string();
    let ids: FxHashSet<String> = doc
        .elements
        .iter()
        .map(|element| element.id.clone())
        .collect();
    let parents: Vec<Option<String>> = doc
        .elements
        .iter()
        .map(|element| element.parent.clone())
        .collect();

    for index in 0..doc.elements.len() {
        if doc.elements[index].is_scaffold() {
            continue;
        }
        let reattach = match &doc.elements[index].parent {
            None => true,
            Some(parent) => {
                !ids.contains(parent) || has_parent_cycle(&doc.elements, &parents, index)
            }
        };
        if reattach && doc.elements[index].parent.as_deref() != Some(layer_id.as_str()) {
            doc.elements[index].parent = Some(layer_id.clone());
            report.scaffold_fixes += 1;
            changed = true;
        }
    }
    changed
}

/// Walk the ancestor chain of `index`; true when it revisits an element.
fn has_parent_cycle(elements: &[Element], parents: &[Option<String>], index: usize) -> bool {
    let mut visited: FxHashSet<&str> = FxHashSet::default();
    let mut current = elements[index].id.as_str();
    visited.insert(current);
    loop {
        let position = elements.iter().position(|element| element.id == current);
        let Some(position) = position else {
            return false;
        };
        match parents[position].as_deref() {
            None => return false,
            Some(parent) => {
                if !visited.insert(parent) {
                    return true;
                }
                current = parent;
            }
        }
    }
}

/// Rule 2: every element has a unique, non-empty id. Later occurrences of a
/// colliding id get a deterministic `-N` suffix; renames never cascade on
/// re-run because candidates avoid every id present anywhere in the document.
fn normalize_ids(doc: &mut Document, report: &mut RepairReport) -> bool {
    let mut changed = false;
    let mut occupied: FxHashSet<String> = doc
        .elements
        .iter()
        .map(|element| element.id.clone())
        .filter(|id| !id.is_empty())
        .collect();
    let mut seen: FxHashSet<String> = FxHashSet::default();

    for index in 0..doc.elements.len() {
        let id = doc.elements[index].id.clone();
        if id.is_empty() {
            let fresh = next_free(&occupied, &doc.elements[index].tag);
            occupied.insert(fresh.clone());
            seen.insert(fresh.clone());
            doc.elements[index].id = fresh;
            report.id_fixes += 1;
            changed = true;
        } else if seen.contains(&id) {
            let fresh = next_free(&occupied, &id);
            occupied.insert(fresh.clone());
            seen.insert(fresh.clone());
            doc.elements[index].id = fresh;
            report.id_fixes += 1;
            changed = true;
        } else {
            seen.insert(id);
        }
    }
    changed
}

fn next_free(occupied: &FxHashSet<String>, stem: &str) -> String {
    let mut k = 1usize;
    loop {
        let candidate = format!("{stem}-{k}");
        if !occupied.contains(&candidate) {
            return candidate;
        }
        k += 1;
    }
}

/// Rule 3: drop graph-edges whose endpoint id does not exist among current
/// elements. Already-valid edges are untouched on re-run.
fn drop_dangling_edges(doc: &mut Document, report: &mut RepairReport) -> bool {
    let ids: FxHashSet<String> = doc
        .elements
        .iter()
        .map(|element| element.id.clone())
        .collect();
    let before = doc.elements.len();
    doc.elements.retain(|element| {
        if !element.is_edge() {
            return true;
        }
        let endpoint_ok = |endpoint: &Option<String>| match endpoint {
            Some(id) => ids.contains(id),
            None => false,
        };
        endpoint_ok(&element.source) && endpoint_ok(&element.target)
    });
    let dropped = before - doc.elements.len();
    report.dropped_edges += dropped;
    dropped > 0
}

/// Rule 4: every text-bearing element carries the minimum wrap flag the
/// renderer needs. An explicit `wrap=` setting is left alone.
fn ensure_wrap_flags(doc: &mut Document, report: &mut RepairReport) -> bool {
    let mut changed = false;
    for element in &mut doc.elements {
        if element.label().is_none() {
            continue;
        }
        let style = element.attributes.get("style").cloned().unwrap_or_default();
        if has_style_key(&style, "wrap") {
            continue;
        }
        let updated = if style.is_empty() {
            "wrap=word".to_string()
        } else {
            format!("{};wrap=word", style.trim_end_matches(';'))
        };
        element.attributes.insert("style".to_string(), updated);
        report.style_fixes += 1;
        changed = true;
    }
    changed
}

fn has_style_key(style: &str, key: &str) -> bool {
    style.split(';').any(|token| {
        token
            .split('=')
            .next()
            .map(str::trim)
            .is_some_and(|name| name == key)
    })
}

#[cfg(test)]
mod tests {
    use super::{
        DEFAULT_REPAIR_PASSES, repair, repair_document, repair_document_with_budget,
        repair_with_budget,
    };
    use fc_core::{BASE_LAYER_ID, CanvasMeta, Document, Element};
    use fc_parser::parse_markup;
    use proptest::prelude::*;

    fn content_only(elements: Vec<Element>) -> Document {
        Document {
            canvas: CanvasMeta::default(),
            elements,
        }
    }

    #[test]
    fn synthesizes_missing_scaffold() {
        let mut doc = content_only(vec![Element::new("node", "a")]);
        let report = repair_document(&mut doc);
        assert_eq!(doc.base_layer_id(), Some(BASE_LAYER_ID));
        assert!(report.scaffold_fixes >= 1);
        assert!(report.converged);
    }

    #[test]
    fn reattaches_orphans_and_dangling_parents() {
        let mut doc = Document::scaffold();
        let mut dangling = Element::new("node", "a");
        dangling.parent = Some("missing".to_string());
        doc.elements.push(dangling);
        repair_document(&mut doc);
        assert_eq!(
            doc.find("a").and_then(|e| e.parent.as_deref()),
            Some(BASE_LAYER_ID)
        );
    }

    #[test]
    fn breaks_parent_cycles() {
        let mut doc = Document::scaffold();
        doc.elements
            .push(Element::new("group", "a").with_parent("b"));
        doc.elements
            .push(Element::new("group", "b").with_parent("a"));
        repair_document(&mut doc);
        let a_parent = doc.find("a").and_then(|e| e.parent.clone());
        let b_parent = doc.find("b").and_then(|e| e.parent.clone());
        // At least one side of the cycle is reattached to the layer.
        assert!(
            a_parent.as_deref() == Some(BASE_LAYER_ID)
                || b_parent.as_deref() == Some(BASE_LAYER_ID)
        );
    }

    #[test]
    fn duplicate_ids_get_deterministic_suffixes() {
        let mut doc = Document::scaffold();
        doc.elements.push(Element::node("2").with_attr("label", "first"));
        doc.elements.push(Element::node("2").with_attr("label", "second"));
        doc.elements.push(Element::edge("e", "2", "2"));
        repair_document(&mut doc);

        let ids: Vec<&str> = doc
            .content()
            .map(|element| element.id.as_str())
            .collect();
        assert_eq!(ids, vec!["2", "2-1", "e"]);
        // The keeper of the original id is the first occurrence.
        assert_eq!(doc.find("2").and_then(|e| e.label()), Some("first"));
        // Edges pointing at "2" still resolve.
        assert!(doc.contains_id("e"));
    }

    #[test]
    fn suffix_assignment_avoids_existing_ids() {
        let mut doc = Document::scaffold();
        doc.elements.push(Element::node("2"));
        doc.elements.push(Element::node("2"));
        doc.elements.push(Element::node("2-1"));
        repair_document(&mut doc);
        let ids: Vec<&str> = doc.content().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "2-2", "2-1"]);
    }

    #[test]
    fn empty_ids_are_assigned_from_tag() {
        let mut doc = Document::scaffold();
        doc.elements.push(Element::new("node", ""));
        doc.elements.push(Element::new("node", ""));
        repair_document(&mut doc);
        let ids: Vec<&str> = doc.content().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["node-1", "node-2"]);
    }

    #[test]
    fn dangling_edges_are_dropped_valid_edges_kept() {
        let mut doc = Document::scaffold();
        doc.elements.push(Element::node("a"));
        doc.elements.push(Element::node("b"));
        doc.elements.push(Element::edge("ok", "a", "b"));
        doc.elements.push(Element::edge("bad", "a", "ghost"));
        let mut half = Element::new("edge", "half").with_parent(BASE_LAYER_ID);
        half.source = Some("a".to_string());
        doc.elements.push(half);
        let report = repair_document(&mut doc);
        assert!(doc.contains_id("ok"));
        assert!(!doc.contains_id("bad"));
        assert!(!doc.contains_id("half"));
        assert_eq!(report.dropped_edges, 2);
    }

    #[test]
    fn labeled_elements_get_wrap_flag() {
        let mut doc = Document::scaffold();
        doc.elements.push(Element::node("a").with_attr("label", "Start"));
        doc.elements.push(
            Element::node("b")
                .with_attr("label", "End")
                .with_attr("style", "fill=#fff"),
        );
        doc.elements.push(
            Element::node("c")
                .with_attr("label", "Note")
                .with_attr("style", "wrap=none"),
        );
        repair_document(&mut doc);
        assert_eq!(
            doc.find("a").unwrap().attributes.get("style").unwrap(),
            "wrap=word"
        );
        assert_eq!(
            doc.find("b").unwrap().attributes.get("style").unwrap(),
            "fill=#fff;wrap=word"
        );
        // Explicit wrap settings are not overridden.
        assert_eq!(
            doc.find("c").unwrap().attributes.get("style").unwrap(),
            "wrap=none"
        );
    }

    #[test]
    fn string_repair_matches_scenario() {
        let broken = "<scene>\n  <node id=\"2\" label=\"A\"/>\n  <node id=\"2\" label=\"B\"/>\n</scene>";
        let fixed = repair(broken);
        let doc = parse_markup(&fixed).expect("repaired output parses");
        let ids: Vec<&str> = doc.content().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "2-1"]);
    }

    #[test]
    fn unparseable_input_is_returned_unchanged() {
        let broken = "<scene><node id=\"a\">";
        assert_eq!(repair(broken), broken);
    }

    #[test]
    fn pass_budget_bounds_work() {
        let mut doc = content_only(vec![Element::new("node", "a"), Element::new("node", "a")]);
        let report = repair_document_with_budget(&mut doc, 1);
        assert_eq!(report.passes, 1);
        // One pass fixes everything here; a second would only confirm.
        assert!(!report.converged);
        let report = repair_document(&mut doc);
        assert!(report.converged);
        assert!(report.passes <= DEFAULT_REPAIR_PASSES);
    }

    #[test]
    fn repair_is_idempotent_on_string_form() {
        let broken = "<scene><node id=\"x\" label=\"L\"/><node id=\"x\"/>\
                      <edge id=\"e\" source=\"x\" target=\"nowhere\"/></scene>";
        let once = repair(broken);
        assert_eq!(repair(&once), once);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn prop_repair_is_idempotent(
            ids in proptest::collection::vec("[a-z0-9]{0,3}", 0..10),
            labels in proptest::collection::vec(proptest::bool::ANY, 0..10),
        ) {
            let mut doc = Document {
                canvas: CanvasMeta::default(),
                elements: Vec::new(),
            };
            for (index, id) in ids.iter().enumerate() {
                let mut element = Element::new("node", id.as_str());
                if labels.get(index).copied().unwrap_or(false) {
                    element = element.with_attr("label", "text");
                }
                doc.elements.push(element);
            }
            let once = {
                let mut first = doc.clone();
                repair_document(&mut first);
                first
            };
            let twice = {
                let mut second = once.clone();
                let report = repair_document(&mut second);
                prop_assert_eq!(report.total_fixes(), 0);
                second
            };
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_repaired_documents_have_unique_ids(
            ids in proptest::collection::vec("[a-z0-9]{0,3}", 0..10),
        ) {
            let mut doc = content_only(
                ids.iter().map(|id| Element::new("node", id.as_str())).collect(),
            );
            repair_document(&mut doc);
            let mut seen = std::collections::HashSet::new();
            for element in &doc.elements {
                prop_assert!(!element.id.is_empty());
                prop_assert!(seen.insert(element.id.clone()), "duplicate {}", element.id);
            }
        }
    }
}
