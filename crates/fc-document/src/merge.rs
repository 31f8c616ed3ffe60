//! Stateful-looking merge expressed as a pure function: reconcile a
//! legalized fragment's parsed form into the authoritative document.

use fc_core::{BASE_LAYER_ID, Document, Element, LAYER_TAG};
use rustc_hash::FxHashSet;

/// Merge `incoming` content into `base`, preserving canvas metadata.
///
/// Canvas metadata is copied unconditionally from `base`, never from
/// `incoming`. Scaffold layers come from `base` (or the default scaffold when
/// `base` carries none) unless `incoming` redefines the same id. Content is
/// reconciled by id: present in both → `incoming`'s version wholesale;
/// only in `base` → dropped (this pipeline models whole-document
/// regeneration); only in `incoming` → inserted. Orphan content is attached
/// to the base layer. Pure and safe to call on every throttle tick.
#[must_use]
pub fn merge(base: &Document, incoming: &Document) -> Document {
    let incoming_ids: FxHashSet<&str> = incoming
        .elements
        .iter()
        .map(|element| element.id.as_str())
        .collect();

    let mut elements: Vec<Element> = base
        .elements
        .iter()
        .filter(|element| element.is_scaffold() && !incoming_ids.contains(element.id.as_str()))
        .cloned()
        .collect();
    if !elements.iter().any(Element::is_scaffold)
        && !incoming.elements.iter().any(Element::is_scaffold)
    {
        elements.push(Element::new(LAYER_TAG, BASE_LAYER_ID));
    }

    let layer_id = elements
        .iter()
        .chain(incoming.elements.iter())
        .find(|element| element.is_scaffold())
        .map(|element| element.id.clone())
        .unwrap_or_else(|| BASE_LAYER_ID.to_string());

    for element in &incoming.elements {
        let mut element = element.clone();
        if element.parent.is_none() && !element.is_scaffold() {
            element.parent = Some(layer_id.clone());
        }
        elements.push(element);
    }

    Document {
        canvas: base.canvas.clone(),
        elements,
    }
}
