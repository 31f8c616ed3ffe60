//! Prompt assembly for generation, the two-phase split, and auto-fix
//! requests.

use fc_core::{ChatMessage, EngineKind};
use fc_engine::EngineProfile;

const SYSTEM_MARKUP: &str = "You are co-authoring a diagram with the user. \
Reply with an optional short plan wrapped in <plan>...</plan>, then the \
complete scene markup in a fenced code block. Always emit the whole document, \
not a patch, and keep the ids of existing elements stable so the canvas can \
track them. Nodes use <node id=..>, edges use <edge id=.. source=.. \
target=..> with optional <point x=.. y=../> waypoints.";

const SYSTEM_GRAMMAR: &str = "You are co-authoring a diagram written in a \
line-oriented source language. Reply with an optional short plan wrapped in \
<plan>...</plan>, then the complete source in a fenced code block. Emit the \
whole source, never a fragment.";

const SYSTEM_SKETCH: &str = "You are co-authoring a freeform sketch. Reply \
with the complete sketch content in a fenced code block.";

const SYSTEM_FIXER: &str = "You fix diagram source that a validator \
rejected. Reply with the corrected, complete source in a fenced code block \
and nothing else.";

pub(crate) fn system_for(kind: EngineKind) -> &'static str {
    match kind {
        EngineKind::Markup => SYSTEM_MARKUP,
        EngineKind::Grammar => SYSTEM_GRAMMAR,
        EngineKind::Sketch => SYSTEM_SKETCH,
    }
}

/// Messages for a new request. `current` carries the serialized document the
/// user is editing, when there is one, so the model regenerates it rather
/// than starting blank. Two-phase engines get the entity-only framing here;
/// the relation phase is issued separately after this stream completes.
pub(crate) fn initial_messages(
    engine: &dyn EngineProfile,
    prompt: &str,
    current: Option<&str>,
) -> Vec<ChatMessage> {
    let mut request = String::new();
    if let Some(current) = current {
        request.push_str("Current document:\n");
        request.push_str(current);
        request.push_str("\n\n");
    }
    request.push_str(prompt);
    if engine.two_phase() {
        request.push_str(
            "\n\nFirst step: declare only the entities of the diagram. \
             Do not emit any relations yet.",
        );
    }
    vec![
        ChatMessage::system(system_for(engine.kind())),
        ChatMessage::user(request),
    ]
}

/// User instruction that seeds the relation phase.
pub(crate) fn relation_phase_instruction() -> String {
    "Now connect the declared entities with their relations. Output the \
     complete source again: every entity line from the first step, followed \
     by the relation lines."
        .to_string()
}

/// Messages asking the model to fix rejected content, quoting the
/// validator's error verbatim.
pub(crate) fn fix_messages(code: &str, error: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_FIXER),
        ChatMessage::user(format!(
            "The validator rejected this source:\n\n```\n{code}\n```\n\n\
             Error: {error}\n\nReturn the corrected complete source."
        )),
    ]
}
