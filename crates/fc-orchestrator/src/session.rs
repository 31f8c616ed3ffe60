//! Per-session generation driver.
//!
//! State machine: Idle → Streaming → Validating → {Complete | Repairing →
//! Validating (loop) | Failed}. One session at a time: `generate` borrows the
//! orchestrator mutably, so a new submission cannot start while one runs.

use std::sync::Arc;
use std::time::Duration;

use fc_core::{
    ChatMessage, Document, EngineKind, GenerationSession, RepairAttempt, SessionStatus, SynthError,
};
use fc_document::{
    DEFAULT_REPAIR_PASSES, merge, repair_document_with_budget, summarize_change,
};
use fc_engine::EngineProfile;
use fc_parser::{legalize, parse_markup, parse_response, write_markup};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::preview::{PreviewProvider, preview_with_retry};
use crate::prompts;
use crate::render::{NullSink, RenderSink};
use crate::store::{DocumentStore, NullStore};
use crate::throttle::CoalescingSlot;
use crate::transport::ModelTransport;

/// Tunable bounds of the orchestrator. Every retry or pass budget lives here
/// rather than in control flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Coalescing interval between streaming render ticks.
    pub render_interval: Duration,
    /// Rounds of the model-assisted auto-repair loop.
    pub max_repair_attempts: usize,
    /// Rule passes inside one semantic repair run.
    pub max_repair_passes: usize,
    /// Preview attempts before skipping phase-two context.
    pub preview_retries: usize,
    /// Fixed backoff between preview attempts.
    pub preview_backoff: Duration,
    /// Capacity of the bounded stream-chunk channel.
    pub stream_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            render_interval: Duration::from_millis(150),
            max_repair_attempts: 3,
            max_repair_passes: DEFAULT_REPAIR_PASSES,
            preview_retries: 3,
            preview_backoff: Duration::from_millis(250),
            stream_capacity: 256,
        }
    }
}

/// Result of a completed session.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub status: SessionStatus,
    /// The committed document. For grammar/sketch sessions this is the
    /// unchanged base; the generated source lives in `content`.
    pub document: Document,
    pub content: String,
    pub plan: Option<String>,
    pub summary: String,
    pub repair_attempts: Vec<RepairAttempt>,
}

/// Result of the bounded auto-repair retry loop. The last attempted code is
/// returned whether or not it validated; pass/fail is the caller's decision.
#[derive(Debug, Clone)]
pub struct RepairLoopResult {
    pub code: String,
    pub valid: bool,
    pub attempts: usize,
    pub last_error: Option<String>,
}

pub struct Orchestrator {
    transport: Arc<dyn ModelTransport>,
    engine: Arc<dyn EngineProfile>,
    sink: Arc<dyn RenderSink>,
    store: Arc<dyn DocumentStore>,
    preview: Option<Arc<dyn PreviewProvider>>,
    config: OrchestratorConfig,
    last_request: Option<Vec<ChatMessage>>,
    last_session: Option<GenerationSession>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(transport: Arc<dyn ModelTransport>, engine: Arc<dyn EngineProfile>) -> Self {
        Self {
            transport,
            engine,
            sink: Arc::new(NullSink),
            store: Arc::new(NullStore),
            preview: None,
            config: OrchestratorConfig::default(),
            last_request: None,
            last_session: None,
        }
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn RenderSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = store;
        self
    }

    #[must_use]
    pub fn with_preview(mut self, preview: Arc<dyn PreviewProvider>) -> Self {
        self.preview = Some(preview);
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// The session most recently run to completion or failure.
    #[must_use]
    pub fn last_session(&self) -> Option<&GenerationSession> {
        self.last_session.as_ref()
    }

    /// Run one generation session for `prompt` against `base`.
    ///
    /// There is no cancellation primitive: a session runs to stream
    /// completion or transport error.
    pub async fn generate(
        &mut self,
        base: &Document,
        prompt: &str,
    ) -> Result<SessionOutcome, SynthError> {
        let current = if self.engine.legalize_supported() && !base.is_empty() {
            Some(write_markup(base))
        } else {
            None
        };
        let messages = prompts::initial_messages(self.engine.as_ref(), prompt, current.as_deref());
        self.last_request = Some(messages.clone());
        self.run(base, messages).await
    }

    /// Resend the exact message sequence of the most recent request as a new
    /// session, for transient-failure recovery.
    pub async fn replay(&mut self, base: &Document) -> Result<SessionOutcome, SynthError> {
        let messages = self
            .last_request
            .clone()
            .ok_or_else(|| SynthError::transport("no previous request to replay"))?;
        self.run(base, messages).await
    }

    async fn run(
        &mut self,
        base: &Document,
        messages: Vec<ChatMessage>,
    ) -> Result<SessionOutcome, SynthError> {
        let mut session = GenerationSession::start();
        match self.run_inner(base, &messages, &mut session).await {
            Ok((document, content)) => {
                session.finish(SessionStatus::Complete);
                let summary = if self.engine.legalize_supported() {
                    summarize_change(base, &document)
                } else {
                    format!("Regenerated {} source", self.engine.name())
                };
                // Atomic commit of the final state at session completion.
                self.store.commit(&content, &summary);
                let outcome = SessionOutcome {
                    status: SessionStatus::Complete,
                    document,
                    content,
                    plan: session.plan.clone(),
                    summary,
                    repair_attempts: session.repair_attempts.clone(),
                };
                self.last_session = Some(session);
                Ok(outcome)
            }
            Err(error) => {
                session.finish(SessionStatus::Failed);
                self.last_session = Some(session);
                tracing::error!(code = error.code().as_str(), %error, "generation session failed");
                Err(error)
            }
        }
    }

    async fn run_inner(
        &self,
        base: &Document,
        messages: &[ChatMessage],
        session: &mut GenerationSession,
    ) -> Result<(Document, String), SynthError> {
        session.status = SessionStatus::Streaming;
        let mut final_text = self.stream_phase(messages, base, session).await?;

        if self.engine.two_phase() {
            let phase_two = self.phase_two_messages(messages, &final_text).await;
            final_text = self.stream_phase(&phase_two, base, session).await?;
        }

        session.status = SessionStatus::Validating;
        let code = parse_response(&final_text).code.unwrap_or_default();

        let (document, mut content) = if self.engine.legalize_supported() {
            let document = assemble_document(base, &code, self.config.max_repair_passes)
                .map_err(|error| SynthError::validation(error.to_string(), 0))?;
            let content = write_markup(&document);
            self.sink.render_document(&document);
            (document, content)
        } else {
            (base.clone(), code)
        };

        let verdict = self.engine.validate(&content);
        if !verdict.valid {
            let error = verdict
                .error
                .unwrap_or_else(|| "content rejected by engine validator".to_string());
            if self.engine.kind() == EngineKind::Grammar {
                let result = self.run_repair_loop(&content, &error, session).await?;
                content = result.code;
                if !result.valid {
                    return Err(SynthError::validation(
                        result.last_error.unwrap_or(error),
                        result.attempts,
                    ));
                }
                self.sink.render_code(&content);
            } else {
                return Err(SynthError::validation(error, 0));
            }
        }

        Ok((document, content))
    }

    /// Bounded model-assisted auto-fix: supply the failing code and the
    /// validator's error, re-validate the reply, repeat at most
    /// `max_repair_attempts` times.
    pub async fn run_repair_loop(
        &self,
        code: &str,
        first_error: &str,
        session: &mut GenerationSession,
    ) -> Result<RepairLoopResult, SynthError> {
        let mut code = code.to_string();
        let mut error = first_error.to_string();
        let mut attempts = 0usize;
        while attempts < self.config.max_repair_attempts {
            attempts += 1;
            session.status = SessionStatus::Repairing;
            tracing::info!(
                attempt = attempts,
                bound = self.config.max_repair_attempts,
                %error,
                "requesting auto-fix"
            );
            let reply = self
                .transport
                .call(&prompts::fix_messages(&code, &error))
                .await?;
            let fixed = parse_response(&reply).code.unwrap_or_default();
            session.repair_attempts.push(RepairAttempt {
                input_code: code.clone(),
                error: error.clone(),
                output_code: fixed.clone(),
            });
            code = fixed;
            session.status = SessionStatus::Validating;
            let verdict = self.engine.validate(&code);
            if verdict.valid {
                return Ok(RepairLoopResult {
                    code,
                    valid: true,
                    attempts,
                    last_error: None,
                });
            }
            error = verdict
                .error
                .unwrap_or_else(|| "content rejected by engine validator".to_string());
        }
        Ok(RepairLoopResult {
            code,
            valid: false,
            attempts,
            last_error: Some(error),
        })
    }

    /// Consume one response stream, re-parsing the accumulated buffer per
    /// chunk and rendering on the coalescing interval. A tick that fails is
    /// skipped; the next tick sees a larger buffer. The trailing update is
    /// always applied after the stream ends.
    async fn stream_phase(
        &self,
        messages: &[ChatMessage],
        base: &Document,
        session: &mut GenerationSession,
    ) -> Result<String, SynthError> {
        let (tx, mut rx) = mpsc::channel(self.config.stream_capacity.max(1));
        let transport = Arc::clone(&self.transport);
        let messages_owned = messages.to_vec();
        let worker =
            tokio::spawn(async move { transport.stream(&messages_owned, tx).await });

        let mut ticker = tokio::time::interval(self.config.render_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut slot: CoalescingSlot<String> = CoalescingSlot::new();

        loop {
            tokio::select! {
                chunk = rx.recv() => match chunk {
                    Some(chunk) => {
                        let parsed = parse_response(&chunk.accumulated);
                        session.record(&chunk.accumulated, parsed.plan.as_deref(), parsed.code.as_deref());
                        if let Some(code) = parsed.code {
                            slot.submit(code);
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if let Some(code) = slot.take() {
                        self.render_tick(base, &code);
                    }
                }
            }
        }
        if let Some(code) = slot.take() {
            self.render_tick(base, &code);
        }

        worker
            .await
            .map_err(|error| SynthError::transport(format!("stream task aborted: {error}")))?
    }

    fn render_tick(&self, base: &Document, code: &str) {
        if self.engine.legalize_supported() {
            match assemble_document(base, code, self.config.max_repair_passes) {
                Ok(document) => self.sink.render_document(&document),
                Err(error) => {
                    tracing::debug!(code = error.code().as_str(), %error, "render tick skipped");
                }
            }
        } else {
            self.sink.render_code(code);
        }
    }

    async fn phase_two_messages(
        &self,
        phase_one: &[ChatMessage],
        phase_one_text: &str,
    ) -> Vec<ChatMessage> {
        let mut messages = phase_one.to_vec();
        messages.push(ChatMessage::assistant(phase_one_text));
        let mut follow_up = ChatMessage::user(prompts::relation_phase_instruction());
        if let Some(provider) = &self.preview {
            let code = parse_response(phase_one_text).code.unwrap_or_default();
            if !code.is_empty()
                && let Some(image) = preview_with_retry(
                    provider.as_ref(),
                    &code,
                    self.engine.kind(),
                    self.config.preview_retries,
                    self.config.preview_backoff,
                )
                .await
            {
                follow_up = follow_up.with_image(image.media_type, image.data);
            }
        }
        messages.push(follow_up);
        messages
    }
}

/// legalize → parse → merge → repair, the per-tick markup pipeline.
fn assemble_document(
    base: &Document,
    code: &str,
    repair_budget: usize,
) -> Result<Document, SynthError> {
    let incoming =
        parse_markup(&legalize(code)).map_err(|error| SynthError::merge(error.to_string()))?;
    let mut document = merge(base, &incoming);
    repair_document_with_budget(&mut document, repair_budget);
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::{Orchestrator, OrchestratorConfig};
    use crate::preview::{PreviewImage, PreviewProvider};
    use crate::render::RecordingSink;
    use crate::store::MemoryStore;
    use crate::transport::ScriptedTransport;
    use async_trait::async_trait;
    use fc_core::{ContentPart, Document, Element, EngineKind, SessionStatus, SynthError};
    use fc_engine::{FlowScriptEngine, MarkupEngine, SketchEngine};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            render_interval: Duration::from_millis(5),
            preview_backoff: Duration::ZERO,
            ..OrchestratorConfig::default()
        }
    }

    fn markup_response() -> String {
        "<plan>Two boxes and an arrow</plan>\n```xml\n<scene>\n<node id=\"a\" label=\"Start\"/>\n\
         <node id=\"b\" label=\"End\"/>\n<edge id=\"e\" source=\"a\" target=\"b\"/>\n</scene>\n```\n"
            .to_string()
    }

    #[tokio::test]
    async fn single_phase_markup_session_completes() {
        let transport = Arc::new(
            ScriptedTransport::new([markup_response()])
                .with_chunk_size(8)
                .with_chunk_delay(Duration::from_millis(1)),
        );
        let sink = Arc::new(RecordingSink::new());
        let store = Arc::new(MemoryStore::new());
        let mut orchestrator = Orchestrator::new(transport, Arc::new(MarkupEngine))
            .with_sink(sink.clone())
            .with_store(store.clone())
            .with_config(fast_config());

        let base = Document::scaffold();
        let outcome = orchestrator
            .generate(&base, "draw start to end")
            .await
            .expect("session completes");

        assert_eq!(outcome.status, SessionStatus::Complete);
        assert_eq!(outcome.plan.as_deref(), Some("Two boxes and an arrow"));
        assert!(outcome.document.contains_id("a"));
        assert!(outcome.document.contains_id("e"));
        assert!(outcome.repair_attempts.is_empty());

        // The throttled pipeline rendered at least the trailing state.
        let documents = sink.documents();
        assert!(!documents.is_empty());
        let last = documents.last().expect("final render");
        assert!(last.contains_id("b"));

        // The final state was committed exactly once, with a summary.
        let commits = store.commits();
        assert_eq!(commits.len(), 1);
        assert!(commits[0].0.contains("id=\"a\""));
        assert!(commits[0].1.contains("Added"));
    }

    #[tokio::test]
    async fn canvas_metadata_survives_generation() {
        let transport = Arc::new(ScriptedTransport::new([markup_response()]));
        let mut orchestrator = Orchestrator::new(transport, Arc::new(MarkupEngine))
            .with_config(fast_config());

        let mut base = Document::scaffold();
        base.canvas.dx = 42.0;
        base.canvas.zoom = 1.5;
        let outcome = orchestrator
            .generate(&base, "anything")
            .await
            .expect("completes");
        assert_eq!(outcome.document.canvas, base.canvas);
    }

    #[tokio::test]
    async fn base_content_is_replaced_not_patched() {
        let transport = Arc::new(ScriptedTransport::new([markup_response()]));
        let mut orchestrator = Orchestrator::new(transport, Arc::new(MarkupEngine))
            .with_config(fast_config());

        let mut base = Document::scaffold();
        base.elements.push(Element::node("stale"));
        let outcome = orchestrator
            .generate(&base, "replace it all")
            .await
            .expect("completes");
        assert!(!outcome.document.contains_id("stale"));
        assert!(outcome.document.contains_id("a"));
    }

    #[tokio::test]
    async fn repair_loop_stops_at_first_valid_attempt() {
        // Phase 1 entities, phase 2 relations (invalid), then two fixes: the
        // first still invalid, the second valid.
        let transport = Arc::new(ScriptedTransport::new([
            "```\nnode a\nnode b\n```".to_string(),
            "```\nnode a\nnode b\na -> ghost\n```".to_string(),
            "```\nnode a\nnode b\na -> ghost2\n```".to_string(),
            "```\nnode a\nnode b\na -> b\n```".to_string(),
        ]));
        let store = Arc::new(MemoryStore::new());
        let mut orchestrator = Orchestrator::new(
            transport.clone(),
            Arc::new(FlowScriptEngine),
        )
        .with_store(store.clone())
        .with_config(fast_config());

        let base = Document::scaffold();
        let outcome = orchestrator
            .generate(&base, "two linked boxes")
            .await
            .expect("repaired to validity");

        assert_eq!(outcome.repair_attempts.len(), 2);
        assert_eq!(outcome.content, "node a\nnode b\na -> b");
        assert!(outcome.repair_attempts[0].error.contains("ghost"));
        // The committed content is the second (valid) attempt's output.
        assert_eq!(store.commits().len(), 1);
        assert_eq!(store.commits()[0].0, outcome.content);
    }

    #[tokio::test]
    async fn repair_loop_exhaustion_is_a_validation_error() {
        let transport = Arc::new(ScriptedTransport::new([
            "```\nnode a\n```".to_string(),
            "```\na -> ghost\nnode a\n```".to_string(),
            "```\na -> ghost\nnode a\n```".to_string(),
            "```\na -> ghost\nnode a\n```".to_string(),
            "```\na -> ghost\nnode a\n```".to_string(),
        ]));
        let mut orchestrator = Orchestrator::new(transport, Arc::new(FlowScriptEngine))
            .with_config(fast_config());

        let base = Document::scaffold();
        let error = orchestrator
            .generate(&base, "doomed")
            .await
            .expect_err("never validates");
        assert!(matches!(
            error,
            SynthError::Validation { attempts: 3, .. }
        ));
        let session = orchestrator.last_session().expect("session retained");
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.repair_attempts.len(), 3);
    }

    #[tokio::test]
    async fn transport_failure_fails_the_session() {
        let transport = Arc::new(ScriptedTransport::new(Vec::<String>::new()));
        let mut orchestrator = Orchestrator::new(transport, Arc::new(MarkupEngine))
            .with_config(fast_config());
        let error = orchestrator
            .generate(&Document::scaffold(), "no responses scripted")
            .await
            .expect_err("transport error");
        assert!(matches!(error, SynthError::Transport { .. }));
        assert_eq!(
            orchestrator.last_session().map(|s| s.status),
            Some(SessionStatus::Failed)
        );
    }

    #[tokio::test]
    async fn replay_resends_the_same_messages() {
        let transport = Arc::new(ScriptedTransport::new([
            markup_response(),
            markup_response(),
        ]));
        let mut orchestrator = Orchestrator::new(
            transport.clone(),
            Arc::new(MarkupEngine),
        )
        .with_config(fast_config());

        let base = Document::scaffold();
        orchestrator.generate(&base, "draw it").await.expect("first run");
        orchestrator.replay(&base).await.expect("replayed run");

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
    }

    #[tokio::test]
    async fn replay_without_prior_request_errors() {
        let transport = Arc::new(ScriptedTransport::new([markup_response()]));
        let mut orchestrator = Orchestrator::new(transport, Arc::new(MarkupEngine));
        let error = orchestrator
            .replay(&Document::scaffold())
            .await
            .expect_err("nothing to replay");
        assert!(matches!(error, SynthError::Transport { .. }));
    }

    struct CountingPreview {
        failures: usize,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl PreviewProvider for CountingPreview {
        async fn render_preview(
            &self,
            _content: &str,
            _kind: EngineKind,
        ) -> Result<PreviewImage, SynthError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.failures {
                Err(SynthError::preview("not yet"))
            } else {
                Ok(PreviewImage {
                    media_type: "image/png".to_string(),
                    data: "cHJldmlldw==".to_string(),
                })
            }
        }
    }

    #[tokio::test]
    async fn two_phase_seeds_relation_request_with_phase_one_output() {
        let transport = Arc::new(ScriptedTransport::new([
            "```\nnode a\nnode b\n```".to_string(),
            "```\nnode a\nnode b\na -> b\n```".to_string(),
        ]));
        let preview = Arc::new(CountingPreview {
            failures: 1,
            attempts: AtomicUsize::new(0),
        });
        let mut orchestrator = Orchestrator::new(
            transport.clone(),
            Arc::new(FlowScriptEngine),
        )
        .with_preview(preview.clone())
        .with_config(fast_config());

        let outcome = orchestrator
            .generate(&Document::scaffold(), "pipeline")
            .await
            .expect("two phases complete");
        assert_eq!(outcome.content, "node a\nnode b\na -> b");

        let calls = transport.calls();
        assert_eq!(calls.len(), 2, "phases are strictly sequential");
        // The relation request replays phase one's literal output.
        let phase_two = &calls[1];
        assert!(
            phase_two
                .iter()
                .any(|message| message.joined_text().contains("node a\nnode b"))
        );
        // The preview retried past one failure and landed as an image part.
        assert_eq!(preview.attempts.load(Ordering::SeqCst), 2);
        let has_image = phase_two.iter().any(|message| {
            message
                .parts
                .iter()
                .any(|part| matches!(part, ContentPart::Image { .. }))
        });
        assert!(has_image);
    }

    #[tokio::test]
    async fn preview_exhaustion_is_non_fatal() {
        let transport = Arc::new(ScriptedTransport::new([
            "```\nnode a\n```".to_string(),
            "```\nnode a\n```".to_string(),
        ]));
        let preview = Arc::new(CountingPreview {
            failures: 100,
            attempts: AtomicUsize::new(0),
        });
        let mut orchestrator = Orchestrator::new(transport, Arc::new(FlowScriptEngine))
            .with_preview(preview.clone())
            .with_config(fast_config());

        let outcome = orchestrator
            .generate(&Document::scaffold(), "solo node")
            .await
            .expect("completes without preview");
        assert_eq!(outcome.content, "node a");
        assert_eq!(preview.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn sketch_sessions_pass_content_through() {
        let transport = Arc::new(ScriptedTransport::new([
            "```\nfreehand stroke data\n```".to_string(),
        ]));
        let sink = Arc::new(RecordingSink::new());
        let mut orchestrator = Orchestrator::new(transport, Arc::new(SketchEngine))
            .with_sink(sink.clone())
            .with_config(fast_config());

        let outcome = orchestrator
            .generate(&Document::scaffold(), "scribble")
            .await
            .expect("completes");
        assert_eq!(outcome.content, "freehand stroke data");
        assert!(outcome.document.is_empty());
        assert!(!sink.codes().is_empty());
    }
}
