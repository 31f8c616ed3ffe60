//! Generation session state and transport message shapes.

use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Lifecycle of a generation session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    Streaming,
    Validating,
    Repairing,
    Complete,
    Failed,
}

impl SessionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Streaming => "streaming",
            Self::Validating => "validating",
            Self::Repairing => "repairing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// A busy session blocks new submissions at the boundary layer.
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Streaming | Self::Validating | Self::Repairing)
    }
}

/// One round of the bounded auto-fix loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RepairAttempt {
    pub input_code: String,
    pub error: String,
    pub output_code: String,
}

/// One user request/response cycle.
///
/// Created when a prompt is submitted, mutated only by the orchestrator, and
/// retired when the next session supersedes it.
#[derive(Debug, Clone)]
pub struct GenerationSession {
    pub raw: String,
    pub plan: Option<String>,
    pub code: Option<String>,
    pub status: SessionStatus,
    pub started_at: Instant,
    pub first_output_at: Option<Instant>,
    pub plan_complete_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    pub repair_attempts: Vec<RepairAttempt>,
}

impl GenerationSession {
    #[must_use]
    pub fn start() -> Self {
        Self {
            raw: String::new(),
            plan: None,
            code: None,
            status: SessionStatus::Streaming,
            started_at: Instant::now(),
            first_output_at: None,
            plan_complete_at: None,
            finished_at: None,
            repair_attempts: Vec::new(),
        }
    }

    /// Record the latest parse of the accumulated buffer, stamping the
    /// first-output and plan-complete instants the first time each lands.
    pub fn record(&mut self, raw: &str, plan: Option<&str>, code: Option<&str>) {
        self.raw.clear();
        self.raw.push_str(raw);

        if self.plan.is_none()
            && let Some(plan) = plan
        {
            self.plan = Some(plan.to_string());
            self.plan_complete_at = Some(Instant::now());
        }
        if let Some(code) = code {
            if self.code.is_none() {
                self.first_output_at = Some(Instant::now());
            }
            self.code = Some(code.to_string());
        }
    }

    pub fn finish(&mut self, status: SessionStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.finished_at = Some(Instant::now());
    }
}

/// Role of a transport message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One block of message content: text or an inline image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text { text: String },
    Image { media_type: String, data: String },
}

/// A role-tagged sequence of content blocks; the only request shape the
/// pipeline depends on from the model-call collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl ChatMessage {
    #[must_use]
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![ContentPart::Text { text: text.into() }],
        }
    }

    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    #[must_use]
    pub fn with_image(mut self, media_type: impl Into<String>, data: impl Into<String>) -> Self {
        self.parts.push(ContentPart::Image {
            media_type: media_type.into(),
            data: data.into(),
        });
        self
    }

    /// Concatenated text of all text parts.
    #[must_use]
    pub fn joined_text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let ContentPart::Text { text } = part {
                out.push_str(text);
            }
        }
        out
    }
}
