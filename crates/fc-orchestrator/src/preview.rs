//! Best-effort preview rendering, used as phase-two context.

use std::time::Duration;

use async_trait::async_trait;
use fc_core::{EngineKind, SynthError};

/// An inline image suitable for a transport image content part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewImage {
    pub media_type: String,
    pub data: String,
}

/// Renders a thumbnail of generated content. Callable repeatedly, allowed to
/// fail; the orchestrator retries within a small budget and skips on
/// exhaustion.
#[async_trait]
pub trait PreviewProvider: Send + Sync {
    async fn render_preview(
        &self,
        content: &str,
        kind: EngineKind,
    ) -> Result<PreviewImage, SynthError>;
}

/// Retry `provider` up to `retries` times with a fixed backoff. Exhaustion is
/// non-fatal: the caller proceeds without a preview.
pub(crate) async fn preview_with_retry(
    provider: &dyn PreviewProvider,
    content: &str,
    kind: EngineKind,
    retries: usize,
    backoff: Duration,
) -> Option<PreviewImage> {
    let retries = retries.max(1);
    for attempt in 1..=retries {
        match provider.render_preview(content, kind).await {
            Ok(image) => return Some(image),
            Err(error) => {
                tracing::warn!(attempt, retries, %error, "preview attempt failed");
                if attempt < retries && !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
    None
}
