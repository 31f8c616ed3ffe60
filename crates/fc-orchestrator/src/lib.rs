#![forbid(unsafe_code)]

//! The generation orchestrator: drives one session at a time through
//! streaming, throttled preview rendering, validation, bounded auto-repair,
//! and atomic commit.

mod preview;
mod prompts;
mod render;
mod session;
mod store;
mod throttle;
mod transport;

pub use preview::{PreviewImage, PreviewProvider};
pub use render::{NullSink, RecordingSink, RenderSink};
pub use session::{Orchestrator, OrchestratorConfig, RepairLoopResult, SessionOutcome};
pub use store::{DocumentStore, MemoryStore, NullStore};
pub use throttle::CoalescingSlot;
pub use transport::{ModelTransport, ScriptedTransport, StreamChunk};
