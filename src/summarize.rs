//! Summarizer capability.
//!
//! The engine never talks to a model directly. The orchestrator hands an
//! ordered message batch plus instructions to a [`Summarizer`] and gets back
//! one [`SummaryItem`] per logical output message. UUIDs, parent links,
//! timestamps, and persistence stay on the engine side of the boundary.

use crate::error::Result;
use crate::manifest::{Aggressiveness, ModelChoice};
use crate::transcript::TranscriptMessage;
use async_trait::async_trait;
use std::time::Duration;

/// Role of a produced summary message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryRole {
    User,
    Assistant,
}

/// One logical output message from the summarizer.
#[derive(Debug, Clone)]
pub struct SummaryItem {
    pub role: SummaryRole,
    pub summary: String,
}

/// Verbatim-or-condense instruction for a single keepit marker.
#[derive(Debug, Clone)]
pub struct PreservationInstruction {
    /// The marker content, exactly as it appears in the transcript.
    pub content: String,
    /// Marker weight, for prompt construction.
    pub weight: f64,
    /// When true the content must be copied into the output verbatim;
    /// otherwise condensing is allowed.
    pub verbatim: bool,
}

/// How the batch should shrink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetShape {
    /// Emit exactly `count` output messages.
    MessageCount(usize),
    /// Keep the message count, reduce verbosity within each message.
    ReduceVerbosity,
    /// Emit the batch unchanged (ratio 0 pass-through).
    PassThrough,
}

/// Everything a summarizer needs for one batch.
#[derive(Debug, Clone)]
pub struct SummarizeOptions {
    pub shape: TargetShape,
    pub aggressiveness: Aggressiveness,
    pub model: ModelChoice,
    pub keepit_instructions: Vec<PreservationInstruction>,
    /// Deadline the implementation must honor; the orchestrator also
    /// enforces it from the outside.
    pub deadline: Duration,
}

/// Capability interface for the external summarization process.
///
/// Implementations are responsible for producing exactly one item per
/// logical output message (per [`TargetShape`]); failures surface as
/// `SummarizerFailed` with a reason string.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        messages: &[TranscriptMessage],
        options: &SummarizeOptions,
    ) -> Result<Vec<SummaryItem>>;
}
