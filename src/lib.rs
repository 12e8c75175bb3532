//! Engram - Conversation-Memory Engine for LLM Coding Sessions
//!
//! Long-running coding sessions produce transcripts that outgrow any model's
//! context window. Engram tracks those transcripts per project, produces
//! compressed *versions* of each session at chosen ratios (incrementally, in
//! *parts*, as transcripts keep growing), preserves user-marked content
//! through compression, and composes budget-bounded contexts out of pieces
//! of several sessions.
//!
//! ## Features
//!
//! - **Manifest registry:** crash-safe, lock-protected per-project metadata
//!   with schema migrations
//! - **Incremental compression:** delta detection, tiered or uniform plans,
//!   versioned two-file artifacts (`.md` + `.jsonl`)
//! - **Keepit markers:** `##keepitW.WW##` inline preservation directives
//!   with weight decay and fuzzy post-compression verification
//! - **Composition planner:** multi-session budget allocation with full
//!   provenance sidecars
//! - **Capability interfaces:** bring your own summarizer and transcript
//!   parser
//!
//! ## Quick Start
//!
//! ```no_run
//! use engram::{Engram, EngineConfig};
//! use engram::manifest::{CompressionSettings, ModelChoice, TierPreset};
//! use engram::session::RegisterOptions;
//! # use std::sync::Arc;
//! # async fn example(summarizer: Arc<dyn engram::summarize::Summarizer>) -> engram::Result<()> {
//! let engine = Engram::new(EngineConfig::from_env(), summarizer);
//! engine.ensure_project("my-project", "My Project").await?;
//! engine.register_session("my-project", "sess-1", RegisterOptions::default()).await?;
//! let version = engine
//!     .create_compression_version(
//!         "my-project",
//!         "sess-1",
//!         CompressionSettings::tiered(TierPreset::Standard, ModelChoice::Opus),
//!     )
//!     .await?;
//! println!("created {}", version.version_id);
//! # Ok(())
//! # }
//! ```

pub mod compose;
pub mod compression;
pub mod config;
pub mod engine;
pub mod error;
pub mod keepit;
pub mod lock;
pub mod logging;
pub mod manifest;
pub mod session;
pub mod storage;
pub mod summarize;
pub mod transcript;

mod test_helpers;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::{Engram, LineageEntry};
pub use error::{EngramError, ErrorCode, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
