//! Transcript model and parser capability.
//!
//! The engine treats transcript parsing as an injectable capability so hosts
//! can bring their own reader. A default line-delimited-JSON implementation
//! ships in [`parser`].

mod model;
mod parser;

pub use model::{
    ContentBlock, MessageGraph, MessageKind, TokenUsage, Transcript, TranscriptMessage,
    TranscriptMetadata,
};
pub use parser::{JsonlTranscriptParser, TranscriptParser};
