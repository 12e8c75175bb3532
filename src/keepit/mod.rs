//! Keepit markers: inline weighted preservation directives.
//!
//! `##keepitW.WW##content` asks compression to carry `content` through.
//! [`parser`] extracts and rewrites markers, [`decay`] decides which
//! non-pinned markers survive a given compression, [`verify`] checks the
//! summarizer actually honored the survivors.

pub mod decay;
pub mod parser;
pub mod verify;

pub use decay::{
    DecayPreview, SurvivalDecision, calculate_survival_threshold, preview_decay,
    select_aggressiveness, should_keepit_survive,
};
pub use parser::{
    KeepitSyntaxIssue, RawKeepit, create_keepit_marker, extract_keepits, normalize_marker,
    strip_keepit_markers, update_keepit_weight, validate_keepit_syntax, validate_weight,
    validate_weight_str,
};
pub use verify::{
    MarkerVerification, MatchOutcome, VerificationReport, VerifyOptions, verify_preservation,
};
