//! Post-compression marker verification.
//!
//! After the summarizer returns, every marker the decay policy said must
//! survive is searched for in the compressed output: exact substring first,
//! then windowed edit-distance for short needles, then sentence-level
//! structural matching for long ones. Missing markers are warnings, never
//! commit failures.

use super::decay::SurvivalDecision;
use crate::manifest::KeepitMarker;

/// How a surviving marker fared in the compressed output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Found verbatim (after normalization).
    Preserved,
    /// Found with small edits, similarity ≥ warn threshold.
    PreservedModified,
    /// Found with edits, similarity between min and warn thresholds.
    WarningModified,
    /// Long marker matched sentence-by-sentence.
    Structural,
    /// Not found.
    Missing,
    /// Found modified, but strict mode demotes any modification.
    MissingStrictMode,
}

impl MatchOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preserved => "preserved",
            Self::PreservedModified => "preserved_modified",
            Self::WarningModified => "warning_modified",
            Self::Structural => "structural",
            Self::Missing => "missing",
            Self::MissingStrictMode => "missing_strict_mode",
        }
    }
}

/// Verifier thresholds.
#[derive(Debug, Clone, Copy)]
pub struct VerifyOptions {
    pub min_similarity: f64,
    pub warn_similarity: f64,
    pub strict_mode: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            min_similarity: 0.85,
            warn_similarity: 0.90,
            strict_mode: false,
        }
    }
}

/// Verdict for one marker.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerVerification {
    pub marker_id: String,
    pub outcome: MatchOutcome,
    pub similarity: f64,
}

/// Grouped verification results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerificationReport {
    pub verified: Vec<MarkerVerification>,
    pub modified: Vec<MarkerVerification>,
    pub missing: Vec<MarkerVerification>,
}

impl VerificationReport {
    /// Passes iff nothing is missing.
    pub fn passed(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn checked_count(&self) -> usize {
        self.verified.len() + self.modified.len() + self.missing.len()
    }
}

/// Needles at or above this length use sentence-level matching.
const STRUCTURAL_NEEDLE_LEN: usize = 100;

/// Sentences shorter than this are skipped in structural matching.
const MIN_SENTENCE_LEN: usize = 10;

/// Verify every marker whose survival decision is `survives = true` against
/// the compressed output.
pub fn verify_preservation(
    markers: &[KeepitMarker],
    compressed_content: &str,
    decisions: &[SurvivalDecision],
    options: VerifyOptions,
) -> VerificationReport {
    let haystack = normalize(compressed_content);
    let haystack_chars: Vec<char> = haystack.chars().collect();
    let mut report = VerificationReport::default();

    for marker in markers {
        let must_survive = decisions
            .iter()
            .find(|d| d.marker_id == marker.marker_id)
            .map(|d| d.survives)
            .unwrap_or(false);
        if !must_survive {
            continue;
        }

        let (outcome, similarity) = match_marker(&marker.content, &haystack, &haystack_chars, options);
        let verification = MarkerVerification {
            marker_id: marker.marker_id.clone(),
            outcome,
            similarity,
        };
        match outcome {
            MatchOutcome::Preserved => report.verified.push(verification),
            MatchOutcome::PreservedModified
            | MatchOutcome::WarningModified
            | MatchOutcome::Structural => report.modified.push(verification),
            MatchOutcome::Missing | MatchOutcome::MissingStrictMode => {
                tracing::warn!(
                    marker_id = %marker.marker_id,
                    similarity,
                    "keepit marker not preserved in compressed output"
                );
                report.missing.push(verification);
            }
        }
    }
    report
}

fn match_marker(
    content: &str,
    haystack: &str,
    haystack_chars: &[char],
    options: VerifyOptions,
) -> (MatchOutcome, f64) {
    let needle = normalize(content);
    if needle.is_empty() {
        return (MatchOutcome::Preserved, 1.0);
    }

    // 1. Exact substring after normalization.
    if haystack.contains(&needle) {
        return (MatchOutcome::Preserved, 1.0);
    }

    let needle_chars: Vec<char> = needle.chars().collect();
    if needle_chars.len() < STRUCTURAL_NEEDLE_LEN {
        // 2. Windowed similarity at 1.0× and 1.5× needle length.
        let mut best = best_window_similarity(&needle, haystack_chars, needle_chars.len());
        let wide = (needle_chars.len() * 3) / 2;
        if wide > needle_chars.len() {
            best = best.max(best_window_similarity(&needle, haystack_chars, wide));
        }
        if best >= options.min_similarity {
            if options.strict_mode {
                return (MatchOutcome::MissingStrictMode, best);
            }
            if best < options.warn_similarity {
                return (MatchOutcome::WarningModified, best);
            }
            return (MatchOutcome::PreservedModified, best);
        }
        return (MatchOutcome::Missing, best);
    }

    // 3. Structural: sentence-by-sentence.
    let sentences: Vec<&str> = needle
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| s.len() >= MIN_SENTENCE_LEN)
        .collect();
    if sentences.is_empty() {
        return (MatchOutcome::Missing, 0.0);
    }
    let matched = sentences
        .iter()
        .filter(|s| sentence_in_haystack(s, haystack, haystack_chars, options.min_similarity))
        .count();
    let fraction = matched as f64 / sentences.len() as f64;
    if fraction >= options.min_similarity {
        if options.strict_mode {
            return (MatchOutcome::MissingStrictMode, fraction);
        }
        return (MatchOutcome::Structural, fraction);
    }
    (MatchOutcome::Missing, fraction)
}

fn sentence_in_haystack(
    sentence: &str,
    haystack: &str,
    haystack_chars: &[char],
    min_similarity: f64,
) -> bool {
    if haystack.contains(sentence) {
        return true;
    }
    let len = sentence.chars().count();
    best_window_similarity(sentence, haystack_chars, len) >= min_similarity
}

/// Best normalized-Levenshtein similarity between `needle` and any window
/// of `window_len` chars in the haystack.
fn best_window_similarity(needle: &str, haystack_chars: &[char], window_len: usize) -> f64 {
    if window_len == 0 || haystack_chars.is_empty() {
        return 0.0;
    }
    if haystack_chars.len() <= window_len {
        let window: String = haystack_chars.iter().collect();
        return strsim::normalized_levenshtein(needle, &window);
    }

    let mut best: f64 = 0.0;
    let mut start = 0;
    while start + window_len <= haystack_chars.len() {
        let window: String = haystack_chars[start..start + window_len].iter().collect();
        best = best.max(strsim::normalized_levenshtein(needle, &window));
        if best >= 0.999 {
            break;
        }
        start += 1;
    }
    best
}

/// Lowercase and collapse all whitespace runs to single spaces.
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
