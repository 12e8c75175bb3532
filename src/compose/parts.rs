//! Per-part version selection.
//!
//! A session's versions group by part number; the caller's budget splits
//! equally across parts and each part takes its highest-scoring version,
//! provided the score clears 0.3. Sessions with no compressions fall back
//! to a synthetic `original` choice spanning the whole transcript.

use crate::compression::registry::ORIGINAL_VERSION_ID;
use crate::manifest::{CompressionRecord, MessageRange, SessionEntry};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Minimum score for a version to be picked at all.
const MIN_PART_SCORE: f64 = 0.3;

/// Scoring criteria.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionCriteria {
    pub max_tokens: Option<u64>,
    pub preferred_ratio: Option<f64>,
    pub preserve_keepits: bool,
    pub prefer_recent: bool,
}

/// Score a version against the criteria. Starts at 1.0 and multiplies a
/// factor per active criterion.
pub fn score_version(record: &CompressionRecord, criteria: &SelectionCriteria, now: DateTime<Utc>) -> f64 {
    let mut score = 1.0;

    if let Some(max_tokens) = criteria.max_tokens {
        if record.output_tokens > max_tokens {
            score *= 0.1;
        } else if max_tokens > 0 {
            // Prefer high utilization within the budget.
            score *= 0.5 + 0.5 * (record.output_tokens as f64 / max_tokens as f64);
        }
    }

    if let Some(preferred) = criteria.preferred_ratio {
        score *= (1.0 - (record.compression_ratio - preferred).abs() / 50.0).max(0.5);
    }

    if criteria.preserve_keepits {
        let total = record.keepit_stats.preserved + record.keepit_stats.summarized;
        if total > 0 {
            let preserved_fraction = record.keepit_stats.preserved as f64 / total as f64;
            score *= 0.5 + 0.5 * preserved_fraction;
        }
    }

    if criteria.prefer_recent {
        let age_days = (now - record.created_at).num_days().max(0) as f64;
        score *= (1.0 - age_days / 300.0).max(0.9);
    }

    score
}

/// One part's pick.
#[derive(Debug, Clone, PartialEq)]
pub struct PartChoice {
    pub part_number: u32,
    /// A concrete version id, or `original` for the synthetic fallback.
    pub version_id: String,
    pub tokens: u64,
    pub messages: usize,
    /// Range covered, for slicing `original` parts out of the transcript.
    pub message_range: Option<MessageRange>,
    pub score: f64,
}

/// Selection across all parts of one session.
#[derive(Debug, Clone, Default)]
pub struct PartPlan {
    pub selections: Vec<PartChoice>,
    /// Parts where no version cleared the score floor.
    pub skipped_parts: Vec<u32>,
}

impl PartPlan {
    pub fn total_tokens(&self) -> u64 {
        self.selections.iter().map(|s| s.tokens).sum()
    }

    pub fn total_messages(&self) -> usize {
        self.selections.iter().map(|s| s.messages).sum()
    }
}

/// Pick the best version per part under `max_tokens`.
pub fn select_parts(session: &SessionEntry, max_tokens: u64, preserve_keepits: bool) -> PartPlan {
    let mut by_part: BTreeMap<u32, Vec<&CompressionRecord>> = BTreeMap::new();
    for record in &session.compressions {
        by_part.entry(record.part_number).or_default().push(record);
    }

    if by_part.is_empty() {
        return PartPlan {
            selections: vec![PartChoice {
                part_number: 1,
                version_id: ORIGINAL_VERSION_ID.to_string(),
                tokens: session.original_tokens,
                messages: session.original_messages,
                message_range: None,
                score: 1.0,
            }],
            skipped_parts: Vec::new(),
        };
    }

    let per_part_budget = max_tokens / by_part.len() as u64;
    let criteria = SelectionCriteria {
        max_tokens: Some(per_part_budget),
        preferred_ratio: None,
        preserve_keepits,
        prefer_recent: false,
    };
    let now = Utc::now();

    let mut plan = PartPlan::default();
    for (part, records) in by_part {
        let best = records
            .iter()
            .map(|r| (*r, score_version(r, &criteria, now)))
            .max_by(|a, b| a.1.total_cmp(&b.1));

        match best {
            Some((record, score)) if score >= MIN_PART_SCORE => {
                plan.selections.push(PartChoice {
                    part_number: part,
                    version_id: record.version_id.clone(),
                    tokens: record.output_tokens,
                    messages: record.output_messages,
                    message_range: Some(record.message_range.clone()),
                    score,
                });
            }
            _ => {
                tracing::debug!(
                    session_id = %session.session_id,
                    part,
                    "no version cleared the selection score floor"
                );
                plan.skipped_parts.push(part);
            }
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{
        CompressionLevel, CompressionSettings, KeepitStats, LinkType, ModelChoice, TierPreset,
    };
    use chrono::TimeZone;

    fn record(version_id: &str, part: u32, output_tokens: u64, ratio: f64) -> CompressionRecord {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        CompressionRecord {
            version_id: version_id.to_string(),
            file: format!("{version_id}_tiered-standard_1k"),
            created_at: ts,
            settings: CompressionSettings::tiered(TierPreset::Standard, ModelChoice::Sonnet),
            input_tokens: (output_tokens as f64 * ratio) as u64,
            input_messages: 20,
            output_tokens,
            output_messages: 5,
            compression_ratio: ratio,
            processing_time_ms: 10,
            keepit_stats: KeepitStats::default(),
            file_sizes: Default::default(),
            tier_results: None,
            part_number: part,
            compression_level: CompressionLevel::Moderate,
            message_range: MessageRange {
                start_index: 0,
                end_index: 20,
                message_count: 20,
                start_timestamp: ts,
                end_timestamp: ts,
            },
            is_full_session: false,
        }
    }

    fn session(records: Vec<CompressionRecord>) -> SessionEntry {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        SessionEntry {
            session_id: "s".into(),
            original_file: "/o.jsonl".into(),
            linked_file: "/l.jsonl".into(),
            link_type: LinkType::Copy,
            original_tokens: 40_000,
            original_messages: 20,
            first_timestamp: Some(ts),
            last_timestamp: Some(ts),
            last_synced_timestamp: Some(ts),
            last_synced_message_uuid: None,
            registered_at: ts,
            last_accessed: ts,
            metadata: Default::default(),
            keepit_markers: vec![],
            compressions: records,
        }
    }

    #[test]
    fn over_budget_version_scores_low() {
        let now = Utc::now();
        let criteria = SelectionCriteria { max_tokens: Some(1_000), ..Default::default() };
        let over = score_version(&record("v001", 1, 5_000, 8.0), &criteria, now);
        let under = score_version(&record("v002", 1, 900, 8.0), &criteria, now);
        assert!(over < 0.2);
        assert!(under > 0.9);
    }

    #[test]
    fn utilization_prefers_fuller_fit() {
        let now = Utc::now();
        let criteria = SelectionCriteria { max_tokens: Some(1_000), ..Default::default() };
        let snug = score_version(&record("v001", 1, 950, 8.0), &criteria, now);
        let loose = score_version(&record("v002", 1, 200, 8.0), &criteria, now);
        assert!(snug > loose);
    }

    #[test]
    fn preferred_ratio_penalizes_distance() {
        let now = Utc::now();
        let criteria = SelectionCriteria { preferred_ratio: Some(10.0), ..Default::default() };
        let close = score_version(&record("v001", 1, 100, 11.0), &criteria, now);
        let far = score_version(&record("v002", 1, 100, 45.0), &criteria, now);
        assert!(close > far);
        // The distance factor floors at 0.5.
        assert!(far >= 0.5);
    }

    #[test]
    fn keepit_fraction_scales_score() {
        let now = Utc::now();
        let criteria = SelectionCriteria { preserve_keepits: true, ..Default::default() };
        let mut all_kept = record("v001", 1, 100, 8.0);
        all_kept.keepit_stats = KeepitStats { preserved: 4, summarized: 0, weights: vec![] };
        let mut none_kept = record("v002", 1, 100, 8.0);
        none_kept.keepit_stats = KeepitStats { preserved: 0, summarized: 4, weights: vec![] };

        assert!((score_version(&all_kept, &criteria, now) - 1.0).abs() < 1e-9);
        assert!((score_version(&none_kept, &criteria, now) - 0.5).abs() < 1e-9);

        // No stats at all leaves the score untouched.
        let no_stats = record("v003", 1, 100, 8.0);
        assert!((score_version(&no_stats, &criteria, now) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn recent_version_outranks_old_when_preferred() {
        let criteria = SelectionCriteria { prefer_recent: true, ..Default::default() };
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 0, 0, 0).unwrap();
        let mut old = record("v001", 1, 100, 8.0);
        old.created_at = Utc.with_ymd_and_hms(2025, 5, 20, 0, 0, 0).unwrap();
        let mut fresh = record("v002", 1, 100, 8.0);
        fresh.created_at = Utc.with_ymd_and_hms(2025, 6, 9, 0, 0, 0).unwrap();

        let old_score = score_version(&old, &criteria, now);
        let fresh_score = score_version(&fresh, &criteria, now);
        assert!(fresh_score > old_score);
        // Age factor floors at 0.9.
        assert!(old_score >= 0.9);
    }

    #[test]
    fn selects_best_per_part_under_split_budget() {
        let session = session(vec![
            record("v001", 1, 900, 10.0),
            record("v002", 1, 5_000, 4.0),
            record("v003", 2, 800, 10.0),
        ]);
        // Two parts: each gets 1 000 of the 2 000 budget.
        let plan = select_parts(&session, 2_000, false);
        assert_eq!(plan.selections.len(), 2);
        assert_eq!(plan.selections[0].version_id, "v001");
        assert_eq!(plan.selections[1].version_id, "v003");
        assert_eq!(plan.total_tokens(), 1_700);
        assert!(plan.skipped_parts.is_empty());
    }

    #[test]
    fn no_parts_falls_back_to_original() {
        let plan = select_parts(&session(vec![]), 10_000, true);
        assert_eq!(plan.selections.len(), 1);
        assert_eq!(plan.selections[0].version_id, ORIGINAL_VERSION_ID);
        assert_eq!(plan.selections[0].tokens, 40_000);
    }

    #[test]
    fn part_with_only_oversized_versions_is_skipped() {
        let session = session(vec![
            record("v001", 1, 900, 10.0),
            record("v002", 2, 50_000, 2.0),
        ]);
        let plan = select_parts(&session, 2_000, false);
        assert_eq!(plan.selections.len(), 1);
        assert_eq!(plan.skipped_parts, vec![2]);
    }
}
