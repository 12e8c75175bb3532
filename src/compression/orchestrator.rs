//! Compression orchestration.
//!
//! `create_version` drives the full protocol: validate settings, take the
//! session lock, parse the linked transcript, find the delta, classify
//! keepit markers, run the summarizer batch-by-batch, verify preservation,
//! write the two version files atomically, and commit the record to the
//! manifest under a fresh lock. No lock is held while the summarizer runs.
//! Any failure before the commit removes partially written files and leaves
//! the manifest untouched.

use super::delta::{DeltaReport, detect_delta};
use super::registry::version_filename;
use super::writer::{self, OutputMessage, VersionHeader};
use crate::error::{EngramError, Result};
use crate::keepit::{
    self, SurvivalDecision, VerifyOptions, extract_keepits, normalize_marker, preview_decay,
};
use crate::lock::{OperationType, SessionLocks};
use crate::manifest::{
    Aggressiveness, CompressionMode, CompressionRecord, CompressionSettings, FileSizes,
    KeepitMarker, KeepitMode, KeepitStats, ManifestStore, MessageRange, SessionEntry, TierPreset,
    TierResult, TierSpec,
};
use crate::summarize::{
    PreservationInstruction, SummarizeOptions, Summarizer, TargetShape,
};
use crate::transcript::{TranscriptMessage, TranscriptParser};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Compression orchestrator.
#[derive(Clone)]
pub struct Compressor {
    store: ManifestStore,
    locks: SessionLocks,
    parser: Arc<dyn TranscriptParser>,
    summarizer: Arc<dyn Summarizer>,
    deadline: Duration,
}

impl Compressor {
    pub fn new(
        store: ManifestStore,
        locks: SessionLocks,
        parser: Arc<dyn TranscriptParser>,
        summarizer: Arc<dyn Summarizer>,
        deadline: Duration,
    ) -> Self {
        Self { store, locks, parser, summarizer, deadline }
    }

    /// Create a new compression version for a session.
    pub async fn create_version(
        &self,
        project_id: &str,
        session_id: &str,
        settings: CompressionSettings,
    ) -> Result<CompressionRecord> {
        validate_settings(&settings)?;

        // Held for the whole operation; released on every exit path.
        let _session_guard =
            self.locks
                .acquire(project_id, session_id, OperationType::Compression)?;
        let started = Instant::now();

        let session = self.store.get_session(project_id, session_id).await?;
        let linked = PathBuf::from(&session.linked_file);
        if !linked.exists() {
            return Err(EngramError::FileNotFound { path: linked });
        }

        let transcript = self.parser.parse(&linked).await?;
        if transcript.total_messages < 2 {
            return Err(EngramError::InsufficientMessages {
                session_id: session_id.to_string(),
                count: transcript.total_messages,
                required: 2,
            });
        }

        let delta = detect_delta(&session, &transcript);
        if !delta.has_delta {
            return Err(EngramError::InsufficientMessages {
                session_id: session_id.to_string(),
                count: 0,
                required: 1,
            });
        }

        // skip_first_messages trims the head of the very first part only;
        // later parts start where the previous one ended.
        let (slice, start_index) = if delta.is_first_part && settings.skip_first_messages > 0 {
            if settings.skip_first_messages >= delta.delta_messages.len() {
                return Err(EngramError::InsufficientMessages {
                    session_id: session_id.to_string(),
                    count: delta.delta_messages.len(),
                    required: settings.skip_first_messages + 1,
                });
            }
            (
                delta.delta_messages[settings.skip_first_messages..].to_vec(),
                delta.start_index + settings.skip_first_messages,
            )
        } else {
            (delta.delta_messages.clone(), delta.start_index)
        };

        let part_number = delta.previous_part_number.map_or(1, |p| p + 1);
        let version_id = session.next_version_id();
        let level = settings.derived_level();
        if session
            .compressions
            .iter()
            .any(|c| c.part_number == part_number && c.compression_level == level)
        {
            return Err(EngramError::InvalidSettings {
                reason: format!(
                    "a {} version for part {part_number} already exists",
                    level.as_str()
                ),
            });
        }

        // Keepit extraction and decay classification over the slice.
        let markers = extract_markers(&slice);
        let decisions = classify_markers(&markers, &settings);
        let keepit_stats = stats_from_decisions(&markers, &decisions, settings.keepit_mode);

        // Summarize (no locks held from here until commit).
        let (outputs, tier_results) = self
            .run_summarizer(&slice, &settings, &markers, &decisions)
            .await?;
        if outputs.is_empty() {
            return Err(EngramError::SummarizerFailed {
                reason: "summarizer produced no output messages".to_string(),
            });
        }

        // Verification is advisory: missing markers are logged into the
        // report, never abort the commit.
        if settings.keepit_mode != KeepitMode::Ignore && !markers.is_empty() {
            let haystack: String = outputs
                .iter()
                .map(|o| o.message.text())
                .collect::<Vec<_>>()
                .join("\n");
            let report =
                keepit::verify_preservation(&markers, &haystack, &decisions, VerifyOptions::default());
            if !report.passed() {
                tracing::warn!(
                    project_id,
                    session_id,
                    version_id,
                    missing = report.missing.len(),
                    "compression committed with missing keepit markers"
                );
            }
        }

        // Write the two version files.
        let input_tokens: u64 = slice.iter().map(|m| m.token_estimate()).sum();
        let output_tokens: u64 = outputs.iter().map(|o| o.message.token_estimate()).sum();
        let file = version_filename(
            &version_id,
            settings.mode,
            &settings.preset_label(),
            output_tokens,
            part_number,
        );
        let summaries_dir = self
            .store
            .layout()
            .session_summaries_dir(project_id, session_id);
        std::fs::create_dir_all(&summaries_dir)
            .map_err(|e| EngramError::io(&summaries_dir, e))?;
        let md_path = summaries_dir.join(format!("{file}.md"));
        let jsonl_path = summaries_dir.join(format!("{file}.jsonl"));

        let created_at = Utc::now();
        let header = VersionHeader {
            project_id,
            session_id,
            version_id: &version_id,
            created_at,
            settings: &settings,
            part_number,
            input_messages: slice.len(),
            input_tokens,
            keepit_stats: &keepit_stats,
        };
        let md = writer::render_markdown(&header, &outputs);
        let jsonl = writer::render_jsonl(&header, &outputs);
        writer::write_version_files(&md_path, &jsonl_path, &md, &jsonl)?;
        let mut cleanup = PartialFiles::armed(vec![md_path.clone(), jsonl_path.clone()]);

        let record = CompressionRecord {
            version_id: version_id.clone(),
            file,
            created_at,
            settings: settings.clone(),
            input_tokens,
            input_messages: slice.len(),
            output_tokens,
            output_messages: outputs.len(),
            compression_ratio: round2(if output_tokens > 0 {
                input_tokens as f64 / output_tokens as f64
            } else {
                0.0
            }),
            processing_time_ms: started.elapsed().as_millis() as u64,
            keepit_stats: keepit_stats.clone(),
            file_sizes: FileSizes {
                md: std::fs::metadata(&md_path).map(|m| m.len()).unwrap_or(0),
                jsonl: std::fs::metadata(&jsonl_path).map(|m| m.len()).unwrap_or(0),
            },
            tier_results,
            part_number,
            compression_level: level,
            message_range: MessageRange {
                start_index,
                end_index: delta.end_index,
                message_count: slice.len(),
                start_timestamp: slice.first().map(|m| m.timestamp).unwrap_or(created_at),
                end_timestamp: slice.last().map(|m| m.timestamp).unwrap_or(created_at),
            },
            is_full_session: false,
        };

        // Commit: re-read the manifest under a fresh lock and append.
        let commit_record = record.clone();
        let commit_markers = markers.clone();
        let commit_decisions = decisions.clone();
        let commit = self
            .store
            .with_manifest(project_id, move |manifest| {
                let session = manifest
                    .sessions
                    .get_mut(session_id)
                    .ok_or_else(|| EngramError::SessionNotFound {
                        project_id: manifest.project_id.clone(),
                        session_id: session_id.to_string(),
                    })?;
                index_marker_outcomes(
                    session,
                    &commit_markers,
                    &commit_decisions,
                    &commit_record.version_id,
                );
                session.compressions.push(commit_record);
                session.last_accessed = Utc::now();
                Ok(())
            })
            .await;

        match commit {
            Ok(()) => {
                cleanup.defuse();
                tracing::info!(
                    project_id,
                    session_id,
                    version_id,
                    part_number,
                    input_messages = record.input_messages,
                    output_messages = record.output_messages,
                    ratio = record.compression_ratio,
                    elapsed_ms = record.processing_time_ms,
                    "compression version created"
                );
                Ok(record)
            }
            Err(e) => Err(e),
        }
    }

    /// Detect the delta for a session without compressing.
    pub async fn detect_session_delta(
        &self,
        project_id: &str,
        session_id: &str,
    ) -> Result<DeltaReport> {
        let session = self.store.get_session(project_id, session_id).await?;
        let linked = PathBuf::from(&session.linked_file);
        if !linked.exists() {
            return Err(EngramError::FileNotFound { path: linked });
        }
        let transcript = self.parser.parse(&linked).await?;
        Ok(detect_delta(&session, &transcript))
    }

    /// Run the summarizer over the slice, one batch per tier (or a single
    /// uniform batch). Ratio 0 passes messages through without invoking the
    /// summarizer at all.
    async fn run_summarizer(
        &self,
        slice: &[TranscriptMessage],
        settings: &CompressionSettings,
        markers: &[KeepitMarker],
        decisions: &[SurvivalDecision],
    ) -> Result<(Vec<OutputMessage>, Option<Vec<TierResult>>)> {
        let instructions = build_instructions(markers, decisions, settings.keepit_mode);

        match settings.mode {
            CompressionMode::Uniform => {
                let ratio = settings.compaction_ratio.unwrap_or(0.0);
                let shape = uniform_shape(ratio, slice.len());
                let outputs = self
                    .summarize_batch(slice, shape, settings, settings.aggressiveness, &instructions)
                    .await?;
                Ok((outputs, None))
            }
            CompressionMode::Tiered => {
                let tiers = resolve_tiers(settings);
                let mut outputs = Vec::new();
                let mut results = Vec::new();
                let mut covered = 0usize;

                for (index, tier) in tiers.iter().enumerate() {
                    let boundary = tier_boundary(slice.len(), tier.end_percent);
                    if boundary <= covered {
                        continue;
                    }
                    let batch = &slice[covered..boundary];
                    let shape = uniform_shape(tier.compaction_ratio, batch.len());
                    let batch_outputs = self
                        .summarize_batch(batch, shape, settings, tier.aggressiveness, &instructions)
                        .await?;

                    results.push(TierResult {
                        tier_index: index,
                        end_percent: tier.end_percent,
                        compaction_ratio: tier.compaction_ratio,
                        input_messages: batch.len(),
                        output_messages: batch_outputs.len(),
                        input_tokens: batch.iter().map(|m| m.token_estimate()).sum(),
                        output_tokens: batch_outputs
                            .iter()
                            .map(|o| o.message.token_estimate())
                            .sum(),
                    });
                    outputs.extend(batch_outputs);
                    covered = boundary;
                }

                relink_chain(&mut outputs);
                Ok((outputs, Some(results)))
            }
        }
    }

    async fn summarize_batch(
        &self,
        batch: &[TranscriptMessage],
        shape: TargetShape,
        settings: &CompressionSettings,
        aggressiveness: Option<Aggressiveness>,
        instructions: &[PreservationInstruction],
    ) -> Result<Vec<OutputMessage>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        if shape == TargetShape::PassThrough {
            return Ok(batch.iter().cloned().map(OutputMessage::passthrough).collect());
        }

        let options = SummarizeOptions {
            shape,
            aggressiveness: aggressiveness.unwrap_or(Aggressiveness::Moderate),
            model: settings.model,
            keepit_instructions: instructions.to_vec(),
            deadline: self.deadline,
        };

        let items = tokio::time::timeout(self.deadline, self.summarizer.summarize(batch, &options))
            .await
            .map_err(|_| EngramError::SummarizerFailed {
                reason: format!("deadline of {:?} exceeded", self.deadline),
            })??;
        if items.is_empty() {
            return Err(EngramError::SummarizerFailed {
                reason: "summarizer returned an empty batch".to_string(),
            });
        }
        Ok(writer::synthesize_messages(batch, &items))
    }
}

/// Removes version files on drop unless the commit defused it.
struct PartialFiles {
    paths: Vec<PathBuf>,
    armed: bool,
}

impl PartialFiles {
    fn armed(paths: Vec<PathBuf>) -> Self {
        Self { paths, armed: true }
    }

    fn defuse(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFiles {
    fn drop(&mut self) {
        if self.armed {
            for path in &self.paths {
                if std::fs::remove_file(path).is_ok() {
                    tracing::debug!(path = %path.display(), "removed partial version file");
                }
            }
        }
    }
}

/// Validate compression settings before any lock is taken.
pub fn validate_settings(settings: &CompressionSettings) -> Result<()> {
    let invalid = |reason: String| Err(EngramError::InvalidSettings { reason });

    match settings.mode {
        CompressionMode::Uniform => {
            let Some(ratio) = settings.compaction_ratio else {
                return invalid("uniform mode requires compactionRatio".to_string());
            };
            let special = ratio == 0.0 || ratio == 1.0;
            if !special && !(2.0..=50.0).contains(&ratio) {
                return invalid(format!(
                    "compactionRatio {ratio} outside [2, 50] (0 and 1 are pass-through/verbosity)"
                ));
            }
            if settings.aggressiveness.is_none() {
                return invalid("uniform mode requires aggressiveness".to_string());
            }
        }
        CompressionMode::Tiered => {
            match (&settings.tier_preset, &settings.tiers) {
                (None, None) => {
                    return invalid("tiered mode requires tierPreset or a custom tier list".to_string());
                }
                (Some(_), Some(_)) => {
                    return invalid("tierPreset and custom tiers are mutually exclusive".to_string());
                }
                (None, Some(tiers)) => {
                    if tiers.is_empty() {
                        return invalid("custom tier list is empty".to_string());
                    }
                    let mut prev_end = 0u8;
                    for (i, tier) in tiers.iter().enumerate() {
                        if !(1..=100).contains(&tier.end_percent) {
                            return invalid(format!(
                                "tier {i} endPercent {} outside [1, 100]",
                                tier.end_percent
                            ));
                        }
                        if tier.end_percent <= prev_end {
                            return invalid(format!("tier {i} boundaries must ascend"));
                        }
                        if !(2.0..=50.0).contains(&tier.compaction_ratio) {
                            return invalid(format!(
                                "tier {i} compactionRatio {} outside [2, 50]",
                                tier.compaction_ratio
                            ));
                        }
                        prev_end = tier.end_percent;
                    }
                    if prev_end != 100 {
                        return invalid("last tier must end at 100 percent".to_string());
                    }
                }
                (Some(_), None) => {}
            }
        }
    }
    Ok(())
}

/// Named tier plans. Earlier (older) tiers compress harder; the recent tail
/// stays closest to verbatim.
fn resolve_tiers(settings: &CompressionSettings) -> Vec<TierSpec> {
    if let Some(tiers) = &settings.tiers {
        return tiers.clone();
    }
    match settings.tier_preset.unwrap_or(TierPreset::Standard) {
        TierPreset::Gentle => vec![
            TierSpec { end_percent: 50, compaction_ratio: 5.0, aggressiveness: Some(Aggressiveness::Minimal) },
            TierSpec { end_percent: 80, compaction_ratio: 3.0, aggressiveness: Some(Aggressiveness::Minimal) },
            TierSpec { end_percent: 100, compaction_ratio: 2.0, aggressiveness: Some(Aggressiveness::Minimal) },
        ],
        TierPreset::Standard => vec![
            TierSpec { end_percent: 50, compaction_ratio: 10.0, aggressiveness: Some(Aggressiveness::Moderate) },
            TierSpec { end_percent: 80, compaction_ratio: 5.0, aggressiveness: Some(Aggressiveness::Moderate) },
            TierSpec { end_percent: 100, compaction_ratio: 3.0, aggressiveness: Some(Aggressiveness::Minimal) },
        ],
        TierPreset::Aggressive => vec![
            TierSpec { end_percent: 50, compaction_ratio: 20.0, aggressiveness: Some(Aggressiveness::Aggressive) },
            TierSpec { end_percent: 80, compaction_ratio: 10.0, aggressiveness: Some(Aggressiveness::Moderate) },
            TierSpec { end_percent: 100, compaction_ratio: 5.0, aggressiveness: Some(Aggressiveness::Moderate) },
        ],
    }
}

fn tier_boundary(len: usize, end_percent: u8) -> usize {
    ((len * end_percent as usize) + 99) / 100
}

fn uniform_shape(ratio: f64, batch_len: usize) -> TargetShape {
    if ratio == 0.0 {
        TargetShape::PassThrough
    } else if ratio == 1.0 {
        TargetShape::ReduceVerbosity
    } else {
        TargetShape::MessageCount(((batch_len as f64) / ratio).ceil().max(1.0) as usize)
    }
}

/// The effective ratio decay sees: the uniform ratio, or the strongest
/// tier's ratio for tiered plans.
fn effective_decay_ratio(settings: &CompressionSettings) -> f64 {
    match settings.mode {
        CompressionMode::Uniform => settings.compaction_ratio.unwrap_or(0.0),
        CompressionMode::Tiered => resolve_tiers(settings)
            .iter()
            .map(|t| t.compaction_ratio)
            .fold(0.0, f64::max),
    }
}

fn extract_markers(slice: &[TranscriptMessage]) -> Vec<KeepitMarker> {
    let mut markers = Vec::new();
    for message in slice {
        let text = message.text();
        for raw in extract_keepits(&text) {
            markers.push(normalize_marker(&raw, &message.uuid, &text));
        }
    }
    markers
}

fn classify_markers(
    markers: &[KeepitMarker],
    settings: &CompressionSettings,
) -> Vec<SurvivalDecision> {
    match settings.keepit_mode {
        KeepitMode::Ignore => Vec::new(),
        KeepitMode::PreserveAll => markers
            .iter()
            .map(|m| SurvivalDecision {
                marker_id: m.marker_id.clone(),
                weight: m.weight,
                threshold: 0.0,
                pinned: m.is_pinned(),
                survives: true,
            })
            .collect(),
        KeepitMode::Decay => {
            preview_decay(
                markers,
                effective_decay_ratio(settings),
                settings.session_distance,
                Some(settings.derived_level()),
            )
            .decisions
        }
    }
}

fn stats_from_decisions(
    markers: &[KeepitMarker],
    decisions: &[SurvivalDecision],
    mode: KeepitMode,
) -> KeepitStats {
    if mode == KeepitMode::Ignore {
        return KeepitStats::default();
    }
    KeepitStats {
        preserved: decisions.iter().filter(|d| d.survives).count(),
        summarized: decisions.iter().filter(|d| !d.survives).count(),
        weights: markers.iter().map(|m| m.weight).collect(),
    }
}

fn build_instructions(
    markers: &[KeepitMarker],
    decisions: &[SurvivalDecision],
    mode: KeepitMode,
) -> Vec<PreservationInstruction> {
    if mode == KeepitMode::Ignore {
        return Vec::new();
    }
    markers
        .iter()
        .map(|marker| {
            let survives = decisions
                .iter()
                .find(|d| d.marker_id == marker.marker_id)
                .map(|d| d.survives)
                .unwrap_or(false);
            PreservationInstruction {
                content: marker.content.clone(),
                weight: marker.weight,
                verbatim: marker.is_pinned() || survives,
            }
        })
        .collect()
}

/// Rewire parent links so the concatenated output forms one chain. The
/// overall first message keeps its original parent; every later message
/// parents on its predecessor, which also re-homes children of removed
/// interior nodes.
fn relink_chain(outputs: &mut [OutputMessage]) {
    for i in 1..outputs.len() {
        let prev = outputs[i - 1].message.uuid.clone();
        outputs[i].message.parent_uuid = Some(prev);
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Record marker outcomes on the session's keepit index. Markers seen for
/// the first time (added to the transcript after registration) are
/// appended.
fn index_marker_outcomes(
    session: &mut SessionEntry,
    markers: &[KeepitMarker],
    decisions: &[SurvivalDecision],
    version_id: &str,
) {
    for marker in markers {
        let survives = decisions
            .iter()
            .find(|d| d.marker_id == marker.marker_id)
            .map(|d| d.survives)
            .unwrap_or(true);

        let indexed = session
            .keepit_markers
            .iter_mut()
            .find(|m| m.message_uuid == marker.message_uuid && m.content == marker.content);

        match indexed {
            Some(existing) => {
                let target = if survives {
                    &mut existing.survived_in
                } else {
                    &mut existing.summarized_in
                };
                if !target.iter().any(|v| v == version_id) {
                    target.push(version_id.to_string());
                }
            }
            None => {
                let mut fresh = marker.clone();
                if survives {
                    fresh.survived_in.push(version_id.to_string());
                } else {
                    fresh.summarized_in.push(version_id.to_string());
                }
                session.keepit_markers.push(fresh);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::manifest::{CompressionLevel, ModelChoice};
    use crate::test_helpers::helpers::{
        FailingSummarizer, MockSummarizer, SlowSummarizer, plain_texts, session_entry,
        test_store, write_transcript,
    };
    use crate::transcript::JsonlTranscriptParser;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: ManifestStore,
        locks: SessionLocks,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let (store, locks) = test_store(dir.path());
        store.load_or_init("p", "Project").await.unwrap();
        Fixture { _dir: dir, store, locks }
    }

    impl Fixture {
        async fn seed_session(&self, session_id: &str, texts: &[String]) {
            let originals = self.store.layout().originals_dir("p");
            std::fs::create_dir_all(&originals).unwrap();
            let linked = write_transcript(&originals, session_id, texts);
            self.store
                .set_session("p", session_entry(session_id, &linked, texts.len()))
                .await
                .unwrap();
        }

        fn compressor(&self, summarizer: Arc<dyn Summarizer>) -> Compressor {
            Compressor::new(
                self.store.clone(),
                self.locks.clone(),
                Arc::new(JsonlTranscriptParser),
                summarizer,
                Duration::from_secs(5),
            )
        }
    }

    #[tokio::test]
    async fn first_tiered_compression_creates_v001() {
        let fx = fixture().await;
        fx.seed_session("s1", &plain_texts(20)).await;
        let compressor = fx.compressor(Arc::new(MockSummarizer));

        let record = compressor
            .create_version("p", "s1", CompressionSettings::tiered(TierPreset::Standard, ModelChoice::Opus))
            .await
            .unwrap();

        assert_eq!(record.version_id, "v001");
        assert_eq!(record.part_number, 1);
        assert_eq!(record.compression_level, CompressionLevel::Moderate);
        assert_eq!(record.message_range.start_index, 0);
        assert_eq!(record.message_range.end_index, 20);
        assert!(record.output_tokens < record.input_tokens);
        assert!(record.output_messages < record.input_messages);
        let expected_ratio =
            (record.input_tokens as f64 / record.output_tokens as f64 * 100.0).round() / 100.0;
        assert_eq!(record.compression_ratio, expected_ratio);
        assert!(record.tier_results.as_ref().is_some_and(|t| t.len() == 3));

        // Both physical files exist and are non-empty.
        let dir = fx.store.layout().session_summaries_dir("p", "s1");
        let md = dir.join(format!("{}.md", record.file));
        let jsonl = dir.join(format!("{}.jsonl", record.file));
        assert!(std::fs::metadata(&md).unwrap().len() > 0);
        assert!(std::fs::metadata(&jsonl).unwrap().len() > 0);
        assert!(record.file.starts_with("v001_tiered-standard_"));

        // Record landed in the manifest.
        let session = fx.store.get_session("p", "s1").await.unwrap();
        assert_eq!(session.compressions.len(), 1);
    }

    #[tokio::test]
    async fn keepit_decay_preserves_pinned_and_drops_light() {
        let fx = fixture().await;
        let mut texts = plain_texts(6);
        texts[2] = "##keepit1.00##ALPHA ##keepit0.20##BETA".to_string();
        fx.seed_session("s1", &texts).await;
        let compressor = fx.compressor(Arc::new(MockSummarizer));

        let settings = CompressionSettings {
            session_distance: 0,
            ..CompressionSettings::uniform(20.0, Aggressiveness::Aggressive, ModelChoice::Sonnet)
        };
        let record = compressor.create_version("p", "s1", settings).await.unwrap();

        // Threshold 0.5: ALPHA pinned survives, BETA (0.20) is summarized.
        assert_eq!(record.keepit_stats.preserved, 1);
        assert_eq!(record.keepit_stats.summarized, 1);
        assert_eq!(record.keepit_stats.weights, vec![1.0, 0.20]);

        // The surviving marker is verbatim in the markdown output.
        let dir = fx.store.layout().session_summaries_dir("p", "s1");
        let md = std::fs::read_to_string(dir.join(format!("{}.md", record.file))).unwrap();
        assert!(md.contains("ALPHA"));

        // Marker outcomes indexed on the session.
        let session = fx.store.get_session("p", "s1").await.unwrap();
        let alpha = session
            .keepit_markers
            .iter()
            .find(|m| m.content == "ALPHA")
            .unwrap();
        assert_eq!(alpha.survived_in, vec![record.version_id.clone()]);
        let beta = session
            .keepit_markers
            .iter()
            .find(|m| m.content == "BETA")
            .unwrap();
        assert_eq!(beta.summarized_in, vec![record.version_id]);
    }

    #[tokio::test]
    async fn incremental_delta_becomes_part_two() {
        let fx = fixture().await;
        fx.seed_session("s2", &plain_texts(10)).await;
        let compressor = fx.compressor(Arc::new(MockSummarizer));

        compressor
            .create_version("p", "s2", CompressionSettings::tiered(TierPreset::Standard, ModelChoice::Opus))
            .await
            .unwrap();

        // Transcript grows to 15 messages.
        let originals = fx.store.layout().originals_dir("p");
        write_transcript(&originals, "s2", &plain_texts(15));

        let delta = compressor.detect_session_delta("p", "s2").await.unwrap();
        assert!(delta.has_delta);
        assert_eq!(delta.delta_count, 5);
        assert_eq!(delta.start_index, 10);
        assert_eq!(delta.end_index, 15);
        assert!(!delta.is_first_part);
        assert_eq!(delta.previous_part_number, Some(1));

        let record = compressor
            .create_version("p", "s2", CompressionSettings::tiered(TierPreset::Standard, ModelChoice::Opus))
            .await
            .unwrap();
        assert_eq!(record.part_number, 2);
        assert_eq!(record.message_range.start_index, 10);
        assert_eq!(record.message_range.end_index, 15);
        assert!(record.file.contains("_part2"));
    }

    #[tokio::test]
    async fn ratio_zero_passes_messages_through() {
        let fx = fixture().await;
        fx.seed_session("s1", &plain_texts(4)).await;
        // A failing summarizer proves pass-through never invokes it.
        let compressor = fx.compressor(Arc::new(FailingSummarizer));

        let record = compressor
            .create_version(
                "p",
                "s1",
                CompressionSettings::uniform(0.0, Aggressiveness::Minimal, ModelChoice::Haiku),
            )
            .await
            .unwrap();
        assert_eq!(record.output_messages, 4);
        assert_eq!(record.input_tokens, record.output_tokens);
    }

    #[tokio::test]
    async fn concurrent_compression_conflicts() {
        let fx = fixture().await;
        fx.seed_session("s1", &plain_texts(6)).await;
        let compressor = fx.compressor(Arc::new(MockSummarizer));

        let _held = fx
            .locks
            .acquire("p", "s1", OperationType::Compression)
            .unwrap();
        let err = compressor
            .create_version("p", "s1", CompressionSettings::tiered(TierPreset::Standard, ModelChoice::Opus))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::OperationInProgress);
    }

    #[tokio::test]
    async fn summarizer_failure_leaves_manifest_unchanged() {
        let fx = fixture().await;
        fx.seed_session("s1", &plain_texts(8)).await;
        let compressor = fx.compressor(Arc::new(FailingSummarizer));

        let err = compressor
            .create_version("p", "s1", CompressionSettings::tiered(TierPreset::Standard, ModelChoice::Opus))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::SummarizerFailed);

        let session = fx.store.get_session("p", "s1").await.unwrap();
        assert!(session.compressions.is_empty());
        let dir = fx.store.layout().session_summaries_dir("p", "s1");
        let leftovers = std::fs::read_dir(&dir).map(|d| d.count()).unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn summarizer_deadline_is_enforced() {
        let fx = fixture().await;
        fx.seed_session("s1", &plain_texts(8)).await;
        let compressor = Compressor::new(
            fx.store.clone(),
            fx.locks.clone(),
            Arc::new(JsonlTranscriptParser),
            Arc::new(SlowSummarizer { delay: Duration::from_millis(500) }),
            Duration::from_millis(50),
        );

        let err = compressor
            .create_version("p", "s1", CompressionSettings::tiered(TierPreset::Standard, ModelChoice::Opus))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::SummarizerFailed);
        assert!(err.to_string().contains("deadline"));
    }

    #[tokio::test]
    async fn single_message_session_is_insufficient() {
        let fx = fixture().await;
        fx.seed_session("s1", &plain_texts(1)).await;
        let compressor = fx.compressor(Arc::new(MockSummarizer));

        let err = compressor
            .create_version("p", "s1", CompressionSettings::tiered(TierPreset::Standard, ModelChoice::Opus))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InsufficientMessages);
    }

    #[tokio::test]
    async fn duplicate_part_level_is_rejected_up_front() {
        let fx = fixture().await;
        fx.seed_session("s1", &plain_texts(10)).await;
        let compressor = fx.compressor(Arc::new(MockSummarizer));
        let settings = CompressionSettings::tiered(TierPreset::Standard, ModelChoice::Opus);

        compressor.create_version("p", "s1", settings.clone()).await.unwrap();
        // No new messages AND the same (part, level): the empty delta fires first.
        let err = compressor.create_version("p", "s1", settings).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InsufficientMessages);
    }

    #[tokio::test]
    async fn skip_first_messages_trims_head_of_first_part() {
        let fx = fixture().await;
        fx.seed_session("s1", &plain_texts(10)).await;
        let compressor = fx.compressor(Arc::new(MockSummarizer));

        let settings = CompressionSettings {
            skip_first_messages: 3,
            ..CompressionSettings::uniform(5.0, Aggressiveness::Moderate, ModelChoice::Sonnet)
        };
        let record = compressor.create_version("p", "s1", settings).await.unwrap();
        assert_eq!(record.message_range.start_index, 3);
        assert_eq!(record.input_messages, 7);
    }

    #[test]
    fn settings_validation_table() {
        // Uniform requires ratio and aggressiveness.
        let mut s = CompressionSettings::uniform(10.0, Aggressiveness::Moderate, ModelChoice::Opus);
        assert!(validate_settings(&s).is_ok());
        s.compaction_ratio = Some(1.5);
        assert!(validate_settings(&s).is_err());
        s.compaction_ratio = Some(51.0);
        assert!(validate_settings(&s).is_err());
        s.compaction_ratio = Some(0.0);
        assert!(validate_settings(&s).is_ok());
        s.compaction_ratio = Some(10.0);
        s.aggressiveness = None;
        assert!(validate_settings(&s).is_err());

        // Tiered requires exactly one of preset / custom tiers.
        let t = CompressionSettings::tiered(TierPreset::Gentle, ModelChoice::Opus);
        assert!(validate_settings(&t).is_ok());
        let mut custom = t.clone();
        custom.tier_preset = None;
        assert!(validate_settings(&custom).is_err());

        custom.tiers = Some(vec![
            TierSpec { end_percent: 60, compaction_ratio: 10.0, aggressiveness: None },
            TierSpec { end_percent: 100, compaction_ratio: 3.0, aggressiveness: None },
        ]);
        assert!(validate_settings(&custom).is_ok());

        // Descending boundaries rejected.
        custom.tiers = Some(vec![
            TierSpec { end_percent: 60, compaction_ratio: 10.0, aggressiveness: None },
            TierSpec { end_percent: 50, compaction_ratio: 3.0, aggressiveness: None },
        ]);
        assert!(validate_settings(&custom).is_err());

        // Last tier must land on 100.
        custom.tiers = Some(vec![TierSpec {
            end_percent: 80,
            compaction_ratio: 5.0,
            aggressiveness: None,
        }]);
        assert!(validate_settings(&custom).is_err());
    }

    #[test]
    fn tier_boundaries_cover_whole_slice() {
        assert_eq!(tier_boundary(20, 50), 10);
        assert_eq!(tier_boundary(20, 80), 16);
        assert_eq!(tier_boundary(20, 100), 20);
        // Rounds up so a tiny slice still lands in the first tier.
        assert_eq!(tier_boundary(3, 50), 2);
    }

    #[test]
    fn uniform_shapes() {
        assert_eq!(uniform_shape(0.0, 10), TargetShape::PassThrough);
        assert_eq!(uniform_shape(1.0, 10), TargetShape::ReduceVerbosity);
        assert_eq!(uniform_shape(4.0, 10), TargetShape::MessageCount(3));
        assert_eq!(uniform_shape(50.0, 10), TargetShape::MessageCount(1));
    }
}
