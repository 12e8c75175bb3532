//! Manifest entities.
//!
//! The on-disk JSON uses camelCase field names and kebab-case enum values;
//! the closed enums here are the only representation these values have
//! inside the engine (no open strings between components).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Compression mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    Uniform,
    Tiered,
}

/// Requested aggressiveness for uniform compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggressiveness {
    Minimal,
    Moderate,
    Aggressive,
}

/// Coarse bucket a version lands in; at most one version per
/// `(part, level)` pair exists within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    Light,
    Moderate,
    Aggressive,
}

impl CompressionLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Moderate => "moderate",
            Self::Aggressive => "aggressive",
        }
    }
}

/// What happens to keepit markers during a compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeepitMode {
    PreserveAll,
    Decay,
    Ignore,
}

/// How the engine-owned transcript copy was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Symlink,
    Copy,
}

/// Budget split across composition components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AllocationStrategy {
    Equal,
    Proportional,
    Recency,
    InverseRecency,
    Custom,
}

/// Project-level default preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionPreset {
    Light,
    Standard,
    Aggressive,
    Custom,
}

/// Named tier plans for tiered compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierPreset {
    Gentle,
    Standard,
    Aggressive,
}

impl TierPreset {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gentle => "gentle",
            Self::Standard => "standard",
            Self::Aggressive => "aggressive",
        }
    }
}

/// Model the summarizer should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelChoice {
    Opus,
    Sonnet,
    Haiku,
}

/// Composition output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Md,
    Jsonl,
    Both,
}

/// One tier of a custom tiered plan. `end_percent` is the cumulative
/// boundary: a tier covers messages from the previous boundary up to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierSpec {
    pub end_percent: u8,
    pub compaction_ratio: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggressiveness: Option<Aggressiveness>,
}

/// Settings a compression version was created with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionSettings {
    pub mode: CompressionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compaction_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier_preset: Option<TierPreset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiers: Option<Vec<TierSpec>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggressiveness: Option<Aggressiveness>,
    pub model: ModelChoice,
    #[serde(default)]
    pub skip_first_messages: usize,
    #[serde(default = "default_keepit_mode")]
    pub keepit_mode: KeepitMode,
    /// How many sessions back this one sits in a composition; feeds decay.
    #[serde(default)]
    pub session_distance: u32,
}

fn default_keepit_mode() -> KeepitMode {
    KeepitMode::Decay
}

impl CompressionSettings {
    /// Uniform-mode settings with the common defaults.
    pub fn uniform(ratio: f64, aggressiveness: Aggressiveness, model: ModelChoice) -> Self {
        Self {
            mode: CompressionMode::Uniform,
            compaction_ratio: Some(ratio),
            tier_preset: None,
            tiers: None,
            aggressiveness: Some(aggressiveness),
            model,
            skip_first_messages: 0,
            keepit_mode: KeepitMode::Decay,
            session_distance: 0,
        }
    }

    /// Tiered-mode settings from a named preset.
    pub fn tiered(preset: TierPreset, model: ModelChoice) -> Self {
        Self {
            mode: CompressionMode::Tiered,
            compaction_ratio: None,
            tier_preset: Some(preset),
            tiers: None,
            aggressiveness: None,
            model,
            skip_first_messages: 0,
            keepit_mode: KeepitMode::Decay,
            session_distance: 0,
        }
    }

    /// The coarse level this settings object derives to.
    ///
    /// Uniform maps its aggressiveness directly; tiered maps the preset
    /// name; custom tier lists default to moderate.
    pub fn derived_level(&self) -> CompressionLevel {
        match self.mode {
            CompressionMode::Uniform => match self.aggressiveness {
                Some(Aggressiveness::Minimal) => CompressionLevel::Light,
                Some(Aggressiveness::Moderate) | None => CompressionLevel::Moderate,
                Some(Aggressiveness::Aggressive) => CompressionLevel::Aggressive,
            },
            CompressionMode::Tiered => match self.tier_preset {
                Some(TierPreset::Gentle) => CompressionLevel::Light,
                Some(TierPreset::Standard) => CompressionLevel::Moderate,
                Some(TierPreset::Aggressive) => CompressionLevel::Aggressive,
                None => CompressionLevel::Moderate,
            },
        }
    }

    /// Preset label used in version filenames.
    pub fn preset_label(&self) -> String {
        match self.mode {
            CompressionMode::Uniform => match self.aggressiveness {
                Some(Aggressiveness::Minimal) => "minimal".to_string(),
                Some(Aggressiveness::Moderate) | None => "moderate".to_string(),
                Some(Aggressiveness::Aggressive) => "aggressive".to_string(),
            },
            CompressionMode::Tiered => self
                .tier_preset
                .map(|p| p.as_str().to_string())
                .unwrap_or_else(|| "custom".to_string()),
        }
    }
}

/// Range of original messages a version covers. `end_index` is exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRange {
    pub start_index: usize,
    pub end_index: usize,
    pub message_count: usize,
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: DateTime<Utc>,
}

/// Keepit outcome counters for one version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeepitStats {
    pub preserved: usize,
    pub summarized: usize,
    #[serde(default)]
    pub weights: Vec<f64>,
}

/// Byte sizes of the two physical files of a version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSizes {
    pub md: u64,
    pub jsonl: u64,
}

/// Outcome of a single tier within a tiered compression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierResult {
    pub tier_index: usize,
    pub end_percent: u8,
    pub compaction_ratio: f64,
    pub input_messages: usize,
    pub output_messages: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One compression version of (a part of) a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionRecord {
    pub version_id: String,
    /// Base filename; the physical files are `<file>.md` and `<file>.jsonl`.
    pub file: String,
    pub created_at: DateTime<Utc>,
    pub settings: CompressionSettings,
    pub input_tokens: u64,
    pub input_messages: usize,
    pub output_tokens: u64,
    pub output_messages: usize,
    /// `input_tokens / output_tokens`, rounded to two decimals.
    pub compression_ratio: f64,
    pub processing_time_ms: u64,
    #[serde(default)]
    pub keepit_stats: KeepitStats,
    #[serde(default)]
    pub file_sizes: FileSizes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier_results: Option<Vec<TierResult>>,
    pub part_number: u32,
    pub compression_level: CompressionLevel,
    pub message_range: MessageRange,
    /// Legacy marker for records written before incremental parts existed.
    #[serde(default)]
    pub is_full_session: bool,
}

/// A recorded change to a marker's weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightChange {
    pub old_weight: f64,
    pub new_weight: f64,
    pub changed_at: DateTime<Utc>,
}

/// An indexed keepit marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeepitMarker {
    pub marker_id: String,
    pub message_uuid: String,
    /// In `[0.00, 1.00]`, two decimals. `1.00` is pinned.
    pub weight: f64,
    /// Verbatim marker content.
    pub content: String,
    /// Byte offset of the marker within its message text.
    pub position: usize,
    /// Up to 50 chars of surrounding text on each side.
    #[serde(default)]
    pub context_before: String,
    #[serde(default)]
    pub context_after: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub survived_in: Vec<String>,
    #[serde(default)]
    pub summarized_in: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_history: Option<Vec<WeightChange>>,
}

impl KeepitMarker {
    /// Pinned markers always survive compression.
    pub fn is_pinned(&self) -> bool {
        self.weight >= 1.0
    }
}

/// Host metadata captured at registration time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
}

/// A tracked session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    pub session_id: String,
    /// Absolute path to the user's transcript.
    pub original_file: String,
    /// Engine-owned copy or symlink under `originals/`.
    pub linked_file: String,
    pub link_type: LinkType,
    pub original_tokens: u64,
    pub original_messages: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_message_uuid: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub metadata: SessionMetadata,
    #[serde(default)]
    pub keepit_markers: Vec<KeepitMarker>,
    #[serde(default)]
    pub compressions: Vec<CompressionRecord>,
}

impl SessionEntry {
    /// Next monotonic session-scoped version id (`v001`, `v002`, …).
    pub fn next_version_id(&self) -> String {
        let max = self
            .compressions
            .iter()
            .filter_map(|c| parse_version_number(&c.version_id))
            .max()
            .unwrap_or(0);
        format!("v{:03}", max + 1)
    }

    pub fn find_compression(&self, version_id: &str) -> Option<&CompressionRecord> {
        self.compressions.iter().find(|c| c.version_id == version_id)
    }

    /// Highest part number recorded so far, if any.
    pub fn last_part_number(&self) -> Option<u32> {
        self.compressions.iter().map(|c| c.part_number).max()
    }
}

/// Parse `v<NNN>` into its number.
pub fn parse_version_number(version_id: &str) -> Option<u32> {
    version_id.strip_prefix('v')?.parse().ok()
}

/// Where a composition component's messages came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ComponentSource {
    /// The uncompressed transcript.
    Original,
    /// A concrete compression version.
    #[serde(rename_all = "camelCase")]
    Version { version_id: String },
    /// Per-part best-version selection.
    #[serde(rename_all = "camelCase")]
    AutoParts { selections: Vec<PartSelection> },
}

/// One part's pick inside an auto-parts component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartSelection {
    pub part_number: u32,
    /// A version id, or `"original"` for an uncompressed range.
    pub version_id: String,
    pub tokens: u64,
    pub messages: usize,
}

/// One ordered element of a composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionComponent {
    pub session_id: String,
    #[serde(flatten)]
    pub source: ComponentSource,
    pub order: usize,
    pub token_contribution: u64,
    pub message_contribution: usize,
    pub allocated_budget: u64,
}

/// Output file paths of a composed artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputFiles {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

/// A recorded composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionRecord {
    pub composition_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub components: Vec<CompositionComponent>,
    pub allocation_strategy: AllocationStrategy,
    pub total_token_budget: u64,
    pub actual_tokens: u64,
    pub total_messages: usize,
    #[serde(default)]
    pub output_files: OutputFiles,
    /// Append-only audit of sessions this composition was consumed in.
    #[serde(default)]
    pub used_in_sessions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

impl CompositionRecord {
    /// Whether any component references the given session version.
    pub fn references_version(&self, session_id: &str, version_id: &str) -> bool {
        self.components.iter().any(|c| {
            c.session_id == session_id
                && match &c.source {
                    ComponentSource::Version { version_id: v } => v == version_id,
                    ComponentSource::AutoParts { selections } => {
                        selections.iter().any(|s| s.version_id == version_id)
                    }
                    ComponentSource::Original => false,
                }
        })
    }
}

/// Project-level behavior toggles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSettings {
    #[serde(default = "default_preset")]
    pub default_compression_preset: CompressionPreset,
    #[serde(default = "default_true")]
    pub auto_register: bool,
    #[serde(default = "default_true")]
    pub keepit_decay: bool,
}

fn default_preset() -> CompressionPreset {
    CompressionPreset::Standard
}

fn default_true() -> bool {
    true
}

impl Default for ManifestSettings {
    fn default() -> Self {
        Self {
            default_compression_preset: default_preset(),
            auto_register: true,
            keepit_decay: true,
        }
    }
}

/// One applied-migration audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationEntry {
    pub from_version: String,
    pub to_version: String,
    pub applied_at: DateTime<Utc>,
}

/// The per-project manifest document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Schema version (semver).
    pub version: String,
    pub project_id: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    #[serde(default)]
    pub sessions: BTreeMap<String, SessionEntry>,
    #[serde(default)]
    pub compositions: BTreeMap<String, CompositionRecord>,
    #[serde(default)]
    pub settings: ManifestSettings,
    #[serde(default, rename = "_migrationHistory", skip_serializing_if = "Vec::is_empty")]
    pub migration_history: Vec<MigrationEntry>,
}

impl Manifest {
    pub fn new(project_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            version: crate::manifest::CURRENT_SCHEMA_VERSION.to_string(),
            project_id: project_id.into(),
            display_name: display_name.into(),
            created_at: now,
            last_modified: now,
            sessions: BTreeMap::new(),
            compositions: BTreeMap::new(),
            settings: ManifestSettings::default(),
            migration_history: Vec::new(),
        }
    }

    /// All compositions that reference a version of a session.
    pub fn compositions_referencing(&self, session_id: &str, version_id: &str) -> Vec<String> {
        self.compositions
            .values()
            .filter(|c| c.references_version(session_id, version_id))
            .map(|c| c.composition_id.clone())
            .collect()
    }
}
