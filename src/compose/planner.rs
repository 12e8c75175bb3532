//! Composition planning and assembly.
//!
//! `compose_context` allocates the global budget across components,
//! resolves each one to a concrete source (original, an existing version,
//! per-part picks, or a freshly created compression), assembles the
//! messages in component order, writes the three output files, and records
//! the composition in the manifest. `preview_composition` runs the same
//! planning without touching the summarizer or the disk.

use super::allocation::{self, ComponentWeight};
use super::output::{self, AssembledComponent, ComposedMessage};
use super::parts::{self, PartChoice, SelectionCriteria};
use crate::compression::registry::{ORIGINAL_VERSION_ID, VersionRegistry};
use crate::compression::orchestrator::Compressor;
use crate::error::{EngramError, Result};
use crate::lock::{OperationType, SessionLockGuard, SessionLocks};
use crate::manifest::{
    AllocationStrategy, ComponentSource, CompositionComponent, CompositionRecord,
    CompressionRecord, CompressionSettings, ManifestStore, ModelChoice, OutputFiles,
    OutputFormat, PartSelection, SessionEntry, TierPreset,
};
use crate::storage::sanitize_name;
use crate::transcript::TranscriptParser;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Minimum accepted global budget.
const MIN_TOTAL_BUDGET: u64 = 1_000;

/// Score floor for auto-selecting an existing version.
const AUTO_SELECT_MIN_SCORE: f64 = 0.5;

/// One requested component.
#[derive(Debug, Clone, Default)]
pub struct ComponentRequest {
    pub session_id: String,
    /// `original` or a concrete version id; bypasses auto-selection.
    pub version_id: Option<String>,
    /// Compress afresh with these settings before composing.
    pub recompress: Option<CompressionSettings>,
    /// Pick the best version per part under the component budget.
    pub use_part_selection: bool,
    /// Weight for the `custom` allocation strategy.
    pub weight: Option<f64>,
}

/// A composition request.
#[derive(Debug, Clone)]
pub struct ComposeRequest {
    pub name: String,
    pub description: Option<String>,
    pub components: Vec<ComponentRequest>,
    pub total_token_budget: u64,
    pub allocation_strategy: Option<AllocationStrategy>,
    pub output_format: OutputFormat,
    pub model: ModelChoice,
}

/// What the planner decided for a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionAction {
    UseOriginal,
    UseExisting,
    UseParts,
    CreateNew,
}

impl SelectionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UseOriginal => "use-original",
            Self::UseExisting => "use-existing",
            Self::UseParts => "use-parts",
            Self::CreateNew => "create-new",
        }
    }
}

/// Preview of one component's plan.
#[derive(Debug, Clone)]
pub struct ComponentPreview {
    pub session_id: String,
    pub action: SelectionAction,
    pub estimated_tokens: u64,
    pub allocated_budget: u64,
    /// Populated for `UseExisting`.
    pub version_id: Option<String>,
}

/// Full dry-run result.
#[derive(Debug, Clone)]
pub struct CompositionPreview {
    pub components: Vec<ComponentPreview>,
    pub allocation_strategy: AllocationStrategy,
    pub estimated_tokens: u64,
    pub new_compressions_needed: usize,
}

/// Composition planner.
#[derive(Clone)]
pub struct Planner {
    store: ManifestStore,
    locks: SessionLocks,
    registry: VersionRegistry,
    compressor: Compressor,
    parser: Arc<dyn TranscriptParser>,
}

impl Planner {
    pub fn new(
        store: ManifestStore,
        locks: SessionLocks,
        registry: VersionRegistry,
        compressor: Compressor,
        parser: Arc<dyn TranscriptParser>,
    ) -> Self {
        Self { store, locks, registry, compressor, parser }
    }

    /// Plan without executing: no summarizer, no files, no manifest write.
    pub async fn preview_composition(
        &self,
        project_id: &str,
        request: &ComposeRequest,
    ) -> Result<CompositionPreview> {
        let (sessions, strategy, allocations) = self.plan(project_id, request).await?;

        let mut previews = Vec::with_capacity(request.components.len());
        let mut new_needed = 0usize;
        for (i, component) in request.components.iter().enumerate() {
            let session = &sessions[i];
            let budget = allocations[i];
            let (action, estimated, version_id) = plan_component(component, session, budget);
            if action == SelectionAction::CreateNew {
                new_needed += 1;
            }
            previews.push(ComponentPreview {
                session_id: component.session_id.clone(),
                action,
                estimated_tokens: estimated,
                allocated_budget: budget,
                version_id,
            });
        }

        Ok(CompositionPreview {
            estimated_tokens: previews.iter().map(|p| p.estimated_tokens).sum(),
            components: previews,
            allocation_strategy: strategy,
            new_compressions_needed: new_needed,
        })
    }

    /// Build and record a composed context.
    pub async fn compose_context(
        &self,
        project_id: &str,
        request: &ComposeRequest,
    ) -> Result<CompositionRecord> {
        let (sessions, strategy, allocations) = self.plan(project_id, request).await?;

        // Composition locks on every distinct session, taken in sorted
        // order so concurrent compositions cannot deadlock.
        let mut guards: HashMap<String, SessionLockGuard> = HashMap::new();
        let mut distinct: Vec<&str> = request
            .components
            .iter()
            .map(|c| c.session_id.as_str())
            .collect();
        distinct.sort_unstable();
        distinct.dedup();
        for session_id in distinct {
            let guard =
                self.locks
                    .acquire(project_id, session_id, OperationType::Composition)?;
            guards.insert(session_id.to_string(), guard);
        }

        let mut assembled = Vec::with_capacity(request.components.len());
        for (i, component) in request.components.iter().enumerate() {
            let resolved = self
                .resolve_component(
                    project_id,
                    component,
                    &sessions[i],
                    allocations[i],
                    i,
                    request.model,
                    &mut guards,
                )
                .await?;
            assembled.push(resolved);
        }

        // Build the record.
        let created_at = Utc::now();
        let composition_id = format!("comp_{}", Uuid::new_v4().simple());
        let components: Vec<CompositionComponent> = assembled
            .iter()
            .map(|a| CompositionComponent {
                session_id: a.session_id.clone(),
                source: a.source.clone(),
                order: a.order,
                token_contribution: a.token_contribution(),
                message_contribution: a.messages.len(),
                allocated_budget: a.allocated_budget,
            })
            .collect();
        let actual_tokens: u64 = components.iter().map(|c| c.token_contribution).sum();
        let total_messages: usize = components.iter().map(|c| c.message_contribution).sum();

        let dir_name = sanitize_name(&request.name);
        let dir = self
            .store
            .layout()
            .composition_dir(project_id, &dir_name);
        std::fs::create_dir_all(&dir).map_err(|e| EngramError::io(&dir, e))?;

        let md_path = dir.join(format!("{dir_name}.md"));
        let jsonl_path = dir.join(format!("{dir_name}.jsonl"));
        let metadata_path = dir.join("composition.json");

        let mut record = CompositionRecord {
            composition_id: composition_id.clone(),
            name: request.name.clone(),
            description: request.description.clone().unwrap_or_default(),
            created_at,
            components,
            allocation_strategy: strategy,
            total_token_budget: request.total_token_budget,
            actual_tokens,
            total_messages,
            output_files: OutputFiles::default(),
            used_in_sessions: Vec::new(),
            last_used: None,
        };

        // Write outputs for the requested format; the sidecar always.
        if matches!(request.output_format, OutputFormat::Md | OutputFormat::Both) {
            let md = output::render_markdown(&record, &assembled);
            crate::manifest::write_atomic(&md_path, md.as_bytes())?;
            record.output_files.md = Some(md_path.display().to_string());
        }
        if matches!(request.output_format, OutputFormat::Jsonl | OutputFormat::Both) {
            let jsonl = output::render_jsonl(&record, &assembled);
            crate::manifest::write_atomic(&jsonl_path, jsonl.as_bytes())?;
            record.output_files.jsonl = Some(jsonl_path.display().to_string());
        }
        let sidecar = output::render_provenance(&record, &assembled);
        crate::manifest::write_atomic(
            &metadata_path,
            serde_json::to_string_pretty(&sidecar)
                .map_err(|e| EngramError::ValidationFailed { reason: e.to_string() })?
                .as_bytes(),
        )?;
        record.output_files.metadata = Some(metadata_path.display().to_string());

        // Record in the manifest.
        let stored = record.clone();
        self.store
            .with_manifest(project_id, move |manifest| {
                manifest
                    .compositions
                    .insert(stored.composition_id.clone(), stored);
                Ok(())
            })
            .await?;

        tracing::info!(
            project_id,
            composition_id,
            components = record.components.len(),
            actual_tokens,
            budget = request.total_token_budget,
            "composition created"
        );
        Ok(record)
    }

    /// Common request validation and budget allocation.
    async fn plan(
        &self,
        project_id: &str,
        request: &ComposeRequest,
    ) -> Result<(Vec<SessionEntry>, AllocationStrategy, Vec<u64>)> {
        if request.name.trim().is_empty() {
            return Err(EngramError::InvalidSettings {
                reason: "composition name is empty".to_string(),
            });
        }
        if request.components.is_empty() {
            return Err(EngramError::InvalidSettings {
                reason: "composition needs at least one component".to_string(),
            });
        }
        if request.total_token_budget < MIN_TOTAL_BUDGET {
            return Err(EngramError::InvalidSettings {
                reason: format!(
                    "totalTokenBudget {} below minimum {MIN_TOTAL_BUDGET}",
                    request.total_token_budget
                ),
            });
        }
        for settings in request.components.iter().filter_map(|c| c.recompress.as_ref()) {
            crate::compression::validate_settings(settings)?;
        }

        let manifest = self.store.load(project_id).await?;
        let mut sessions = Vec::with_capacity(request.components.len());
        for component in &request.components {
            let session = manifest
                .sessions
                .get(&component.session_id)
                .cloned()
                .ok_or_else(|| EngramError::SessionNotFound {
                    project_id: project_id.to_string(),
                    session_id: component.session_id.clone(),
                })?;
            sessions.push(session);
        }

        let strategy = request.allocation_strategy.unwrap_or_else(|| {
            let tokens: Vec<u64> = sessions.iter().map(|s| s.original_tokens).collect();
            allocation::suggest_allocation(&tokens)
        });
        let weights: Vec<ComponentWeight> = request
            .components
            .iter()
            .zip(&sessions)
            .map(|(c, s)| ComponentWeight {
                original_tokens: s.original_tokens,
                weight: c.weight,
            })
            .collect();
        let allocations =
            allocation::allocate_budget(&weights, request.total_token_budget, strategy)?;
        Ok((sessions, strategy, allocations))
    }

    /// Resolve one component into its messages and provenance.
    async fn resolve_component(
        &self,
        project_id: &str,
        component: &ComponentRequest,
        session: &SessionEntry,
        budget: u64,
        index: usize,
        model: ModelChoice,
        guards: &mut HashMap<String, SessionLockGuard>,
    ) -> Result<AssembledComponent> {
        let (action, _, picked_version) = plan_component(component, session, budget);

        match action {
            SelectionAction::UseOriginal => {
                let messages = self.load_original_messages(session, None).await?;
                Ok(AssembledComponent {
                    session_id: session.session_id.clone(),
                    order: index,
                    source: ComponentSource::Original,
                    allocated_budget: budget,
                    messages,
                    tier_results: None,
                })
            }
            SelectionAction::UseExisting => {
                let version_id = picked_version.expect("use-existing always picks a version");
                let record = session.find_compression(&version_id).ok_or_else(|| {
                    EngramError::VersionNotFound {
                        session_id: session.session_id.clone(),
                        version_id: version_id.clone(),
                    }
                })?;
                let messages = self
                    .load_version_messages(project_id, &session.session_id, record)
                    .await?;
                Ok(AssembledComponent {
                    session_id: session.session_id.clone(),
                    order: index,
                    source: ComponentSource::Version { version_id },
                    allocated_budget: budget,
                    messages,
                    tier_results: record.tier_results.clone(),
                })
            }
            SelectionAction::UseParts => {
                let plan = parts::select_parts(session, budget, true);
                let loads = plan
                    .selections
                    .iter()
                    .map(|choice| self.load_part_choice(project_id, session, choice));
                let messages = futures::future::try_join_all(loads)
                    .await?
                    .into_iter()
                    .flatten()
                    .collect();
                let selections = plan
                    .selections
                    .iter()
                    .map(|choice| PartSelection {
                        part_number: choice.part_number,
                        version_id: choice.version_id.clone(),
                        tokens: choice.tokens,
                        messages: choice.messages,
                    })
                    .collect();
                Ok(AssembledComponent {
                    session_id: session.session_id.clone(),
                    order: index,
                    source: ComponentSource::AutoParts { selections },
                    allocated_budget: budget,
                    messages,
                    tier_results: None,
                })
            }
            SelectionAction::CreateNew => {
                let settings = component.recompress.clone().unwrap_or_else(|| {
                    required_ratio_settings(session.original_tokens, budget, model)
                });
                let settings = CompressionSettings {
                    session_distance: (index + 1) as u32,
                    ..settings
                };

                // The compression lock supersedes our composition lock for
                // this session; release it for the duration of the run.
                let guard = guards.remove(&session.session_id);
                let result = self
                    .compressor
                    .create_version(project_id, &session.session_id, settings)
                    .await;
                if guard.is_some() {
                    let reacquired = self.locks.acquire(
                        project_id,
                        &session.session_id,
                        OperationType::Composition,
                    )?;
                    guards.insert(session.session_id.clone(), reacquired);
                }
                let record = result?;

                let messages = self
                    .load_version_messages(project_id, &session.session_id, &record)
                    .await?;
                Ok(AssembledComponent {
                    session_id: session.session_id.clone(),
                    order: index,
                    source: ComponentSource::Version { version_id: record.version_id.clone() },
                    allocated_budget: budget,
                    messages,
                    tier_results: record.tier_results.clone(),
                })
            }
        }
    }

    /// Load the messages behind one part choice (a version's JSONL, or a
    /// range sliced out of the linked transcript for `original` parts).
    async fn load_part_choice(
        &self,
        project_id: &str,
        session: &SessionEntry,
        choice: &PartChoice,
    ) -> Result<Vec<ComposedMessage>> {
        if choice.version_id == ORIGINAL_VERSION_ID {
            let slice = choice
                .message_range
                .as_ref()
                .map(|r| (r.start_index, r.end_index));
            return self.load_original_messages(session, slice).await;
        }
        let record = session
            .find_compression(&choice.version_id)
            .ok_or_else(|| EngramError::VersionNotFound {
                session_id: session.session_id.clone(),
                version_id: choice.version_id.clone(),
            })?;
        self.load_version_messages(project_id, &session.session_id, record)
            .await
    }

    async fn load_original_messages(
        &self,
        session: &SessionEntry,
        range: Option<(usize, usize)>,
    ) -> Result<Vec<ComposedMessage>> {
        let linked = PathBuf::from(&session.linked_file);
        let transcript = self.parser.parse(&linked).await?;
        let messages = match range {
            Some((start, end)) => {
                let end = end.min(transcript.messages.len());
                let start = start.min(end);
                &transcript.messages[start..end]
            }
            None => &transcript.messages[..],
        };
        Ok(messages.iter().map(ComposedMessage::from_transcript).collect())
    }

    async fn load_version_messages(
        &self,
        project_id: &str,
        session_id: &str,
        record: &CompressionRecord,
    ) -> Result<Vec<ComposedMessage>> {
        let info = self
            .registry
            .get_version(project_id, session_id, &record.version_id)
            .await?;
        let path = info.jsonl_path.ok_or_else(|| EngramError::FileNotFound {
            path: PathBuf::from(&record.file),
        })?;
        output::load_version_messages(&path).await
    }
}

/// Decide the action for a component; shared by preview and execution.
fn plan_component(
    component: &ComponentRequest,
    session: &SessionEntry,
    budget: u64,
) -> (SelectionAction, u64, Option<String>) {
    if let Some(version_id) = &component.version_id {
        if version_id == ORIGINAL_VERSION_ID {
            return (SelectionAction::UseOriginal, session.original_tokens, None);
        }
        let tokens = session
            .find_compression(version_id)
            .map(|r| r.output_tokens)
            .unwrap_or(budget);
        return (SelectionAction::UseExisting, tokens, Some(version_id.clone()));
    }
    if component.recompress.is_some() {
        return (SelectionAction::CreateNew, budget, None);
    }
    if component.use_part_selection {
        let plan = parts::select_parts(session, budget, true);
        return (SelectionAction::UseParts, plan.total_tokens(), None);
    }

    // Auto-select: the original when it fits, else the best-scoring
    // existing compression, else a new tiered compression sized by the
    // required ratio.
    if session.original_tokens <= budget {
        return (SelectionAction::UseOriginal, session.original_tokens, None);
    }
    let criteria = SelectionCriteria {
        max_tokens: Some(budget),
        preferred_ratio: None,
        preserve_keepits: true,
        prefer_recent: false,
    };
    let now = Utc::now();
    let best = session
        .compressions
        .iter()
        .map(|r| (r, parts::score_version(r, &criteria, now)))
        .max_by(|a, b| a.1.total_cmp(&b.1));
    if let Some((record, score)) = best
        && score >= AUTO_SELECT_MIN_SCORE
    {
        return (
            SelectionAction::UseExisting,
            record.output_tokens,
            Some(record.version_id.clone()),
        );
    }
    (SelectionAction::CreateNew, budget, None)
}

/// Tiered settings sized from the ratio needed to fit `budget`.
fn required_ratio_settings(
    original_tokens: u64,
    budget: u64,
    model: ModelChoice,
) -> CompressionSettings {
    let required = (original_tokens as f64 / budget.max(1) as f64).ceil();
    let preset = if required > 20.0 {
        TierPreset::Aggressive
    } else if required > 10.0 {
        TierPreset::Standard
    } else {
        TierPreset::Gentle
    };
    CompressionSettings::tiered(preset, model)
}
