//! Engine facade.
//!
//! [`Engram`] wires the storage layout, locks, manifest store, and the two
//! injected capabilities (transcript parser, summarizer) into one handle
//! exposing every public operation. All state lives in the project
//! directories; the handle itself is cheap to clone and share.

use crate::compose::{ComposeRequest, CompositionPreview, Planner};
use crate::compression::delta::DeltaReport;
use crate::compression::orchestrator::Compressor;
use crate::compression::registry::{VersionContent, VersionInfo, VersionRegistry};
use crate::config::EngineConfig;
use crate::error::{EngramError, Result};
use crate::keepit::{create_keepit_marker, extract_keepits, normalize_marker};
use crate::lock::{ManifestLock, SessionLocks};
use crate::manifest::{
    CompositionRecord, CompressionRecord, CompressionSettings, KeepitMarker, Manifest,
    ManifestSettings, ManifestStore, OutputFormat, SessionEntry,
};
use crate::session::{
    ProjectStats, RegisterOptions, Registrar, SessionStats, UnregisterOptions,
};
use crate::storage::Layout;
use crate::summarize::Summarizer;
use crate::transcript::{JsonlTranscriptParser, TranscriptParser};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One lineage element of a composition read.
#[derive(Debug, Clone)]
pub struct LineageEntry {
    pub session_id: String,
    pub version_id: String,
    /// The referenced version no longer exists (forced delete).
    pub missing: bool,
}

/// The conversation-memory engine.
#[derive(Clone)]
pub struct Engram {
    config: EngineConfig,
    store: ManifestStore,
    locks: SessionLocks,
    registry: VersionRegistry,
    compressor: Compressor,
    planner: Planner,
    registrar: Registrar,
    parser: Arc<dyn TranscriptParser>,
}

impl Engram {
    /// Build an engine with the default JSONL transcript parser.
    pub fn new(config: EngineConfig, summarizer: Arc<dyn Summarizer>) -> Self {
        Self::with_parser(config, summarizer, Arc::new(JsonlTranscriptParser))
    }

    /// Build an engine with a custom transcript parser.
    pub fn with_parser(
        config: EngineConfig,
        summarizer: Arc<dyn Summarizer>,
        parser: Arc<dyn TranscriptParser>,
    ) -> Self {
        let layout = Layout::new(&config.root);
        let manifest_lock = ManifestLock::new(
            config.manifest_lock_staleness(),
            config.manifest_lock_retries,
        );
        let store = ManifestStore::new(layout, manifest_lock);
        let locks = SessionLocks::new(config.session_lock_staleness());
        let registry = VersionRegistry::new(store.clone());
        let compressor = Compressor::new(
            store.clone(),
            locks.clone(),
            parser.clone(),
            summarizer,
            config.summarizer_deadline(),
        );
        let planner = Planner::new(
            store.clone(),
            locks.clone(),
            registry.clone(),
            compressor.clone(),
            parser.clone(),
        );
        let registrar = Registrar::new(
            store.clone(),
            locks.clone(),
            parser.clone(),
            config.transcripts_dir.clone(),
        );
        Self {
            config,
            store,
            locks,
            registry,
            compressor,
            planner,
            registrar,
            parser,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    /// Spawn the periodic stale session-lock sweeper.
    pub fn spawn_lock_sweeper(&self) -> tokio::task::JoinHandle<()> {
        self.locks
            .spawn_sweeper(self.config.session_lock_staleness())
    }

    // ── projects ────────────────────────────────────────────────────────

    pub async fn ensure_project(&self, project_id: &str, display_name: &str) -> Result<Manifest> {
        self.store.load_or_init(project_id, display_name).await
    }

    pub async fn project_manifest(&self, project_id: &str) -> Result<Manifest> {
        self.store.load(project_id).await
    }

    pub async fn update_settings(
        &self,
        project_id: &str,
        settings: ManifestSettings,
    ) -> Result<()> {
        self.store.update_settings(project_id, settings).await
    }

    pub async fn project_stats(&self, project_id: &str) -> Result<ProjectStats> {
        Ok(crate::session::project_stats(&self.store.load(project_id).await?))
    }

    // ── sessions ────────────────────────────────────────────────────────

    pub async fn register_session(
        &self,
        project_id: &str,
        session_id: &str,
        options: RegisterOptions,
    ) -> Result<SessionEntry> {
        self.registrar.register(project_id, session_id, options).await
    }

    pub async fn refresh_session(&self, project_id: &str, session_id: &str) -> Result<SessionEntry> {
        self.registrar.refresh(project_id, session_id).await
    }

    pub async fn unregister_session(
        &self,
        project_id: &str,
        session_id: &str,
        options: UnregisterOptions,
    ) -> Result<()> {
        self.registrar.unregister(project_id, session_id, options).await
    }

    pub async fn find_unregistered(
        &self,
        project_id: &str,
        scan_dir: Option<&Path>,
    ) -> Result<Vec<PathBuf>> {
        self.registrar.find_unregistered(project_id, scan_dir).await
    }

    pub async fn get_session(&self, project_id: &str, session_id: &str) -> Result<SessionEntry> {
        self.store.get_session(project_id, session_id).await
    }

    pub async fn list_sessions(&self, project_id: &str) -> Result<Vec<SessionEntry>> {
        self.store.list_sessions(project_id).await
    }

    pub async fn session_stats(&self, project_id: &str, session_id: &str) -> Result<SessionStats> {
        Ok(crate::session::session_stats(
            &self.store.get_session(project_id, session_id).await?,
        ))
    }

    // ── compression ─────────────────────────────────────────────────────

    pub async fn create_compression_version(
        &self,
        project_id: &str,
        session_id: &str,
        settings: CompressionSettings,
    ) -> Result<CompressionRecord> {
        self.compressor
            .create_version(project_id, session_id, settings)
            .await
    }

    pub async fn detect_delta(&self, project_id: &str, session_id: &str) -> Result<DeltaReport> {
        self.compressor
            .detect_session_delta(project_id, session_id)
            .await
    }

    pub async fn list_versions(
        &self,
        project_id: &str,
        session_id: &str,
    ) -> Result<Vec<VersionInfo>> {
        self.registry.list_versions(project_id, session_id).await
    }

    pub async fn get_version(
        &self,
        project_id: &str,
        session_id: &str,
        version_id: &str,
    ) -> Result<VersionInfo> {
        self.registry
            .get_version(project_id, session_id, version_id)
            .await
    }

    pub async fn get_version_content(
        &self,
        project_id: &str,
        session_id: &str,
        version_id: &str,
        format: OutputFormat,
    ) -> Result<VersionContent> {
        self.registry
            .get_version_content(project_id, session_id, version_id, format)
            .await
    }

    pub async fn delete_version(
        &self,
        project_id: &str,
        session_id: &str,
        version_id: &str,
        force: bool,
    ) -> Result<()> {
        self.registry
            .delete_version(project_id, session_id, version_id, force)
            .await
    }

    // ── composition ─────────────────────────────────────────────────────

    pub async fn compose_context(
        &self,
        project_id: &str,
        request: &ComposeRequest,
    ) -> Result<CompositionRecord> {
        self.planner.compose_context(project_id, request).await
    }

    pub async fn preview_composition(
        &self,
        project_id: &str,
        request: &ComposeRequest,
    ) -> Result<CompositionPreview> {
        self.planner.preview_composition(project_id, request).await
    }

    /// Read a composition along with its lineage. Versions removed by a
    /// forced delete are reported as missing rather than failing the read.
    pub async fn get_composition(
        &self,
        project_id: &str,
        composition_id: &str,
    ) -> Result<(CompositionRecord, Vec<LineageEntry>)> {
        let manifest = self.store.load(project_id).await?;
        let record = manifest
            .compositions
            .get(composition_id)
            .cloned()
            .ok_or_else(|| EngramError::CompositionNotFound {
                composition_id: composition_id.to_string(),
            })?;

        let mut lineage = Vec::new();
        for component in &record.components {
            let session = manifest.sessions.get(&component.session_id);
            let mut push = |version_id: &str| {
                let missing = version_id != crate::compression::registry::ORIGINAL_VERSION_ID
                    && session
                        .map(|s| s.find_compression(version_id).is_none())
                        .unwrap_or(true);
                lineage.push(LineageEntry {
                    session_id: component.session_id.clone(),
                    version_id: version_id.to_string(),
                    missing,
                });
            };
            match &component.source {
                crate::manifest::ComponentSource::Original => {
                    push(crate::compression::registry::ORIGINAL_VERSION_ID)
                }
                crate::manifest::ComponentSource::Version { version_id } => push(version_id),
                crate::manifest::ComponentSource::AutoParts { selections } => {
                    for selection in selections {
                        push(&selection.version_id);
                    }
                }
            }
        }
        Ok((record, lineage))
    }

    pub async fn list_compositions(&self, project_id: &str) -> Result<Vec<CompositionRecord>> {
        Ok(self
            .store
            .load(project_id)
            .await?
            .compositions
            .into_values()
            .collect())
    }

    /// Delete a composition record and its composed output directory.
    pub async fn delete_composition(&self, project_id: &str, composition_id: &str) -> Result<()> {
        let record = self
            .store
            .with_manifest(project_id, |manifest| {
                manifest.compositions.remove(composition_id).ok_or_else(|| {
                    EngramError::CompositionNotFound {
                        composition_id: composition_id.to_string(),
                    }
                })
            })
            .await?;

        let dir = self
            .store
            .layout()
            .composition_dir(project_id, &crate::storage::sanitize_name(&record.name));
        if let Err(e) = std::fs::remove_dir_all(&dir)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %dir.display(), "failed to remove composed dir: {e}");
        }
        tracing::info!(project_id, composition_id, "composition deleted");
        Ok(())
    }

    /// Append to the composition's consumption audit trail.
    pub async fn mark_composition_used(
        &self,
        project_id: &str,
        composition_id: &str,
        used_in_session: &str,
    ) -> Result<()> {
        self.store
            .with_manifest(project_id, |manifest| {
                let record = manifest
                    .compositions
                    .get_mut(composition_id)
                    .ok_or_else(|| EngramError::CompositionNotFound {
                        composition_id: composition_id.to_string(),
                    })?;
                record.used_in_sessions.push(used_in_session.to_string());
                record.last_used = Some(chrono::Utc::now());
                Ok(())
            })
            .await
    }

    // ── keepit maintenance ──────────────────────────────────────────────

    /// Wrap the first occurrence of `content` in a message with a keepit
    /// marker, rewriting the linked transcript and the session index.
    pub async fn add_keepit(
        &self,
        project_id: &str,
        session_id: &str,
        message_uuid: &str,
        weight: f64,
        content: &str,
    ) -> Result<KeepitMarker> {
        let session = self.store.get_session(project_id, session_id).await?;
        let linked = PathBuf::from(&session.linked_file);

        let marker_text = create_keepit_marker(weight, content);
        let new_text = rewrite_message_text(&linked, message_uuid, |text| {
            if text.contains(&marker_text) {
                return None;
            }
            text.find(content)
                .map(|at| {
                    let mut updated = text.to_string();
                    updated.replace_range(at..at + content.len(), &marker_text);
                    updated
                })
        })
        .await?;

        // Marker content runs to the next boundary, so the indexed content
        // may extend past the wrapped text.
        let raw = extract_keepits(&new_text)
            .into_iter()
            .find(|r| r.content.starts_with(content))
            .ok_or_else(|| EngramError::KeepitNotFound {
                marker_id: format!("content {content:?} not found in message {message_uuid}"),
            })?;
        let marker = normalize_marker(&raw, message_uuid, &new_text);

        let stored = marker.clone();
        self.store
            .with_manifest(project_id, move |manifest| {
                let session = manifest.sessions.get_mut(session_id).ok_or_else(|| {
                    EngramError::SessionNotFound {
                        project_id: manifest.project_id.clone(),
                        session_id: session_id.to_string(),
                    }
                })?;
                session.keepit_markers.push(stored);
                Ok(())
            })
            .await?;
        Ok(marker)
    }

    /// Remove a marker: strip its `##keepit…##` prefix from the transcript
    /// (the content text stays) and drop it from the index.
    pub async fn remove_keepit(
        &self,
        project_id: &str,
        session_id: &str,
        marker_id: &str,
    ) -> Result<()> {
        let session = self.store.get_session(project_id, session_id).await?;
        let marker = session
            .keepit_markers
            .iter()
            .find(|m| m.marker_id == marker_id)
            .cloned()
            .ok_or_else(|| EngramError::KeepitNotFound {
                marker_id: marker_id.to_string(),
            })?;

        let linked = PathBuf::from(&session.linked_file);
        let prefixed = create_keepit_marker(marker.weight, &marker.content);
        rewrite_message_text(&linked, &marker.message_uuid, |text| {
            if text.contains(&prefixed) {
                Some(text.replacen(&prefixed, &marker.content, 1))
            } else {
                None
            }
        })
        .await?;

        self.store
            .with_manifest(project_id, move |manifest| {
                let session = manifest.sessions.get_mut(session_id).ok_or_else(|| {
                    EngramError::SessionNotFound {
                        project_id: manifest.project_id.clone(),
                        session_id: session_id.to_string(),
                    }
                })?;
                session.keepit_markers.retain(|m| m.marker_id != marker_id);
                Ok(())
            })
            .await
    }

    /// Parse a session's linked transcript (exposed for hosts that need the
    /// raw messages).
    pub async fn parse_session(&self, project_id: &str, session_id: &str) -> Result<crate::transcript::Transcript> {
        let session = self.store.get_session(project_id, session_id).await?;
        self.parser.parse(Path::new(&session.linked_file)).await
    }
}

/// Rewrite the text content of one message inside a JSONL transcript.
///
/// `edit` receives the message's first text block and returns the new text,
/// or `None` to signal no change is needed. Writes through symlinks so the
/// link itself is preserved.
async fn rewrite_message_text(
    path: &Path,
    message_uuid: &str,
    edit: impl Fn(&str) -> Option<String>,
) -> Result<String> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| EngramError::io(path, e))?;

    let mut lines: Vec<String> = Vec::new();
    let mut edited_text: Option<String> = None;
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(mut value) = serde_json::from_str::<Value>(trimmed) else {
            lines.push(line.to_string());
            continue;
        };
        if value.get("uuid").and_then(Value::as_str) == Some(message_uuid)
            && edited_text.is_none()
        {
            if let Some(new_text) = edit_message_value(&mut value, &edit) {
                edited_text = Some(new_text);
                lines.push(value.to_string());
                continue;
            }
        }
        lines.push(line.to_string());
    }

    let Some(text) = edited_text else {
        return Err(EngramError::KeepitNotFound {
            marker_id: format!("no editable text in message {message_uuid}"),
        });
    };

    // Write through a symlink to its target; replacing the symlink itself
    // would silently detach the session from the user's transcript.
    let target = std::fs::canonicalize(path).map_err(|e| EngramError::io(path, e))?;
    let mut body = lines.join("\n");
    body.push('\n');
    crate::manifest::write_atomic(&target, body.as_bytes())?;
    Ok(text)
}

fn edit_message_value(value: &mut Value, edit: &impl Fn(&str) -> Option<String>) -> Option<String> {
    let content = value.pointer_mut("/message/content")?;
    match content {
        Value::String(text) => {
            let new_text = edit(text)?;
            *text = new_text.clone();
            Some(new_text)
        }
        Value::Array(blocks) => {
            for block in blocks.iter_mut() {
                if block.get("type").and_then(Value::as_str) == Some("text")
                    && let Some(Value::String(text)) = block.get_mut("text")
                {
                    if let Some(new_text) = edit(text) {
                        *text = new_text.clone();
                        return Some(new_text);
                    }
                }
            }
            None
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::manifest::{Aggressiveness, ModelChoice, TierPreset};
    use crate::compose::ComponentRequest;
    use crate::test_helpers::helpers::{MockSummarizer, plain_texts, write_transcript};

    struct Fixture {
        _dir: tempfile::TempDir,
        engine: Engram,
        transcripts: PathBuf,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let transcripts = dir.path().join("transcripts");
        std::fs::create_dir_all(&transcripts).unwrap();
        let config = EngineConfig {
            transcripts_dir: Some(transcripts.clone()),
            ..EngineConfig::with_root(dir.path().join("root"))
        };
        let engine = Engram::new(config, Arc::new(MockSummarizer));
        engine.ensure_project("p", "Project").await.unwrap();
        Fixture { _dir: dir, engine, transcripts }
    }

    impl Fixture {
        async fn seed(&self, session_id: &str, texts: &[String]) -> SessionEntry {
            write_transcript(&self.transcripts, session_id, texts);
            self.engine
                .register_session("p", session_id, RegisterOptions::default())
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn end_to_end_register_compress_compose() {
        let fx = fixture().await;
        fx.seed("s1", &plain_texts(20)).await;

        let record = fx
            .engine
            .create_compression_version(
                "p",
                "s1",
                CompressionSettings::tiered(TierPreset::Standard, ModelChoice::Opus),
            )
            .await
            .unwrap();
        assert_eq!(record.version_id, "v001");

        // Versions list: original + v001.
        let versions = fx.engine.list_versions("p", "s1").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions[0].is_original);
        assert_eq!(versions[1].version_id, "v001");
        assert!(versions[1].file_sizes.jsonl > 0);

        // Compose using the existing version directly.
        let request = ComposeRequest {
            name: "ctx".to_string(),
            description: None,
            components: vec![ComponentRequest {
                session_id: "s1".to_string(),
                version_id: Some("v001".to_string()),
                ..Default::default()
            }],
            total_token_budget: 5_000,
            allocation_strategy: None,
            output_format: OutputFormat::Both,
            model: ModelChoice::Sonnet,
        };
        let composition = fx.engine.compose_context("p", &request).await.unwrap();
        assert_eq!(composition.components.len(), 1);

        // Stats reflect the pipeline.
        let stats = fx.engine.session_stats("p", "s1").await.unwrap();
        assert_eq!(stats.version_count, 1);
        let project = fx.engine.project_stats("p").await.unwrap();
        assert_eq!(project.composition_count, 1);
    }

    #[tokio::test]
    async fn version_in_use_refuses_then_force_deletes_dangling() {
        let fx = fixture().await;
        fx.seed("s1", &plain_texts(10)).await;

        fx.engine
            .create_compression_version(
                "p",
                "s1",
                CompressionSettings::tiered(TierPreset::Standard, ModelChoice::Opus),
            )
            .await
            .unwrap();
        let request = ComposeRequest {
            name: "uses v001".to_string(),
            description: None,
            components: vec![ComponentRequest {
                session_id: "s1".to_string(),
                version_id: Some("v001".to_string()),
                ..Default::default()
            }],
            total_token_budget: 5_000,
            allocation_strategy: None,
            output_format: OutputFormat::Md,
            model: ModelChoice::Sonnet,
        };
        let composition = fx.engine.compose_context("p", &request).await.unwrap();

        // Unforced delete refuses with the referencing compositions.
        let err = fx
            .engine
            .delete_version("p", "s1", "v001", false)
            .await
            .unwrap_err();
        match &err {
            EngramError::VersionInUse { composition_ids, .. } => {
                assert_eq!(composition_ids, &vec![composition.composition_id.clone()]);
            }
            other => panic!("expected VersionInUse, got {other:?}"),
        }

        // Forced delete succeeds; the composition remains, dangling.
        fx.engine.delete_version("p", "s1", "v001", true).await.unwrap();
        let (kept, lineage) = fx
            .engine
            .get_composition("p", &composition.composition_id)
            .await
            .unwrap();
        assert_eq!(kept.composition_id, composition.composition_id);
        assert_eq!(lineage.len(), 1);
        assert!(lineage[0].missing);

        // Both version files are gone.
        let versions = fx.engine.list_versions("p", "s1").await.unwrap();
        assert_eq!(versions.len(), 1); // only the original remains
    }

    #[tokio::test]
    async fn delete_version_refuses_original() {
        let fx = fixture().await;
        fx.seed("s1", &plain_texts(4)).await;
        let err = fx
            .engine
            .delete_version("p", "s1", "original", true)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CannotDeleteOriginal);
    }

    #[tokio::test]
    async fn add_and_remove_keepit_rewrite_transcript() {
        let fx = fixture().await;
        let entry = fx.seed("s1", &plain_texts(4)).await;
        assert!(entry.keepit_markers.is_empty());

        let marker = fx
            .engine
            .add_keepit("p", "s1", "m2", 0.9, "the build pipeline discussion")
            .await
            .unwrap();
        assert_eq!(marker.weight, 0.9);

        // Transcript now carries the marker text.
        let session = fx.engine.get_session("p", "s1").await.unwrap();
        assert_eq!(session.keepit_markers.len(), 1);
        let raw = std::fs::read_to_string(&session.linked_file).unwrap();
        assert!(raw.contains("##keepit0.90##the build pipeline discussion"));

        // Removal strips the prefix but keeps the content.
        fx.engine
            .remove_keepit("p", "s1", &marker.marker_id)
            .await
            .unwrap();
        let raw = std::fs::read_to_string(&session.linked_file).unwrap();
        assert!(!raw.contains("##keepit0.90##"));
        assert!(raw.contains("the build pipeline discussion"));
        let session = fx.engine.get_session("p", "s1").await.unwrap();
        assert!(session.keepit_markers.is_empty());

        // The file is still a symlink into the user's transcript dir.
        let linked = PathBuf::from(&session.linked_file);
        let meta = std::fs::symlink_metadata(&linked).unwrap();
        if meta.file_type().is_symlink() {
            let user_raw =
                std::fs::read_to_string(fx.transcripts.join("s1.jsonl")).unwrap();
            assert!(user_raw.contains("the build pipeline discussion"));
        }
    }

    #[tokio::test]
    async fn composition_usage_audit_appends() {
        let fx = fixture().await;
        fx.seed("s1", &plain_texts(4)).await;
        let request = ComposeRequest {
            name: "audited".to_string(),
            description: None,
            components: vec![ComponentRequest {
                session_id: "s1".to_string(),
                ..Default::default()
            }],
            total_token_budget: 5_000,
            allocation_strategy: None,
            output_format: OutputFormat::Md,
            model: ModelChoice::Sonnet,
        };
        let composition = fx.engine.compose_context("p", &request).await.unwrap();

        fx.engine
            .mark_composition_used("p", &composition.composition_id, "s9")
            .await
            .unwrap();
        let (record, _) = fx
            .engine
            .get_composition("p", &composition.composition_id)
            .await
            .unwrap();
        assert_eq!(record.used_in_sessions, vec!["s9"]);
        assert!(record.last_used.is_some());
    }

    #[tokio::test]
    async fn delete_composition_removes_dir_and_record() {
        let fx = fixture().await;
        fx.seed("s1", &plain_texts(4)).await;
        let request = ComposeRequest {
            name: "to delete".to_string(),
            description: None,
            components: vec![ComponentRequest {
                session_id: "s1".to_string(),
                ..Default::default()
            }],
            total_token_budget: 5_000,
            allocation_strategy: None,
            output_format: OutputFormat::Both,
            model: ModelChoice::Sonnet,
        };
        let composition = fx.engine.compose_context("p", &request).await.unwrap();
        let dir = fx
            .engine
            .store()
            .layout()
            .composition_dir("p", "to-delete");
        assert!(dir.exists());

        fx.engine
            .delete_composition("p", &composition.composition_id)
            .await
            .unwrap();
        assert!(!dir.exists());
        let err = fx
            .engine
            .get_composition("p", &composition.composition_id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CompositionNotFound);
    }

    #[tokio::test]
    async fn uniform_compression_records_aggressiveness_level() {
        let fx = fixture().await;
        fx.seed("s1", &plain_texts(8)).await;
        let record = fx
            .engine
            .create_compression_version(
                "p",
                "s1",
                CompressionSettings::uniform(4.0, Aggressiveness::Minimal, ModelChoice::Haiku),
            )
            .await
            .unwrap();
        assert_eq!(
            record.compression_level,
            crate::manifest::CompressionLevel::Light
        );
        assert!(record.file.contains("uniform-minimal"));
    }
}
