//! Session registration.
//!
//! Registering links a user transcript into the project's `originals/` tree
//! (symlink where the host allows it, copy otherwise), parses it once for
//! counters and metadata, and indexes its keepit markers. Refresh re-parses
//! and re-extracts; unregister removes the link and, optionally, the
//! summaries directory.

use crate::error::{EngramError, Result};
use crate::keepit::{extract_keepits, normalize_marker};
use crate::lock::{OperationType, SessionLocks};
use crate::manifest::{
    KeepitMarker, LinkType, ManifestStore, SessionEntry, SessionMetadata,
};
use crate::transcript::{Transcript, TranscriptParser};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Options for [`Registrar::register`].
#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    /// Path to the user's transcript. Falls back to
    /// `<transcripts_dir>/<session_id>.jsonl` when configured.
    pub original_file_path: Option<PathBuf>,
}

/// Options for [`Registrar::unregister`].
#[derive(Debug, Clone, Default)]
pub struct UnregisterOptions {
    /// Also delete `summaries/<session_id>/` and its version files.
    pub remove_summaries: bool,
}

/// Session registrar.
#[derive(Clone)]
pub struct Registrar {
    store: ManifestStore,
    locks: SessionLocks,
    parser: Arc<dyn TranscriptParser>,
    transcripts_dir: Option<PathBuf>,
}

impl Registrar {
    pub fn new(
        store: ManifestStore,
        locks: SessionLocks,
        parser: Arc<dyn TranscriptParser>,
        transcripts_dir: Option<PathBuf>,
    ) -> Self {
        Self { store, locks, parser, transcripts_dir }
    }

    /// Register a transcript with a project.
    pub async fn register(
        &self,
        project_id: &str,
        session_id: &str,
        options: RegisterOptions,
    ) -> Result<SessionEntry> {
        let _guard = self
            .locks
            .acquire(project_id, session_id, OperationType::Import)?;

        let source = self.resolve_source(session_id, options.original_file_path)?;
        if !source.is_file() {
            return Err(EngramError::FileNotFound { path: source });
        }

        let manifest = self
            .store
            .load_or_init(project_id, project_id)
            .await?;
        if manifest.sessions.contains_key(session_id) {
            return Err(EngramError::AlreadyRegistered {
                session_id: session_id.to_string(),
            });
        }

        self.store.layout().ensure_project(project_id)?;
        let linked = self.store.layout().linked_file(project_id, session_id);
        let link_type = link_or_copy(&source, &linked)?;

        let transcript = self.parser.parse(&linked).await?;
        let entry = build_entry(session_id, &source, &linked, link_type, &transcript);

        let stored = entry.clone();
        self.store
            .with_manifest(project_id, move |manifest| {
                if manifest.sessions.contains_key(&stored.session_id) {
                    return Err(EngramError::AlreadyRegistered {
                        session_id: stored.session_id.clone(),
                    });
                }
                manifest.sessions.insert(stored.session_id.clone(), stored);
                Ok(())
            })
            .await?;

        tracing::info!(
            project_id,
            session_id,
            messages = entry.original_messages,
            tokens = entry.original_tokens,
            keepits = entry.keepit_markers.len(),
            link_type = ?entry.link_type,
            "session registered"
        );
        Ok(entry)
    }

    /// Re-parse the transcript and refresh counters, metadata, and keepit
    /// markers. Marker outcome history (`survived_in`/`summarized_in`) is
    /// carried over for markers that still exist.
    pub async fn refresh(&self, project_id: &str, session_id: &str) -> Result<SessionEntry> {
        let _guard = self
            .locks
            .acquire(project_id, session_id, OperationType::Import)?;

        let session = self.store.get_session(project_id, session_id).await?;
        let linked = PathBuf::from(&session.linked_file);

        // A copied transcript goes stale; pull the source forward first.
        if session.link_type == LinkType::Copy {
            let source = PathBuf::from(&session.original_file);
            if source.is_file() {
                std::fs::copy(&source, &linked).map_err(|e| EngramError::io(&linked, e))?;
            } else {
                tracing::warn!(
                    session_id,
                    source = %source.display(),
                    "original transcript gone; refreshing from the engine copy"
                );
            }
        }
        if !linked.exists() {
            return Err(EngramError::FileNotFound { path: linked });
        }

        let transcript = self.parser.parse(&linked).await?;
        let fresh_markers = index_markers(&transcript);

        let updated = self
            .store
            .with_manifest(project_id, move |manifest| {
                let entry = manifest.sessions.get_mut(session_id).ok_or_else(|| {
                    EngramError::SessionNotFound {
                        project_id: manifest.project_id.clone(),
                        session_id: session_id.to_string(),
                    }
                })?;
                entry.original_tokens = transcript.total_tokens();
                entry.original_messages = transcript.total_messages;
                entry.first_timestamp = transcript.first_timestamp();
                entry.last_timestamp = transcript.last_timestamp();
                entry.last_synced_timestamp = transcript.last_timestamp();
                entry.last_synced_message_uuid =
                    transcript.messages.last().map(|m| m.uuid.clone());
                entry.metadata = metadata_from(&transcript);
                entry.last_accessed = Utc::now();
                entry.keepit_markers = merge_markers(&entry.keepit_markers, fresh_markers);
                Ok(entry.clone())
            })
            .await?;

        tracing::info!(project_id, session_id, messages = updated.original_messages, "session refreshed");
        Ok(updated)
    }

    /// Remove a session: link, manifest entry, and optionally the summaries
    /// directory with every version file in it.
    pub async fn unregister(
        &self,
        project_id: &str,
        session_id: &str,
        options: UnregisterOptions,
    ) -> Result<()> {
        let _guard = self
            .locks
            .acquire(project_id, session_id, OperationType::Import)?;

        let session = self.store.remove_session(project_id, session_id).await?;

        let linked = PathBuf::from(&session.linked_file);
        if let Err(e) = std::fs::remove_file(&linked)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %linked.display(), "failed to remove linked transcript: {e}");
        }

        if options.remove_summaries {
            let summaries = self
                .store
                .layout()
                .session_summaries_dir(project_id, session_id);
            if let Err(e) = std::fs::remove_dir_all(&summaries)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(path = %summaries.display(), "failed to remove summaries: {e}");
            }
        }

        tracing::info!(project_id, session_id, "session unregistered");
        Ok(())
    }

    /// Scan a transcript directory for `.jsonl` files not yet registered.
    pub async fn find_unregistered(
        &self,
        project_id: &str,
        scan_dir: Option<&Path>,
    ) -> Result<Vec<PathBuf>> {
        let dir = match scan_dir {
            Some(dir) => dir.to_path_buf(),
            None => self.transcripts_dir.clone().ok_or_else(|| {
                EngramError::InvalidImport {
                    reason: "no transcript directory configured or given".to_string(),
                }
            })?,
        };
        let manifest = self.store.load_or_init(project_id, project_id).await?;

        let mut candidates = Vec::new();
        let entries = std::fs::read_dir(&dir).map_err(|e| EngramError::io(&dir, e))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !manifest.sessions.contains_key(stem) {
                candidates.push(path);
            }
        }
        candidates.sort();
        Ok(candidates)
    }

    fn resolve_source(&self, session_id: &str, explicit: Option<PathBuf>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path);
        }
        self.transcripts_dir
            .as_ref()
            .map(|dir| dir.join(format!("{session_id}.jsonl")))
            .ok_or_else(|| EngramError::InvalidImport {
                reason: "no originalFilePath given and no transcript directory configured"
                    .to_string(),
            })
    }
}

/// Symlink the source into place, falling back to a copy when the host
/// forbids symlinks (or on non-unix hosts).
fn link_or_copy(source: &Path, linked: &Path) -> Result<LinkType> {
    if let Err(e) = std::fs::remove_file(linked)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        return Err(EngramError::io(linked, e));
    }

    #[cfg(unix)]
    {
        match std::os::unix::fs::symlink(source, linked) {
            Ok(()) => return Ok(LinkType::Symlink),
            Err(e) => {
                tracing::debug!(
                    source = %source.display(),
                    "symlink failed ({e}); falling back to copy"
                );
            }
        }
    }

    std::fs::copy(source, linked).map_err(|e| EngramError::io(linked, e))?;
    Ok(LinkType::Copy)
}

fn build_entry(
    session_id: &str,
    source: &Path,
    linked: &Path,
    link_type: LinkType,
    transcript: &Transcript,
) -> SessionEntry {
    let now = Utc::now();
    SessionEntry {
        session_id: session_id.to_string(),
        original_file: source.display().to_string(),
        linked_file: linked.display().to_string(),
        link_type,
        original_tokens: transcript.total_tokens(),
        original_messages: transcript.total_messages,
        first_timestamp: transcript.first_timestamp(),
        last_timestamp: transcript.last_timestamp(),
        last_synced_timestamp: transcript.last_timestamp(),
        last_synced_message_uuid: transcript.messages.last().map(|m| m.uuid.clone()),
        registered_at: now,
        last_accessed: now,
        metadata: metadata_from(transcript),
        keepit_markers: index_markers(transcript),
        compressions: Vec::new(),
    }
}

fn metadata_from(transcript: &Transcript) -> SessionMetadata {
    SessionMetadata {
        cwd: transcript.metadata.cwd.clone(),
        git_branch: transcript.metadata.git_branch.clone(),
        agent_version: transcript.metadata.agent_version.clone(),
        project_name: transcript.metadata.project_name.clone(),
    }
}

fn index_markers(transcript: &Transcript) -> Vec<KeepitMarker> {
    let mut markers = Vec::new();
    for message in &transcript.messages {
        let text = message.text();
        for raw in extract_keepits(&text) {
            markers.push(normalize_marker(&raw, &message.uuid, &text));
        }
    }
    markers
}

/// Keep outcome history for markers that still exist (matched by message
/// and content); markers gone from the transcript drop out.
fn merge_markers(existing: &[KeepitMarker], fresh: Vec<KeepitMarker>) -> Vec<KeepitMarker> {
    fresh
        .into_iter()
        .map(|mut marker| {
            if let Some(prior) = existing
                .iter()
                .find(|m| m.message_uuid == marker.message_uuid && m.content == marker.content)
            {
                marker.marker_id = prior.marker_id.clone();
                marker.created_at = prior.created_at;
                marker.survived_in = prior.survived_in.clone();
                marker.summarized_in = prior.summarized_in.clone();
                marker.weight_history = prior.weight_history.clone();
                if (prior.weight - marker.weight).abs() > f64::EPSILON {
                    let history = marker.weight_history.get_or_insert_with(Vec::new);
                    history.push(crate::manifest::WeightChange {
                        old_weight: prior.weight,
                        new_weight: marker.weight,
                        changed_at: Utc::now(),
                    });
                }
            }
            marker
        })
        .collect()
}
