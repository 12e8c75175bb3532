//! Lock-protected manifest persistence.
//!
//! Every read and write goes through the cross-process manifest lock.
//! Writes are atomic: serialize to a sibling temp file, fsync, rename over
//! the canonical path. A document older than the current schema is migrated
//! on read and written back under a fresh lock so no lock is held across
//! the CPU work.

use super::migration::{self, MigrationRegistry};
use super::model::{Manifest, ManifestSettings, SessionEntry};
use crate::error::{EngramError, Result};
use crate::lock::{ManifestLock, ManifestLockGuard};
use crate::storage::Layout;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

/// Manifest store for one engine instance.
#[derive(Clone)]
pub struct ManifestStore {
    layout: Layout,
    lock: ManifestLock,
}

impl ManifestStore {
    pub fn new(layout: Layout, lock: ManifestLock) -> Self {
        Self { layout, lock }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Acquire the manifest lock for `project_id`. Exposed for operations
    /// that need to hold the lock across several mutations.
    pub async fn lock_project(&self, project_id: &str) -> Result<ManifestLockGuard> {
        self.lock.acquire(&self.layout.manifest_path(project_id)).await
    }

    /// Load the manifest, migrating it first when the schema is old.
    pub async fn load(&self, project_id: &str) -> Result<Manifest> {
        if !self.layout.project_exists(project_id) {
            return Err(EngramError::ProjectNotFound {
                project_id: project_id.to_string(),
            });
        }
        let guard = self.lock_project(project_id).await?;
        let (manifest, migrated) = self.read_locked(project_id)?;
        drop(guard);

        if migrated {
            // Write back under a fresh lock; the migration itself ran
            // without the lock held across its CPU work.
            let guard = self.lock_project(project_id).await?;
            let mut manifest = manifest;
            self.save_locked(project_id, &mut manifest)?;
            drop(guard);
            return Ok(manifest);
        }
        Ok(manifest)
    }

    /// Load the manifest, creating a fresh one when the project has none.
    pub async fn load_or_init(&self, project_id: &str, display_name: &str) -> Result<Manifest> {
        match self.load(project_id).await {
            Ok(manifest) => Ok(manifest),
            Err(EngramError::ProjectNotFound { .. }) => {
                self.layout.ensure_project(project_id)?;
                let mut manifest = Manifest::new(project_id, display_name);
                let guard = self.lock_project(project_id).await?;
                self.save_locked(project_id, &mut manifest)?;
                drop(guard);
                tracing::info!(project_id, "initialized new project manifest");
                Ok(manifest)
            }
            Err(e) => Err(e),
        }
    }

    /// Validate and persist under the lock.
    pub async fn save(&self, project_id: &str, manifest: &mut Manifest) -> Result<()> {
        let guard = self.lock_project(project_id).await?;
        self.save_locked(project_id, manifest)?;
        drop(guard);
        Ok(())
    }

    /// Load, mutate, save — one lock acquisition. The closure's error
    /// aborts the save.
    pub async fn with_manifest<T>(
        &self,
        project_id: &str,
        mutate: impl FnOnce(&mut Manifest) -> Result<T>,
    ) -> Result<T> {
        let guard = self.lock_project(project_id).await?;
        let (mut manifest, _) = self.read_locked(project_id)?;
        let out = mutate(&mut manifest)?;
        self.save_locked(project_id, &mut manifest)?;
        drop(guard);
        Ok(out)
    }

    // ── helpers ─────────────────────────────────────────────────────────

    pub async fn get_session(&self, project_id: &str, session_id: &str) -> Result<SessionEntry> {
        let manifest = self.load(project_id).await?;
        manifest
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| EngramError::SessionNotFound {
                project_id: project_id.to_string(),
                session_id: session_id.to_string(),
            })
    }

    /// Insert or replace a session entry.
    pub async fn set_session(&self, project_id: &str, session: SessionEntry) -> Result<()> {
        self.with_manifest(project_id, |manifest| {
            manifest.sessions.insert(session.session_id.clone(), session);
            Ok(())
        })
        .await
    }

    pub async fn remove_session(&self, project_id: &str, session_id: &str) -> Result<SessionEntry> {
        self.with_manifest(project_id, |manifest| {
            manifest.sessions.remove(session_id).ok_or_else(|| {
                EngramError::SessionNotFound {
                    project_id: manifest.project_id.clone(),
                    session_id: session_id.to_string(),
                }
            })
        })
        .await
    }

    /// Update `last_accessed` on a session.
    pub async fn touch_session(&self, project_id: &str, session_id: &str) -> Result<()> {
        self.with_manifest(project_id, |manifest| {
            let session = manifest.sessions.get_mut(session_id).ok_or_else(|| {
                EngramError::SessionNotFound {
                    project_id: manifest.project_id.clone(),
                    session_id: session_id.to_string(),
                }
            })?;
            session.last_accessed = Utc::now();
            Ok(())
        })
        .await
    }

    pub async fn update_settings(
        &self,
        project_id: &str,
        settings: ManifestSettings,
    ) -> Result<()> {
        self.with_manifest(project_id, |manifest| {
            manifest.settings = settings;
            Ok(())
        })
        .await
    }

    pub async fn list_sessions(&self, project_id: &str) -> Result<Vec<SessionEntry>> {
        Ok(self.load(project_id).await?.sessions.into_values().collect())
    }

    // ── internals ───────────────────────────────────────────────────────

    /// Read and parse the manifest file; caller holds the lock. Returns
    /// the manifest and whether a migration ran.
    fn read_locked(&self, project_id: &str) -> Result<(Manifest, bool)> {
        let path = self.layout.manifest_path(project_id);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngramError::ProjectNotFound {
                    project_id: project_id.to_string(),
                });
            }
            Err(e) => return Err(EngramError::io(&path, e)),
        };

        let document: serde_json::Value =
            serde_json::from_str(&raw).map_err(|e| EngramError::ManifestCorruption {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if MigrationRegistry::needs_migration(&document)? {
            let from = MigrationRegistry::document_version(&document)?;
            migration::backup_manifest(
                &self.layout.migration_backups_dir(project_id),
                &from.to_string(),
                &raw,
            )?;
            let outcome = MigrationRegistry::default().migrate(document)?;
            let manifest: Manifest = serde_json::from_value(outcome.document).map_err(|e| {
                EngramError::ManifestCorruption {
                    path,
                    reason: format!("post-migration parse failure: {e}"),
                }
            })?;
            return Ok((manifest, true));
        }

        let manifest: Manifest =
            serde_json::from_value(document).map_err(|e| EngramError::ManifestCorruption {
                path,
                reason: e.to_string(),
            })?;
        Ok((manifest, false))
    }

    /// Validate and atomically write; caller holds the lock.
    fn save_locked(&self, project_id: &str, manifest: &mut Manifest) -> Result<()> {
        validate(manifest)?;

        // Monotonic advance even against coarse clocks.
        let now = Utc::now();
        manifest.last_modified = if now > manifest.last_modified {
            now
        } else {
            manifest.last_modified + ChronoDuration::milliseconds(1)
        };

        let path = self.layout.manifest_path(project_id);
        let parent = path.parent().ok_or_else(|| EngramError::ValidationFailed {
            reason: format!("manifest path has no parent: {}", path.display()),
        })?;
        std::fs::create_dir_all(parent).map_err(|e| EngramError::io(parent, e))?;

        write_atomic(&path, &serde_json::to_vec_pretty(manifest).map_err(|e| {
            EngramError::ValidationFailed {
                reason: format!("manifest serialization failed: {e}"),
            }
        })?)?;

        tracing::debug!(project_id, path = %path.display(), "manifest saved");
        Ok(())
    }
}

/// Temp file in the destination directory, fsync, atomic rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| EngramError::ValidationFailed {
        reason: format!("path has no parent: {}", path.display()),
    })?;

    let mut temp =
        tempfile::NamedTempFile::new_in(parent).map_err(|e| EngramError::io(parent, e))?;
    temp.write_all(bytes).map_err(|e| EngramError::io(path, e))?;
    temp.as_file().sync_all().map_err(|e| EngramError::io(path, e))?;
    temp.persist(path)
        .map_err(|e| EngramError::io(path, e.error))?;
    Ok(())
}

/// Schema validation applied on every save.
fn validate(manifest: &Manifest) -> Result<()> {
    let fail = |reason: String| Err(EngramError::ValidationFailed { reason });

    if manifest.version.trim().is_empty() {
        return fail("schema version is empty".to_string());
    }
    if semver::Version::parse(&manifest.version).is_err() {
        return fail(format!("schema version {:?} is not semver", manifest.version));
    }
    if manifest.project_id.trim().is_empty() {
        return fail("projectId is empty".to_string());
    }

    for (key, session) in &manifest.sessions {
        if key != &session.session_id {
            return fail(format!(
                "session map key {key:?} does not match sessionId {:?}",
                session.session_id
            ));
        }
        if session.linked_file.trim().is_empty() {
            return fail(format!("session {key:?} has an empty linkedFile"));
        }
        if let (Some(synced), Some(last)) =
            (session.last_synced_timestamp, session.last_timestamp)
            && synced > last
        {
            return fail(format!(
                "session {key:?} lastSyncedTimestamp is after lastTimestamp"
            ));
        }

        let mut ids = HashSet::new();
        let mut part_levels = HashSet::new();
        for record in &session.compressions {
            if !ids.insert(record.version_id.as_str()) {
                return fail(format!(
                    "session {key:?} has duplicate versionId {:?}",
                    record.version_id
                ));
            }
            if !part_levels.insert((record.part_number, record.compression_level)) {
                return fail(format!(
                    "session {key:?} has duplicate (part {}, {:?}) version",
                    record.part_number, record.compression_level
                ));
            }
        }
    }

    for (key, composition) in &manifest.compositions {
        if key != &composition.composition_id {
            return fail(format!(
                "composition map key {key:?} does not match compositionId {:?}",
                composition.composition_id
            ));
        }
    }
    Ok(())
}
