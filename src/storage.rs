//! Storage layout.
//!
//! All paths under the engine root are computed here and nowhere else.
//!
//! ```text
//! <root>/
//!   cache/
//!   projects/<projectId>/
//!     manifest.json
//!     originals/<sessionId>.jsonl
//!     summaries/<sessionId>/
//!     composed/<sanitizedName>/
//!     .migration-backups/
//! ```

use crate::error::{EngramError, Result};
use std::path::{Path, PathBuf};

/// Deterministic path layout rooted at a single directory.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Shared cache directory (scratch space, not authoritative).
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.root.join("projects")
    }

    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.projects_dir().join(project_id)
    }

    pub fn manifest_path(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("manifest.json")
    }

    pub fn originals_dir(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("originals")
    }

    /// Engine-owned copy or symlink of a session transcript.
    pub fn linked_file(&self, project_id: &str, session_id: &str) -> PathBuf {
        self.originals_dir(project_id)
            .join(format!("{session_id}.jsonl"))
    }

    pub fn summaries_dir(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("summaries")
    }

    pub fn session_summaries_dir(&self, project_id: &str, session_id: &str) -> PathBuf {
        self.summaries_dir(project_id).join(session_id)
    }

    pub fn composed_dir(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("composed")
    }

    pub fn composition_dir(&self, project_id: &str, sanitized_name: &str) -> PathBuf {
        self.composed_dir(project_id).join(sanitized_name)
    }

    pub fn migration_backups_dir(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join(".migration-backups")
    }

    /// Create the full project tree (idempotent).
    pub fn ensure_project(&self, project_id: &str) -> Result<PathBuf> {
        let project = self.project_dir(project_id);
        for dir in [
            self.cache_dir(),
            project.clone(),
            self.originals_dir(project_id),
            self.summaries_dir(project_id),
            self.composed_dir(project_id),
            self.migration_backups_dir(project_id),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| EngramError::io(&dir, e))?;
        }
        Ok(project)
    }

    /// Whether the project tree exists (manifest presence is not required).
    pub fn project_exists(&self, project_id: &str) -> bool {
        self.project_dir(project_id).is_dir()
    }
}

/// Sanitize a user-supplied composition name into a directory-safe slug.
///
/// Keeps alphanumerics, `-` and `_`; everything else collapses to a single
/// `-`. Empty input becomes `"composition"`.
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = false;
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            out.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    let out = out.trim_matches('-').to_string();
    if out.is_empty() { "composition".to_string() } else { out }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_deterministic() {
        let layout = Layout::new("/data/engram");
        assert_eq!(
            layout.manifest_path("proj"),
            PathBuf::from("/data/engram/projects/proj/manifest.json")
        );
        assert_eq!(
            layout.linked_file("proj", "sess-1"),
            PathBuf::from("/data/engram/projects/proj/originals/sess-1.jsonl")
        );
        assert_eq!(
            layout.session_summaries_dir("proj", "sess-1"),
            PathBuf::from("/data/engram/projects/proj/summaries/sess-1")
        );
        assert_eq!(
            layout.migration_backups_dir("proj"),
            PathBuf::from("/data/engram/projects/proj/.migration-backups")
        );
    }

    #[test]
    fn ensure_project_creates_tree() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        layout.ensure_project("p1").unwrap();

        assert!(layout.project_dir("p1").is_dir());
        assert!(layout.originals_dir("p1").is_dir());
        assert!(layout.summaries_dir("p1").is_dir());
        assert!(layout.composed_dir("p1").is_dir());
        assert!(layout.migration_backups_dir("p1").is_dir());
        assert!(layout.cache_dir().is_dir());

        // Idempotent
        layout.ensure_project("p1").unwrap();
    }

    #[test]
    fn sanitize_collapses_and_lowercases() {
        assert_eq!(sanitize_name("My Sprint / Review!"), "my-sprint-review");
        assert_eq!(sanitize_name("weekly_sync"), "weekly_sync");
        assert_eq!(sanitize_name("  "), "composition");
        assert_eq!(sanitize_name("---"), "composition");
    }
}
