//! Version registry: records and their two physical files.
//!
//! Filename grammar (stable for UIs and tests):
//! `v<NNN>_<mode>-<preset>_<k>k[_part<N>][.md|.jsonl]`, e.g.
//! `v003_tiered-standard_10k.jsonl`.

use crate::error::{EngramError, Result};
use crate::manifest::{
    CompressionMode, CompressionRecord, FileSizes, ManifestStore, OutputFormat, SessionEntry,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use tokio::io::AsyncBufReadExt;

static VERSION_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(v\d{3,})_").expect("version id regex"));

/// Pseudo-version id for the uncompressed transcript.
pub const ORIGINAL_VERSION_ID: &str = "original";

/// Build the base filename (no extension) for a version.
pub fn version_filename(
    version_id: &str,
    mode: CompressionMode,
    preset_label: &str,
    output_tokens: u64,
    part_number: u32,
) -> String {
    let mode_label = match mode {
        CompressionMode::Uniform => "uniform",
        CompressionMode::Tiered => "tiered",
    };
    let k_tokens = ((output_tokens as f64) / 1000.0).round().max(1.0) as u64;
    let mut name = format!("{version_id}_{mode_label}-{preset_label}_{k_tokens}k");
    if part_number > 1 {
        name.push_str(&format!("_part{part_number}"));
    }
    name
}

/// Recover `v<NNN>` from a version filename.
pub fn parse_version_id_from_filename(filename: &str) -> Option<String> {
    VERSION_ID_RE
        .captures(filename)
        .map(|caps| caps[1].to_string())
}

/// A listed version: the synthetic `original` entry or a stored record
/// annotated with on-disk sizes and download paths.
#[derive(Debug, Clone)]
pub struct VersionInfo {
    pub version_id: String,
    pub is_original: bool,
    pub record: Option<CompressionRecord>,
    pub file_sizes: FileSizes,
    /// Markdown rendering, absent for `original`.
    pub md_path: Option<PathBuf>,
    /// Machine rendering; the linked transcript for `original`.
    pub jsonl_path: Option<PathBuf>,
}

/// Streamed or loaded version content.
pub enum VersionContent {
    Markdown(String),
    /// Line stream over a JSONL file; large files never load whole.
    Jsonl(tokio::io::Lines<tokio::io::BufReader<tokio::fs::File>>),
}

/// Registry over one project's versions.
#[derive(Clone)]
pub struct VersionRegistry {
    store: ManifestStore,
}

impl VersionRegistry {
    pub fn new(store: ManifestStore) -> Self {
        Self { store }
    }

    fn version_paths(&self, project_id: &str, session_id: &str, file: &str) -> (PathBuf, PathBuf) {
        let dir = self
            .store
            .layout()
            .session_summaries_dir(project_id, session_id);
        (dir.join(format!("{file}.md")), dir.join(format!("{file}.jsonl")))
    }

    /// The synthetic `original` pseudo-version plus every stored record,
    /// newest last, each with current on-disk sizes.
    pub async fn list_versions(
        &self,
        project_id: &str,
        session_id: &str,
    ) -> Result<Vec<VersionInfo>> {
        let session = self.store.get_session(project_id, session_id).await?;
        let mut out = vec![self.original_info(&session)];

        for record in &session.compressions {
            out.push(self.annotate(project_id, session_id, record));
        }
        Ok(out)
    }

    /// One version, `original` included.
    pub async fn get_version(
        &self,
        project_id: &str,
        session_id: &str,
        version_id: &str,
    ) -> Result<VersionInfo> {
        let session = self.store.get_session(project_id, session_id).await?;
        if version_id == ORIGINAL_VERSION_ID {
            return Ok(self.original_info(&session));
        }
        let record = session.find_compression(version_id).ok_or_else(|| {
            EngramError::VersionNotFound {
                session_id: session_id.to_string(),
                version_id: version_id.to_string(),
            }
        })?;
        Ok(self.annotate(project_id, session_id, record))
    }

    /// Read a version's content in the requested format. Markdown loads as
    /// one string; JSONL streams line-by-line.
    pub async fn get_version_content(
        &self,
        project_id: &str,
        session_id: &str,
        version_id: &str,
        format: OutputFormat,
    ) -> Result<VersionContent> {
        let info = self.get_version(project_id, session_id, version_id).await?;
        match format {
            OutputFormat::Md => {
                let path = info.md_path.ok_or_else(|| EngramError::InvalidFormat {
                    format: "md (original has no markdown rendering)".to_string(),
                })?;
                let content = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| EngramError::io(&path, e))?;
                Ok(VersionContent::Markdown(content))
            }
            OutputFormat::Jsonl => {
                let path = info.jsonl_path.ok_or_else(|| EngramError::InvalidFormat {
                    format: "jsonl".to_string(),
                })?;
                let file = tokio::fs::File::open(&path)
                    .await
                    .map_err(|e| EngramError::io(&path, e))?;
                Ok(VersionContent::Jsonl(
                    tokio::io::BufReader::new(file).lines(),
                ))
            }
            OutputFormat::Both => Err(EngramError::InvalidFormat {
                format: "both (pick md or jsonl for content reads)".to_string(),
            }),
        }
    }

    /// Delete a version: refuse `original`; refuse versions referenced by a
    /// composition unless forced. The manifest record goes first (under the
    /// lock), then the files; a composition left dangling by a forced
    /// delete is retained.
    pub async fn delete_version(
        &self,
        project_id: &str,
        session_id: &str,
        version_id: &str,
        force: bool,
    ) -> Result<()> {
        if version_id == ORIGINAL_VERSION_ID {
            return Err(EngramError::CannotDeleteOriginal);
        }

        let file = self
            .store
            .with_manifest(project_id, |manifest| {
                let referencing = manifest.compositions_referencing(session_id, version_id);
                if !referencing.is_empty() && !force {
                    return Err(EngramError::VersionInUse {
                        version_id: version_id.to_string(),
                        composition_ids: referencing,
                    });
                }
                if !referencing.is_empty() {
                    tracing::warn!(
                        version_id,
                        compositions = ?referencing,
                        "force-deleting version still referenced by compositions"
                    );
                }

                let session = manifest.sessions.get_mut(session_id).ok_or_else(|| {
                    EngramError::SessionNotFound {
                        project_id: project_id.to_string(),
                        session_id: session_id.to_string(),
                    }
                })?;
                let index = session
                    .compressions
                    .iter()
                    .position(|c| c.version_id == version_id)
                    .ok_or_else(|| EngramError::VersionNotFound {
                        session_id: session_id.to_string(),
                        version_id: version_id.to_string(),
                    })?;
                Ok(session.compressions.remove(index).file)
            })
            .await?;

        let (md, jsonl) = self.version_paths(project_id, session_id, &file);
        for path in [md, jsonl] {
            if let Err(e) = tokio::fs::remove_file(&path).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(path = %path.display(), "failed to remove version file: {e}");
            }
        }
        tracing::info!(project_id, session_id, version_id, "version deleted");
        Ok(())
    }

    fn original_info(&self, session: &SessionEntry) -> VersionInfo {
        let linked = PathBuf::from(&session.linked_file);
        let jsonl_size = std::fs::metadata(&linked).map(|m| m.len()).unwrap_or(0);
        VersionInfo {
            version_id: ORIGINAL_VERSION_ID.to_string(),
            is_original: true,
            record: None,
            file_sizes: FileSizes { md: 0, jsonl: jsonl_size },
            md_path: None,
            jsonl_path: Some(linked),
        }
    }

    fn annotate(
        &self,
        project_id: &str,
        session_id: &str,
        record: &CompressionRecord,
    ) -> VersionInfo {
        let (md, jsonl) = self.version_paths(project_id, session_id, &record.file);
        let size = |p: &PathBuf| std::fs::metadata(p).map(|m| m.len()).unwrap_or(0);
        VersionInfo {
            version_id: record.version_id.clone(),
            is_original: false,
            record: Some(record.clone()),
            file_sizes: FileSizes { md: size(&md), jsonl: size(&jsonl) },
            md_path: Some(md),
            jsonl_path: Some(jsonl),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("v001", CompressionMode::Tiered, "standard", 10_000, 1, "v001_tiered-standard_10k")]
    #[case("v003", CompressionMode::Uniform, "aggressive", 400, 1, "v003_uniform-aggressive_1k")]
    #[case("v012", CompressionMode::Tiered, "gentle", 2_400, 3, "v012_tiered-gentle_2k_part3")]
    #[case("v002", CompressionMode::Uniform, "moderate", 1_501, 2, "v002_uniform-moderate_2k_part2")]
    fn filename_grammar(
        #[case] id: &str,
        #[case] mode: CompressionMode,
        #[case] preset: &str,
        #[case] tokens: u64,
        #[case] part: u32,
        #[case] expected: &str,
    ) {
        assert_eq!(version_filename(id, mode, preset, tokens, part), expected);
    }

    #[test]
    fn parse_version_id_round_trips() {
        assert_eq!(
            parse_version_id_from_filename("v003_tiered-standard_10k.jsonl"),
            Some("v003".to_string())
        );
        assert_eq!(
            parse_version_id_from_filename("v012_tiered-gentle_2k_part3.md"),
            Some("v012".to_string())
        );
        assert_eq!(parse_version_id_from_filename("not-a-version.md"), None);
    }

    #[test]
    fn zero_tokens_still_names_one_k() {
        assert_eq!(
            version_filename("v001", CompressionMode::Uniform, "minimal", 0, 1),
            "v001_uniform-minimal_1k"
        );
    }
}
