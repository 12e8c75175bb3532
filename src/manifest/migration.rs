//! Manifest schema migrations.
//!
//! Migrations are pure `(json) → json` functions registered against the
//! schema version they produce, applied in semver order. A timestamped
//! backup of the pre-migration document is written first; the last five
//! backups are kept.

use crate::error::{EngramError, Result};
use chrono::Utc;
use semver::Version;
use serde_json::Value;
use std::path::Path;

/// Schema version this build reads and writes.
pub const CURRENT_SCHEMA_VERSION: &str = "1.1.0";

/// How many migration backups to retain.
const BACKUP_KEEP: usize = 5;

type MigrationFn = fn(Value) -> Value;

struct Migration {
    target: Version,
    apply: MigrationFn,
}

/// Ordered migration table.
pub struct MigrationRegistry {
    migrations: Vec<Migration>,
}

impl Default for MigrationRegistry {
    fn default() -> Self {
        let mut migrations = vec![Migration {
            target: Version::new(1, 1, 0),
            apply: migrate_1_1_0,
        }];
        migrations.sort_by(|a, b| a.target.cmp(&b.target));
        Self { migrations }
    }
}

/// Outcome of a migration run.
pub struct MigrationOutcome {
    pub document: Value,
    pub applied: Vec<(String, String)>,
}

impl MigrationRegistry {
    /// Parse the schema version out of a raw manifest document.
    pub fn document_version(document: &Value) -> Result<Version> {
        let raw = document
            .get("version")
            .and_then(Value::as_str)
            .ok_or_else(|| EngramError::ValidationFailed {
                reason: "manifest has no schema version".to_string(),
            })?;
        Version::parse(raw).map_err(|e| EngramError::ValidationFailed {
            reason: format!("unparseable schema version {raw:?}: {e}"),
        })
    }

    /// Whether `document` is older than the current schema.
    pub fn needs_migration(document: &Value) -> Result<bool> {
        let current = Version::parse(CURRENT_SCHEMA_VERSION).expect("current version");
        Ok(Self::document_version(document)? < current)
    }

    /// Apply every migration newer than the document's version, in order.
    /// Each step stamps the document's `version` and appends to
    /// `_migrationHistory`.
    pub fn migrate(&self, mut document: Value) -> Result<MigrationOutcome> {
        let mut from = Self::document_version(&document)?;
        let mut applied = Vec::new();

        for migration in &self.migrations {
            if migration.target <= from {
                continue;
            }
            tracing::info!(
                from = %from,
                to = %migration.target,
                "applying manifest migration"
            );
            document = (migration.apply)(document);
            stamp(&mut document, &from, &migration.target);
            applied.push((from.to_string(), migration.target.to_string()));
            from = migration.target.clone();
        }

        Ok(MigrationOutcome { document, applied })
    }
}

fn stamp(document: &mut Value, from: &Version, to: &Version) {
    if let Some(obj) = document.as_object_mut() {
        obj.insert("version".to_string(), Value::String(to.to_string()));
        let history = obj
            .entry("_migrationHistory")
            .or_insert_with(|| Value::Array(vec![]));
        if let Some(entries) = history.as_array_mut() {
            entries.push(serde_json::json!({
                "fromVersion": from.to_string(),
                "toVersion": to.to_string(),
                "appliedAt": Utc::now().to_rfc3339(),
            }));
        }
    }
}

/// 1.0.0 → 1.1.0: introduce the `settings` block (moving the legacy
/// top-level `defaultPreset` into it) and label pre-incremental
/// compression records as full-session part 1.
fn migrate_1_1_0(mut document: Value) -> Value {
    let Some(obj) = document.as_object_mut() else {
        return document;
    };

    let legacy_preset = obj.remove("defaultPreset");
    let settings = obj
        .entry("settings")
        .or_insert_with(|| Value::Object(Default::default()));
    if let Some(settings) = settings.as_object_mut() {
        if !settings.contains_key("defaultCompressionPreset") {
            let preset = legacy_preset
                .and_then(|p| p.as_str().map(String::from))
                .unwrap_or_else(|| "standard".to_string());
            settings.insert("defaultCompressionPreset".to_string(), Value::String(preset));
        }
        settings
            .entry("autoRegister")
            .or_insert(Value::Bool(true));
        settings
            .entry("keepitDecay")
            .or_insert(Value::Bool(true));
    }

    if let Some(sessions) = obj.get_mut("sessions").and_then(Value::as_object_mut) {
        for session in sessions.values_mut() {
            let Some(compressions) = session
                .get_mut("compressions")
                .and_then(Value::as_array_mut)
            else {
                continue;
            };
            for record in compressions.iter_mut() {
                let Some(record) = record.as_object_mut() else {
                    continue;
                };
                if record.contains_key("partNumber") {
                    continue;
                }
                record.insert("partNumber".to_string(), Value::from(1));
                record.insert("isFullSession".to_string(), Value::Bool(true));
                record
                    .entry("compressionLevel")
                    .or_insert_with(|| Value::String("moderate".to_string()));
                if !record.contains_key("messageRange") {
                    let count = record
                        .get("inputMessages")
                        .and_then(Value::as_u64)
                        .unwrap_or(0);
                    let created = record
                        .get("createdAt")
                        .cloned()
                        .unwrap_or_else(|| Value::String(Utc::now().to_rfc3339()));
                    record.insert(
                        "messageRange".to_string(),
                        serde_json::json!({
                            "startIndex": 0,
                            "endIndex": count,
                            "messageCount": count,
                            "startTimestamp": created,
                            "endTimestamp": created,
                        }),
                    );
                }
            }
        }
    }
    document
}

/// Write a pre-migration backup and prune old ones.
pub fn backup_manifest(backups_dir: &Path, from_version: &str, raw: &str) -> Result<()> {
    std::fs::create_dir_all(backups_dir).map_err(|e| EngramError::io(backups_dir, e))?;

    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    let path = backups_dir.join(format!("manifest-{from_version}-{stamp}.json"));
    std::fs::write(&path, raw).map_err(|e| EngramError::io(&path, e))?;
    tracing::info!(path = %path.display(), "wrote manifest migration backup");

    prune_backups(backups_dir);
    Ok(())
}

fn prune_backups(backups_dir: &Path) {
    let Ok(entries) = std::fs::read_dir(backups_dir) else {
        return;
    };
    let mut backups: Vec<_> = entries
        .flatten()
        .filter(|e| {
            e.file_name()
                .to_string_lossy()
                .starts_with("manifest-")
        })
        .map(|e| e.path())
        .collect();
    if backups.len() <= BACKUP_KEEP {
        return;
    }
    // Timestamped names sort chronologically.
    backups.sort();
    for old in &backups[..backups.len() - BACKUP_KEEP] {
        if std::fs::remove_file(old).is_ok() {
            tracing::debug!(path = %old.display(), "pruned old migration backup");
        }
    }
}
