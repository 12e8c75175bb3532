//! Engine configuration.
//!
//! Defaults live here as serde default functions so a config deserialized
//! from an empty document matches `EngineConfig::default()`. Environment
//! overrides: `MEMORY_ROOT` for the storage root, `SUMMARIZER_DEADLINE_MS`
//! for the summarizer deadline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Engine-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root directory owning `cache/` and `projects/`.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Deadline for a single summarizer invocation, in milliseconds.
    #[serde(default = "default_summarizer_deadline_ms")]
    pub summarizer_deadline_ms: u64,

    /// Manifest file-lock staleness window, in seconds.
    #[serde(default = "default_manifest_lock_stale_secs")]
    pub manifest_lock_stale_secs: u64,

    /// Manifest file-lock acquisition retries.
    #[serde(default = "default_manifest_lock_retries")]
    pub manifest_lock_retries: u32,

    /// Session-operation lock staleness window, in seconds.
    #[serde(default = "default_session_lock_stale_secs")]
    pub session_lock_stale_secs: u64,

    /// Directory scanned for unregistered transcripts; also the default
    /// source for `register` calls that omit a path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcripts_dir: Option<PathBuf>,
}

fn default_root() -> PathBuf {
    engram_home()
}

fn default_summarizer_deadline_ms() -> u64 {
    300_000
}

fn default_manifest_lock_stale_secs() -> u64 {
    30
}

fn default_manifest_lock_retries() -> u32 {
    5
}

fn default_session_lock_stale_secs() -> u64 {
    300
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            summarizer_deadline_ms: default_summarizer_deadline_ms(),
            manifest_lock_stale_secs: default_manifest_lock_stale_secs(),
            manifest_lock_retries: default_manifest_lock_retries(),
            session_lock_stale_secs: default_session_lock_stale_secs(),
            transcripts_dir: None,
        }
    }
}

impl EngineConfig {
    /// Build a config from defaults plus environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(root) = std::env::var("MEMORY_ROOT")
            && !root.trim().is_empty()
        {
            config.root = PathBuf::from(root);
        }

        if let Ok(ms) = std::env::var("SUMMARIZER_DEADLINE_MS") {
            match ms.parse::<u64>() {
                Ok(ms) if ms > 0 => config.summarizer_deadline_ms = ms,
                _ => tracing::warn!(
                    "Ignoring invalid SUMMARIZER_DEADLINE_MS value: {:?}",
                    ms
                ),
            }
        }

        config
    }

    /// Config rooted at an explicit directory (tests, embedded use).
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), ..Self::default() }
    }

    /// Summarizer deadline as a [`Duration`].
    pub fn summarizer_deadline(&self) -> Duration {
        Duration::from_millis(self.summarizer_deadline_ms)
    }

    /// Manifest lock staleness as a [`Duration`].
    pub fn manifest_lock_staleness(&self) -> Duration {
        Duration::from_secs(self.manifest_lock_stale_secs)
    }

    /// Session-operation lock staleness as a [`Duration`].
    pub fn session_lock_staleness(&self) -> Duration {
        Duration::from_secs(self.session_lock_stale_secs)
    }
}

/// Default engine home: `~/.engram` (falls back to `.engram` in the
/// working directory when no home directory is resolvable).
pub fn engram_home() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".engram"))
        .unwrap_or_else(|| PathBuf::from(".engram"))
}
