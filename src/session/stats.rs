//! Read-only stats derived from the manifest.

use crate::manifest::{Manifest, SessionEntry};
use serde::Serialize;

/// Summary numbers for one session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub session_id: String,
    pub original_tokens: u64,
    pub original_messages: usize,
    pub version_count: usize,
    pub part_count: usize,
    pub keepit_count: usize,
    pub pinned_keepit_count: usize,
    pub compressed_tokens_total: u64,
    pub best_compression_ratio: f64,
}

/// Summary numbers for a whole project.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStats {
    pub project_id: String,
    pub session_count: usize,
    pub version_count: usize,
    pub composition_count: usize,
    pub original_tokens_total: u64,
    pub compressed_tokens_total: u64,
    pub keepit_count: usize,
}

pub fn session_stats(session: &SessionEntry) -> SessionStats {
    let part_count = session
        .compressions
        .iter()
        .map(|c| c.part_number)
        .collect::<std::collections::HashSet<_>>()
        .len();
    SessionStats {
        session_id: session.session_id.clone(),
        original_tokens: session.original_tokens,
        original_messages: session.original_messages,
        version_count: session.compressions.len(),
        part_count,
        keepit_count: session.keepit_markers.len(),
        pinned_keepit_count: session.keepit_markers.iter().filter(|m| m.is_pinned()).count(),
        compressed_tokens_total: session.compressions.iter().map(|c| c.output_tokens).sum(),
        best_compression_ratio: session
            .compressions
            .iter()
            .map(|c| c.compression_ratio)
            .fold(0.0, f64::max),
    }
}

pub fn project_stats(manifest: &Manifest) -> ProjectStats {
    ProjectStats {
        project_id: manifest.project_id.clone(),
        session_count: manifest.sessions.len(),
        version_count: manifest.sessions.values().map(|s| s.compressions.len()).sum(),
        composition_count: manifest.compositions.len(),
        original_tokens_total: manifest.sessions.values().map(|s| s.original_tokens).sum(),
        compressed_tokens_total: manifest
            .sessions
            .values()
            .flat_map(|s| s.compressions.iter())
            .map(|c| c.output_tokens)
            .sum(),
        keepit_count: manifest.sessions.values().map(|s| s.keepit_markers.len()).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{
        CompressionLevel, CompressionRecord, CompressionSettings, LinkType, Manifest,
        MessageRange, ModelChoice, TierPreset,
    };
    use chrono::{TimeZone, Utc};

    fn record(version_id: &str, part: u32, output_tokens: u64, ratio: f64) -> CompressionRecord {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        CompressionRecord {
            version_id: version_id.to_string(),
            file: format!("{version_id}_tiered-standard_1k"),
            created_at: ts,
            settings: CompressionSettings::tiered(TierPreset::Standard, ModelChoice::Sonnet),
            input_tokens: 1000,
            input_messages: 10,
            output_tokens,
            output_messages: 2,
            compression_ratio: ratio,
            processing_time_ms: 1,
            keepit_stats: Default::default(),
            file_sizes: Default::default(),
            tier_results: None,
            part_number: part,
            compression_level: CompressionLevel::Moderate,
            message_range: MessageRange {
                start_index: 0,
                end_index: 10,
                message_count: 10,
                start_timestamp: ts,
                end_timestamp: ts,
            },
            is_full_session: false,
        }
    }

    #[test]
    fn counts_versions_parts_and_keepits() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let mut session = SessionEntry {
            session_id: "s1".into(),
            original_file: "/o".into(),
            linked_file: "/l".into(),
            link_type: LinkType::Copy,
            original_tokens: 10_000,
            original_messages: 40,
            first_timestamp: Some(ts),
            last_timestamp: Some(ts),
            last_synced_timestamp: Some(ts),
            last_synced_message_uuid: None,
            registered_at: ts,
            last_accessed: ts,
            metadata: Default::default(),
            keepit_markers: vec![],
            compressions: vec![
                record("v001", 1, 500, 20.0),
                record("v002", 1, 900, 11.11),
                record("v003", 2, 300, 3.33),
            ],
        };
        // Two markers, one pinned.
        let mut pinned = crate::manifest::KeepitMarker {
            marker_id: "keepit_a".into(),
            message_uuid: "m1".into(),
            weight: 1.0,
            content: "x".into(),
            position: 0,
            context_before: String::new(),
            context_after: String::new(),
            created_at: ts,
            survived_in: vec![],
            summarized_in: vec![],
            weight_history: None,
        };
        session.keepit_markers.push(pinned.clone());
        pinned.marker_id = "keepit_b".into();
        pinned.weight = 0.4;
        session.keepit_markers.push(pinned);

        let stats = session_stats(&session);
        assert_eq!(stats.version_count, 3);
        assert_eq!(stats.part_count, 2);
        assert_eq!(stats.keepit_count, 2);
        assert_eq!(stats.pinned_keepit_count, 1);
        assert_eq!(stats.compressed_tokens_total, 1_700);
        assert_eq!(stats.best_compression_ratio, 20.0);

        let mut manifest = Manifest::new("p", "P");
        manifest.sessions.insert("s1".into(), session);
        let project = project_stats(&manifest);
        assert_eq!(project.session_count, 1);
        assert_eq!(project.version_count, 3);
        assert_eq!(project.original_tokens_total, 10_000);
    }
}
