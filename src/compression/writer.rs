//! Version output rendering.
//!
//! A compression produces two files: a human-readable markdown rendering
//! and a machine JSONL rendering (header metadata line, then one object per
//! message). Summaries are wrapped into synthetic messages here; the first
//! synthetic message reuses the first original's UUID so inbound parent
//! edges stay valid, and descendants chain off it sequentially.

use crate::error::Result;
use crate::manifest::{CompressionSettings, KeepitStats};
use crate::summarize::{SummaryItem, SummaryRole};
use crate::transcript::{ContentBlock, MessageKind, TokenUsage, TranscriptMessage};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::json;
use std::path::Path;
use uuid::Uuid;

/// A message headed for the output files.
#[derive(Debug, Clone)]
pub struct OutputMessage {
    pub message: TranscriptMessage,
    pub is_summarized: bool,
    /// UUIDs of the original messages this one stands in for.
    pub summarized_from: Vec<String>,
}

impl OutputMessage {
    /// Pass-through wrapper for an uncompressed message.
    pub fn passthrough(message: TranscriptMessage) -> Self {
        let uuid = message.uuid.clone();
        Self {
            message,
            is_summarized: false,
            summarized_from: vec![uuid],
        }
    }
}

/// Wrap summarizer output into a synthetic message chain.
///
/// The first synthetic message keeps the first original's UUID and parent;
/// later ones get fresh UUIDs and chain sequentially. Timestamps and the
/// `summarized_from` attribution are spread proportionally over the
/// original slice.
pub fn synthesize_messages(
    originals: &[TranscriptMessage],
    items: &[SummaryItem],
) -> Vec<OutputMessage> {
    if originals.is_empty() || items.is_empty() {
        return Vec::new();
    }
    let m = originals.len();
    let n = items.len();
    let mut out = Vec::with_capacity(n);
    let mut prev_uuid: Option<String> = None;

    for (i, item) in items.iter().enumerate() {
        let span_start = (i * m) / n;
        let span_end = (((i + 1) * m) / n).max(span_start + 1).min(m);
        let span = &originals[span_start..span_end];

        let uuid = if i == 0 {
            originals[0].uuid.clone()
        } else {
            Uuid::new_v4().to_string()
        };
        let parent_uuid = if i == 0 {
            originals[0].parent_uuid.clone()
        } else {
            prev_uuid.clone()
        };
        let kind = match item.role {
            SummaryRole::User => MessageKind::User,
            SummaryRole::Assistant => MessageKind::Assistant,
        };

        prev_uuid = Some(uuid.clone());
        out.push(OutputMessage {
            message: TranscriptMessage {
                uuid,
                parent_uuid,
                kind,
                timestamp: span.first().map(|s| s.timestamp).unwrap_or(originals[0].timestamp),
                content: vec![ContentBlock::Text { text: item.summary.clone() }],
                tokens: TokenUsage::default(),
            },
            is_summarized: true,
            summarized_from: span.iter().map(|s| s.uuid.clone()).collect(),
        });
    }
    out
}

/// Header fields shared by both renderings.
#[derive(Debug, Clone)]
pub struct VersionHeader<'a> {
    pub project_id: &'a str,
    pub session_id: &'a str,
    pub version_id: &'a str,
    pub created_at: DateTime<Utc>,
    pub settings: &'a CompressionSettings,
    pub part_number: u32,
    pub input_messages: usize,
    pub input_tokens: u64,
    pub keepit_stats: &'a KeepitStats,
}

/// Render the markdown file: a header block, then one section per message.
pub fn render_markdown(header: &VersionHeader<'_>, messages: &[OutputMessage]) -> String {
    let mut md = String::new();
    md.push_str(&format!("# Compressed context — session {}\n\n", header.session_id));
    md.push_str(&format!("- **Project:** {}\n", header.project_id));
    md.push_str(&format!("- **Version:** {}\n", header.version_id));
    md.push_str(&format!("- **Part:** {}\n", header.part_number));
    md.push_str(&format!(
        "- **Created:** {}\n",
        header.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    ));
    md.push_str(&format!(
        "- **Mode:** {}\n",
        serde_json::to_string(&header.settings.mode).unwrap_or_default().trim_matches('"')
    ));
    md.push_str(&format!(
        "- **Input:** {} messages, {} tokens\n",
        header.input_messages, header.input_tokens
    ));
    md.push_str(&format!(
        "- **Keepits:** {} preserved, {} summarized\n\n",
        header.keepit_stats.preserved, header.keepit_stats.summarized
    ));
    md.push_str("---\n");

    for (i, output) in messages.iter().enumerate() {
        let role = output.message.kind.as_str();
        let stamp = output
            .message
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        md.push_str(&format!("\n## {} — {role} ({stamp})\n\n", i + 1));
        if output.is_summarized {
            md.push_str(&format!(
                "*Summarizes {} original message(s).*\n\n",
                output.summarized_from.len()
            ));
        }
        md.push_str(&output.message.text());
        md.push('\n');
    }
    md
}

/// Render the JSONL file: one header metadata line, then one object per
/// message.
pub fn render_jsonl(header: &VersionHeader<'_>, messages: &[OutputMessage]) -> String {
    let mut lines = Vec::with_capacity(messages.len() + 1);
    lines.push(
        json!({
            "type": "header",
            "projectId": header.project_id,
            "sessionId": header.session_id,
            "versionId": header.version_id,
            "partNumber": header.part_number,
            "createdAt": header.created_at.to_rfc3339(),
            "settings": header.settings,
            "inputMessages": header.input_messages,
            "inputTokens": header.input_tokens,
            "outputMessages": messages.len(),
            "keepitStats": header.keepit_stats,
        })
        .to_string(),
    );

    for output in messages {
        let content: Vec<serde_json::Value> = output
            .message
            .content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => json!({"type": "text", "text": text}),
                ContentBlock::ToolUse { id, name, input } => {
                    json!({"type": "tool_use", "id": id, "name": name, "input": input})
                }
                ContentBlock::ToolResult { tool_use_id, content } => {
                    json!({"type": "tool_result", "tool_use_id": tool_use_id, "content": content})
                }
            })
            .collect();

        lines.push(
            json!({
                "type": output.message.kind.as_str(),
                "uuid": output.message.uuid,
                "parentUuid": output.message.parent_uuid,
                "timestamp": output.message.timestamp.to_rfc3339(),
                "message": {
                    "role": output.message.kind.as_str(),
                    "content": content,
                },
                "isSummarized": output.is_summarized,
                "summarizedCount": output.summarized_from.len(),
                "summarizedFrom": output.summarized_from,
            })
            .to_string(),
        );
    }
    let mut body = lines.join("\n");
    body.push('\n');
    body
}

/// Write both files atomically; on failure of the second the first is
/// removed so no partial version remains.
pub fn write_version_files(md_path: &Path, jsonl_path: &Path, md: &str, jsonl: &str) -> Result<()> {
    crate::manifest::write_atomic(md_path, md.as_bytes())?;
    if let Err(e) = crate::manifest::write_atomic(jsonl_path, jsonl.as_bytes()) {
        let _ = std::fs::remove_file(md_path);
        return Err(e);
    }
    Ok(())
}
