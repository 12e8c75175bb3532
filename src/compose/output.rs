//! Composed artifact rendering and version-content loading.
//!
//! A composition writes three files into `composed/<name>/`: a markdown
//! rendering with a table of contents, a JSONL rendering with boundary
//! markers between sessions, and a `composition.json` sidecar carrying full
//! provenance.

use crate::error::{EngramError, Result};
use crate::manifest::{ComponentSource, CompositionRecord, TierResult};
use crate::transcript::{MessageKind, TranscriptMessage};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value, json};
use std::path::Path;
use tokio::io::AsyncBufReadExt;

/// One message in a composed context.
#[derive(Debug, Clone)]
pub struct ComposedMessage {
    pub uuid: String,
    pub role: MessageKind,
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

impl ComposedMessage {
    pub fn from_transcript(message: &TranscriptMessage) -> Self {
        Self {
            uuid: message.uuid.clone(),
            role: message.kind,
            timestamp: message.timestamp,
            text: message.text(),
        }
    }

    pub fn token_estimate(&self) -> u64 {
        (self.text.len() as u64).div_ceil(4)
    }
}

/// A fully resolved component ready for rendering.
#[derive(Debug, Clone)]
pub struct AssembledComponent {
    pub session_id: String,
    pub order: usize,
    pub source: ComponentSource,
    pub allocated_budget: u64,
    pub messages: Vec<ComposedMessage>,
    pub tier_results: Option<Vec<TierResult>>,
}

impl AssembledComponent {
    pub fn token_contribution(&self) -> u64 {
        self.messages.iter().map(ComposedMessage::token_estimate).sum()
    }

    fn source_label(&self) -> String {
        match &self.source {
            ComponentSource::Original => "original".to_string(),
            ComponentSource::Version { version_id } => version_id.clone(),
            ComponentSource::AutoParts { selections } => {
                format!("auto-parts ({} part(s))", selections.len())
            }
        }
    }
}

/// Read the message lines of a version JSONL file, skipping its header
/// line. Streams; never loads the file whole.
pub async fn load_version_messages(path: &Path) -> Result<Vec<ComposedMessage>> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| EngramError::io(path, e))?;
    let mut lines = tokio::io::BufReader::new(file).lines();
    let mut messages = Vec::new();

    while let Some(line) = lines.next_line().await.map_err(|e| EngramError::io(path, e))? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(path = %path.display(), "skipping bad version line: {e}");
                continue;
            }
        };
        let kind = match value.get("type").and_then(Value::as_str) {
            Some("user") => MessageKind::User,
            Some("assistant") => MessageKind::Assistant,
            Some("system") => MessageKind::System,
            _ => continue, // header or boundary line
        };
        let uuid = value
            .get("uuid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let timestamp = value
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let text = extract_text(&value);
        messages.push(ComposedMessage { uuid, role: kind, timestamp, text });
    }
    Ok(messages)
}

fn extract_text(value: &Value) -> String {
    match value.pointer("/message/content") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| {
                if b.get("type").and_then(Value::as_str) == Some("text") {
                    b.get("text").and_then(Value::as_str)
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Markdown rendering: table of contents, then a header table and every
/// message per session.
pub fn render_markdown(record: &CompositionRecord, components: &[AssembledComponent]) -> String {
    let mut md = String::new();
    md.push_str(&format!("# {}\n\n", record.name));
    if !record.description.is_empty() {
        md.push_str(&format!("{}\n\n", record.description));
    }
    md.push_str(&format!(
        "Composed {} from {} session(s), {} tokens of a {}-token budget.\n\n",
        record.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        components.len(),
        record.actual_tokens,
        record.total_token_budget
    ));

    md.push_str("## Contents\n\n");
    for component in components {
        md.push_str(&format!(
            "{}. [Session {}](#session-{}) ({})\n",
            component.order + 1,
            component.session_id,
            component.session_id,
            component.source_label()
        ));
    }

    for component in components {
        md.push_str(&format!("\n---\n\n## Session {}\n\n", component.session_id));
        md.push_str("| Field | Value |\n|---|---|\n");
        md.push_str(&format!("| Source | {} |\n", component.source_label()));
        md.push_str(&format!("| Messages | {} |\n", component.messages.len()));
        md.push_str(&format!("| Tokens | {} |\n", component.token_contribution()));
        md.push_str(&format!("| Allocated budget | {} |\n", component.allocated_budget));

        for message in &component.messages {
            md.push_str(&format!(
                "\n### {} ({})\n\n{}\n",
                message.role.as_str(),
                message.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
                message.text
            ));
        }
    }
    md
}

/// JSONL rendering: one header record, then per-session boundary markers
/// and messages tagged with `sessionId` and `compositionOrder`.
pub fn render_jsonl(record: &CompositionRecord, components: &[AssembledComponent]) -> String {
    let mut lines = Vec::new();
    lines.push(
        json!({
            "type": "composition-header",
            "compositionId": record.composition_id,
            "name": record.name,
            "createdAt": record.created_at.to_rfc3339(),
            "allocationStrategy": record.allocation_strategy,
            "totalTokenBudget": record.total_token_budget,
            "actualTokens": record.actual_tokens,
            "components": components.len(),
        })
        .to_string(),
    );

    for component in components {
        lines.push(
            json!({
                "type": "session-boundary",
                "sessionId": component.session_id,
                "compositionOrder": component.order,
                "source": component.source_label(),
                "messages": component.messages.len(),
            })
            .to_string(),
        );
        for message in &component.messages {
            lines.push(
                json!({
                    "type": message.role.as_str(),
                    "uuid": message.uuid,
                    "timestamp": message.timestamp.to_rfc3339(),
                    "sessionId": component.session_id,
                    "compositionOrder": component.order,
                    "message": {
                        "role": message.role.as_str(),
                        "content": [{"type": "text", "text": message.text}],
                    },
                })
                .to_string(),
            );
        }
    }
    let mut body = lines.join("\n");
    body.push('\n');
    body
}

/// The `composition.json` sidecar: the full record plus per-component
/// lineage (selected parts, tier results).
pub fn render_provenance(record: &CompositionRecord, components: &[AssembledComponent]) -> Value {
    let lineage: Vec<Value> = components
        .iter()
        .map(|component| {
            json!({
                "sessionId": component.session_id,
                "order": component.order,
                "source": component.source,
                "allocatedBudget": component.allocated_budget,
                "tokenContribution": component.token_contribution(),
                "messageContribution": component.messages.len(),
                "tierResults": component.tier_results,
            })
        })
        .collect();

    json!({
        "composition": record,
        "lineage": lineage,
    })
}
