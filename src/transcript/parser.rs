//! Transcript parsing.
//!
//! [`TranscriptParser`] is the capability boundary; [`JsonlTranscriptParser`]
//! is the built-in reader for line-delimited JSON transcripts as emitted by
//! coding agents (one object per line, `message.content` either a plain
//! string or an array of typed blocks).

use super::model::{
    ContentBlock, MessageKind, TokenUsage, Transcript, TranscriptMessage, TranscriptMetadata,
};
use crate::error::{EngramError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::Path;
use tokio::io::AsyncBufReadExt;

/// Capability interface: turn a transcript file into a [`Transcript`].
#[async_trait]
pub trait TranscriptParser: Send + Sync {
    async fn parse(&self, path: &Path) -> Result<Transcript>;
}

/// Default reader for `.jsonl` transcripts. Unparseable or non-message lines
/// are skipped with a debug log; a file yielding zero messages is a parse
/// error.
#[derive(Debug, Default, Clone)]
pub struct JsonlTranscriptParser;

#[async_trait]
impl TranscriptParser for JsonlTranscriptParser {
    async fn parse(&self, path: &Path) -> Result<Transcript> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| EngramError::io(path, e))?;
        let reader = tokio::io::BufReader::new(file);
        let mut lines = reader.lines();

        let mut messages = Vec::new();
        let mut metadata = TranscriptMetadata::default();
        let mut line_no = 0usize;

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| EngramError::io(path, e))?
        {
            line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let value: Value = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(e) => {
                    tracing::debug!("Skipping unparseable transcript line {}: {}", line_no, e);
                    continue;
                }
            };
            match parse_line(&value) {
                Some(msg) => {
                    merge_metadata(&mut metadata, &value);
                    messages.push(msg);
                }
                None => {
                    tracing::debug!("Skipping non-message transcript line {}", line_no);
                }
            }
        }

        if messages.is_empty() {
            return Err(EngramError::ParseError {
                reason: format!("no messages found in {}", path.display()),
            });
        }

        Ok(Transcript::new(messages, metadata))
    }
}

/// Extract one message from a transcript line, or `None` when the line is
/// not a user/assistant/system turn.
fn parse_line(value: &Value) -> Option<TranscriptMessage> {
    let kind = match value.get("type").and_then(Value::as_str)? {
        "user" => MessageKind::User,
        "assistant" => MessageKind::Assistant,
        "system" => MessageKind::System,
        _ => return None,
    };
    let uuid = value.get("uuid").and_then(Value::as_str)?.to_string();
    let timestamp: DateTime<Utc> = value
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))?;
    let parent_uuid = value
        .get("parentUuid")
        .and_then(Value::as_str)
        .map(String::from);

    let message = value.get("message")?;
    let content = parse_content(message.get("content")?);
    let tokens = message
        .get("usage")
        .map(parse_usage)
        .unwrap_or_default();

    Some(TranscriptMessage {
        uuid,
        parent_uuid,
        kind,
        timestamp,
        content,
        tokens,
    })
}

/// `message.content` is either a plain string or an array of typed blocks.
fn parse_content(content: &Value) -> Vec<ContentBlock> {
    match content {
        Value::String(text) => vec![ContentBlock::Text { text: text.clone() }],
        Value::Array(blocks) => blocks.iter().filter_map(parse_block).collect(),
        _ => Vec::new(),
    }
}

fn parse_block(block: &Value) -> Option<ContentBlock> {
    match block.get("type").and_then(Value::as_str)? {
        "text" => Some(ContentBlock::Text {
            text: block.get("text").and_then(Value::as_str)?.to_string(),
        }),
        "tool_use" => Some(ContentBlock::ToolUse {
            id: block.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
            name: block.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
            input: block.get("input").cloned().unwrap_or(Value::Null),
        }),
        "tool_result" => Some(ContentBlock::ToolResult {
            tool_use_id: block
                .get("tool_use_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            content: stringify_tool_result(block.get("content")),
        }),
        _ => None,
    }
}

/// Tool results arrive as strings or nested block arrays; flatten to text.
fn stringify_tool_result(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn parse_usage(usage: &Value) -> TokenUsage {
    let field = |name: &str| usage.get(name).and_then(Value::as_u64).unwrap_or(0);
    TokenUsage {
        input_tokens: field("input_tokens"),
        output_tokens: field("output_tokens"),
        cache_read_tokens: field("cache_read_input_tokens"),
        cache_creation_tokens: field("cache_creation_input_tokens"),
    }
}

/// First non-empty host metadata wins; later lines never overwrite.
fn merge_metadata(metadata: &mut TranscriptMetadata, value: &Value) {
    let take = |field: &str| value.get(field).and_then(Value::as_str).map(String::from);
    if metadata.cwd.is_none() {
        metadata.cwd = take("cwd");
    }
    if metadata.git_branch.is_none() {
        metadata.git_branch = take("gitBranch");
    }
    if metadata.agent_version.is_none() {
        metadata.agent_version = take("version");
    }
    if metadata.project_name.is_none() {
        metadata.project_name = take("projectName");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_transcript(lines: &[&str]) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        let mut f = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        (dir, path)
    }

    #[tokio::test]
    async fn parses_string_and_block_content() {
        let (_dir, path) = write_transcript(&[
            r#"{"type":"user","uuid":"u1","parentUuid":null,"timestamp":"2025-06-01T10:00:00Z","cwd":"/repo","gitBranch":"main","message":{"role":"user","content":"hello"}}"#,
            r#"{"type":"assistant","uuid":"a1","parentUuid":"u1","timestamp":"2025-06-01T10:00:05Z","message":{"role":"assistant","content":[{"type":"text","text":"hi"},{"type":"tool_use","id":"t1","name":"bash","input":{"command":"ls"}}],"usage":{"input_tokens":12,"output_tokens":30}}}"#,
        ]);

        let transcript = JsonlTranscriptParser.parse(&path).await.unwrap();
        assert_eq!(transcript.total_messages, 2);
        assert_eq!(transcript.messages[0].text(), "hello");
        assert_eq!(transcript.messages[1].tokens.output_tokens, 30);
        assert_eq!(transcript.metadata.cwd.as_deref(), Some("/repo"));
        assert_eq!(transcript.metadata.git_branch.as_deref(), Some("main"));
        assert_eq!(transcript.graph.roots, vec!["u1"]);
    }

    #[tokio::test]
    async fn skips_junk_lines_and_summaries() {
        let (_dir, path) = write_transcript(&[
            r#"{"type":"summary","summary":"earlier context"}"#,
            "not json at all",
            r#"{"type":"user","uuid":"u1","timestamp":"2025-06-01T10:00:00Z","message":{"role":"user","content":"only real line"}}"#,
        ]);

        let transcript = JsonlTranscriptParser.parse(&path).await.unwrap();
        assert_eq!(transcript.total_messages, 1);
    }

    #[tokio::test]
    async fn empty_transcript_is_parse_error() {
        let (_dir, path) = write_transcript(&[r#"{"type":"summary"}"#]);
        let err = JsonlTranscriptParser.parse(&path).await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ParseError);
    }

    #[tokio::test]
    async fn missing_file_maps_to_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = JsonlTranscriptParser
            .parse(&dir.path().join("nope.jsonl"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::FileNotFound);
    }

    #[tokio::test]
    async fn tool_result_content_flattens() {
        let (_dir, path) = write_transcript(&[
            r#"{"type":"user","uuid":"u1","timestamp":"2025-06-01T10:00:00Z","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":[{"type":"text","text":"line1"},{"type":"text","text":"line2"}]}]}}"#,
        ]);
        let transcript = JsonlTranscriptParser.parse(&path).await.unwrap();
        match &transcript.messages[0].content[0] {
            ContentBlock::ToolResult { content, .. } => assert_eq!(content, "line1\nline2"),
            other => panic!("unexpected block: {other:?}"),
        }
    }
}
