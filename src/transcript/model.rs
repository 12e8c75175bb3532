//! In-memory transcript representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Assistant,
    System,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// One content block inside a message. Tool traffic is carried verbatim so
/// compression can summarize it alongside prose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

/// Token breakdown for a message, as reported by the upstream agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_creation_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A single transcript turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub uuid: String,
    pub parent_uuid: Option<String>,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub tokens: TokenUsage,
}

impl TranscriptMessage {
    /// Concatenated text of all `Text` blocks, joined by newlines.
    pub fn text(&self) -> String {
        let mut parts = Vec::new();
        for block in &self.content {
            if let ContentBlock::Text { text } = block {
                parts.push(text.as_str());
            }
        }
        parts.join("\n")
    }

    /// Token count for budgeting. Falls back to a chars/4 estimate when the
    /// upstream breakdown is absent.
    pub fn token_estimate(&self) -> u64 {
        let reported = self.tokens.total();
        if reported > 0 {
            return reported;
        }
        let chars: usize = self
            .content
            .iter()
            .map(|b| match b {
                ContentBlock::Text { text } => text.len(),
                ContentBlock::ToolUse { input, .. } => input.to_string().len(),
                ContentBlock::ToolResult { content, .. } => content.len(),
            })
            .sum();
        (chars as u64).div_ceil(4)
    }
}

/// Host metadata captured alongside a transcript.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
}

/// Parent/child structure of a transcript.
#[derive(Debug, Clone, Default)]
pub struct MessageGraph {
    pub roots: Vec<String>,
    pub children_of: HashMap<String, Vec<String>>,
    pub parent_of: HashMap<String, String>,
}

impl MessageGraph {
    /// Build the graph from an ordered message list. Parent references to
    /// unknown UUIDs leave the child a root (tolerated, not repaired).
    pub fn build(messages: &[TranscriptMessage]) -> Self {
        let known: std::collections::HashSet<&str> =
            messages.iter().map(|m| m.uuid.as_str()).collect();

        let mut graph = Self::default();
        for msg in messages {
            match msg.parent_uuid.as_deref().filter(|p| known.contains(p)) {
                Some(parent) => {
                    graph.parent_of.insert(msg.uuid.clone(), parent.to_string());
                    graph
                        .children_of
                        .entry(parent.to_string())
                        .or_default()
                        .push(msg.uuid.clone());
                }
                None => graph.roots.push(msg.uuid.clone()),
            }
        }
        graph
    }
}

/// A fully parsed transcript.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub messages: Vec<TranscriptMessage>,
    pub total_messages: usize,
    pub metadata: TranscriptMetadata,
    pub graph: MessageGraph,
}

impl Transcript {
    pub fn new(messages: Vec<TranscriptMessage>, metadata: TranscriptMetadata) -> Self {
        let graph = MessageGraph::build(&messages);
        Self {
            total_messages: messages.len(),
            messages,
            metadata,
            graph,
        }
    }

    /// Sum of per-message token estimates.
    pub fn total_tokens(&self) -> u64 {
        self.messages.iter().map(|m| m.token_estimate()).sum()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.messages.first().map(|m| m.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.messages.last().map(|m| m.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn msg(uuid: &str, parent: Option<&str>, text: &str) -> TranscriptMessage {
        TranscriptMessage {
            uuid: uuid.to_string(),
            parent_uuid: parent.map(String::from),
            kind: MessageKind::User,
            timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            content: vec![ContentBlock::Text { text: text.to_string() }],
            tokens: TokenUsage::default(),
        }
    }

    #[test]
    fn graph_links_parents_and_children() {
        let messages = vec![
            msg("a", None, "root"),
            msg("b", Some("a"), "child"),
            msg("c", Some("b"), "grandchild"),
        ];
        let graph = MessageGraph::build(&messages);
        assert_eq!(graph.roots, vec!["a"]);
        assert_eq!(graph.parent_of.get("c").unwrap(), "b");
        assert_eq!(graph.children_of.get("a").unwrap(), &vec!["b".to_string()]);
    }

    #[test]
    fn dangling_parent_becomes_root() {
        let messages = vec![msg("a", None, "root"), msg("b", Some("gone"), "orphan")];
        let graph = MessageGraph::build(&messages);
        assert_eq!(graph.roots.len(), 2);
        assert!(!graph.parent_of.contains_key("b"));
    }

    #[test]
    fn token_estimate_falls_back_to_chars() {
        let m = msg("a", None, "0123456789");
        assert_eq!(m.token_estimate(), 3); // ceil(10 / 4)

        let mut with_usage = msg("b", None, "hi");
        with_usage.tokens.input_tokens = 42;
        assert_eq!(with_usage.token_estimate(), 42);
    }

    #[test]
    fn text_joins_only_text_blocks() {
        let mut m = msg("a", None, "hello");
        m.content.push(ContentBlock::ToolResult {
            tool_use_id: "t1".into(),
            content: "ignored".into(),
        });
        m.content.push(ContentBlock::Text { text: "world".into() });
        assert_eq!(m.text(), "hello\nworld");
    }
}
