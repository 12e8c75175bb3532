//! Delta detection.
//!
//! A session's parts cover contiguous message ranges. The delta is every
//! message after the most recently covered range: membership is decided by
//! index against the last range's `end_index`, falling back to timestamp
//! comparison only when the recorded range no longer lines up with the
//! transcript. Timestamps are compared as instants.

use crate::manifest::SessionEntry;
use crate::transcript::{Transcript, TranscriptMessage};
use chrono::{DateTime, Utc};

/// What remains to be compressed.
#[derive(Debug, Clone)]
pub struct DeltaReport {
    pub has_delta: bool,
    pub delta_count: usize,
    /// Uncovered messages, oldest first.
    pub delta_messages: Vec<TranscriptMessage>,
    /// Index of the first delta message in the transcript.
    pub start_index: usize,
    /// One past the last delta message.
    pub end_index: usize,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub is_first_part: bool,
    pub previous_part_number: Option<u32>,
}

/// Compute the delta of `transcript` relative to the session's recorded
/// compressions.
pub fn detect_delta(session: &SessionEntry, transcript: &Transcript) -> DeltaReport {
    // The last covered range is the one with the most recent end timestamp,
    // not the highest part number: reordered transcripts can interleave.
    let last_range = session
        .compressions
        .iter()
        .max_by_key(|c| c.message_range.end_timestamp);

    let Some(last) = last_range else {
        return full_delta(transcript);
    };

    let last_end_index = last.message_range.end_index;
    let last_end_date = last.message_range.end_timestamp;
    let previous_part = session.last_part_number();

    // Index-based membership is authoritative while the recorded range
    // still fits inside the transcript.
    let mut delta: Vec<(usize, TranscriptMessage)> = if last_end_index <= transcript.messages.len()
    {
        transcript
            .messages
            .iter()
            .enumerate()
            .filter(|(i, _)| *i >= last_end_index)
            .map(|(i, m)| (i, m.clone()))
            .collect()
    } else {
        tracing::warn!(
            session_id = %session.session_id,
            last_end_index,
            transcript_len = transcript.messages.len(),
            "recorded range exceeds transcript; falling back to timestamp delta"
        );
        transcript
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.timestamp > last_end_date)
            .map(|(i, m)| (i, m.clone()))
            .collect()
    };

    delta.sort_by_key(|(_, m)| m.timestamp);

    let start_index = delta.iter().map(|(i, _)| *i).min().unwrap_or(last_end_index);
    let end_index = delta
        .iter()
        .map(|(i, _)| *i + 1)
        .max()
        .unwrap_or(last_end_index);
    let messages: Vec<TranscriptMessage> = delta.into_iter().map(|(_, m)| m).collect();

    DeltaReport {
        has_delta: !messages.is_empty(),
        delta_count: messages.len(),
        start_timestamp: messages.first().map(|m| m.timestamp),
        end_timestamp: messages.last().map(|m| m.timestamp),
        start_index,
        end_index,
        delta_messages: messages,
        is_first_part: false,
        previous_part_number: previous_part,
    }
}

fn full_delta(transcript: &Transcript) -> DeltaReport {
    DeltaReport {
        has_delta: !transcript.messages.is_empty(),
        delta_count: transcript.messages.len(),
        start_index: 0,
        end_index: transcript.messages.len(),
        start_timestamp: transcript.first_timestamp(),
        end_timestamp: transcript.last_timestamp(),
        delta_messages: transcript.messages.clone(),
        is_first_part: true,
        previous_part_number: None,
    }
}
