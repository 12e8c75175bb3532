//! Marker extraction and text rewriting.
//!
//! Syntax: `##keepit<W.WW>##<content>` where the weight has exactly two
//! decimals. Content runs until the next `##keepit`, a blank line, or the
//! end of the text. All mutators return new strings; message text is never
//! modified in place.

use crate::manifest::KeepitMarker;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

/// Well-formed marker prefix: exactly two decimals.
static MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"##keepit(\d+\.\d{2})##").expect("keepit regex"));

/// Anything that looks like a marker attempt, for syntax diagnostics.
static LOOSE_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"##keepit([^#]*)##").expect("loose keepit regex"));

/// Default weight when the input cannot be interpreted.
const FALLBACK_WEIGHT: f64 = 0.50;

/// Maximum context excerpt length on each side of a marker.
const CONTEXT_LEN: usize = 50;

/// A marker as found in raw text.
#[derive(Debug, Clone, PartialEq)]
pub struct RawKeepit {
    pub weight: f64,
    pub content: String,
    /// Byte offset of the `##keepit` prefix.
    pub start_index: usize,
    /// Byte offset one past the end of the content.
    pub end_index: usize,
}

/// Clamp to `[0, 1]` and round to two decimals.
pub fn validate_weight(weight: f64) -> f64 {
    if !weight.is_finite() {
        return FALLBACK_WEIGHT;
    }
    (weight.clamp(0.0, 1.0) * 100.0).round() / 100.0
}

/// Coerce a string weight; invalid input falls back to `0.50`.
pub fn validate_weight_str(input: &str) -> f64 {
    match input.trim().parse::<f64>() {
        Ok(w) => validate_weight(w),
        Err(_) => FALLBACK_WEIGHT,
    }
}

/// Extract all well-formed markers from `text`, in document order.
pub fn extract_keepits(text: &str) -> Vec<RawKeepit> {
    let mut markers = Vec::new();
    let matches: Vec<_> = MARKER_RE.captures_iter(text).collect();

    for (i, caps) in matches.iter().enumerate() {
        let whole = caps.get(0).expect("match 0");
        let weight = validate_weight_str(&caps[1]);
        let content_start = whole.end();

        // Content ends at the next marker, a blank line, or EOF.
        let next_marker = matches
            .get(i + 1)
            .map(|c| c.get(0).expect("match 0").start())
            .unwrap_or(text.len());
        let blank_line = find_blank_line(&text[content_start..next_marker])
            .map(|offset| content_start + offset)
            .unwrap_or(next_marker);
        let content_end = blank_line.min(next_marker);

        let content = text[content_start..content_end].trim_end().to_string();
        if content.is_empty() {
            continue;
        }
        markers.push(RawKeepit {
            weight,
            content,
            start_index: whole.start(),
            end_index: content_end,
        });
    }
    markers
}

/// Offset of the first blank line (`\n\n` or `\n\r\n`) within `text`.
fn find_blank_line(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'\n' {
            let rest = &bytes[i + 1..];
            if rest.first() == Some(&b'\n') {
                return Some(i);
            }
            if rest.first() == Some(&b'\r') && rest.get(1) == Some(&b'\n') {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

/// Wrap a raw marker into an indexed [`KeepitMarker`].
pub fn normalize_marker(raw: &RawKeepit, message_uuid: &str, message_text: &str) -> KeepitMarker {
    let before_start = raw.start_index.saturating_sub(CONTEXT_LEN);
    let context_before = nearest_char_slice(message_text, before_start, raw.start_index);
    let after_end = (raw.end_index + CONTEXT_LEN).min(message_text.len());
    let context_after = nearest_char_slice(message_text, raw.end_index, after_end);

    KeepitMarker {
        marker_id: format!("keepit_{}", Uuid::new_v4().simple()),
        message_uuid: message_uuid.to_string(),
        weight: raw.weight,
        content: raw.content.clone(),
        position: raw.start_index,
        context_before,
        context_after,
        created_at: Utc::now(),
        survived_in: Vec::new(),
        summarized_in: Vec::new(),
        weight_history: None,
    }
}

/// Slice `[start, end)` snapped inward to char boundaries.
fn nearest_char_slice(text: &str, mut start: usize, mut end: usize) -> String {
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    while end > start && !text.is_char_boundary(end) {
        end -= 1;
    }
    text.get(start..end).unwrap_or_default().to_string()
}

/// Render a marker string: `##keepit0.75##content`.
pub fn create_keepit_marker(weight: f64, content: &str) -> String {
    format!("##keepit{:.2}##{}", validate_weight(weight), content)
}

/// Remove every marker prefix, leaving the content text untouched.
pub fn strip_keepit_markers(text: &str) -> String {
    MARKER_RE.replace_all(text, "").into_owned()
}

/// Rewrite the weight of the marker wrapping `content`. Returns the new
/// text, or `None` when no marker with that content and weight exists.
pub fn update_keepit_weight(
    text: &str,
    content: &str,
    old_weight: f64,
    new_weight: f64,
) -> Option<String> {
    let old_marker = create_keepit_marker(old_weight, content);
    if !text.contains(&old_marker) {
        return None;
    }
    let new_marker = create_keepit_marker(new_weight, content);
    Some(text.replacen(&old_marker, &new_marker, 1))
}

/// A malformed or out-of-range marker found in text.
#[derive(Debug, Clone, PartialEq)]
pub struct KeepitSyntaxIssue {
    pub position: usize,
    pub found: String,
    pub reason: String,
}

/// Flag marker attempts that the strict syntax would not accept, plus
/// well-formed markers whose weight is out of range.
pub fn validate_keepit_syntax(text: &str) -> Vec<KeepitSyntaxIssue> {
    let mut issues = Vec::new();
    for caps in LOOSE_MARKER_RE.captures_iter(text) {
        let whole = caps.get(0).expect("match 0");
        let weight_str = &caps[1];
        if !MARKER_RE.is_match(whole.as_str()) {
            issues.push(KeepitSyntaxIssue {
                position: whole.start(),
                found: whole.as_str().to_string(),
                reason: "weight must have exactly two decimals (e.g. ##keepit0.75##)".to_string(),
            });
            continue;
        }
        if let Ok(weight) = weight_str.parse::<f64>()
            && weight > 1.0
        {
            issues.push(KeepitSyntaxIssue {
                position: whole.start(),
                found: whole.as_str().to_string(),
                reason: format!("weight {weight:.2} is above the 1.00 maximum"),
            });
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn extracts_weight_and_content() {
        let text = "preamble ##keepit0.75##remember the port is 8443\nmore text";
        let markers = extract_keepits(text);
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].weight, 0.75);
        assert_eq!(markers[0].content, "remember the port is 8443\nmore text");
    }

    #[test]
    fn content_ends_at_blank_line() {
        let text = "##keepit1.00##pinned fact\n\ntrailing paragraph";
        let markers = extract_keepits(text);
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].content, "pinned fact");
    }

    #[test]
    fn content_ends_at_next_marker() {
        let text = "##keepit1.00##ALPHA ##keepit0.20##BETA";
        let markers = extract_keepits(text);
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].content, "ALPHA");
        assert_eq!(markers[1].content, "BETA");
    }

    #[test]
    fn malformed_weight_is_not_extracted() {
        let markers = extract_keepits("##keepit0.5##one decimal ##keepit##none");
        assert!(markers.is_empty());
    }

    #[test]
    fn out_of_range_weight_clamps() {
        let markers = extract_keepits("##keepit2.50##too heavy");
        assert_eq!(markers[0].weight, 1.0);
    }

    #[test]
    fn weight_validation_rules() {
        assert_eq!(validate_weight_str("0.75"), 0.75);
        assert_eq!(validate_weight_str("1.5"), 1.0);
        assert_eq!(validate_weight_str("-0.3"), 0.0);
        assert_eq!(validate_weight_str("abc"), 0.50);
        assert_eq!(validate_weight(0.123), 0.12);
        assert_eq!(validate_weight(f64::NAN), 0.50);
    }

    #[test]
    fn round_trip_strip_of_created_marker() {
        let created = create_keepit_marker(0.60, "the API key lives in vault");
        let tail = " and some tail";
        assert_eq!(
            strip_keepit_markers(&format!("{created}{tail}")),
            format!("the API key lives in vault{tail}")
        );
    }

    #[test]
    fn update_weight_rewrites_only_matching_marker() {
        let text = "a ##keepit0.30##fact b ##keepit0.30##other";
        let updated = update_keepit_weight(text, "fact", 0.30, 0.90).unwrap();
        assert!(updated.contains("##keepit0.90##fact"));
        assert!(updated.contains("##keepit0.30##other"));

        assert!(update_keepit_weight(text, "missing", 0.30, 0.90).is_none());
    }

    #[test]
    fn normalize_captures_context_and_id_prefix() {
        let text = format!("{}##keepit0.40##center content here", "x".repeat(80));
        let raw = &extract_keepits(&text)[0];
        let marker = normalize_marker(raw, "msg-1", &text);
        assert!(marker.marker_id.starts_with("keepit_"));
        assert_eq!(marker.message_uuid, "msg-1");
        assert_eq!(marker.context_before.len(), 50);
        assert_eq!(marker.position, 80);
        assert!(marker.survived_in.is_empty());
    }

    #[test]
    fn syntax_validator_flags_malformed_and_overweight() {
        let issues = validate_keepit_syntax("##keepit0.5##bad ##keepit2.00##heavy ##keepit0.75##ok");
        assert_eq!(issues.len(), 2);
        assert!(issues[0].reason.contains("two decimals"));
        assert!(issues[1].reason.contains("1.00 maximum"));
    }

    proptest! {
        #[test]
        fn weight_validation_is_idempotent(w in -10.0f64..10.0) {
            let once = validate_weight(w);
            prop_assert_eq!(validate_weight(once), once);
            prop_assert!((0.0..=1.0).contains(&once));
            // At most two decimals
            prop_assert!(((once * 100.0).round() - once * 100.0).abs() < 1e-9);
        }

        #[test]
        fn strip_after_create_recovers_content(
            w in 0.0f64..=1.0,
            content in "[a-zA-Z0-9 ]{1,40}",
            tail in "[a-zA-Z0-9 ]{0,40}",
        ) {
            let text = format!("{}{}", create_keepit_marker(w, &content), tail);
            prop_assert_eq!(strip_keepit_markers(&text), format!("{}{}", content, tail));
        }
    }
}
