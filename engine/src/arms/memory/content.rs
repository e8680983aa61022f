//! Content identity and tagging
//!
//! A memory's id is the SHA-256 of its canonical JSON: object keys sorted at
//! every depth, compact separators. Tags come from keyword patterns plus one
//! coarse `geometry:<label>` tag.

use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// Geometry vocabulary, checked in this order
pub const GEOMETRY_LABELS: [&str; 6] = ["spiral", "circle", "triangle", "square", "line", "point"];

/// Deterministic serialization of `value`
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Lowercase hex SHA-256 of the canonical form
pub fn content_id(value: &Value) -> String {
    hex::encode(Sha256::digest(canonicalize(value).as_bytes()))
}

/// First `limit` characters of `text`
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}

fn tag_patterns() -> &'static Vec<(Regex, &'static str)> {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            (
                Regex::new(r"(?i)\b(ratio|number|equation|calculat\w*|math\w*|proportion\w*)\b")
                    .expect("Invalid mathematics pattern"),
                "mathematics",
            ),
            (
                Regex::new(r"(?i)\b(harmon\w*|melod\w*|rhythm\w*|music\w*|song\w*)\b")
                    .expect("Invalid music pattern"),
                "music",
            ),
            (
                Regex::new(r"(?i)\b(tree\w*|river\w*|ocean\w*|plant\w*|forest\w*|water)\b")
                    .expect("Invalid nature pattern"),
                "nature",
            ),
            (
                Regex::new(r"(?i)\b(code|rust|program\w*|function\w*|software)\b")
                    .expect("Invalid technology pattern"),
                "technology",
            ),
            (
                Regex::new(r"(?i)\b(learn\w*|study|lesson\w*|skill\w*|practice)\b")
                    .expect("Invalid learning pattern"),
                "learning",
            ),
            (
                Regex::new(r"(?i)\b(feel\w*|happy|sad|joy\w*|fear\w*|love)\b")
                    .expect("Invalid emotion pattern"),
                "emotion",
            ),
            (
                Regex::new(r"(?i)\b(todo|task\w*|deadline\w*|meeting\w*|schedule\w*)\b")
                    .expect("Invalid task pattern"),
                "task",
            ),
        ]
    })
}

fn geometry_patterns() -> &'static Vec<(Regex, &'static str)> {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            (
                Regex::new(r"(?i)\b(spiral\w*|golden|fibonacci|growth|evolv\w*)\b")
                    .expect("Invalid spiral pattern"),
                "spiral",
            ),
            (
                Regex::new(r"(?i)\b(circle\w*|cycl\w*|round|whole|unity)\b")
                    .expect("Invalid circle pattern"),
                "circle",
            ),
            (
                Regex::new(r"(?i)\b(triangle\w*|three|trinity|balance)\b")
                    .expect("Invalid triangle pattern"),
                "triangle",
            ),
            (
                Regex::new(r"(?i)\b(square\w*|four|foundation\w*|stabil\w*)\b")
                    .expect("Invalid square pattern"),
                "square",
            ),
            (
                Regex::new(r"(?i)\b(line\w*|path\w*|sequence\w*|step\w*)\b")
                    .expect("Invalid line pattern"),
                "line",
            ),
        ]
    })
}

/// Topic tags found in `text`
pub fn infer_tags(text: &str) -> BTreeSet<String> {
    tag_patterns()
        .iter()
        .filter(|(re, _)| re.is_match(text))
        .map(|(_, tag)| (*tag).to_string())
        .collect()
}

/// One label from [`GEOMETRY_LABELS`]
///
/// Keywords win; otherwise short text is a point and longer text a line.
pub fn geometry_label(text: &str) -> &'static str {
    geometry_patterns()
        .iter()
        .find(|(re, _)| re.is_match(text))
        .map(|(_, label)| *label)
        .unwrap_or(if text.chars().count() < 40 { "point" } else { "line" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_form_sorts_nested_keys() {
        let value = json!({"b": 1, "a": {"d": [1, {"z": true, "y": null}], "c": "x"}});
        assert_eq!(
            canonicalize(&value),
            r#"{"a":{"c":"x","d":[1,{"y":null,"z":true}]},"b":1}"#
        );
    }

    #[test]
    fn test_content_id_is_hex_sha256() {
        let id = content_id(&json!({"content": "hello"}));
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(id, content_id(&json!({"content": "hello!"})));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 4), "héll");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn test_tags_and_geometry() {
        let text = "Golden ratio creates harmonic relationships";
        let tags = infer_tags(text);
        assert!(tags.contains("mathematics"));
        assert!(tags.contains("music"));
        assert_eq!(geometry_label(text), "spiral");

        assert_eq!(geometry_label("hi"), "point");
        assert_eq!(
            geometry_label("a fairly long sentence with no shape words in it at all"),
            "line"
        );
        assert!(GEOMETRY_LABELS.contains(&geometry_label("the wheel goes round")));
    }
}
