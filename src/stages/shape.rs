//! Expected output shapes and the validated value type they produce.
//!
//! A [`StageOutput`] can only be obtained from [`Shape::validate`] or from a
//! stage's fallback builder, so holding one proves the value has its stage's
//! shape.

use serde::Serialize;
use serde_json::{Map, Value};

/// Maximum characters of raw model text embedded into a fallback value.
pub const AUDIT_EXCERPT_CHARS: usize = 500;

/// The shape contract of one stage's output: a JSON object carrying a named
/// list field plus optional free-text fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    /// The array every consumer expects. Synthesized as `[]` when absent.
    pub list_field: &'static str,
    /// A string field that must be present and non-blank.
    pub required_text: Option<&'static str>,
    /// A string field that may be absent. Fallbacks store the raw excerpt here.
    pub note_field: Option<&'static str>,
}

impl Shape {
    /// Shape with just a list field.
    pub const fn list(list_field: &'static str) -> Self {
        Self {
            list_field,
            required_text: None,
            note_field: None,
        }
    }

    pub const fn with_required_text(mut self, field: &'static str) -> Self {
        self.required_text = Some(field);
        self
    }

    pub const fn with_notes(mut self, field: &'static str) -> Self {
        self.note_field = Some(field);
        self
    }

    /// Check `value` against this shape and normalize it.
    ///
    /// Returns `None` for anything that is not an object, a list field that is
    /// not an array, a missing or blank required text, or a non-string note.
    pub fn validate(&self, value: Value) -> Option<StageOutput> {
        let Value::Object(mut map) = value else {
            return None;
        };

        match map.get(self.list_field) {
            None | Some(Value::Null) => {
                map.insert(self.list_field.to_string(), Value::Array(Vec::new()));
            }
            Some(Value::Array(_)) => {}
            Some(_) => return None,
        }

        if let Some(field) = self.required_text {
            match map.get(field) {
                Some(Value::String(s)) if !s.trim().is_empty() => {}
                _ => return None,
            }
        }

        if let Some(field) = self.note_field {
            match map.get(field) {
                None | Some(Value::String(_)) => {}
                Some(Value::Null) => {
                    map.remove(field);
                }
                Some(_) => return None,
            }
        }

        Some(StageOutput(map))
    }

    /// Assemble a fallback value. Only the stage table calls this; the result
    /// still goes through [`Shape::validate`]'s rules by construction.
    pub(crate) fn fallback_output(
        &self,
        entries: Vec<Value>,
        required_text: Option<&str>,
        raw_excerpt: Option<&str>,
    ) -> StageOutput {
        let mut map = Map::new();
        map.insert(self.list_field.to_string(), Value::Array(entries));
        if let Some(field) = self.required_text {
            let text = required_text
                .filter(|t| !t.trim().is_empty())
                .unwrap_or("Not available");
            map.insert(field.to_string(), Value::String(text.to_string()));
        }
        if let (Some(field), Some(excerpt)) = (self.note_field, raw_excerpt) {
            map.insert(field.to_string(), Value::String(excerpt.to_string()));
        }
        StageOutput(map)
    }
}

/// A shape-valid JSON object for one stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StageOutput(Map<String, Value>);

impl StageOutput {
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// The stage's list entries. Empty when the field holds no array, which a
    /// validated output never does.
    pub fn entries(&self, list_field: &str) -> &[Value] {
        self.0
            .get(list_field)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }
}

/// First [`AUDIT_EXCERPT_CHARS`] characters of `raw`, or `None` if blank.
pub fn audit_excerpt(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(AUDIT_EXCERPT_CHARS).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ANALYSIS: Shape = Shape::list("opportunities").with_required_text("summary");
    const QUICK_WINS: Shape = Shape::list("items").with_notes("notes");

    #[test]
    fn missing_list_field_is_synthesized() {
        let out = QUICK_WINS.validate(json!({"notes": "n"})).unwrap();
        assert_eq!(out.into_value(), json!({"notes": "n", "items": []}));
    }

    #[test]
    fn null_list_field_becomes_empty() {
        let out = QUICK_WINS.validate(json!({"items": null})).unwrap();
        assert!(out.entries("items").is_empty());
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(QUICK_WINS.validate(json!([1, 2])).is_none());
        assert!(QUICK_WINS.validate(json!("items")).is_none());
        assert!(QUICK_WINS.validate(json!(null)).is_none());
    }

    #[test]
    fn list_field_of_wrong_type_is_rejected() {
        assert!(QUICK_WINS.validate(json!({"items": "a, b"})).is_none());
        assert!(QUICK_WINS.validate(json!({"items": {"a": 1}})).is_none());
    }

    #[test]
    fn required_text_must_be_non_blank_string() {
        assert!(ANALYSIS.validate(json!({"opportunities": []})).is_none());
        assert!(ANALYSIS.validate(json!({"summary": "  "})).is_none());
        assert!(ANALYSIS.validate(json!({"summary": 4})).is_none());
        let ok = ANALYSIS.validate(json!({"summary": "bakery"})).unwrap();
        assert_eq!(ok.text("summary"), Some("bakery"));
    }

    #[test]
    fn non_string_note_is_rejected_and_null_note_dropped() {
        assert!(QUICK_WINS.validate(json!({"notes": [1]})).is_none());
        let out = QUICK_WINS.validate(json!({"notes": null})).unwrap();
        assert!(out.as_map().get("notes").is_none());
    }

    #[test]
    fn fallback_output_passes_validation() {
        let out = ANALYSIS.fallback_output(vec![], None, Some("garbage"));
        assert!(ANALYSIS.validate(out.into_value()).is_some());

        let out = QUICK_WINS.fallback_output(vec![json!("x")], None, Some("garbage"));
        assert_eq!(out.text("notes"), Some("garbage"));
        assert!(QUICK_WINS.validate(out.into_value()).is_some());
    }

    #[test]
    fn audit_excerpt_truncates_on_char_boundary() {
        let raw = "é".repeat(AUDIT_EXCERPT_CHARS + 10);
        let excerpt = audit_excerpt(&raw).unwrap();
        assert_eq!(excerpt.chars().count(), AUDIT_EXCERPT_CHARS);
        assert_eq!(audit_excerpt("   "), None);
    }
}
