//! Turns untrusted model text into a shape-valid stage value.
//!
//! Repairs are tried cheapest and most trustworthy first and the first
//! candidate that both decodes and passes the stage's [`Shape`] wins:
//!
//! 1. strict decode of the raw text
//! 2. decode after stripping a surrounding code fence
//! 3. decode of the first-`{`-to-last-`}` substring
//! 4. decode after syntactic repair (trailing commas, concatenated objects,
//!    unbalanced brackets)
//! 5. the stage's fallback value
//!
//! [`recover`] never fails: tier 5 always produces a value.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::job::ResultSource;
use crate::stages::{FallbackBuilder, Shape, StageOutput, audit_excerpt};

/// Which tier produced the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryTier {
    Strict,
    FenceStrip,
    BraceExtract,
    Repair,
    Fallback,
}

impl fmt::Display for RecoveryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecoveryTier::Strict => "strict",
            RecoveryTier::FenceStrip => "fence_strip",
            RecoveryTier::BraceExtract => "brace_extract",
            RecoveryTier::Repair => "repair",
            RecoveryTier::Fallback => "fallback",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recovered {
    pub output: StageOutput,
    pub tier: RecoveryTier,
}

impl Recovered {
    pub fn source(&self) -> ResultSource {
        if self.tier == RecoveryTier::Fallback {
            ResultSource::Fallback
        } else {
            ResultSource::Parsed
        }
    }
}

/// Recover a value of `shape` from `raw`, falling back to `fallback`.
pub fn recover(raw: &str, shape: &Shape, fallback: FallbackBuilder) -> Recovered {
    if let Some(output) = decode(raw, shape) {
        return Recovered {
            output,
            tier: RecoveryTier::Strict,
        };
    }

    let stripped = strip_code_fences(raw);
    if let Some(output) = decode(stripped, shape) {
        return Recovered {
            output,
            tier: RecoveryTier::FenceStrip,
        };
    }

    let extracted = extract_outer_object(stripped);
    if let Some(output) = extracted.and_then(|s| decode(s, shape)) {
        return Recovered {
            output,
            tier: RecoveryTier::BraceExtract,
        };
    }

    // When output was cut off mid-object the outer-brace slice ends at some
    // inner `}` and loses the rest, so the open-ended tail is repaired first.
    let tail = stripped.find('{').map(|start| &stripped[start..]);
    let extracted = extracted.filter(|e| Some(*e) != tail);
    for candidate in [tail, extracted].into_iter().flatten() {
        if let Some(output) = decode(&repair_json(candidate), shape) {
            return Recovered {
                output,
                tier: RecoveryTier::Repair,
            };
        }
    }

    let excerpt = audit_excerpt(raw);
    Recovered {
        output: fallback(shape, excerpt.as_deref()),
        tier: RecoveryTier::Fallback,
    }
}

fn decode(text: &str, shape: &Shape) -> Option<StageOutput> {
    let value: Value = serde_json::from_str(text.trim()).ok()?;
    shape.validate(value)
}

/// Remove a leading ```` ```lang ```` fence and a trailing ```` ``` ````.
/// The language tag is optional and matched in any case.
pub fn strip_code_fences(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        let tag_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(rest.len());
        body = &rest[tag_len..];
    }
    if let Some(rest) = body.trim_end().strip_suffix("```") {
        body = rest;
    }
    body.trim()
}

/// Slice from the first `{` to the last `}`, if they are in that order.
pub fn extract_outer_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Best-effort syntactic repair of nearly valid JSON.
///
/// Outside string literals: drops a comma that directly precedes `]` or `}`,
/// inserts a comma between `}` and a following `{`, and closes whatever
/// strings, arrays and objects are still open at the end.
pub fn repair_json(text: &str) -> String {
    let chars: Vec<char> = text.trim().chars().collect();
    let mut out = String::with_capacity(chars.len() + 8);
    let mut open: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    let next_significant = |from: usize| chars[from..].iter().copied().find(|c| !c.is_whitespace());

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '{' => {
                open.push('}');
                out.push(c);
            }
            '[' => {
                open.push(']');
                out.push(c);
            }
            '}' | ']' => {
                if open.last() == Some(&c) {
                    open.pop();
                }
                out.push(c);
                if c == '}' && next_significant(i + 1) == Some('{') {
                    out.push(',');
                }
            }
            ',' => {
                if !matches!(next_significant(i + 1), Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }

    // A cut-off document often ends on a separator; drop it before closing.
    let trimmed_len = out.trim_end().trim_end_matches(',').trim_end().len();
    out.truncate(trimmed_len);

    while let Some(closer) = open.pop() {
        out.push(closer);
    }
    out
}
