//! Validation of model replies and aggregation into note output.
//!
//! The model is asked for a JSON array of `{"reliability": n, "output": "s"}`
//! objects. Nothing about the reply is trusted: it is parsed, its shape is
//! checked, and every entry is validated before anything reaches a note.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::formatter::{format_output, sanitize_note_name};
use crate::settings::CommandOption;

/// Entries at or below this reliability never reach the output.
pub const RELIABILITY_THRESHOLD: f64 = 0.2;

/// Leading marker of every inline aggregate.
pub const AGGREGATE_MARKER: &str = " #auto-classifier ";

/// Appended to every model output to form the generated name.
pub const GENERATED_SUFFIX: &str = "-GPT";

/// Reasons a reply cannot be turned into classifications.
#[derive(Debug, Error)]
pub enum ResponseError {
    /// The reply is not JSON at all.
    #[error("model reply is not valid JSON: {0}")]
    MalformedJson(#[source] serde_json::Error),

    /// The reply is JSON, but not an array.
    #[error("model reply is a JSON {found}, expected an array")]
    UnexpectedShape { found: &'static str },

    /// An entry lacks a numeric `reliability` or a string `output`.
    #[error("entry {index} of the model reply is invalid: {reason}")]
    InvalidEntry { index: usize, reason: String },
}

/// What to do with an array entry that fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPolicy {
    /// Log the entry and keep the rest of the array.
    #[default]
    Skip,
    /// Reject the whole reply.
    Abort,
}

/// One validated `{reliability, output}` pair from the model.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub reliability: f64,
    pub output: String,
}

/// Formatted output built from the classifications that passed the threshold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatedOutput {
    tokens: Vec<String>,
    names: Vec<String>,
}

impl AggregatedOutput {
    /// Formatted tokens (`#Foo-GPT`, `[[Foo-GPT]]`, ...) in reply order.
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    /// Unformatted generated names (`Foo-GPT`), one per token.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// `true` when no classification survived.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Inline text: the marker followed by each token and a trailing space.
    pub fn text(&self) -> String {
        let mut text = String::from(AGGREGATE_MARKER);
        for token in &self.tokens {
            text.push_str(token);
            text.push(' ');
        }
        text
    }
}

impl fmt::Display for AggregatedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

/// Parses a raw model reply into validated classifications.
///
/// A Markdown code fence around the JSON is tolerated. Invalid entries are
/// skipped or rejected according to `policy`.
///
/// # Errors
///
/// - [`ResponseError::MalformedJson`] if the reply does not parse
/// - [`ResponseError::UnexpectedShape`] if the top level is not an array
/// - [`ResponseError::InvalidEntry`] for a bad entry under [`EntryPolicy::Abort`]
pub fn parse_classifications(
    raw: &str,
    policy: EntryPolicy,
) -> Result<Vec<Classification>, ResponseError> {
    let json: Value =
        serde_json::from_str(strip_code_fence(raw)).map_err(ResponseError::MalformedJson)?;

    let items = match json {
        Value::Array(items) => items,
        other => {
            return Err(ResponseError::UnexpectedShape {
                found: json_kind(&other),
            });
        }
    };

    let mut classifications = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match validate_entry(item) {
            Ok(classification) => classifications.push(classification),
            Err(reason) => match policy {
                EntryPolicy::Skip => {
                    tracing::warn!(index, %reason, "skipping invalid entry in model reply");
                }
                EntryPolicy::Abort => return Err(ResponseError::InvalidEntry { index, reason }),
            },
        }
    }

    Ok(classifications)
}

/// Folds classifications into the output for `option`.
///
/// Entries with `reliability <= 0.2` are dropped. Each survivor becomes
/// `output + "-GPT"` with characters that cannot appear in a note name
/// replaced, formatted for the configured output type. Repeated
/// names are collapsed, and a non-zero `max_tags` caps the number of tokens.
#[must_use]
pub fn aggregate(classifications: &[Classification], option: &CommandOption) -> AggregatedOutput {
    let limit = match option.max_tags {
        0 => usize::MAX,
        n => n as usize,
    };

    let mut seen = HashSet::new();
    let mut aggregated = AggregatedOutput::default();
    for classification in classifications {
        if aggregated.tokens.len() >= limit {
            break;
        }
        if classification.reliability <= RELIABILITY_THRESHOLD {
            tracing::debug!(
                output = %classification.output,
                reliability = classification.reliability,
                "dropping low-reliability classification"
            );
            continue;
        }

        // The token and the placeholder note must name the same file
        let Some(cleaned) = sanitize_note_name(&classification.output) else {
            tracing::warn!(
                output = %classification.output,
                "dropping classification with no usable note name"
            );
            continue;
        };
        let name = format!("{cleaned}{GENERATED_SUFFIX}");
        if !seen.insert(name.clone()) {
            continue;
        }
        aggregated.tokens.push(format_output(
            &name,
            option.output_type,
            &option.output_prefix,
            &option.output_suffix,
        ));
        aggregated.names.push(name);
    }

    aggregated
}

/// Parses `raw` and aggregates it in one step.
///
/// # Errors
///
/// Same as [`parse_classifications`].
pub fn parse_and_aggregate(
    raw: &str,
    option: &CommandOption,
) -> Result<AggregatedOutput, ResponseError> {
    let classifications = parse_classifications(raw, option.entry_policy)?;
    Ok(aggregate(&classifications, option))
}

fn validate_entry(item: &Value) -> Result<Classification, String> {
    let Some(obj) = item.as_object() else {
        return Err(format!("expected an object, found {}", json_kind(item)));
    };

    let reliability = match obj.get("reliability") {
        None => return Err("missing `reliability`".to_string()),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| format!("`reliability` is a {}, not a number", json_kind(value)))?,
    };

    let output = match obj.get("output") {
        None => return Err("missing `output`".to_string()),
        Some(value) => value
            .as_str()
            .ok_or_else(|| format!("`output` is a {}, not a string", json_kind(value)))?,
    };
    let output = output.trim();
    if output.is_empty() {
        return Err("`output` is empty".to_string());
    }

    Ok(Classification {
        reliability,
        output: output.to_string(),
    })
}

/// Removes a surrounding ```` ``` ```` / ```` ```json ```` fence, if any.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };

    // Drop the info string (`json`) on the opening fence line
    match body.find('\n') {
        Some(newline) => body[newline + 1..].trim(),
        None => body.trim(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::OutputType;

    fn option() -> CommandOption {
        CommandOption::default()
    }

    #[test]
    fn reliable_entry_produces_formatted_token() {
        let out = parse_and_aggregate(r#"[{"reliability":0.5,"output":"Foo"}]"#, &option()).unwrap();

        assert_eq!(out.tokens(), ["#Foo-GPT"]);
        assert_eq!(out.names(), ["Foo-GPT"]);
        assert_eq!(out.text(), " #auto-classifier #Foo-GPT ");
    }

    #[test]
    fn low_reliability_entry_is_excluded() {
        let out = parse_and_aggregate(r#"[{"reliability":0.1,"output":"Bar"}]"#, &option()).unwrap();

        assert!(out.is_empty());
        assert_eq!(out.text(), AGGREGATE_MARKER);
    }

    #[test]
    fn threshold_is_exclusive() {
        let entries = vec![
            Classification {
                reliability: 0.2,
                output: "Edge".to_string(),
            },
            Classification {
                reliability: 0.21,
                output: "Above".to_string(),
            },
        ];

        let out = aggregate(&entries, &option());
        assert_eq!(out.names(), ["Above-GPT"]);
    }

    #[test]
    fn object_reply_is_unexpected_shape() {
        let result = parse_classifications(r#"{"not":"array"}"#, EntryPolicy::Skip);
        assert!(matches!(
            result,
            Err(ResponseError::UnexpectedShape { found: "object" })
        ));
    }

    #[test]
    fn non_json_reply_is_malformed() {
        let result = parse_classifications("not json", EntryPolicy::Skip);
        assert!(matches!(result, Err(ResponseError::MalformedJson(_))));
    }

    #[test]
    fn code_fenced_reply_is_accepted() {
        let raw = "```json\n[{\"reliability\": 0.9, \"output\": \"Rust\"}]\n```";
        let entries = parse_classifications(raw, EntryPolicy::Skip).unwrap();

        assert_eq!(
            entries,
            vec![Classification {
                reliability: 0.9,
                output: "Rust".to_string()
            }]
        );
    }

    #[test]
    fn skip_policy_keeps_valid_entries_around_invalid_ones() {
        let raw = r#"[
            {"reliability": 0.9, "output": "Good"},
            {"output": "NoReliability"},
            {"reliability": 0.8},
            null,
            {"reliability": "high", "output": "StringReliability"},
            {"reliability": 0.7, "output": "AlsoGood"}
        ]"#;

        let entries = parse_classifications(raw, EntryPolicy::Skip).unwrap();
        let outputs: Vec<&str> = entries.iter().map(|c| c.output.as_str()).collect();
        assert_eq!(outputs, ["Good", "AlsoGood"]);
    }

    #[test]
    fn abort_policy_rejects_reply_at_first_invalid_entry() {
        let raw = r#"[{"reliability": 0.9, "output": "Good"}, {"output": "Missing"}]"#;

        let result = parse_classifications(raw, EntryPolicy::Abort);
        match result {
            Err(ResponseError::InvalidEntry { index, reason }) => {
                assert_eq!(index, 1);
                assert!(reason.contains("reliability"));
            }
            other => panic!("expected InvalidEntry, got {other:?}"),
        }
    }

    #[test]
    fn empty_output_string_is_invalid() {
        let result = parse_classifications(r#"[{"reliability": 0.9, "output": "  "}]"#, EntryPolicy::Abort);
        assert!(matches!(result, Err(ResponseError::InvalidEntry { index: 0, .. })));
    }

    #[test]
    fn duplicate_outputs_are_collapsed() {
        let raw = r#"[{"reliability":0.9,"output":"Dup"},{"reliability":0.8,"output":"Dup"}]"#;
        let out = parse_and_aggregate(raw, &option()).unwrap();
        assert_eq!(out.names(), ["Dup-GPT"]);
    }

    #[test]
    fn max_tags_caps_surviving_tokens() {
        let raw = r#"[
            {"reliability":0.1,"output":"Low"},
            {"reliability":0.9,"output":"A"},
            {"reliability":0.8,"output":"B"},
            {"reliability":0.7,"output":"C"}
        ]"#;
        let opt = CommandOption {
            max_tags: 2,
            ..option()
        };

        let out = parse_and_aggregate(raw, &opt).unwrap();
        assert_eq!(out.names(), ["A-GPT", "B-GPT"]);
    }

    #[test]
    fn zero_max_tags_is_unlimited() {
        let raw = r#"[{"reliability":0.9,"output":"A"},{"reliability":0.8,"output":"B"}]"#;
        let opt = CommandOption {
            max_tags: 0,
            ..option()
        };

        assert_eq!(parse_and_aggregate(raw, &opt).unwrap().tokens().len(), 2);
    }

    #[test]
    fn wikilink_output_type_formats_tokens() {
        let opt = CommandOption {
            output_type: OutputType::Wikilink,
            output_prefix: "topic/".to_string(),
            ..option()
        };

        let out = parse_and_aggregate(r#"[{"reliability":0.9,"output":"Big Cats"}]"#, &opt).unwrap();
        assert_eq!(out.tokens(), ["[[topic/Big Cats-GPT]]"]);
        assert_eq!(out.names(), ["Big Cats-GPT"]);
    }

    #[test]
    fn names_are_cleaned_before_formatting() {
        let opt = CommandOption {
            output_type: OutputType::Wikilink,
            ..option()
        };
        let raw = r#"[{"reliability":0.9,"output":"a/b"},{"reliability":0.8,"output":"[[]]"}]"#;

        let out = parse_and_aggregate(raw, &opt).unwrap();
        assert_eq!(out.tokens(), ["[[a b-GPT]]"]);
        assert_eq!(out.names(), ["a b-GPT"]);
    }

    #[test]
    fn empty_array_is_valid_and_empty() {
        let out = parse_and_aggregate("[]", &option()).unwrap();
        assert!(out.is_empty());
    }
}
