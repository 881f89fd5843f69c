//! Line-level Markdown helpers: front matter, callouts and tags.
//!
//! Everything here is pure string work so the filesystem adapter only has to
//! read and write files.

use std::sync::LazyLock;

use regex::Regex;
use serde_yaml::{Mapping, Value};

use super::DocumentError;

const FRONT_MATTER_FENCE: &str = "---";

static CALLOUT_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*>\s*\[!([A-Za-z0-9_-]+)\][+-]?\s*(.*)$").expect("valid callout regex")
});

static INLINE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)#([\p{L}\p{N}_/-]+)").expect("valid tag regex")
});

/// A note split into its front matter and body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteSections<'a> {
    /// Raw YAML between the fences, if the note has front matter.
    pub front_matter: Option<String>,
    /// Index of the first body line.
    pub body_line: usize,
    pub lines: Vec<&'a str>,
}

impl NoteSections<'_> {
    /// Body text (everything after the front matter).
    pub fn body(&self) -> String {
        self.lines[self.body_line..].join("\n")
    }
}

/// Splits `text` into front matter and body lines.
///
/// Front matter is recognised only when the very first line is `---` and a
/// closing `---` line follows.
pub fn split_note(text: &str) -> NoteSections<'_> {
    let lines: Vec<&str> = text.lines().collect();

    if lines.first().map(|l| l.trim_end()) == Some(FRONT_MATTER_FENCE)
        && let Some(close) = lines
            .iter()
            .skip(1)
            .position(|l| l.trim_end() == FRONT_MATTER_FENCE)
    {
        let close = close + 1;
        return NoteSections {
            front_matter: Some(lines[1..close].join("\n")),
            body_line: close + 1,
            lines,
        };
    }

    NoteSections {
        front_matter: None,
        body_line: 0,
        lines,
    }
}

/// The line ending used by `text`: `\r\n` if any line has one, else `\n`.
pub fn line_ending(text: &str) -> &'static str {
    if text.contains("\r\n") { "\r\n" } else { "\n" }
}

/// Parses front-matter YAML into a mapping; blank YAML is an empty mapping.
///
/// # Errors
///
/// Returns [`DocumentError::FrontMatter`] if the YAML does not parse or is
/// not a mapping.
pub fn parse_front_matter(yaml: &str) -> Result<Mapping, DocumentError> {
    if yaml.trim().is_empty() {
        return Ok(Mapping::new());
    }

    match serde_yaml::from_str::<Value>(yaml) {
        Ok(Value::Mapping(mapping)) => Ok(mapping),
        Ok(Value::Null) => Ok(Mapping::new()),
        Ok(_) => Err(DocumentError::FrontMatter(
            "front matter is not a key/value mapping".to_string(),
        )),
        Err(e) => Err(DocumentError::FrontMatter(e.to_string())),
    }
}

/// Renders a front-matter value as classification input.
///
/// Scalars become their text; sequences of scalars are joined with `, `.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Sequence(items) => {
            let parts: Vec<String> = items.iter().filter_map(value_text).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        Value::Tagged(tagged) => value_text(&tagged.value),
        Value::Null | Value::Mapping(_) => None,
    }
}

/// Flattens a front-matter value into a list of strings.
///
/// A scalar string is split on commas, matching how tag lists are often
/// written inline.
pub fn value_list(value: &Value) -> Vec<String> {
    match value {
        Value::Sequence(items) => items.iter().filter_map(value_text).collect(),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        other => value_text(other).into_iter().collect(),
    }
}

/// Rewrites `text` with `mapping` as its front matter.
///
/// The note's line ending is kept.
///
/// # Errors
///
/// Returns [`DocumentError::FrontMatter`] if the mapping cannot be serialised.
pub fn replace_front_matter(text: &str, mapping: &Mapping) -> Result<String, DocumentError> {
    let sections = split_note(text);
    let yaml = serde_yaml::to_string(mapping).map_err(|e| DocumentError::FrontMatter(e.to_string()))?;

    let eol = line_ending(text);

    let mut rendered = String::from(FRONT_MATTER_FENCE);
    rendered.push_str(eol);
    for line in yaml.lines() {
        rendered.push_str(line);
        rendered.push_str(eol);
    }
    rendered.push_str(FRONT_MATTER_FENCE);
    rendered.push_str(eol);
    rendered.push_str(&sections.lines[sections.body_line..].join(eol));
    if text.ends_with('\n') && !rendered.ends_with('\n') {
        rendered.push_str(eol);
    }
    Ok(rendered)
}

/// Inserts `line` before line `index` (clamped to the end of the note),
/// keeping the note's line ending.
pub fn insert_line(text: &str, index: usize, line: &str) -> String {
    let eol = line_ending(text);
    let mut lines: Vec<&str> = text.lines().collect();
    let index = index.min(lines.len());
    lines.insert(index, line);

    let mut rendered = lines.join(eol);
    if text.ends_with('\n') || text.is_empty() {
        rendered.push_str(eol);
    }
    rendered
}

/// A callout block (`> [!kind] title` followed by `>` lines).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callout {
    pub kind: String,
    /// Line index of the `> [!kind]` header.
    pub header_line: usize,
    /// Title and body text with the `>` markers removed.
    pub content: String,
}

/// Finds every callout in the body of a note, in document order.
pub fn find_callouts(sections: &NoteSections<'_>) -> Vec<Callout> {
    let lines = &sections.lines;
    let mut callouts = Vec::new();
    let mut index = sections.body_line;

    while index < lines.len() {
        let Some(captures) = CALLOUT_HEADER.captures(lines[index]) else {
            index += 1;
            continue;
        };

        let header_line = index;
        let mut parts = Vec::new();
        let title = captures[2].trim();
        if !title.is_empty() {
            parts.push(title.to_string());
        }

        index += 1;
        while index < lines.len() && !CALLOUT_HEADER.is_match(lines[index]) {
            let Some(rest) = lines[index].trim_start().strip_prefix('>') else {
                break;
            };
            parts.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            index += 1;
        }

        callouts.push(Callout {
            kind: captures[1].to_lowercase(),
            header_line,
            content: parts.join("\n").trim().to_string(),
        });
    }

    callouts
}

/// Collects `#tags` from body text, ignoring fenced code blocks.
///
/// Purely numeric tags (`#123`) are not tags.
pub fn inline_tags(body: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let mut in_code = false;

    for line in body.lines() {
        if line.trim_start().starts_with("```") {
            in_code = !in_code;
            continue;
        }
        if in_code {
            continue;
        }
        for captures in INLINE_TAG.captures_iter(line) {
            let tag = &captures[1];
            if !tag.chars().all(|c| c.is_ascii_digit()) {
                tags.push(tag.to_string());
            }
        }
    }

    tags
}
