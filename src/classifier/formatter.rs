use crate::settings::OutputType;

/// Characters that cannot appear in a note name.
const FORBIDDEN_NAME_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|', '#', '^', '[', ']'];

/// Replaces characters that cannot appear in a note name with spaces and
/// collapses runs of whitespace.
///
/// Returns `None` if nothing usable remains.
#[must_use]
pub fn sanitize_note_name(name: &str) -> Option<String> {
    let cleaned: String = name
        .chars()
        .map(|c| if FORBIDDEN_NAME_CHARS.contains(&c) { ' ' } else { c })
        .collect();
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Turns a generated name into the text written to the note.
///
/// - `Tag`: `#` followed by prefix + name + suffix with spaces replaced by `_`
/// - `Wikilink`: prefix + name + suffix wrapped in `[[` `]]`
/// - `FrontMatter` / `Title`: prefix + name + suffix unchanged
///
/// # Examples
///
/// ```
/// use autoclass::classifier::format_output;
/// use autoclass::settings::OutputType;
///
/// assert_eq!(format_output("Cats And Dogs", OutputType::Tag, "", ""), "#Cats_And_Dogs");
/// assert_eq!(format_output("Foo", OutputType::Wikilink, "pre-", ""), "[[pre-Foo]]");
/// ```
#[must_use]
pub fn format_output(name: &str, out_type: OutputType, prefix: &str, suffix: &str) -> String {
    let text = format!("{prefix}{name}{suffix}");
    match out_type {
        OutputType::Tag => format!("#{}", text.replace(' ', "_")),
        OutputType::Wikilink => format!("[[{text}]]"),
        OutputType::FrontMatter | OutputType::Title => text,
    }
}
