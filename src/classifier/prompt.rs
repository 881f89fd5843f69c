//! Prompt templating for classification requests.

/// Placeholder replaced by the text being classified.
pub const INPUT_PLACEHOLDER: &str = "{{input}}";
/// Placeholder replaced by the comma-joined reference categories.
pub const REFERENCE_PLACEHOLDER: &str = "{{reference}}";
/// Placeholder replaced by the category limit (or `unlimited`).
pub const MAX_TAGS_PLACEHOLDER: &str = "{{max_tags}}";

/// Prompt used when the settings carry none.
///
/// Asks for a JSON array of `{reliability, output}` objects, which is the
/// only reply shape the response validator accepts.
pub const DEFAULT_PROMPT_TEMPLATE: &str = r#"Classify the content below.
"""
{{input}}
"""
Prefer categories from this list: {{reference}}
Return at most {{max_tags}} categories.
Answer ONLY with a JSON array of objects shaped like {"reliability": 0.0-1.0, "output": "category"}.
If no listed category fits, suggest a proper new one and rate its reliability honestly."#;

/// System message used when the settings carry none.
pub const DEFAULT_CHAT_ROLE: &str =
    "You are a JSON answer bot. Reply with the requested JSON and nothing else.";

/// Renders a classification prompt.
///
/// The first occurrence of each placeholder in `template` is replaced.
/// Substitution is not recursive: placeholder text that arrives inside
/// `input` or a reference is left as is. References are joined with `,`
/// and a `max_tags` of 0 renders as `unlimited`.
///
/// # Examples
///
/// ```
/// use autoclass::classifier::render_prompt;
///
/// let prompt = render_prompt(
///     "Tag {{input}} using {{reference}} (max {{max_tags}})",
///     "a note about cats",
///     &["animals".to_string(), "pets".to_string()],
///     0,
/// );
/// assert_eq!(prompt, "Tag a note about cats using animals,pets (max unlimited)");
/// ```
#[must_use]
pub fn render_prompt(template: &str, input: &str, references: &[String], max_tags: u32) -> String {
    let reference = references.join(",");
    let max_tags = if max_tags == 0 {
        "unlimited".to_string()
    } else {
        max_tags.to_string()
    };

    // Locate placeholders in the original template so substituted text is never rescanned
    let mut spans: Vec<(usize, &str, &str)> = [
        (INPUT_PLACEHOLDER, input),
        (REFERENCE_PLACEHOLDER, reference.as_str()),
        (MAX_TAGS_PLACEHOLDER, max_tags.as_str()),
    ]
    .into_iter()
    .filter_map(|(placeholder, value)| {
        template
            .find(placeholder)
            .map(|pos| (pos, placeholder, value))
    })
    .collect();
    spans.sort_by_key(|(pos, _, _)| *pos);

    let mut rendered = String::with_capacity(template.len() + input.len() + reference.len());
    let mut cursor = 0;
    for (pos, placeholder, value) in spans {
        rendered.push_str(&template[cursor..pos]);
        rendered.push_str(value);
        cursor = pos + placeholder.len();
    }
    rendered.push_str(&template[cursor..]);
    rendered
}
