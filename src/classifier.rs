//! Classification pipeline: prompt templating, reply validation and output formatting.
//!
//! The pieces run in this order for every input item:
//!
//! 1. [`render_prompt`] fills `{{input}}`, `{{reference}}` and `{{max_tags}}`
//!    into the configured template.
//! 2. [`Classifier`] sends the prompt through a
//!    [`ChatClientTrait`](crate::openai::ChatClientTrait) implementation.
//! 3. [`parse_classifications`] validates the reply as a JSON array of
//!    `{reliability, output}` objects.
//! 4. [`aggregate`] keeps entries with `reliability > 0.2` and turns each into
//!    a formatted token via [`format_output`].
//!
//! # Examples
//!
//! ```
//! use autoclass::classifier::parse_and_aggregate;
//! use autoclass::settings::CommandOption;
//!
//! let option = CommandOption::default();
//! let raw = r#"[{"reliability": 0.9, "output": "Animals"}, {"reliability": 0.1, "output": "Cars"}]"#;
//!
//! let output = parse_and_aggregate(raw, &option).unwrap();
//! assert_eq!(output.text(), " #auto-classifier #Animals-GPT ");
//! assert_eq!(output.names(), ["Animals-GPT"]);
//! ```

mod formatter;
mod prompt;
mod request;
mod response;

pub use formatter::{format_output, sanitize_note_name};
pub use prompt::{
    DEFAULT_CHAT_ROLE, DEFAULT_PROMPT_TEMPLATE, INPUT_PLACEHOLDER, MAX_TAGS_PLACEHOLDER,
    REFERENCE_PLACEHOLDER, render_prompt,
};
pub use request::{ClassificationRequest, Classifier, ClassifyError};
pub use response::{
    AGGREGATE_MARKER, AggregatedOutput, Classification, EntryPolicy, GENERATED_SUFFIX,
    RELIABILITY_THRESHOLD, ResponseError, aggregate, parse_and_aggregate, parse_classifications,
};
