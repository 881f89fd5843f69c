//! Classification of a single input string.
//!
//! `Classifier` ties the prompt templater, the chat client and the response
//! validator together for one input item. It knows nothing about notes.

use std::sync::Arc;

use thiserror::Error;

use super::prompt::render_prompt;
use super::response::{AggregatedOutput, ResponseError, parse_and_aggregate};
use crate::cancel::CancellationToken;
use crate::openai::{ChatClientTrait, ChatError, ChatRequest};
use crate::settings::CommandOption;

/// Failure to classify one input item.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error(transparent)]
    Response(#[from] ResponseError),
}

impl ClassifyError {
    /// `true` when the item failed because the run was aborted.
    pub fn is_aborted(&self) -> bool {
        matches!(self, ClassifyError::Chat(ChatError::Aborted))
    }
}

/// One extracted input string together with the option it is classified under.
#[derive(Debug, Clone, Copy)]
pub struct ClassificationRequest<'a> {
    pub input: &'a str,
    pub references: &'a [String],
    pub option: &'a CommandOption,
}

impl<'a> ClassificationRequest<'a> {
    pub fn new(input: &'a str, references: &'a [String], option: &'a CommandOption) -> Self {
        Self {
            input,
            references,
            option,
        }
    }

    /// Renders the prompt and wraps it in a chat request.
    pub fn to_chat_request(&self) -> ChatRequest {
        let prompt = render_prompt(
            &self.option.prompt_template,
            self.input,
            self.references,
            self.option.max_tags,
        );
        ChatRequest::new(
            self.option.chat_role.clone(),
            prompt,
            self.option.model.clone(),
            self.option.max_tokens,
        )
    }
}

/// Classifies input strings using a chat-completion model.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use autoclass::cancel::CancellationToken;
/// use autoclass::classifier::{ClassificationRequest, Classifier};
/// use autoclass::openai::ChatClientBuilder;
/// use autoclass::settings::CommandOption;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = ChatClientBuilder::new().api_key("sk-example").build()?;
/// let classifier = Classifier::new(Arc::new(client));
///
/// let option = CommandOption::default();
/// let references = vec!["animals".to_string(), "travel".to_string()];
/// let request = ClassificationRequest::new("Notes about my cat", &references, &option);
///
/// let output = classifier.classify(&request, &CancellationToken::new())?;
/// println!("{}", output);
/// # Ok(())
/// # }
/// ```
pub struct Classifier {
    client: Arc<dyn ChatClientTrait>,
}

impl Classifier {
    #[must_use]
    pub fn new(client: Arc<dyn ChatClientTrait>) -> Self {
        Self { client }
    }

    /// Classifies one input and aggregates the reply.
    ///
    /// # Errors
    ///
    /// Returns [`ClassifyError::Chat`] if the API call fails or is aborted, and
    /// [`ClassifyError::Response`] if the reply does not validate.
    pub fn classify(
        &self,
        request: &ClassificationRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<AggregatedOutput, ClassifyError> {
        let chat_request = request.to_chat_request();
        let raw = self.client.call_api(&chat_request, cancel)?;
        tracing::debug!(reply = %raw, "model reply received");

        Ok(parse_and_aggregate(&raw, request.option)?)
    }
}
