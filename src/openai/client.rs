//! Chat-completion client with rate-limit backoff and cooperative cancellation.
//!
//! This module provides `ChatClient` for calling an OpenAI-compatible
//! `/chat/completions` endpoint, along with its error type, request type and
//! builder.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::transport::{ChatTransport, HttpReply, HttpTransport, Sleeper, ThreadSleeper};
use crate::cancel::CancellationToken;

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Environment variable consulted when no base URL is configured.
pub const BASE_URL_ENV: &str = "OPENAI_BASE_URL";

/// Attempts made before giving up on a rate-limited request.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Delay before the first retry; doubles with every further attempt.
pub const BASE_BACKOFF: Duration = Duration::from_millis(2000);

/// Errors that can occur when calling the chat-completion API.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Network-related errors (connection failures, DNS resolution, etc.)
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    /// Request or response timeout errors
    #[error("Request timed out")]
    Timeout(#[source] reqwest::Error),

    /// Non-success HTTP status other than 429
    #[error("HTTP error: status {status}: {message}")]
    Http { status: u16, message: String },

    /// HTTP 429; retried internally, only surfaced by a single attempt
    #[error("Rate limited by the API")]
    RateLimited,

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Well-formed reply without the expected content
    #[error("API error: {message}")]
    Api { message: String },

    /// Invalid URL configuration error
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// No API key was configured
    #[error("API key is not set")]
    MissingApiKey,

    /// The cancellation token fired before an attempt
    #[error("Request aborted")]
    Aborted,

    /// Every attempt was rate limited
    #[error("Max retries reached after {attempts} attempts")]
    MaxRetries { attempts: u32 },
}

/// Sampling parameters sent with every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_p: 0.95,
            frequency_penalty: 0.0,
            presence_penalty: 0.5,
        }
    }
}

/// One chat-completion call: a system message and a user prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub system_role: String,
    pub user_prompt: String,
    pub model: String,
    pub max_tokens: u32,
    pub sampling: SamplingParams,
}

impl ChatRequest {
    /// Creates a request with default sampling parameters.
    pub fn new(
        system_role: impl Into<String>,
        user_prompt: impl Into<String>,
        model: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            system_role: system_role.into(),
            user_prompt: user_prompt.into(),
            model: model.into(),
            max_tokens,
            sampling: SamplingParams::default(),
        }
    }

    fn to_body(&self) -> ChatCompletionBody<'_> {
        ChatCompletionBody {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &self.system_role,
                },
                ChatMessage {
                    role: "user",
                    content: &self.user_prompt,
                },
            ],
            max_tokens: self.max_tokens,
            n: 1,
            stop: None,
            temperature: self.sampling.temperature,
            top_p: self.sampling.top_p,
            frequency_penalty: self.sampling.frequency_penalty,
            presence_penalty: self.sampling.presence_penalty,
        }
    }
}

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    n: u32,
    stop: Option<&'a str>,
    temperature: f32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

/// Trait for chat-completion operations.
///
/// This trait enables mocking in unit tests and keeps the orchestration code
/// independent of HTTP details.
pub trait ChatClientTrait: Send + Sync {
    /// Sends `request` and returns the first choice's message content verbatim.
    ///
    /// `cancel` is checked before every attempt; a cancelled token fails the
    /// call with [`ChatError::Aborted`] without sending anything further.
    fn call_api(&self, request: &ChatRequest, cancel: &CancellationToken)
    -> Result<String, ChatError>;
}

/// Builder for constructing `ChatClient` instances.
///
/// # Examples
///
/// ```
/// use autoclass::openai::ChatClientBuilder;
///
/// let client = ChatClientBuilder::new()
///     .api_key("sk-example")
///     .base_url("http://localhost:8080/v1")
///     .build()
///     .expect("Failed to create client");
/// assert_eq!(client.base_url(), "http://localhost:8080/v1");
/// ```
#[derive(Default)]
pub struct ChatClientBuilder {
    base_url: Option<String>,
    api_key: Option<String>,
    max_retries: Option<u32>,
    transport: Option<Arc<dyn ChatTransport>>,
    sleeper: Option<Arc<dyn Sleeper>>,
}

impl ChatClientBuilder {
    /// Creates a new `ChatClientBuilder` with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API base URL (e.g. `https://api.openai.com/v1`).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the bearer API key.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the number of attempts made while the API keeps answering 429.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Replaces the HTTP transport.
    pub fn transport(mut self, transport: Arc<dyn ChatTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replaces the backoff sleeper.
    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Builds the `ChatClient`.
    ///
    /// If `base_url()` was not called, the `OPENAI_BASE_URL` environment
    /// variable is used, then `https://api.openai.com/v1`.
    ///
    /// # Errors
    ///
    /// - [`ChatError::MissingApiKey`] if no non-blank key was set
    /// - [`ChatError::InvalidUrl`] if the base URL does not parse
    /// - [`ChatError::Network`] if the default HTTP transport cannot be built
    pub fn build(self) -> Result<ChatClient, ChatError> {
        let api_key = self
            .api_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .ok_or(ChatError::MissingApiKey)?;

        let base_url = match self.base_url {
            Some(url) => url,
            None => std::env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
        };
        let base_url = base_url.trim_end_matches('/').to_string();

        reqwest::Url::parse(&base_url)
            .map_err(|e| ChatError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(
                Duration::from_secs(60),
                Duration::from_secs(5),
            )?),
        };

        Ok(ChatClient {
            transport,
            sleeper: self.sleeper.unwrap_or_else(|| Arc::new(ThreadSleeper)),
            base_url,
            api_key,
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        })
    }
}

/// Chat-completion client.
///
/// Rate-limited attempts (HTTP 429) are retried with exponential backoff;
/// every other failure ends the call. It should be constructed using
/// `ChatClientBuilder`.
pub struct ChatClient {
    transport: Arc<dyn ChatTransport>,
    sleeper: Arc<dyn Sleeper>,
    base_url: String,
    api_key: String,
    max_retries: u32,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl ChatClient {
    /// Returns the base URL configured for this client.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the number of attempts made before giving up on 429s.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Performs a single attempt and maps the reply onto the error taxonomy.
    fn attempt(&self, url: &str, body: &serde_json::Value) -> Result<String, ChatError> {
        let reply = self.transport.post_json(url, &self.api_key, body)?;
        match reply.status {
            429 => Err(ChatError::RateLimited),
            200..=299 => extract_content(&reply),
            status => Err(ChatError::Http {
                status,
                message: error_message(&reply.body),
            }),
        }
    }
}

impl ChatClientTrait for ChatClient {
    fn call_api(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<String, ChatError> {
        let url = self.endpoint();
        let body = serde_json::to_value(request.to_body()).map_err(ChatError::Serialization)?;

        tracing::debug!(model = %request.model, url = %url, "sending chat completion request");
        retry_on_rate_limit(self.max_retries, cancel, self.sleeper.as_ref(), || {
            self.attempt(&url, &body)
        })
    }
}

/// Returns the delay before retrying after the given 0-based attempt.
///
/// `2^attempt × 2000 ms`: 2 s, 4 s, 8 s, 16 s, ...
pub fn backoff_delay(attempt: u32) -> Duration {
    BASE_BACKOFF.saturating_mul(2u32.saturating_pow(attempt))
}

/// Runs `f` until it stops reporting [`ChatError::RateLimited`].
///
/// At most `max_retries` attempts are made. `cancel` is checked before each
/// one, and a rate-limited attempt is followed by [`backoff_delay`] unless it
/// was the last. No sleep follows the final attempt: with the default five
/// attempts the longest total wait is 2 + 4 + 8 + 16 = 30 s, not the 62 s a
/// sleep after every attempt would add up to.
///
/// An attempt already in flight when `cancel` fires is not interrupted, but
/// its reply is discarded.
///
/// # Errors
///
/// - [`ChatError::Aborted`] if `cancel` fired before or during an attempt
/// - [`ChatError::MaxRetries`] if every attempt was rate limited
/// - the first non-rate-limit error returned by `f`
pub fn retry_on_rate_limit<F, T>(
    max_retries: u32,
    cancel: &CancellationToken,
    sleeper: &dyn Sleeper,
    mut f: F,
) -> Result<T, ChatError>
where
    F: FnMut() -> Result<T, ChatError>,
{
    for attempt in 0..max_retries {
        if cancel.is_cancelled() {
            return Err(ChatError::Aborted);
        }

        match f() {
            Err(error) if should_retry(&error) => {
                if attempt + 1 < max_retries {
                    let delay = backoff_delay(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    sleeper.sleep(delay, cancel);
                }
            }
            Ok(_) if cancel.is_cancelled() => return Err(ChatError::Aborted),
            other => return other,
        }
    }

    Err(ChatError::MaxRetries {
        attempts: max_retries,
    })
}

/// Only rate limiting is retried; everything else fails the call at once.
fn should_retry(error: &ChatError) -> bool {
    matches!(error, ChatError::RateLimited)
}

fn extract_content(reply: &HttpReply) -> Result<String, ChatError> {
    let parsed: ChatCompletionResponse =
        serde_json::from_str(&reply.body).map_err(ChatError::Serialization)?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| ChatError::Api {
            message: "Missing 'choices[0].message.content' in API response".to_string(),
        })
}

/// Pulls `error.message` out of an API error body, falling back to the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            json.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Transport returning scripted replies and recording every request.
    #[derive(Default)]
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<HttpReply, ChatError>>>,
        requests: Mutex<Vec<(String, String, serde_json::Value)>>,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<HttpReply, ChatError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    impl ChatTransport for ScriptedTransport {
        fn post_json(
            &self,
            url: &str,
            api_key: &str,
            body: &serde_json::Value,
        ) -> Result<HttpReply, ChatError> {
            self.requests
                .lock()
                .unwrap()
                .push((url.to_string(), api_key.to_string(), body.clone()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(HttpReply::new(429, "")))
        }
    }

    /// Sleeper that records requested delays instead of sleeping.
    #[derive(Default)]
    struct RecordingSleeper {
        delays: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        fn total(&self) -> Duration {
            self.delays.lock().unwrap().iter().sum()
        }
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration, _cancel: &CancellationToken) {
            self.delays.lock().unwrap().push(duration);
        }
    }

    fn success(content: &str) -> Result<HttpReply, ChatError> {
        let body = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        });
        Ok(HttpReply::new(200, body.to_string()))
    }

    fn rate_limited() -> Result<HttpReply, ChatError> {
        Ok(HttpReply::new(429, r#"{"error":{"message":"Rate limit reached"}}"#))
    }

    fn network_error() -> ChatError {
        ChatError::Network(
            reqwest::blocking::Client::new()
                .get("not-a-valid-url")
                .build()
                .unwrap_err(),
        )
    }

    fn client_with(
        transport: Arc<ScriptedTransport>,
        sleeper: Arc<RecordingSleeper>,
    ) -> ChatClient {
        ChatClientBuilder::new()
            .api_key("sk-test")
            .base_url("https://api.example.com/v1")
            .transport(transport)
            .sleeper(sleeper)
            .build()
            .unwrap()
    }

    fn request() -> ChatRequest {
        ChatRequest::new("You are a bot", "Classify this", "gpt-test", 150)
    }

    #[test]
    fn success_returns_first_choice_content_verbatim() {
        let transport = ScriptedTransport::new(vec![success(r#"[{"reliability":0.9}]"#)]);
        let sleeper = Arc::new(RecordingSleeper::default());
        let client = client_with(transport.clone(), sleeper.clone());

        let content = client.call_api(&request(), &CancellationToken::new()).unwrap();

        assert_eq!(content, r#"[{"reliability":0.9}]"#);
        assert_eq!(transport.call_count(), 1);
        assert_eq!(sleeper.total(), Duration::ZERO);
    }

    #[test]
    fn request_body_has_expected_fields() {
        let transport = ScriptedTransport::new(vec![success("ok")]);
        let client = client_with(transport.clone(), Arc::new(RecordingSleeper::default()));

        client.call_api(&request(), &CancellationToken::new()).unwrap();

        let requests = transport.requests.lock().unwrap();
        let (url, api_key, body) = &requests[0];
        assert_eq!(url, "https://api.example.com/v1/chat/completions");
        assert_eq!(api_key, "sk-test");
        assert_eq!(body["model"], "gpt-test");
        assert_eq!(body["max_tokens"], 150);
        assert_eq!(body["n"], 1);
        assert!(body["stop"].is_null());
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["top_p"].as_f64().map(|v| (v * 100.0).round()), Some(95.0));
        assert_eq!(body["frequency_penalty"], 0.0);
        assert_eq!(body["presence_penalty"], 0.5);

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[0]["content"], "You are a bot");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[1]["content"], "Classify this");
    }

    #[test]
    fn rate_limit_then_success_sleeps_with_exponential_backoff() {
        for k in 1..DEFAULT_MAX_RETRIES {
            let mut replies: Vec<_> = (0..k).map(|_| rate_limited()).collect();
            replies.push(success("done"));
            let transport = ScriptedTransport::new(replies);
            let sleeper = Arc::new(RecordingSleeper::default());
            let client = client_with(transport.clone(), sleeper.clone());

            let content = client.call_api(&request(), &CancellationToken::new()).unwrap();

            let expected: u64 = (0..k).map(|i| 2u64.pow(i) * 2000).sum();
            assert_eq!(content, "done");
            assert_eq!(sleeper.total(), Duration::from_millis(expected));
            assert_eq!(transport.call_count(), k as usize + 1);
        }
    }

    #[test]
    fn always_rate_limited_fails_after_max_retries_attempts() {
        let transport = ScriptedTransport::new(Vec::new());
        let sleeper = Arc::new(RecordingSleeper::default());
        let client = client_with(transport.clone(), sleeper.clone());

        let result = client.call_api(&request(), &CancellationToken::new());

        assert!(matches!(
            result,
            Err(ChatError::MaxRetries { attempts: DEFAULT_MAX_RETRIES })
        ));
        assert_eq!(transport.call_count(), DEFAULT_MAX_RETRIES as usize);
        let delays = sleeper.delays.lock().unwrap().clone();
        assert_eq!(delays.len(), 4);
        assert_eq!(delays.iter().sum::<Duration>(), Duration::from_secs(30));
    }

    #[test]
    fn cancelled_before_first_attempt_sends_nothing() {
        let transport = ScriptedTransport::new(vec![success("never")]);
        let client = client_with(transport.clone(), Arc::new(RecordingSleeper::default()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = client.call_api(&request(), &cancel);

        assert!(matches!(result, Err(ChatError::Aborted)));
        assert_eq!(transport.call_count(), 0);
    }

    #[test]
    fn cancellation_during_backoff_stops_before_next_attempt() {
        struct CancellingSleeper;
        impl Sleeper for CancellingSleeper {
            fn sleep(&self, _duration: Duration, cancel: &CancellationToken) {
                cancel.cancel();
            }
        }

        let transport = ScriptedTransport::new(vec![rate_limited(), success("late")]);
        let client = ChatClientBuilder::new()
            .api_key("sk-test")
            .base_url("https://api.example.com/v1")
            .transport(transport.clone())
            .sleeper(Arc::new(CancellingSleeper))
            .build()
            .unwrap();

        let result = client.call_api(&request(), &CancellationToken::new());

        assert!(matches!(result, Err(ChatError::Aborted)));
        assert_eq!(transport.call_count(), 1);
    }

    #[test]
    fn reply_arriving_after_cancellation_is_discarded() {
        struct CancelInFlight {
            cancel: CancellationToken,
        }
        impl ChatTransport for CancelInFlight {
            fn post_json(
                &self,
                _url: &str,
                _api_key: &str,
                _body: &serde_json::Value,
            ) -> Result<HttpReply, ChatError> {
                self.cancel.cancel();
                success(r#"[{"reliability":0.9,"output":"Late"}]"#)
            }
        }

        let cancel = CancellationToken::new();
        let client = ChatClientBuilder::new()
            .api_key("sk-test")
            .base_url("https://api.example.com/v1")
            .transport(Arc::new(CancelInFlight {
                cancel: cancel.clone(),
            }))
            .sleeper(Arc::new(RecordingSleeper::default()))
            .build()
            .unwrap();

        let result = client.call_api(&request(), &cancel);

        assert!(matches!(result, Err(ChatError::Aborted)));
    }

    #[test]
    fn server_error_is_not_retried() {
        let transport = ScriptedTransport::new(vec![
            Ok(HttpReply::new(500, r#"{"error":{"message":"boom"}}"#)),
            success("unreached"),
        ]);
        let sleeper = Arc::new(RecordingSleeper::default());
        let client = client_with(transport.clone(), sleeper.clone());

        let result = client.call_api(&request(), &CancellationToken::new());

        match result {
            Err(ChatError::Http { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("expected Http error, got {other:?}"),
        }
        assert_eq!(transport.call_count(), 1);
        assert_eq!(sleeper.total(), Duration::ZERO);
    }

    #[test]
    fn network_error_is_not_retried() {
        let transport = ScriptedTransport::new(vec![Err(network_error()), success("unreached")]);
        let client = client_with(transport.clone(), Arc::new(RecordingSleeper::default()));

        let result = client.call_api(&request(), &CancellationToken::new());

        assert!(matches!(result, Err(ChatError::Network(_))));
        assert_eq!(transport.call_count(), 1);
    }

    #[test]
    fn malformed_success_body_is_serialization_error() {
        let transport = ScriptedTransport::new(vec![Ok(HttpReply::new(200, "<html>oops</html>"))]);
        let client = client_with(transport, Arc::new(RecordingSleeper::default()));

        let result = client.call_api(&request(), &CancellationToken::new());
        assert!(matches!(result, Err(ChatError::Serialization(_))));
    }

    #[test]
    fn missing_content_is_api_error() {
        let transport = ScriptedTransport::new(vec![Ok(HttpReply::new(200, r#"{"choices":[]}"#))]);
        let client = client_with(transport, Arc::new(RecordingSleeper::default()));

        let result = client.call_api(&request(), &CancellationToken::new());
        assert!(matches!(result, Err(ChatError::Api { .. })));
    }

    #[test]
    fn backoff_delay_doubles_from_two_seconds() {
        assert_eq!(backoff_delay(0), Duration::from_millis(2000));
        assert_eq!(backoff_delay(1), Duration::from_millis(4000));
        assert_eq!(backoff_delay(4), Duration::from_millis(32000));
    }

    #[test]
    fn retry_helper_with_zero_attempts_never_calls() {
        let mut calls = 0;
        let result: Result<(), ChatError> = retry_on_rate_limit(
            0,
            &CancellationToken::new(),
            &RecordingSleeper::default(),
            || {
                calls += 1;
                Ok(())
            },
        );

        assert!(matches!(result, Err(ChatError::MaxRetries { attempts: 0 })));
        assert_eq!(calls, 0);
    }

    #[test]
    fn build_fails_without_api_key() {
        let result = ChatClientBuilder::new().base_url(DEFAULT_BASE_URL).build();
        assert!(matches!(result, Err(ChatError::MissingApiKey)));

        let result = ChatClientBuilder::new()
            .api_key("   ")
            .base_url(DEFAULT_BASE_URL)
            .build();
        assert!(matches!(result, Err(ChatError::MissingApiKey)));
    }

    #[test]
    fn build_returns_error_if_invalid_url_provided() {
        let result = ChatClientBuilder::new()
            .api_key("sk-test")
            .base_url("not-a-valid-url")
            .build();
        assert!(matches!(result, Err(ChatError::InvalidUrl(_))));
    }

    #[test]
    fn build_trims_trailing_slash() {
        let client = ChatClientBuilder::new()
            .api_key("sk-test")
            .base_url("http://localhost:8080/v1/")
            .build()
            .unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080/v1");
    }

    #[test]
    #[serial]
    fn build_uses_default_url_when_base_url_not_called() {
        unsafe {
            std::env::remove_var(BASE_URL_ENV);
        }

        let client = ChatClientBuilder::new().api_key("sk-test").build().unwrap();
        assert_eq!(client.base_url(), DEFAULT_BASE_URL);
        assert_eq!(client.max_retries(), DEFAULT_MAX_RETRIES);
    }

    #[test]
    #[serial]
    fn build_reads_base_url_environment_variable_if_set() {
        unsafe {
            std::env::set_var(BASE_URL_ENV, "http://proxy.local:4000/v1");
        }

        let client = ChatClientBuilder::new().api_key("sk-test").build().unwrap();
        assert_eq!(client.base_url(), "http://proxy.local:4000/v1");

        // Builder value takes precedence over the environment
        let client = ChatClientBuilder::new()
            .api_key("sk-test")
            .base_url("http://builder.local/v1")
            .build()
            .unwrap();
        assert_eq!(client.base_url(), "http://builder.local/v1");

        unsafe {
            std::env::remove_var(BASE_URL_ENV);
        }
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let client = ChatClientBuilder::new()
            .api_key("sk-very-secret")
            .base_url(DEFAULT_BASE_URL)
            .build()
            .unwrap();

        let debug = format!("{client:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn error_message_falls_back_to_raw_body() {
        assert_eq!(error_message(r#"{"error":{"message":"bad key"}}"#), "bad key");
        assert_eq!(error_message("plain failure"), "plain failure");
    }

    #[test]
    fn error_display_is_user_friendly() {
        assert_eq!(
            ChatError::MaxRetries { attempts: 5 }.to_string(),
            "Max retries reached after 5 attempts"
        );
        assert_eq!(ChatError::Aborted.to_string(), "Request aborted");
        assert!(
            ChatError::Http {
                status: 401,
                message: "bad key".to_string()
            }
            .to_string()
            .contains("401")
        );
    }
}
