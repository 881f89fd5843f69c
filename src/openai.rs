//! OpenAI-compatible chat-completion client module.
//!
//! This module provides a blocking HTTP client for the `/chat/completions`
//! endpoint, including error handling, rate-limit backoff and cancellation.

mod client;
mod transport;

pub use client::{
    BASE_BACKOFF, BASE_URL_ENV, ChatClient, ChatClientBuilder, ChatClientTrait, ChatError,
    ChatRequest, DEFAULT_BASE_URL, DEFAULT_MAX_RETRIES, SamplingParams, backoff_delay,
    retry_on_rate_limit,
};
pub use transport::{ChatTransport, HttpReply, HttpTransport, Sleeper, ThreadSleeper};
