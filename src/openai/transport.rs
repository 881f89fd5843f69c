//! HTTP and timing seams used by the chat-completion client.
//!
//! `ChatTransport` performs one POST and reports the raw status and body;
//! `Sleeper` waits between attempts. Both are traits so the retry policy in
//! `client.rs` can be driven by scripted replies and a recording clock.

use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

use super::client::ChatError;
use crate::cancel::CancellationToken;

/// Status and body of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Sends a JSON body to a URL with bearer authentication.
pub trait ChatTransport: Send + Sync {
    /// Posts `body` to `url`.
    ///
    /// Returns the reply whatever its status; only failures to complete the
    /// exchange (connection, timeout, unreadable body) are errors.
    fn post_json(&self, url: &str, api_key: &str, body: &Value) -> Result<HttpReply, ChatError>;
}

/// Blocking reqwest transport.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Creates a transport with the given request and connect timeouts.
    ///
    /// # Errors
    ///
    /// Returns `ChatError::Network` if the underlying client cannot be built.
    pub fn new(timeout: Duration, connect_timeout: Duration) -> Result<Self, ChatError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(ChatError::Network)?;
        Ok(Self { client })
    }
}

impl ChatTransport for HttpTransport {
    fn post_json(&self, url: &str, api_key: &str, body: &Value) -> Result<HttpReply, ChatError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        let body = response.text().map_err(classify_reqwest_error)?;
        Ok(HttpReply { status, body })
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> ChatError {
    if error.is_timeout() {
        ChatError::Timeout(error)
    } else {
        ChatError::Network(error)
    }
}

/// Waits between retry attempts.
pub trait Sleeper: Send + Sync {
    /// Blocks the calling thread for `duration`, or less if `cancel` fires.
    fn sleep(&self, duration: Duration, cancel: &CancellationToken);
}

/// Sleeps on the current thread in short slices, waking early on cancellation.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

const SLEEP_SLICE: Duration = Duration::from_millis(100);

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration, cancel: &CancellationToken) {
        let deadline = Instant::now() + duration;
        while !cancel.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}
