//! Cooperative cancellation for classification runs.
//!
//! A [`CancellationToken`] is handed explicitly to every operation that can
//! suspend (HTTP attempts, backoff sleeps, per-file iteration). The
//! [`AbortController`] owns the token of the current command and swaps in a
//! fresh one after each abort, so the next command never starts cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Shared cancellation flag.
///
/// Clones observe the same flag. Cancelling is one-way: a cancelled token
/// stays cancelled for its whole lifetime.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the token (and every clone of it) as cancelled.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Hands out the token for the current command and replaces it on abort.
#[derive(Debug, Default)]
pub struct AbortController {
    current: Mutex<CancellationToken>,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a clone of the token the next (or running) command should use.
    pub fn token(&self) -> CancellationToken {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cancels the running command and installs a fresh token.
    ///
    /// Holders of the old token see the cancellation; callers of
    /// [`token`](Self::token) afterwards get an uncancelled one.
    pub fn abort(&self) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        current.cancel();
        *current = CancellationToken::new();
    }
}
