//! Configuration for the sync engine.

use crate::error::{EngineResult, SyncError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a pass does when another pass for the same pair is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrentPassPolicy {
    /// Wait for the running pass to finish.
    #[default]
    Block,
    /// Fail immediately with `SyncError::PassInProgress`.
    Reject,
}

/// Configuration for sync passes.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Size of the worker pool used to fetch document projections.
    /// `None` uses rayon's default (one per CPU).
    pub fetch_workers: Option<usize>,
    /// Default timeout for a whole pass. `None` means unbounded.
    pub timeout: Option<Duration>,
    /// Behavior on contention for a (store, target) pair.
    pub concurrent_pass: ConcurrentPassPolicy,
    /// How often a failed transactional batch is retried before the pass aborts.
    pub transactional_retries: u32,
    /// Advance the watermark even if some operations failed on a
    /// non-transactional target. Failed operations are then not retried
    /// until the documents change again.
    pub advance_on_partial_failure: bool,
}

impl SyncConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self {
            fetch_workers: None,
            timeout: None,
            concurrent_pass: ConcurrentPassPolicy::Block,
            transactional_retries: 1,
            advance_on_partial_failure: false,
        }
    }

    /// Sets the fetch pool size.
    pub fn with_fetch_workers(mut self, workers: usize) -> Self {
        self.fetch_workers = Some(workers);
        self
    }

    /// Sets the default pass timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the contention policy.
    pub fn with_concurrent_pass(mut self, policy: ConcurrentPassPolicy) -> Self {
        self.concurrent_pass = policy;
        self
    }

    /// Sets the number of transactional retries.
    pub fn with_transactional_retries(mut self, retries: u32) -> Self {
        self.transactional_retries = retries;
        self
    }

    /// Sets whether partial failures still advance the watermark.
    pub fn with_advance_on_partial_failure(mut self, advance: bool) -> Self {
        self.advance_on_partial_failure = advance;
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Config` for a zero-sized fetch pool or a zero timeout.
    pub fn validate(&self) -> EngineResult<()> {
        if self.fetch_workers == Some(0) {
            return Err(SyncError::Config("fetch_workers must be at least 1".into()));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(SyncError::Config("timeout must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Cooperative cancellation flag shared between a caller and a pass.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of every pass holding this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Clears a previous cancellation.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Returns true once `cancel` was called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-call options for a pass.
#[derive(Debug, Clone, Default)]
pub struct PassOptions {
    /// Timeout for this pass, overriding `SyncConfig::timeout`.
    pub timeout: Option<Duration>,
    /// Cancellation token checked between phases and operations.
    pub cancel: Option<CancelToken>,
}

impl PassOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the cancellation token.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Deadline and cancellation state of one running pass.
#[derive(Debug, Clone)]
pub(crate) struct PassContext {
    deadline: Option<Instant>,
    cancel: Vec<CancelToken>,
}

impl PassContext {
    pub(crate) fn new(timeout: Option<Duration>, cancel: Option<CancelToken>) -> Self {
        Self {
            deadline: timeout.map(|t| Instant::now() + t),
            cancel: cancel.into_iter().collect(),
        }
    }

    /// Adds another token that cancels this pass.
    pub(crate) fn cancelled_by(mut self, token: CancelToken) -> Self {
        self.cancel.push(token);
        self
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fails if the pass was cancelled or ran past its deadline.
    pub(crate) fn check(&self) -> EngineResult<()> {
        if self.cancel.iter().any(CancelToken::is_cancelled) {
            return Err(SyncError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(SyncError::Timeout);
        }
        Ok(())
    }
}
