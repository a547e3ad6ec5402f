// src/pipeline/fetcher.rs

//! Rate-limited fetch mediation.
//!
//! All adapter calls go through [`RateLimitedFetcher`], which enforces a
//! per-source minimum interval between requests and retries retryable
//! failures with bounded exponential backoff. Once the retry budget is
//! spent the last error is escalated to `SourceExhausted`, which the
//! orchestrator treats as "source done, partial dataset".
//!
//! Time is reached through the [`Clock`] trait so the backoff schedule is
//! assertable in tests without real delays.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{FetcherConfig, SourceKind};

/// Monotonic time source, injectable for tests.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Time elapsed since an arbitrary fixed epoch.
    fn now(&self) -> Duration;

    /// Suspend the calling task for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Production clock backed by `tokio::time`.
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Per-source timing state. The fetcher owns no business data.
#[derive(Debug, Default, Clone)]
struct SourceTiming {
    last_call: Option<Duration>,
    consecutive_failures: u32,
}

/// Throttles and retries adapter calls, one budget per source.
pub struct RateLimitedFetcher {
    min_interval: Duration,
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    clock: Arc<dyn Clock>,
    timing: Mutex<HashMap<SourceKind, SourceTiming>>,
}

impl RateLimitedFetcher {
    pub fn new(config: &FetcherConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(config: &FetcherConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            min_interval: Duration::from_millis(config.min_interval_ms),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts.max(1),
            clock,
            timing: Mutex::new(HashMap::new()),
        }
    }

    /// Run one adapter operation under this source's budget.
    ///
    /// Retryable errors (`RateLimited`, `TransientNetwork`) are retried with
    /// the same cursor up to the attempt budget; all other errors pass
    /// through unchanged.
    pub async fn call<T, F, Fut>(&self, source: SourceKind, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let mut attempt: u32 = 0;
        loop {
            self.throttle(source).await;

            match operation().await {
                Ok(value) => {
                    self.record_success(source).await;
                    return Ok(value);
                }
                Err(error) if error.is_retryable() => {
                    attempt += 1;
                    let failures = self.record_failure(source).await;

                    if attempt >= self.max_attempts {
                        log::error!(
                            "{}: retry budget spent after {} attempts ({} consecutive failures): {}",
                            source,
                            attempt,
                            failures,
                            error
                        );
                        return Err(AppError::exhausted(source, error));
                    }

                    let delay = self.backoff_delay(source, attempt - 1);
                    log::warn!(
                        "{}: attempt {}/{} failed ({}), backing off {:?}",
                        source,
                        attempt,
                        self.max_attempts,
                        error,
                        delay
                    );
                    self.clock.sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Wait until this source's minimum request interval has passed.
    async fn throttle(&self, source: SourceKind) {
        let wait = {
            let mut timing = self.timing.lock().await;
            let entry = timing.entry(source).or_default();
            let now = self.clock.now();
            let wait = match entry.last_call {
                Some(last) if now < last + self.min_interval => last + self.min_interval - now,
                _ => Duration::ZERO,
            };
            entry.last_call = Some(now + wait);
            wait
        };

        if !wait.is_zero() {
            self.clock.sleep(wait).await;
        }
    }

    async fn record_success(&self, source: SourceKind) {
        let mut timing = self.timing.lock().await;
        timing.entry(source).or_default().consecutive_failures = 0;
    }

    async fn record_failure(&self, source: SourceKind) -> u32 {
        let mut timing = self.timing.lock().await;
        let entry = timing.entry(source).or_default();
        entry.consecutive_failures += 1;
        entry.consecutive_failures
    }

    /// Backoff delay for a zero-based attempt: `base * 2^attempt`, capped,
    /// plus a jitter strictly below one base step.
    fn backoff_delay(&self, source: SourceKind, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        exp + self.jitter(source, attempt)
    }

    /// Deterministic jitter in `[0, base_delay)`, derived from a digest so
    /// concurrent sources spread out without sharing an RNG and so runs
    /// stay reproducible.
    fn jitter(&self, source: SourceKind, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        if base_ms == 0 {
            return Duration::ZERO;
        }

        let digest = Sha256::digest(format!("{source}:{attempt}"));
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        Duration::from_millis(u64::from_be_bytes(bytes) % base_ms)
    }
}
