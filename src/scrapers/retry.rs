//! Retry decorator for page acquisition with exponential backoff.
//!
//! # Retry Strategy
//!
//! - Only transient failures are retried (network errors, timeouts, HTTP 429
//!   and 5xx); a 404 or a malformed URL fails immediately
//! - Exponential backoff starting at `base_delay`
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms by default) added to prevent thundering herd
//! - Optional per-attempt timeout: a hung attempt becomes a transient
//!   [`AcquisitionError::Timeout`] and is retried like any other
//!
//! [`RetryAcquirer::page_budget`] is the longest one `fetch()` can take, so
//! an outer per-page deadline set to it never cuts retries short.

use crate::errors::AcquisitionError;
use crate::scrapers::{Page, PageAcquirer, PageRequest};
use rand::{Rng, rng};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{error, instrument, warn};

/// Wrapper that adds exponential backoff retry logic to any [`PageAcquirer`].
///
/// The delay between retries follows this formula:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..max_jitter)
/// ```
pub struct RetryAcquirer<A> {
    inner: A,
    max_retries: usize,
    base_delay: Duration,
    max_delay: Duration,
    max_jitter: Duration,
    attempt_timeout: Option<Duration>,
}

impl<A> RetryAcquirer<A>
where
    A: PageAcquirer,
{
    /// Wrap `inner`, retrying each page up to `max_retries` extra times.
    pub fn new(inner: A, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_millis(250),
            attempt_timeout: None,
        }
    }

    /// Give up on a single attempt after `limit`.
    pub fn with_attempt_timeout(mut self, limit: Duration) -> Self {
        self.attempt_timeout = Some(limit);
        self
    }

    /// Worst case for one `fetch()`: every attempt running to its timeout plus
    /// every backoff at maximum jitter. `None` without an attempt timeout.
    pub fn page_budget(&self) -> Option<Duration> {
        let per_attempt = self.attempt_timeout?;
        let attempts = u32::try_from(self.max_retries.saturating_add(1)).unwrap_or(u32::MAX);
        let backoff = (1..=self.max_retries)
            .map(|attempt| self.backoff_for(attempt) + self.max_jitter)
            .fold(Duration::ZERO, Duration::saturating_add);
        Some(per_attempt.saturating_mul(attempts).saturating_add(backoff))
    }

    fn backoff_for(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        self.base_delay.saturating_mul(1u32 << exponent).min(self.max_delay)
    }

    async fn fetch_once(&self, request: &PageRequest) -> Result<Option<Page>, AcquisitionError> {
        match self.attempt_timeout {
            Some(limit) => timeout(limit, self.inner.fetch(request))
                .await
                .unwrap_or_else(|_| {
                    Err(AcquisitionError::Timeout {
                        page: request.number,
                        timeout: limit,
                    })
                }),
            None => self.inner.fetch(request).await,
        }
    }

    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let delay = self.backoff_for(attempt);
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter_ms: u64 = if jitter_ms == 0 { 0 } else { rng().random_range(0..=jitter_ms) };
        delay + Duration::from_millis(jitter_ms)
    }
}

impl<A> fmt::Debug for RetryAcquirer<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAcquirer")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish()
    }
}

impl<A> PageAcquirer for RetryAcquirer<A>
where
    A: PageAcquirer,
{
    #[instrument(level = "info", skip_all, fields(page = request.number))]
    async fn fetch(&self, request: &PageRequest) -> Result<Option<Page>, AcquisitionError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.fetch_once(request).await {
                Ok(page) => return Ok(page),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if !e.is_transient() || attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            transient = e.is_transient(),
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "fetch() giving up"
                        );
                        return Err(e);
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "fetch() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}
