use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

/// Upper bound of a single backoff delay, whatever the base delay and attempt.
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);

pub(crate) const DEFAULT_ATTEMPTS: u32 = 5;
pub(crate) const DEFAULT_DELAY: Duration = Duration::from_millis(1000);

/// Notifications emitted while [`RetryPolicy::execute`] runs.
///
/// `attempts` is the number of failed attempts before the current one.
pub trait RetryHooks<E> {
    fn on_fail(&self, _error: &E, _attempts: u32) {}

    fn on_reconnect(&self, _attempts: u32) {}

    fn on_exhausted(&self, _error: &E, _attempts: u32) {}
}

impl<E> RetryHooks<E> for () {}

/// Exponential backoff with jitter around operations failing with transient errors.
///
/// An error is transient when its message contains one of the configured
/// fragments, ignoring case. Anything else is returned on the first failure.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    limit: u32,
    delay: Duration,
    messages: Arc<[String]>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ATTEMPTS, DEFAULT_DELAY, Vec::<String>::new())
    }
}

impl RetryPolicy {
    pub fn new<I, S>(limit: u32, delay: Duration, messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            limit,
            delay,
            messages: messages
                .into_iter()
                .map(|message| message.as_ref().to_lowercase())
                .filter(|message| !message.is_empty())
                .collect(),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn is_retryable(&self, message: &str) -> bool {
        let message = message.to_lowercase();
        self.messages
            .iter()
            .any(|fragment| message.contains(fragment.as_str()))
    }

    /// Delay before the 1-based `attempt`, with a random jitter of up to half the base delay.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_millis();
        let jitter = rand::rng().random_range(0..=base / 2);
        self.backoff_with_jitter(attempt, jitter)
    }

    pub(crate) fn backoff_with_jitter(&self, attempt: u32, jitter_millis: u64) -> Duration {
        let exponential = self
            .base_millis()
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        Duration::from_millis(exponential.saturating_add(jitter_millis)).min(MAX_BACKOFF)
    }

    fn base_millis(&self) -> u64 {
        u64::try_from(self.delay.as_millis()).unwrap_or(u64::MAX)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or fails once more after `limit` retries.
    ///
    /// The exhausting failure fires `on_fail` and then `on_exhausted`.
    /// The error returned is always the one produced by the last attempt.
    pub async fn execute<T, E, F, Fut, H>(&self, mut operation: F, hooks: &H) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        H: RetryHooks<E> + ?Sized,
    {
        let mut attempts = 0;

        loop {
            match operation().await {
                Ok(result) => {
                    if attempts > 0 {
                        hooks.on_reconnect(attempts);
                    }
                    return Ok(result);
                }
                Err(error) => {
                    if !self.is_retryable(&error.to_string()) {
                        return Err(error);
                    }

                    hooks.on_fail(&error, attempts);
                    if attempts >= self.limit {
                        hooks.on_exhausted(&error, attempts);
                        return Err(error);
                    }

                    attempts += 1;
                    tokio::time::sleep(self.backoff(attempts)).await;
                }
            }
        }
    }
}
