/// Bounded sequential retry with optional backoff and jitter
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay between attempts; zero retries immediately
    pub backoff: Duration,
    /// Add random jitter to backoff (±30%)
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::ZERO,
            jitter: false,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, backoff: Duration, jitter: bool) -> Self {
        self.backoff = backoff;
        self.jitter = jitter;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("Gave up after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: E },
    #[error("Retry policy allows no attempts")]
    NoAttempts,
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::NoAttempts => 0,
        }
    }
}

/// Run `f` until it succeeds or `max_attempts` attempts have failed.
///
/// Attempts run strictly one after another; the closure receives the 1-based
/// attempt number. The next attempt is never started before the previous
/// future has resolved.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut f: F) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut last_error = None;

    for attempt in 1..=config.max_attempts {
        match f(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                warn!(
                    attempt,
                    max_attempts = config.max_attempts,
                    error = %e,
                    "Error on attempt {}/{}",
                    attempt,
                    config.max_attempts
                );
                last_error = Some(e);

                if attempt < config.max_attempts && !config.backoff.is_zero() {
                    tokio::time::sleep(calculate_backoff(config.backoff, config.jitter)).await;
                }
            }
        }
    }

    match last_error {
        Some(last_error) => Err(RetryError::Exhausted {
            attempts: config.max_attempts,
            last_error,
        }),
        None => Err(RetryError::NoAttempts),
    }
}

fn calculate_backoff(base: Duration, jitter: bool) -> Duration {
    if jitter {
        let jitter_factor = 1.0 + rand::thread_rng().gen_range(-0.3..0.3); // ±30%
        Duration::from_millis((base.as_millis() as f64 * jitter_factor) as u64)
    } else {
        base
    }
}
