/// Resilience patterns for the CDC consumer
///
/// Provides the bounded retry primitive used to re-run message processing:
/// - **Retry**: at most `max_attempts` sequential attempts, optional backoff with jitter
///
/// # Example
///
/// ```rust,no_run
/// use resilience::{with_retry, RetryConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let config = RetryConfig::new(3);
///
///     let result = with_retry(&config, |attempt| async move {
///         // Your fallible operation here
///         if attempt < 2 { Err("not yet") } else { Ok(attempt) }
///     }).await;
/// }
/// ```

pub mod retry;

pub use retry::{with_retry, RetryConfig, RetryError};
