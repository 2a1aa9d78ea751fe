use futures::FutureExt;
use resilience::{with_retry, RetryConfig};
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::processor::MessageHandler;
use super::transport::{CdcTransport, RawMessage};
use crate::config::CdcConsumerConfig;
use crate::error::{AppError, Result};
use crate::metrics::CdcConsumerMetrics;

/// Threshold for consecutive errors before marking consumer as unhealthy
const UNHEALTHY_ERROR_THRESHOLD: u32 = 5;

/// Threshold for consecutive errors before emitting critical warning
const CRITICAL_ERROR_THRESHOLD: u32 = 10;

/// How a delivered message was resolved. Every variant is followed by
/// exactly one commit of the message's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Processed { attempts: u32 },
    /// Every attempt failed; the message is skipped.
    Exhausted { attempts: u32 },
    /// Empty or tombstone payload; the handler is not invoked.
    SkippedEmpty,
}

/// Poll error tracking for the consumer loop
#[derive(Debug)]
pub struct ConsumerErrorState {
    consecutive_count: u32,
    last_success: Instant,
}

impl ConsumerErrorState {
    pub fn new() -> Self {
        Self {
            consecutive_count: 0,
            last_success: Instant::now(),
        }
    }

    /// Record a successful poll, resetting error count
    pub fn record_success(&mut self) {
        self.consecutive_count = 0;
        self.last_success = Instant::now();
    }

    /// Record an error, returning the consecutive count
    pub fn record_error(&mut self) -> u32 {
        self.consecutive_count = self.consecutive_count.saturating_add(1);
        self.consecutive_count
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_count
    }

    pub fn time_since_success(&self) -> Duration {
        self.last_success.elapsed()
    }

    /// Exponential backoff: 2^(errors-1) seconds, capped at 60s
    pub fn calculate_backoff(&self) -> Duration {
        const MIN_BACKOFF_SECS: u64 = 1;
        const MAX_BACKOFF_SECS: u64 = 60;

        if self.consecutive_count == 0 {
            return Duration::from_secs(MIN_BACKOFF_SECS);
        }

        let backoff_secs = 2u64
            .saturating_pow(self.consecutive_count.saturating_sub(1))
            .min(MAX_BACKOFF_SECS);
        Duration::from_secs(backoff_secs)
    }

    /// Unhealthy after too many consecutive errors, or errors with no
    /// success for more than 5 minutes
    pub fn is_healthy(&self) -> bool {
        if self.consecutive_count >= UNHEALTHY_ERROR_THRESHOLD {
            return false;
        }
        !(self.consecutive_count > 0 && self.time_since_success() > Duration::from_secs(300))
    }
}

impl Default for ConsumerErrorState {
    fn default() -> Self {
        Self::new()
    }
}

/// CDC consumer loop
///
/// Pulls one message at a time from the transport, runs the handler up to
/// `max_retries` times, then commits the message's position whether or not
/// an attempt succeeded. A message that never succeeds is logged and skipped
/// so that it cannot block the partition: delivery is at-least-once for
/// messages that eventually succeed and at-most-once for poison messages.
///
/// Messages are handled strictly in delivery order and the next message is
/// not requested until the current one has been committed.
pub struct CdcConsumer<T, H> {
    transport: T,
    handler: H,
    topic: String,
    retry: RetryConfig,
    metrics: CdcConsumerMetrics,
    error_state: ConsumerErrorState,
    shutdown_rx: watch::Receiver<bool>,
}

impl<T, H> CdcConsumer<T, H>
where
    T: CdcTransport,
    H: MessageHandler,
{
    pub fn new(
        transport: T,
        handler: H,
        config: &CdcConsumerConfig,
        metrics: CdcConsumerMetrics,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            transport,
            handler,
            topic: config.topic.clone(),
            retry: config.retry_config(),
            metrics,
            error_state: ConsumerErrorState::new(),
            shutdown_rx,
        }
    }

    pub fn error_state(&self) -> &ConsumerErrorState {
        &self.error_state
    }

    /// Subscribe and consume until the stop signal, the end of the stream,
    /// or a fatal transport error.
    ///
    /// The stop signal interrupts waiting for a message but never a message
    /// that is already being handled.
    pub async fn run(&mut self) -> Result<()> {
        self.transport.subscribe(&self.topic).await?;
        info!(topic = %self.topic, max_retries = self.retry.max_attempts, "Starting CDC consumer loop");

        loop {
            if self.shutdown_requested() {
                break;
            }

            let polled = tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => continue,
                polled = self.transport.poll_next() => polled,
            };

            match polled {
                Ok(Some(message)) => {
                    self.error_state.record_success();
                    self.metrics.consecutive_errors.set(0);
                    self.metrics.consumer_healthy.set(1);

                    self.process_message(&message).await;
                }
                Ok(None) => {
                    warn!("Message stream ended");
                    break;
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Fatal transport error, stopping consumer");
                    return Err(e);
                }
                Err(e) => {
                    let backoff = self.record_poll_error(&e);
                    tokio::select! {
                        biased;
                        _ = self.shutdown_rx.changed() => {}
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        info!("Closing consumer.");
        Ok(())
    }

    /// Resolve one message and commit its position.
    pub async fn process_message(&mut self, message: &RawMessage) -> MessageOutcome {
        let outcome = if message.is_empty() {
            debug!(position = %message.position, "Empty message, skipping");
            self.metrics.messages_skipped_empty_total.inc();
            MessageOutcome::SkippedEmpty
        } else {
            let handler = &self.handler;
            let metrics = &self.metrics;

            let result = with_retry(&self.retry, |attempt_no| async move {
                let result = attempt(handler, message).await;
                if result.is_err() {
                    metrics.attempt_failures_total.inc();
                }
                result.map(|()| attempt_no)
            })
            .await;

            match result {
                Ok(attempts) => {
                    self.metrics.messages_processed_total.inc();
                    MessageOutcome::Processed { attempts }
                }
                Err(e) => {
                    self.metrics.messages_exhausted_total.inc();
                    error!(
                        position = %message.position,
                        error = %e,
                        "Giving up after retries for message at {}",
                        message.position
                    );
                    MessageOutcome::Exhausted {
                        attempts: e.attempts(),
                    }
                }
            }
        };

        if let Err(e) = self.transport.commit(&message.position).await {
            self.metrics.commit_errors_total.inc();
            error!(position = %message.position, error = %e, "Failed to commit offset");
        }

        outcome
    }

    fn shutdown_requested(&self) -> bool {
        // A dropped sender can no longer signal, so treat it as a stop
        *self.shutdown_rx.borrow() || self.shutdown_rx.has_changed().is_err()
    }

    fn record_poll_error(&mut self, e: &AppError) -> Duration {
        let consecutive = self.error_state.record_error();
        self.metrics.consumer_errors_total.inc();
        self.metrics.consecutive_errors.set(consecutive as i64);

        let backoff = self.error_state.calculate_backoff();
        self.metrics
            .consumer_healthy
            .set(if self.error_state.is_healthy() { 1 } else { 0 });

        if consecutive >= CRITICAL_ERROR_THRESHOLD {
            error!(
                consecutive_errors = consecutive,
                backoff_secs = backoff.as_secs(),
                time_since_success_secs = self.error_state.time_since_success().as_secs(),
                "CRITICAL: Kafka consumer experiencing persistent failures. Error: {}",
                e
            );
        } else if consecutive >= UNHEALTHY_ERROR_THRESHOLD {
            warn!(
                consecutive_errors = consecutive,
                backoff_secs = backoff.as_secs(),
                "Kafka consumer unhealthy - multiple consecutive errors. Error: {}",
                e
            );
        } else {
            error!(
                consecutive_errors = consecutive,
                backoff_secs = backoff.as_secs(),
                "Kafka consumer error (will retry with backoff): {}",
                e
            );
        }

        backoff
    }
}

/// Run the handler once, turning a panic into a retryable failure.
async fn attempt<H: MessageHandler>(handler: &H, message: &RawMessage) -> Result<()> {
    match AssertUnwindSafe(handler.handle(message)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(AppError::Internal(format!("handler panicked: {}", reason)))
        }
    }
}
