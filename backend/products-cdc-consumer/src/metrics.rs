use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Metrics for CDC consumer monitoring
#[derive(Clone)]
pub struct CdcConsumerMetrics {
    /// Messages whose processing eventually succeeded
    pub messages_processed_total: IntCounter,
    /// Individual failed processing attempts
    pub attempt_failures_total: IntCounter,
    /// Messages skipped after exhausting every attempt
    pub messages_exhausted_total: IntCounter,
    /// Empty/tombstone messages committed without processing
    pub messages_skipped_empty_total: IntCounter,
    /// Offset commits rejected by the transport
    pub commit_errors_total: IntCounter,
    /// Total number of transport poll errors
    pub consumer_errors_total: IntCounter,
    /// Current consecutive poll error count (resets on success)
    pub consecutive_errors: IntGauge,
    /// Consumer health status (1 = healthy, 0 = unhealthy)
    pub consumer_healthy: IntGauge,
}

impl CdcConsumerMetrics {
    /// Create the metrics and register them on `registry`.
    ///
    /// Fails with `AlreadyReg` if another instance is registered there.
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let messages_processed_total = IntCounter::new(
            "cdc_messages_processed_total",
            "Total number of CDC messages successfully processed",
        )?;

        let attempt_failures_total = IntCounter::new(
            "cdc_processing_attempt_failures_total",
            "Total number of failed CDC processing attempts",
        )?;

        let messages_exhausted_total = IntCounter::new(
            "cdc_messages_exhausted_total",
            "Total number of CDC messages skipped after exhausting retries",
        )?;

        let messages_skipped_empty_total = IntCounter::new(
            "cdc_messages_skipped_empty_total",
            "Total number of empty CDC messages committed without processing",
        )?;

        let commit_errors_total = IntCounter::new(
            "cdc_commit_errors_total",
            "Total number of failed offset commits",
        )?;

        let consumer_errors_total = IntCounter::new(
            "cdc_consumer_errors_total",
            "Total number of Kafka consumer errors encountered",
        )?;

        let consecutive_errors = IntGauge::new(
            "cdc_consumer_consecutive_errors",
            "Current number of consecutive Kafka consumer errors",
        )?;

        let consumer_healthy = IntGauge::new(
            "cdc_consumer_healthy",
            "CDC consumer health status (1 = healthy, 0 = unhealthy)",
        )?;

        for metric in [
            Box::new(messages_processed_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(attempt_failures_total.clone()),
            Box::new(messages_exhausted_total.clone()),
            Box::new(messages_skipped_empty_total.clone()),
            Box::new(commit_errors_total.clone()),
            Box::new(consumer_errors_total.clone()),
            Box::new(consecutive_errors.clone()),
            Box::new(consumer_healthy.clone()),
        ] {
            registry.register(metric)?;
        }

        // Start as healthy
        consumer_healthy.set(1);

        Ok(Self {
            messages_processed_total,
            attempt_failures_total,
            messages_exhausted_total,
            messages_skipped_empty_total,
            commit_errors_total,
            consumer_errors_total,
            consecutive_errors,
            consumer_healthy,
        })
    }
}

/// Render every metric in `registry` in the Prometheus text format.
pub fn encode(registry: &Registry) -> prometheus::Result<Vec<u8>> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    Ok(buffer)
}

async fn metrics_handler(State(registry): State<Registry>) -> Response {
    match encode(&registry) {
        Ok(body) => (
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

/// Scrape endpoint: `GET /metrics`.
pub fn router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registered() {
        let registry = Registry::new();
        let metrics = CdcConsumerMetrics::new(&registry).unwrap();
        metrics.messages_processed_total.inc();

        let families = registry.gather();
        assert_eq!(families.len(), 8);
        assert!(families
            .iter()
            .any(|f| f.get_name() == "cdc_messages_processed_total"));
        assert_eq!(metrics.consumer_healthy.get(), 1);
    }

    #[test]
    fn test_double_registration_is_rejected() {
        let registry = Registry::new();
        let first = CdcConsumerMetrics::new(&registry).unwrap();

        let err = CdcConsumerMetrics::new(&registry).err().unwrap();
        assert!(matches!(err, prometheus::Error::AlreadyReg));

        // The registered instance is still the one that gets exported
        first.commit_errors_total.inc();
        let exported = registry
            .gather()
            .into_iter()
            .find(|f| f.get_name() == "cdc_commit_errors_total")
            .unwrap();
        assert_eq!(exported.get_metric()[0].get_counter().get_value(), 1.0);
    }

    #[test]
    fn test_encode_text_format() {
        let registry = Registry::new();
        let metrics = CdcConsumerMetrics::new(&registry).unwrap();
        metrics.messages_exhausted_total.inc_by(2);

        let text = String::from_utf8(encode(&registry).unwrap()).unwrap();
        assert!(text.contains("# TYPE cdc_messages_exhausted_total counter"));
        assert!(text.contains("cdc_messages_exhausted_total 2"));
        assert!(text.contains("cdc_consumer_healthy 1"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let registry = Registry::new();
        let metrics = CdcConsumerMetrics::new(&registry).unwrap();
        metrics.messages_processed_total.inc();

        let response = metrics_handler(State(registry)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/plain"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("cdc_messages_processed_total 1"));
    }
}
