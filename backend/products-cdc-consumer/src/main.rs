use anyhow::{Context, Result};
use products_cdc_consumer::metrics::{self, CdcConsumerMetrics};
use products_cdc_consumer::services::{CdcConsumer, ChangeEventProcessor, KafkaTransport};
use products_cdc_consumer::CdcConsumerConfig;
use prometheus::Registry;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = terminate.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    }
}

/// Serve `GET /metrics` until the stop signal.
async fn serve_metrics(
    listener: TcpListener,
    registry: Registry,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    axum::serve(listener, metrics::router(registry))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        })
        .await
        .context("Metrics server error")
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,products_cdc_consumer=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!("Starting products-cdc-consumer");

    let config = CdcConsumerConfig::from_env().context("Failed to load configuration")?;
    tracing::info!(
        brokers = %config.brokers,
        group_id = %config.group_id,
        topic = %config.topic,
        max_retries = config.max_retries,
        "Configuration loaded"
    );

    let transport = KafkaTransport::new(&config).context("Failed to create Kafka transport")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let registry = Registry::new();
    let consumer_metrics =
        CdcConsumerMetrics::new(&registry).context("Failed to register metrics")?;

    if let Some(addr) = config.metrics_addr() {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind metrics endpoint on {}", addr))?;
        tracing::info!("Serving metrics on http://{}/metrics", addr);

        let metrics_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_metrics(listener, registry, metrics_shutdown).await {
                tracing::error!("{:#}", e);
            }
        });
    }

    tracing::info!("Press Ctrl+C to exit.");

    let mut consumer = CdcConsumer::new(
        transport,
        ChangeEventProcessor::new(),
        &config,
        consumer_metrics,
        shutdown_rx,
    );

    consumer.run().await.context("CDC consumer failed")
}
