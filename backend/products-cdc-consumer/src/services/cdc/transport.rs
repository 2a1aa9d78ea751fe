use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::topic_partition_list::TopicPartitionList;
use rdkafka::Offset;
use std::fmt;
use tracing::{debug, error, info};

use crate::config::CdcConsumerConfig;
use crate::error::{AppError, Result};

/// Where a message sits in the stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PositionToken {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl PositionToken {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }
}

impl fmt::Display for PositionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] @{}", self.topic, self.partition, self.offset)
    }
}

/// A delivered message. `payload` is `None` for tombstones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub position: PositionToken,
    pub payload: Option<Vec<u8>>,
}

impl RawMessage {
    pub fn new(position: PositionToken, payload: Option<Vec<u8>>) -> Self {
        Self { position, payload }
    }

    /// No payload, or only whitespace.
    pub fn is_empty(&self) -> bool {
        self.payload
            .as_deref()
            .map_or(true, |p| p.iter().all(u8::is_ascii_whitespace))
    }
}

/// The message source the consumer loop pulls from and acknowledges to.
#[async_trait]
pub trait CdcTransport: Send {
    async fn subscribe(&mut self, topic: &str) -> Result<()>;

    /// Wait for the next message. `Ok(None)` means the stream has ended.
    async fn poll_next(&mut self) -> Result<Option<RawMessage>>;

    /// Mark everything up to and including `position` as consumed.
    async fn commit(&mut self, position: &PositionToken) -> Result<()>;
}

/// Kafka transport backed by an rdkafka `StreamConsumer` with manual commits.
pub struct KafkaTransport {
    consumer: StreamConsumer,
}

impl KafkaTransport {
    pub fn new(config: &CdcConsumerConfig) -> Result<Self> {
        info!(
            brokers = %config.brokers,
            group_id = %config.group_id,
            "Initializing Kafka consumer"
        );

        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", &config.group_id)
            .set("bootstrap.servers", &config.brokers)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", config.auto_offset_reset.as_str())
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("max.poll.interval.ms", config.max_poll_interval_ms.to_string())
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| {
                error!("Failed to create Kafka consumer: {}", e);
                AppError::Config(format!("Failed to create Kafka consumer: {}", e))
            })?;

        Ok(Self { consumer })
    }
}

#[async_trait]
impl CdcTransport for KafkaTransport {
    async fn subscribe(&mut self, topic: &str) -> Result<()> {
        self.consumer.subscribe(&[topic]).map_err(|e| {
            error!("Failed to subscribe to topic: {}", e);
            AppError::from(e)
        })?;

        info!("Listening to topic: {}", topic);
        Ok(())
    }

    async fn poll_next(&mut self) -> Result<Option<RawMessage>> {
        let msg = self.consumer.recv().await?;

        Ok(Some(RawMessage::new(
            PositionToken::new(msg.topic(), msg.partition(), msg.offset()),
            msg.payload().map(<[u8]>::to_vec),
        )))
    }

    async fn commit(&mut self, position: &PositionToken) -> Result<()> {
        // Kafka stores the next offset to read
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &position.topic,
            position.partition,
            Offset::Offset(position.offset + 1),
        )?;

        self.consumer.commit(&tpl, CommitMode::Async)?;

        debug!(position = %position, "Committed offset");
        Ok(())
    }
}
