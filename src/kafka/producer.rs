use std::time::Duration;

use anyhow::{Context, Result};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use tracing::{error, info};

use crate::config::KafkaConfig;
use crate::metrics;

use super::types::AuditRecord;

/// Kafka producer for the audit trail.
///
/// Configured for at-least-once delivery with idempotent writes. When
/// Kafka is not configured (`KAFKA_HOSTS` unset) the producer runs in
/// log-only mode and sends become no-ops.
pub struct AuditProducer {
    producer: Option<FutureProducer>,
    topic: String,
}

impl AuditProducer {
    /// Create a producer from the application configuration.
    ///
    /// # Configuration
    /// - `acks=all`: Wait for all in-sync replicas to acknowledge.
    /// - `enable.idempotence=true`: Prevent duplicate writes.
    /// - `compression.type=snappy`: Cheap compression for small JSON events.
    /// - `linger.ms=10`: Small batching window for low latency.
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        if !config.enabled {
            info!("Kafka audit producer disabled (KAFKA_HOSTS not set), running log-only");
            return Ok(Self {
                producer: None,
                topic: config.topic.clone(),
            });
        }

        info!(brokers = %config.hosts, topic = %config.topic, "Initializing Kafka audit producer");
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.hosts)
            // Reliability settings
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("max.in.flight.requests.per.connection", "5")
            // Performance settings
            .set("compression.type", "snappy")
            .set("linger.ms", "10")
            // Timeout settings
            .set("request.timeout.ms", "30000")
            .set("delivery.timeout.ms", "120000")
            .create()
            .context("Failed to create Kafka audit producer")?;

        Ok(Self {
            producer: Some(producer),
            topic: config.topic.clone(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.producer.is_some()
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish one audit record, waiting for the broker acknowledgment.
    ///
    /// Returns the partition/offset pair on success, or dummy values in
    /// log-only mode.
    pub async fn send(&self, record: &AuditRecord) -> Result<(i32, i64)> {
        let Some(producer) = &self.producer else {
            return Ok((-1, -1));
        };

        let payload =
            serde_json::to_vec(record).context("Failed to serialize audit record")?;

        // Partition key: api_id keeps one API's audit trail ordered
        let kafka_record = FutureRecord::to(&self.topic)
            .key(record.api_id.as_bytes())
            .payload(&payload);

        match producer
            .send(kafka_record, Timeout::After(Duration::from_secs(2)))
            .await
        {
            Ok((partition, offset)) => {
                metrics::AUDIT_PUBLISH_SUCCESS.inc();
                tracing::debug!(
                    partition = partition,
                    offset = offset,
                    api_id = %record.api_id,
                    "Audit event persisted to Kafka"
                );
                Ok((partition, offset))
            }
            Err((kafka_err, _)) => {
                metrics::AUDIT_PUBLISH_FAILURE.inc();
                error!(
                    error = %kafka_err,
                    api_id = %record.api_id,
                    topic = %self.topic,
                    "Failed to publish audit event"
                );
                Err(anyhow::anyhow!("Kafka send failed: {}", kafka_err))
            }
        }
    }
}
