//! Kafka [`MessageSource`] backed by an `rdkafka` `StreamConsumer`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Headers, Message};
use tracing::{info, warn};

use crate::config::KafkaConfig;

use super::{BusError, InboundMessage, MessageSource};

/// How long the startup metadata fetch may take.
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Librdkafka settings for the configured consumer.
pub fn client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", &config.broker)
        .set("group.id", &config.consumer_group)
        .set("auto.offset.reset", config.auto_offset_reset.to_ascii_lowercase())
        .set("enable.auto.commit", "true")
        .set(
            "auto.commit.interval.ms",
            config.auto_commit_interval_ms.to_string(),
        )
        .set("security.protocol", &config.security_protocol);
    if config.uses_sasl() {
        client
            .set("sasl.mechanism", &config.sasl_mechanism)
            .set("sasl.username", &config.sasl_username)
            .set("sasl.password", &config.sasl_password);
    }
    client
}

/// Subscribed consumer for the monitored topic.
pub struct KafkaSource {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaSource {
    /// Create the consumer, verify the brokers answer with a metadata fetch
    /// for the topic, and subscribe.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Fatal`] if the consumer cannot be created, the
    /// brokers cannot be reached or the subscription fails.
    pub async fn connect(config: &KafkaConfig) -> Result<Self, BusError> {
        let topic = config.monitored_topic.clone();
        info!(
            broker = %config.broker,
            security_protocol = %config.security_protocol,
            consumer_group = %config.consumer_group,
            topic = %topic,
            "connecting to Kafka"
        );

        let consumer: StreamConsumer = client_config(config)
            .create()
            .map_err(|e| BusError::Fatal(format!("failed to create Kafka consumer: {e}")))?;

        // fetch_metadata blocks the calling thread.
        let metadata_topic = topic.clone();
        let consumer = tokio::task::spawn_blocking(move || {
            let metadata = consumer.fetch_metadata(Some(metadata_topic.as_str()), METADATA_TIMEOUT)?;
            let partitions = metadata
                .topics()
                .iter()
                .find(|t| t.name() == metadata_topic)
                .map(|t| t.partitions().len());
            Ok::<_, KafkaError>((consumer, partitions))
        })
        .await
        .map_err(|e| BusError::Fatal(format!("Kafka metadata request failed: {e}")))?
        .map(|(consumer, partitions)| {
            match partitions {
                Some(count) if count > 0 => info!(partitions = count, "Kafka connection verified"),
                _ => warn!("monitored topic has no partitions yet"),
            }
            consumer
        })
        .map_err(|e| BusError::Fatal(format!("failed to connect to Kafka: {e}")))?;

        consumer
            .subscribe(&[&topic])
            .map_err(|e| BusError::Fatal(format!("failed to subscribe to {topic}: {e}")))?;
        info!(topic = %topic, "subscribed");

        Ok(Self { consumer, topic })
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn next_message(&mut self) -> Result<Option<InboundMessage>, BusError> {
        match self.consumer.recv().await {
            Ok(message) => Ok(Some(to_inbound(&message))),
            Err(e) => Err(classify(&e)),
        }
    }

    async fn close(&mut self) {
        self.consumer.unsubscribe();
        info!(topic = %self.topic, "unsubscribed");
    }
}

/// Copy a Kafka message into an [`InboundMessage`], decoding text lossily.
pub fn to_inbound<M: Message>(message: &M) -> InboundMessage {
    let mut headers = BTreeMap::new();
    if let Some(raw) = message.headers() {
        for header in raw.iter() {
            let value = header
                .value
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .unwrap_or_default();
            headers.insert(header.key.to_owned(), value);
        }
    }

    InboundMessage {
        topic: message.topic().to_owned(),
        partition: message.partition(),
        offset: message.offset(),
        key: message
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned()),
        value: message
            .payload()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .unwrap_or_default(),
        timestamp: message.timestamp().to_millis().unwrap_or(0),
        headers,
    }
}

/// Sort a consumer error into fatal and transient.
pub fn classify(error: &KafkaError) -> BusError {
    let fatal = match error {
        KafkaError::ClientCreation(_) | KafkaError::Subscription(_) => true,
        other => matches!(
            other.rdkafka_error_code(),
            Some(
                RDKafkaErrorCode::Authentication
                    | RDKafkaErrorCode::AllBrokersDown
                    | RDKafkaErrorCode::SaslAuthenticationFailed
                    | RDKafkaErrorCode::TopicAuthorizationFailed
                    | RDKafkaErrorCode::GroupAuthorizationFailed
                    | RDKafkaErrorCode::Fatal
            )
        ),
    };
    if fatal {
        BusError::Fatal(error.to_string())
    } else {
        BusError::Transient(error.to_string())
    }
}
