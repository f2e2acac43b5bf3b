//! Topic monitor: consumes the bus and hands each failed message to the
//! analysis callback.
//!
//! The bus is reached through [`MessageSource`]; the production source is
//! [`kafka::KafkaSource`]. Consumption is sequential: the next message is not
//! fetched until the callback for the current one returns.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[cfg(feature = "kafka")]
pub mod kafka;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A message as read from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message was read from.
    pub topic: String,
    /// Partition within the topic.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Message key, decoded lossily.
    pub key: Option<String>,
    /// Payload, decoded lossily.
    pub value: String,
    /// Broker timestamp in epoch milliseconds, 0 when absent.
    pub timestamp: i64,
    /// Headers, values decoded lossily. A header without value maps to "".
    pub headers: BTreeMap<String, String>,
}

impl InboundMessage {
    /// Split into the payload and its metadata.
    pub fn into_request(self) -> AnalysisRequest {
        AnalysisRequest {
            content: self.value,
            metadata: MessageMetadata {
                topic: self.topic,
                partition: self.partition,
                offset: self.offset,
                timestamp: self.timestamp,
                key: self.key,
                headers: self.headers,
            },
        }
    }
}

/// Where a message came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageMetadata {
    /// Topic.
    pub topic: String,
    /// Partition.
    pub partition: i32,
    /// Offset.
    pub offset: i64,
    /// Epoch milliseconds, 0 when absent.
    pub timestamp: i64,
    /// Message key.
    pub key: Option<String>,
    /// Message headers.
    pub headers: BTreeMap<String, String>,
}

/// One unit of analysis work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    /// Message payload.
    pub content: String,
    /// Message metadata.
    pub metadata: MessageMetadata,
}

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Errors reported by a [`MessageSource`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// Consumption cannot continue (authentication, authorization, all
    /// brokers down, failed subscription).
    #[error("fatal bus error: {0}")]
    Fatal(String),
    /// A single failed fetch; consumption continues.
    #[error("transient bus error: {0}")]
    Transient(String),
}

impl BusError {
    /// Whether the monitor must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// A subscribed bus consumer.
#[async_trait]
pub trait MessageSource: Send {
    /// Wait for the next message. `Ok(None)` means the stream has ended.
    ///
    /// # Errors
    ///
    /// Returns [`BusError`] classified as fatal or transient.
    async fn next_message(&mut self) -> Result<Option<InboundMessage>, BusError>;

    /// Unsubscribe and release the connection.
    async fn close(&mut self);
}

/// Callback invoked for every qualifying message.
#[async_trait]
pub trait AnalysisHandler: Send + Sync {
    /// Analyze one message.
    ///
    /// # Errors
    ///
    /// An error is logged by the monitor; consumption continues.
    async fn handle(&self, request: AnalysisRequest) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// Counters reported when monitoring ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    /// Messages read from the source.
    pub received: u64,
    /// Messages handed to the callback.
    pub dispatched: u64,
    /// Messages from other topics.
    pub ignored: u64,
    /// Redelivered offsets that were skipped.
    pub duplicates: u64,
    /// Callbacks that returned an error.
    pub failed: u64,
}

/// Stops a running [`TopicMonitor`]. Cheap to clone, safe to use from any
/// task.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    stop_tx: Arc<watch::Sender<bool>>,
}

impl MonitorHandle {
    /// Ask the monitor to stop at its next fetch boundary. Idempotent.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Whether a stop was requested.
    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }
}

/// Consumes one topic and dispatches each new message to the handler.
pub struct TopicMonitor<S> {
    source: S,
    topic: String,
    handler: Arc<dyn AnalysisHandler>,
    stop_rx: watch::Receiver<bool>,
    // Keeps the channel open even when every handle is dropped.
    _stop_tx: Arc<watch::Sender<bool>>,
    last_offsets: HashMap<i32, i64>,
    stats: MonitorStats,
}

impl<S: MessageSource> TopicMonitor<S> {
    /// Create a monitor for `topic` and the handle that stops it.
    pub fn new(
        source: S,
        topic: impl Into<String>,
        handler: Arc<dyn AnalysisHandler>,
    ) -> (Self, MonitorHandle) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let stop_tx = Arc::new(stop_tx);
        let monitor = Self {
            source,
            topic: topic.into(),
            handler,
            stop_rx,
            _stop_tx: Arc::clone(&stop_tx),
            last_offsets: HashMap::new(),
            stats: MonitorStats::default(),
        };
        (monitor, MonitorHandle { stop_tx })
    }

    /// Consume until stopped, the source ends, or a fatal bus error.
    ///
    /// The source is closed before returning.
    ///
    /// # Errors
    ///
    /// Returns the fatal [`BusError`] that ended consumption.
    pub async fn start_monitoring(mut self) -> Result<MonitorStats, BusError> {
        info!(topic = %self.topic, "monitoring started");

        let result = loop {
            if *self.stop_rx.borrow() {
                info!(topic = %self.topic, "stop requested");
                break Ok(());
            }

            let next = tokio::select! {
                biased;
                _ = self.stop_rx.changed() => continue,
                next = self.source.next_message() => next,
            };

            match next {
                Ok(Some(message)) => self.process(message).await,
                Ok(None) => {
                    info!(topic = %self.topic, "message source ended");
                    break Ok(());
                }
                Err(e) if e.is_fatal() => {
                    error!(topic = %self.topic, error = %e, "unrecoverable bus error");
                    break Err(e);
                }
                Err(e) => warn!(topic = %self.topic, error = %e, "failed to fetch message"),
            }
        };

        self.source.close().await;
        let stats = self.stats;
        info!(
            topic = %self.topic,
            received = stats.received,
            dispatched = stats.dispatched,
            ignored = stats.ignored,
            duplicates = stats.duplicates,
            failed = stats.failed,
            "monitoring stopped"
        );
        result.map(|()| stats)
    }

    async fn process(&mut self, message: InboundMessage) {
        self.stats.received = self.stats.received.saturating_add(1);

        if message.topic != self.topic {
            debug!(topic = %message.topic, "ignoring message from unmonitored topic");
            self.stats.ignored = self.stats.ignored.saturating_add(1);
            return;
        }

        if let Some(&last) = self.last_offsets.get(&message.partition) {
            if message.offset <= last {
                debug!(
                    partition = message.partition,
                    offset = message.offset,
                    last_dispatched = last,
                    "skipping redelivered message"
                );
                self.stats.duplicates = self.stats.duplicates.saturating_add(1);
                return;
            }
        }
        self.last_offsets.insert(message.partition, message.offset);

        info!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            "received failed message"
        );
        self.stats.dispatched = self.stats.dispatched.saturating_add(1);
        let (partition, offset) = (message.partition, message.offset);
        if let Err(e) = self.handler.handle(message.into_request()).await {
            error!(partition, offset, error = %e, "analysis callback failed");
            self.stats.failed = self.stats.failed.saturating_add(1);
        }
    }
}
