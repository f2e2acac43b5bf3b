//! Topic monitor against an in-memory message source.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use routing_triage::monitor::{
    AnalysisHandler, AnalysisRequest, BusError, InboundMessage, MessageSource, MonitorStats,
    TopicMonitor,
};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

type Delivery = Result<InboundMessage, BusError>;

/// Plays back deliveries, then either ends or blocks forever.
struct QueueSource {
    queue: VecDeque<Delivery>,
    block_when_empty: bool,
    closed: Arc<AtomicBool>,
}

impl QueueSource {
    fn new(queue: Vec<Delivery>) -> (Self, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        let source = Self {
            queue: queue.into(),
            block_when_empty: false,
            closed: Arc::clone(&closed),
        };
        (source, closed)
    }

    fn blocking(mut self) -> Self {
        self.block_when_empty = true;
        self
    }
}

#[async_trait]
impl MessageSource for QueueSource {
    async fn next_message(&mut self) -> Result<Option<InboundMessage>, BusError> {
        match self.queue.pop_front() {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(e)) => Err(e),
            None if self.block_when_empty => std::future::pending().await,
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Records requests; fails for payloads equal to "fail".
#[derive(Default)]
struct RecordingHandler {
    seen: Mutex<Vec<AnalysisRequest>>,
    in_flight: AtomicUsize,
    overlapped: AtomicBool,
}

impl RecordingHandler {
    fn offsets(&self) -> Vec<(i32, i64)> {
        self.seen
            .lock()
            .map(|seen| {
                seen.iter()
                    .map(|r| (r.metadata.partition, r.metadata.offset))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl AnalysisHandler for RecordingHandler {
    async fn handle(&self, request: AnalysisRequest) -> anyhow::Result<()> {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        tokio::task::yield_now().await;
        let fail = request.content == "fail";
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(request);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if fail {
            anyhow::bail!("analysis blew up");
        }
        Ok(())
    }
}

fn message(topic: &str, partition: i32, offset: i64, value: &str) -> Delivery {
    Ok(InboundMessage {
        topic: topic.to_owned(),
        partition,
        offset,
        key: None,
        value: value.to_owned(),
        timestamp: 1_700_000_000_000,
        headers: BTreeMap::from([("source".to_owned(), "router".to_owned())]),
    })
}

async fn run(queue: Vec<Delivery>) -> (Result<MonitorStats, BusError>, Arc<RecordingHandler>, bool) {
    let handler = Arc::new(RecordingHandler::default());
    let (source, closed) = QueueSource::new(queue);
    let (monitor, _handle) = TopicMonitor::new(source, "review", handler.clone());
    let result = monitor.start_monitoring().await;
    (result, handler, closed.load(Ordering::SeqCst))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dispatches_messages_in_order_with_metadata() {
    let (result, handler, closed) = run(vec![
        message("review", 0, 42, "{garbled}"),
        message("review", 1, 7, "second"),
    ])
    .await;

    let stats = match result {
        Ok(stats) => stats,
        Err(err) => panic!("monitor should end cleanly: {err}"),
    };
    assert_eq!(stats.received, 2);
    assert_eq!(stats.dispatched, 2);
    assert!(closed);

    let seen = handler.seen.lock().map(|s| s.clone()).unwrap_or_default();
    assert_eq!(seen[0].content, "{garbled}");
    assert_eq!(seen[0].metadata.topic, "review");
    assert_eq!(seen[0].metadata.partition, 0);
    assert_eq!(seen[0].metadata.offset, 42);
    assert_eq!(seen[0].metadata.timestamp, 1_700_000_000_000);
    assert_eq!(
        seen[0].metadata.headers.get("source").map(String::as_str),
        Some("router")
    );
    assert_eq!(handler.offsets(), vec![(0, 42), (1, 7)]);
}

#[tokio::test]
async fn ignores_other_topics() {
    let (result, handler, _) = run(vec![
        message("orders", 0, 1, "elsewhere"),
        message("review", 0, 2, "mine"),
    ])
    .await;

    let stats = result.unwrap_or_default();
    assert_eq!(stats.ignored, 1);
    assert_eq!(handler.offsets(), vec![(0, 2)]);
}

#[tokio::test]
async fn redelivered_offsets_are_skipped_per_partition() {
    let (result, handler, _) = run(vec![
        message("review", 0, 5, "a"),
        message("review", 1, 5, "other partition"),
        message("review", 0, 5, "a again"),
        message("review", 0, 3, "older"),
        message("review", 0, 6, "b"),
    ])
    .await;

    let stats = result.unwrap_or_default();
    assert_eq!(stats.duplicates, 2);
    assert_eq!(handler.offsets(), vec![(0, 5), (1, 5), (0, 6)]);
}

#[tokio::test]
async fn callback_errors_do_not_stop_consumption() {
    let (result, handler, _) = run(vec![
        message("review", 0, 1, "fail"),
        message("review", 0, 2, "ok"),
    ])
    .await;

    let stats = result.unwrap_or_default();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.dispatched, 2);
    assert_eq!(handler.offsets().len(), 2);
}

#[tokio::test]
async fn callbacks_never_overlap() {
    let queue = (0..20).map(|i| message("review", 0, i, "payload")).collect();
    let (_, handler, _) = run(queue).await;

    assert_eq!(handler.offsets().len(), 20);
    assert!(!handler.overlapped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn transient_errors_are_skipped() {
    let (result, handler, _) = run(vec![
        Err(BusError::Transient("broker transport failure".to_owned())),
        message("review", 0, 1, "after"),
    ])
    .await;

    assert!(result.is_ok());
    assert_eq!(handler.offsets(), vec![(0, 1)]);
}

#[tokio::test]
async fn fatal_error_ends_monitoring_and_closes_source() {
    let (result, handler, closed) = run(vec![
        message("review", 0, 1, "before"),
        Err(BusError::Fatal("SASL authentication failed".to_owned())),
        message("review", 0, 2, "never read"),
    ])
    .await;

    assert_eq!(
        result,
        Err(BusError::Fatal("SASL authentication failed".to_owned()))
    );
    assert_eq!(handler.offsets(), vec![(0, 1)]);
    assert!(closed);
}

#[tokio::test]
async fn stop_interrupts_a_blocked_fetch() {
    let handler = Arc::new(RecordingHandler::default());
    let (source, closed) = QueueSource::new(vec![message("review", 0, 1, "only")]);
    let (monitor, handle) = TopicMonitor::new(source.blocking(), "review", handler.clone());

    let task = tokio::spawn(monitor.start_monitoring());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_stopped());

    handle.stop();
    handle.stop();
    assert!(handle.is_stopped());

    let joined = tokio::time::timeout(Duration::from_secs(5), task).await;
    let stats = match joined {
        Ok(Ok(Ok(stats))) => stats,
        other => panic!("monitor should stop cleanly, got {other:?}"),
    };
    assert_eq!(stats.dispatched, 1);
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn stop_before_start_reads_nothing() {
    let handler = Arc::new(RecordingHandler::default());
    let (source, closed) = QueueSource::new(vec![message("review", 0, 1, "unread")]);
    let (monitor, handle) = TopicMonitor::new(source, "review", handler.clone());

    handle.stop();
    let result = monitor.start_monitoring().await;

    assert_eq!(result, Ok(MonitorStats::default()));
    assert!(handler.offsets().is_empty());
    assert!(closed.load(Ordering::SeqCst));
}
