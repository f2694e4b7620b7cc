use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use broker_api::{
    BrokerClient, BrokerError, BrokerRecord, ClientFactory, ClientOptions, ConsumerHandle,
    ConsumerTuning, OutboundRecord, ProducerHandle, ProducerTuning, RecordHandler, now_ms,
};

// ═══════════════════════════════════════════════════════════════
//  MemoryBroker
// ═══════════════════════════════════════════════════════════════

/// In-process loopback broker.
///
/// Each topic is a single-partition append log. A consumer that subscribes
/// replays the retained log, then receives live appends. Consumer groups are
/// not coordinated: every consumer sees every record.
///
/// Logs are unbounded unless built with [`MemoryBroker::with_retention`],
/// which keeps only the newest records per topic. Offsets keep counting
/// across evictions.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<BrokerState>,
}

#[derive(Default)]
struct BrokerState {
    logs: HashMap<String, TopicLog>,
    consumers: Vec<ConsumerSlot>,
    retention: Option<usize>,
}

#[derive(Default)]
struct TopicLog {
    next_offset: i64,
    records: VecDeque<BrokerRecord>,
}

struct ConsumerSlot {
    topics: HashSet<String>,
    tx: mpsc::UnboundedSender<BrokerRecord>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("memory broker lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `max_records` per topic; older records are dropped.
    pub fn with_retention(max_records: usize) -> Self {
        let broker = Self::default();
        broker.shared.lock().retention = Some(max_records);
        broker
    }

    /// Append a raw record to `record.topic` and deliver it to subscribers.
    ///
    /// The offset is assigned by the log.
    pub fn inject(&self, mut record: BrokerRecord) {
        let mut state = self.shared.lock();
        let retention = state.retention;
        let log = state.logs.entry(record.topic.clone()).or_default();
        record.offset = log.next_offset;
        log.next_offset += 1;
        log.records.push_back(record.clone());
        if let Some(max) = retention {
            while log.records.len() > max {
                log.records.pop_front();
            }
        }
        state.consumers.retain(|c| {
            if !c.topics.contains(&record.topic) {
                return !c.tx.is_closed();
            }
            c.tx.send(record.clone()).is_ok()
        });
    }

    /// Records of `topic` still retained, oldest first.
    pub fn records(&self, topic: &str) -> Vec<BrokerRecord> {
        self.shared
            .lock()
            .logs
            .get(topic)
            .map(|log| log.records.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Values of every record appended to `topic`, as text.
    pub fn values(&self, topic: &str) -> Vec<String> {
        self.records(topic)
            .iter()
            .filter_map(|r| r.value.as_deref())
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .collect()
    }

    pub fn topics(&self) -> Vec<String> {
        self.shared.lock().logs.keys().cloned().collect()
    }
}

impl BrokerClient for MemoryBroker {
    fn consumer(
        &self,
        group_id: &str,
        _tuning: &ConsumerTuning,
    ) -> Result<Arc<dyn ConsumerHandle>, BrokerError> {
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Arc::new(MemoryConsumer {
            group_id: group_id.to_string(),
            shared: self.shared.clone(),
            tx,
            rx: tokio::sync::Mutex::new(rx),
            connected: AtomicBool::new(false),
            token: CancellationToken::new(),
        }))
    }

    fn producer(&self, _tuning: &ProducerTuning) -> Result<Arc<dyn ProducerHandle>, BrokerError> {
        Ok(Arc::new(MemoryProducer {
            broker: self.clone(),
            connected: AtomicBool::new(false),
        }))
    }
}

/// Hands out clones of one shared [`MemoryBroker`], ignoring connection settings.
#[derive(Clone, Default)]
pub struct MemoryClientFactory {
    broker: MemoryBroker,
}

impl MemoryClientFactory {
    pub fn new(broker: MemoryBroker) -> Self {
        Self { broker }
    }
}

impl ClientFactory for MemoryClientFactory {
    fn create(&self, options: &ClientOptions) -> Result<Arc<dyn BrokerClient>, BrokerError> {
        tracing::info!(service = %options.service_id, "using in-memory broker");
        Ok(Arc::new(self.broker.clone()))
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryConsumer
// ═══════════════════════════════════════════════════════════════

struct MemoryConsumer {
    group_id: String,
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<BrokerRecord>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<BrokerRecord>>,
    connected: AtomicBool,
    token: CancellationToken,
}

impl MemoryConsumer {
    fn check_open(&self) -> Result<(), BrokerError> {
        if self.token.is_cancelled() {
            return Err(BrokerError::closed(format!("consumer '{}' disconnected", self.group_id)));
        }
        Ok(())
    }
}

impl ConsumerHandle for MemoryConsumer {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        Box::pin(async move {
            self.check_open()?;
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.check_open()?;
            if !self.connected.load(Ordering::SeqCst) {
                return Err(BrokerError::subscription(format!("subscribe '{topic}': not connected")));
            }
            let mut state = self.shared.lock();
            // Replay and registration under one lock: no gap, no duplicate.
            for record in state.logs.get(&topic).into_iter().flat_map(|log| log.records.iter()) {
                let _ = self.tx.send(record.clone());
            }
            match state.consumers.iter_mut().find(|c| c.tx.same_channel(&self.tx)) {
                Some(slot) => {
                    slot.topics.insert(topic);
                }
                None => state.consumers.push(ConsumerSlot {
                    topics: HashSet::from([topic]),
                    tx: self.tx.clone(),
                }),
            }
            Ok(())
        })
    }

    fn run(
        &self,
        handler: RecordHandler,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        Box::pin(async move {
            self.check_open()?;
            let mut rx = self
                .rx
                .try_lock()
                .map_err(|_| BrokerError::connection(format!("consumer '{}' is already running", self.group_id)))?;
            loop {
                tokio::select! {
                    record = rx.recv() => match record {
                        Some(record) => handler(record),
                        None => return Ok(()),
                    },
                    _ = self.token.cancelled() => return Ok(()),
                }
            }
        })
    }

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        Box::pin(async move {
            self.token.cancel();
            self.connected.store(false, Ordering::SeqCst);
            self.shared
                .lock()
                .consumers
                .retain(|c| !c.tx.same_channel(&self.tx));
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryProducer
// ═══════════════════════════════════════════════════════════════

struct MemoryProducer {
    broker: MemoryBroker,
    connected: AtomicBool,
}

impl ProducerHandle for MemoryProducer {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        Box::pin(async move {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn send(
        &self,
        topic: &str,
        records: Vec<OutboundRecord>,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(BrokerError::send(format!("send to '{topic}': producer not connected")));
            }
            for record in records {
                self.broker.inject(BrokerRecord {
                    topic: topic.clone(),
                    partition: record.partition.unwrap_or(0),
                    offset: 0,
                    key: record.key.map(String::into_bytes),
                    value: Some(record.value.into_bytes()),
                    headers: record.headers.unwrap_or_default().into_iter().collect(),
                    timestamp: Some(record.timestamp.unwrap_or_else(|| now_ms().to_string())),
                });
            }
            Ok(())
        })
    }

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        Box::pin(async move {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn outbound(value: &str) -> OutboundRecord {
        OutboundRecord {
            key: Some("k".into()),
            value: value.into(),
            partition: None,
            headers: None,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn subscriber_replays_log_then_receives_live() {
        let broker = MemoryBroker::new();
        broker.inject(BrokerRecord::new("t", b"early".to_vec()));

        let consumer = broker.consumer("g", &ConsumerTuning::default()).unwrap();
        consumer.connect().await.unwrap();
        consumer.subscribe("t").await.unwrap();

        let producer = broker.producer(&ProducerTuning::default()).unwrap();
        producer.connect().await.unwrap();
        producer.send("t", vec![outbound("late")]).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: RecordHandler = Arc::new(move |r: BrokerRecord| {
            sink.lock().unwrap().push((r.offset, r.value.unwrap()));
        });

        let run = consumer.run(handler);
        let dc = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            consumer.disconnect().await.unwrap();
        };
        let (result, ()) = tokio::join!(run, dc);
        result.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(0, b"early".to_vec()), (1, b"late".to_vec())]
        );
    }

    #[test]
    fn retention_drops_oldest_and_keeps_offsets() {
        let broker = MemoryBroker::with_retention(2);
        for v in ["a", "b", "c"] {
            broker.inject(BrokerRecord::new("t", v.as_bytes().to_vec()));
        }
        let kept: Vec<_> = broker.records("t").iter().map(|r| r.offset).collect();
        assert_eq!(kept, vec![1, 2]);
        assert_eq!(broker.values("t"), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn send_requires_connect() {
        let broker = MemoryBroker::new();
        let producer = broker.producer(&ProducerTuning::default()).unwrap();
        let err = producer.send("t", vec![outbound("x")]).await.unwrap_err();
        assert_eq!(err.kind(), broker_api::ErrorKind::Send);
        assert!(broker.records("t").is_empty());
    }

    #[tokio::test]
    async fn logs_are_per_topic_and_disconnect_closes_handle() {
        let broker = MemoryBroker::new();
        let consumer = broker.consumer("g", &ConsumerTuning::default()).unwrap();
        consumer.connect().await.unwrap();
        consumer.subscribe("a").await.unwrap();
        broker.inject(BrokerRecord::new("b", b"other".to_vec()));
        assert_eq!(broker.values("b"), vec!["other"]);

        consumer.disconnect().await.unwrap();
        let err = consumer.subscribe("a").await.unwrap_err();
        assert_eq!(err.kind(), broker_api::ErrorKind::Closed);
    }
}
