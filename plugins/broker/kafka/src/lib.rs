use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rdkafka::ClientConfig;
use rdkafka::config::RDKafkaLogLevel;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, Header, Headers as _, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tokio_util::sync::CancellationToken;

use broker_api::{
    BrokerClient, BrokerError, BrokerRecord, ClientFactory, ClientOptions, ConsumerHandle,
    ConsumerTuning, OutboundRecord, ProducerHandle, ProducerTuning, RecordHandler,
};

/// Upper bound for the metadata round-trip that stands in for "connect".
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const SEND_QUEUE_TIMEOUT: Duration = Duration::from_secs(30);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

// ═══════════════════════════════════════════════════════════════
//  KafkaClient
// ═══════════════════════════════════════════════════════════════

/// librdkafka-backed broker client.
///
/// librdkafka connects lazily; `connect()` on a handle is a metadata fetch
/// so that an unreachable cluster surfaces as a connect error.
#[derive(Clone)]
pub struct KafkaClient {
    base: ClientConfig,
}

impl KafkaClient {
    pub fn new(options: &ClientOptions) -> Self {
        let mut base = ClientConfig::new();
        base.set("bootstrap.servers", &options.kafka_host)
            .set("client.id", &options.service_id)
            .set_log_level(RDKafkaLogLevel::Error);

        let protocol = match (options.ssl, options.sasl.is_some()) {
            (false, false) => "plaintext",
            (true, false) => "ssl",
            (false, true) => "sasl_plaintext",
            (true, true) => "sasl_ssl",
        };
        base.set("security.protocol", protocol);

        if let Some(sasl) = &options.sasl {
            base.set("sasl.mechanism", sasl.mechanism.as_str())
                .set("sasl.username", &sasl.username)
                .set("sasl.password", &sasl.password);
        }

        Self { base }
    }
}

impl BrokerClient for KafkaClient {
    fn consumer(
        &self,
        group_id: &str,
        tuning: &ConsumerTuning,
    ) -> Result<Arc<dyn ConsumerHandle>, BrokerError> {
        let mut cfg = self.base.clone();
        cfg.set("group.id", group_id)
            .set("max.partition.fetch.bytes", tuning.max_bytes_per_partition.to_string())
            .set("fetch.wait.max.ms", tuning.max_wait_time_ms.to_string())
            .set("metadata.max.age.ms", tuning.metadata_max_age_ms.to_string())
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", tuning.auto_commit_interval_ms.to_string());

        let consumer: StreamConsumer = cfg
            .create()
            .map_err(|e| BrokerError::config(format!("create consumer '{group_id}': {e}")))?;

        Ok(Arc::new(KafkaConsumer {
            consumer: Arc::new(consumer),
            topics: Mutex::new(Vec::new()),
            token: CancellationToken::new(),
        }))
    }

    fn producer(&self, tuning: &ProducerTuning) -> Result<Arc<dyn ProducerHandle>, BrokerError> {
        let mut cfg = self.base.clone();
        cfg.set("metadata.max.age.ms", tuning.metadata_max_age_ms.to_string());

        let producer: FutureProducer = cfg
            .create()
            .map_err(|e| BrokerError::config(format!("create producer: {e}")))?;

        Ok(Arc::new(KafkaProducer { producer }))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KafkaClientFactory;

impl ClientFactory for KafkaClientFactory {
    fn create(&self, options: &ClientOptions) -> Result<Arc<dyn BrokerClient>, BrokerError> {
        tracing::info!(host = %options.kafka_host, service = %options.service_id, "using kafka broker");
        Ok(Arc::new(KafkaClient::new(options)))
    }
}

fn join_error(e: tokio::task::JoinError) -> BrokerError {
    BrokerError::connection(format!("blocking task failed: {e}"))
}

// ═══════════════════════════════════════════════════════════════
//  KafkaConsumer
// ═══════════════════════════════════════════════════════════════

struct KafkaConsumer {
    consumer: Arc<StreamConsumer>,
    /// librdkafka replaces the subscription set on every call.
    topics: Mutex<Vec<String>>,
    token: CancellationToken,
}

fn to_record(m: &BorrowedMessage<'_>) -> BrokerRecord {
    let headers = m
        .headers()
        .map(|hs| {
            hs.iter()
                .filter_map(|h| h.value.map(|v| (h.key.to_string(), v.to_vec())))
                .collect()
        })
        .unwrap_or_default();

    BrokerRecord {
        topic: m.topic().to_string(),
        partition: m.partition(),
        offset: m.offset(),
        key: m.key().map(<[u8]>::to_vec),
        value: m.payload().map(<[u8]>::to_vec),
        headers,
        timestamp: m.timestamp().to_millis().map(|t| t.to_string()),
    }
}

impl ConsumerHandle for KafkaConsumer {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let consumer = self.consumer.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || consumer.fetch_metadata(None, METADATA_TIMEOUT))
                .await
                .map_err(join_error)?
                .map(|_| ())
                .map_err(|e| BrokerError::connection(e.to_string()))
        })
    }

    fn subscribe(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let mut topics = match self.topics.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !topics.contains(&topic) {
                topics.push(topic.clone());
            }
            let refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            let result = self.consumer.subscribe(&refs);
            drop(refs);
            if let Err(e) = result {
                topics.retain(|t| t != &topic);
                return Err(BrokerError::subscription(format!("'{topic}': {e}")));
            }
            Ok(())
        })
    }

    fn run(
        &self,
        handler: RecordHandler,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        Box::pin(async move {
            loop {
                tokio::select! {
                    msg = self.consumer.recv() => match msg {
                        Ok(m) => handler(to_record(&m)),
                        Err(KafkaError::MessageConsumption(code)) => {
                            tracing::warn!(error = %code, "transient consume error");
                        }
                        Err(e) => return Err(BrokerError::connection(format!("poll: {e}"))),
                    },
                    _ = self.token.cancelled() => return Ok(()),
                }
            }
        })
    }

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        Box::pin(async move {
            self.token.cancel();
            self.consumer.unsubscribe();
            Ok(())
        })
    }
}

// ═══════════════════════════════════════════════════════════════
//  KafkaProducer
// ═══════════════════════════════════════════════════════════════

struct KafkaProducer {
    producer: FutureProducer,
}

impl ProducerHandle for KafkaProducer {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let producer = self.producer.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || producer.client().fetch_metadata(None, METADATA_TIMEOUT))
                .await
                .map_err(join_error)?
                .map(|_| ())
                .map_err(|e| BrokerError::connection(e.to_string()))
        })
    }

    fn send(
        &self,
        topic: &str,
        records: Vec<OutboundRecord>,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            for rec in &records {
                let headers = rec.headers.as_ref().map(|hs| {
                    hs.iter().fold(OwnedHeaders::new(), |acc, (k, v)| {
                        acc.insert(Header {
                            key: k,
                            value: Some(v.as_slice()),
                        })
                    })
                });
                let record: FutureRecord<'_, str, str> = FutureRecord {
                    topic: &topic,
                    partition: rec.partition,
                    payload: Some(rec.value.as_str()),
                    key: rec.key.as_deref(),
                    timestamp: rec.timestamp.as_deref().and_then(|t| t.parse().ok()),
                    headers,
                };
                self.producer
                    .send(record, Timeout::After(SEND_QUEUE_TIMEOUT))
                    .await
                    .map_err(|(e, _)| BrokerError::send(format!("'{topic}': {e}")))?;
            }
            Ok(())
        })
    }

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>> {
        let producer = self.producer.clone();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || producer.flush(FLUSH_TIMEOUT))
                .await
                .map_err(join_error)?
                .map_err(|e| BrokerError::send(format!("flush: {e}")))
        })
    }
}
