use std::sync::Arc;

use serde::Deserialize;

use broker_api::{
    BrokerClient, ClientOptions, ConsumerTuning, ProducerTuning, now_ms,
    record::{DEFAULT_AUTO_COMMIT_INTERVAL_MS, DEFAULT_MAX_BYTES_PER_PARTITION, DEFAULT_MAX_WAIT_TIME_MS, DEFAULT_METADATA_MAX_AGE_MS},
};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConsumerConfig {
    /// Broker-side group. When absent a per-process group is synthesized.
    #[serde(default)]
    pub consumer_group_id: Option<String>,
    pub consumer_id: String,
    /// Subscribed in listed order.
    pub topics: Vec<String>,
    #[serde(default)]
    pub max_bytes_per_partition: Option<i32>,
    #[serde(default)]
    pub max_wait_time_ms: Option<u64>,
    #[serde(default)]
    pub metadata_max_age_ms: Option<u64>,
    #[serde(default)]
    pub log_all_events: bool,
}

impl ConsumerConfig {
    pub fn new(consumer_id: impl Into<String>, topics: Vec<String>) -> Self {
        Self {
            consumer_group_id: None,
            consumer_id: consumer_id.into(),
            topics,
            max_bytes_per_partition: None,
            max_wait_time_ms: None,
            metadata_max_age_ms: None,
            log_all_events: false,
        }
    }

    pub fn tuning(&self) -> ConsumerTuning {
        ConsumerTuning {
            max_bytes_per_partition: self
                .max_bytes_per_partition
                .unwrap_or(DEFAULT_MAX_BYTES_PER_PARTITION),
            max_wait_time_ms: self.max_wait_time_ms.unwrap_or(DEFAULT_MAX_WAIT_TIME_MS),
            metadata_max_age_ms: self.metadata_max_age_ms.unwrap_or(DEFAULT_METADATA_MAX_AGE_MS),
            auto_commit_interval_ms: DEFAULT_AUTO_COMMIT_INTERVAL_MS,
        }
    }

    /// Supplied group id, or `{consumer_id}-{pid}-{unix_ms}-{random}`.
    ///
    /// Two instances never share a synthesized group.
    pub fn resolve_group_id(&self) -> String {
        match &self.consumer_group_id {
            Some(id) => id.clone(),
            None => format!(
                "{}-{}-{}-{}",
                self.consumer_id,
                std::process::id(),
                now_ms(),
                uuid::Uuid::new_v4().simple()
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProducerConfig {
    /// Every published event is sent to all of these.
    pub topics: Vec<String>,
    #[serde(default)]
    pub metadata_max_age_ms: Option<u64>,
}

impl ProducerConfig {
    pub fn new(topics: Vec<String>) -> Self {
        Self {
            topics,
            metadata_max_age_ms: None,
        }
    }

    pub fn tuning(&self) -> ProducerTuning {
        ProducerTuning {
            metadata_max_age_ms: self.metadata_max_age_ms.unwrap_or(DEFAULT_METADATA_MAX_AGE_MS),
        }
    }
}

/// Options accepted by `BridgeContext::get_instance`.
#[derive(Clone, Deserialize)]
pub struct InstanceOptions {
    #[serde(flatten)]
    pub client: ClientOptions,
    #[serde(default)]
    pub consumer_config: Option<ConsumerConfig>,
    #[serde(default)]
    pub producer_config: Option<ProducerConfig>,
    /// Pre-built client; overrides construction from `client`.
    #[serde(skip)]
    pub broker: Option<Arc<dyn BrokerClient>>,
}

impl std::fmt::Debug for InstanceOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceOptions")
            .field("client", &self.client)
            .field("consumer_config", &self.consumer_config)
            .field("producer_config", &self.producer_config)
            .field("broker", &self.broker.as_ref().map(|_| "<supplied>"))
            .finish()
    }
}

impl InstanceOptions {
    pub fn new(kafka_host: impl Into<String>, service_id: impl Into<String>) -> Self {
        Self {
            client: ClientOptions {
                kafka_host: kafka_host.into(),
                service_id: service_id.into(),
                ssl: false,
                sasl: None,
            },
            consumer_config: None,
            producer_config: None,
            broker: None,
        }
    }

    pub fn with_consumer(mut self, config: ConsumerConfig) -> Self {
        self.consumer_config = Some(config);
        self
    }

    pub fn with_producer(mut self, config: ProducerConfig) -> Self {
        self.producer_config = Some(config);
        self
    }

    pub fn with_client(mut self, client: Arc<dyn BrokerClient>) -> Self {
        self.broker = Some(client);
        self
    }
}
