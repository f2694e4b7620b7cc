use crate::event::Headers;

/// One raw record as delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Vec<(String, Vec<u8>)>,
    /// Broker timestamp in milliseconds, as text.
    pub timestamp: Option<String>,
}

impl BrokerRecord {
    pub fn new(topic: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            partition: 0,
            offset: 0,
            key: None,
            value: Some(value.into()),
            headers: Vec::new(),
            timestamp: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = partition;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// One record inside a `send(topic, records)` batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    pub key: Option<String>,
    /// JSON text of the event value.
    pub value: String,
    pub partition: Option<i32>,
    pub headers: Option<Headers>,
    pub timestamp: Option<String>,
}

pub const DEFAULT_MAX_BYTES_PER_PARTITION: i32 = 1_048_576;
pub const DEFAULT_MAX_WAIT_TIME_MS: u64 = 5_000;
pub const DEFAULT_METADATA_MAX_AGE_MS: u64 = 300_000;
pub const DEFAULT_AUTO_COMMIT_INTERVAL_MS: u64 = 5_000;

/// Consumer tuning passed through to the broker client, not enforced here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerTuning {
    pub max_bytes_per_partition: i32,
    pub max_wait_time_ms: u64,
    pub metadata_max_age_ms: u64,
    pub auto_commit_interval_ms: u64,
}

impl Default for ConsumerTuning {
    fn default() -> Self {
        Self {
            max_bytes_per_partition: DEFAULT_MAX_BYTES_PER_PARTITION,
            max_wait_time_ms: DEFAULT_MAX_WAIT_TIME_MS,
            metadata_max_age_ms: DEFAULT_METADATA_MAX_AGE_MS,
            auto_commit_interval_ms: DEFAULT_AUTO_COMMIT_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerTuning {
    pub metadata_max_age_ms: u64,
}

impl Default for ProducerTuning {
    fn default() -> Self {
        Self {
            metadata_max_age_ms: DEFAULT_METADATA_MAX_AGE_MS,
        }
    }
}
