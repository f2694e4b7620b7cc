pub mod client;
pub mod error;
pub mod event;
pub mod options;
pub mod record;

pub use client::{BrokerClient, ConsumerHandle, ProducerHandle, RecordHandler};
pub use error::{BrokerError, ErrorKind};
pub use event::{Event, Headers, Payload, TopicMessage};
pub use options::{ClientFactory, ClientOptions, SaslConfig, SaslMechanism};
pub use record::{BrokerRecord, ConsumerTuning, OutboundRecord, ProducerTuning};

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
