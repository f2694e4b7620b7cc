use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::BrokerError;
use crate::record::{BrokerRecord, ConsumerTuning, OutboundRecord, ProducerTuning};

/// Callback invoked once per delivered record, in delivery order.
pub type RecordHandler = Arc<dyn Fn(BrokerRecord) + Send + Sync>;

/// Connection factory bound to one logical broker endpoint.
///
/// Shared by the consumer and producer channels of a process.
pub trait BrokerClient: Send + Sync {
    fn consumer(
        &self,
        group_id: &str,
        tuning: &ConsumerTuning,
    ) -> Result<Arc<dyn ConsumerHandle>, BrokerError>;

    fn producer(&self, tuning: &ProducerTuning) -> Result<Arc<dyn ProducerHandle>, BrokerError>;
}

/// Group-member consumer. Partition assignment and offsets belong to the implementation.
pub trait ConsumerHandle: Send + Sync {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;

    fn subscribe(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;

    /// Poll loop. Resolves `Ok` once the consumer is disconnected, `Err` if polling fails.
    fn run(
        &self,
        handler: RecordHandler,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;
}

pub trait ProducerHandle: Send + Sync {
    fn connect(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;

    fn send(
        &self,
        topic: &str,
        records: Vec<OutboundRecord>,
    ) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;

    fn disconnect(&self) -> Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + '_>>;
}
