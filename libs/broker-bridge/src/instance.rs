use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use broker_api::{BrokerClient, ClientFactory};

use crate::config::InstanceOptions;
use crate::consumer::ConsumerChannel;
use crate::error::BridgeError;
use crate::process::{OsProcess, ProcessControl};
use crate::producer::ProducerChannel;
use crate::shutdown::FatalReporter;

/// The `{consumer, producer}` pair owned by a [`BridgeContext`].
#[derive(Debug)]
pub struct Instance {
    consumer: Option<ConsumerChannel>,
    producer: Option<ProducerChannel>,
}

impl Instance {
    pub fn consumer(&self) -> Option<&ConsumerChannel> {
        self.consumer.as_ref()
    }

    pub fn producer(&self) -> Option<&ProducerChannel> {
        self.producer.as_ref()
    }

    /// Disconnect both channels. Both are attempted; the first error is returned.
    pub async fn disconnect(&self) -> Result<(), BridgeError> {
        let consumer = match &self.consumer {
            Some(c) => c.disconnect().await,
            None => Ok(()),
        };
        let producer = match &self.producer {
            Some(p) => p.disconnect().await,
            None => Ok(()),
        };
        consumer.and(producer)
    }
}

/// Load-once holder of the process's [`Instance`].
///
/// The first successful [`get_instance`](Self::get_instance) fixes the
/// instance; later calls return it unchanged and ignore their options.
pub struct BridgeContext {
    instance: RwLock<Option<Arc<Instance>>>,
    factory: RwLock<Option<Arc<dyn ClientFactory>>>,
    control: Arc<dyn ProcessControl>,
    fatal: FatalReporter,
}

impl std::fmt::Debug for BridgeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeContext")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

static GLOBAL: OnceLock<Arc<BridgeContext>> = OnceLock::new();

impl BridgeContext {
    pub fn new(control: Arc<dyn ProcessControl>) -> Self {
        Self {
            instance: RwLock::new(None),
            factory: RwLock::new(None),
            control,
            fatal: FatalReporter::default(),
        }
    }

    /// Process-wide context terminating through [`OsProcess`].
    pub fn global() -> Arc<BridgeContext> {
        GLOBAL
            .get_or_init(|| Arc::new(BridgeContext::new(Arc::new(OsProcess))))
            .clone()
    }

    pub fn with_client_factory(self, factory: Arc<dyn ClientFactory>) -> Self {
        self.set_client_factory(factory);
        self
    }

    /// Factory used when options carry no pre-built client.
    pub fn set_client_factory(&self, factory: Arc<dyn ClientFactory>) {
        let mut guard = match self.factory.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("client factory lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        *guard = Some(factory);
    }

    pub fn control(&self) -> Arc<dyn ProcessControl> {
        self.control.clone()
    }

    pub fn fatal_reporter(&self) -> FatalReporter {
        self.fatal.clone()
    }

    fn read_instance(&self) -> RwLockReadGuard<'_, Option<Arc<Instance>>> {
        match self.instance.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("instance read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_instance(&self) -> RwLockWriteGuard<'_, Option<Arc<Instance>>> {
        match self.instance.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("instance write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Return the instance, constructing it on the first call.
    ///
    /// Must be called from within a tokio runtime. A failed construction
    /// stores nothing.
    pub fn get_instance(&self, options: InstanceOptions) -> Result<Arc<Instance>, BridgeError> {
        let mut slot = self.write_instance();
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.clone());
        }

        let client = self.resolve_client(&options)?;

        let consumer = options
            .consumer_config
            .as_ref()
            .map(|cfg| ConsumerChannel::new(cfg, client.clone(), self.control.clone()))
            .transpose()?;
        let producer = options
            .producer_config
            .as_ref()
            .map(|cfg| {
                ProducerChannel::new(cfg, client.clone(), self.control.clone(), self.fatal.clone())
            })
            .transpose()?;

        tracing::info!(
            service = %options.client.service_id,
            consumer = consumer.is_some(),
            producer = producer.is_some(),
            "bridge instance created"
        );

        let instance = Arc::new(Instance { consumer, producer });
        *slot = Some(instance.clone());
        Ok(instance)
    }

    fn resolve_client(&self, options: &InstanceOptions) -> Result<Arc<dyn BrokerClient>, BridgeError> {
        if let Some(client) = &options.broker {
            return Ok(client.clone());
        }
        let factory = match self.factory.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let factory = factory.ok_or(BridgeError::NoBrokerClient)?;
        factory
            .create(&options.client)
            .map_err(|e| BridgeError::Broker(e.with_context(format!("broker '{}'", options.client.kafka_host))))
    }

    /// The instance as of now, if constructed.
    pub fn current(&self) -> Option<Arc<Instance>> {
        self.read_instance().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.read_instance().is_some()
    }

    /// Forget the instance without disconnecting it. Returns what was stored.
    pub fn reset(&self) -> Option<Arc<Instance>> {
        self.write_instance().take()
    }
}

/// `BridgeContext::global().get_instance(options)`.
pub fn create_instance(options: InstanceOptions) -> Result<Arc<Instance>, BridgeError> {
    BridgeContext::global().get_instance(options)
}
