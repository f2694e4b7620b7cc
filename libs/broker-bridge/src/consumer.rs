use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use broker_api::{
    BrokerClient, BrokerError, BrokerRecord, ConsumerHandle, Event, Headers, Payload,
    RecordHandler, TopicMessage,
};

use crate::bus::{ObserverBus, Subscription};
use crate::config::ConsumerConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::BridgeError;
use crate::process::{FATAL_EXIT_CODE, ProcessControl};

/// Topic subscriptions decoded into [`Event`]s and multicast on an [`ObserverBus`].
///
/// Construction returns immediately; the broker session runs on a
/// spawned task under the two-attempt policy of [`ConnectionManager`].
pub struct ConsumerChannel {
    group_id: String,
    topics: Vec<String>,
    handle: Arc<dyn ConsumerHandle>,
    bus: Arc<ObserverBus<TopicMessage>>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    task: Mutex<Option<JoinHandle<()>>>,
    disconnected: AtomicBool,
}

impl std::fmt::Debug for ConsumerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerChannel")
            .field("group_id", &self.group_id)
            .field("topics", &self.topics)
            .field("state", &*self.state_rx.borrow())
            .finish()
    }
}

impl ConsumerChannel {
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: &ConsumerConfig,
        client: Arc<dyn BrokerClient>,
        control: Arc<dyn ProcessControl>,
    ) -> Result<Self, BridgeError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BridgeError::NoRuntime(e.to_string()))?;

        let group_id = config.resolve_group_id();
        let handle = client
            .consumer(&group_id, &config.tuning())
            .map_err(|e| e.with_context(format!("consumer '{}'", config.consumer_id)))?;

        let bus = Arc::new(ObserverBus::<TopicMessage>::new());
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let manager = ConnectionManager::new("consumer", state_tx.clone(), control.clone());

        let task = runtime.spawn(run_consumer(
            manager,
            handle.clone(),
            config.topics.clone(),
            bus.clone(),
            config.log_all_events,
            control,
        ));

        tracing::info!(
            consumer = %config.consumer_id,
            group = %group_id,
            topics = ?config.topics,
            "consumer channel created"
        );

        Ok(Self {
            group_id,
            topics: config.topics.clone(),
            handle,
            bus,
            state_tx,
            state_rx,
            task: Mutex::new(Some(task)),
            disconnected: AtomicBool::new(false),
        })
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// The multicast channel of decoded events.
    pub fn subject(&self) -> &ObserverBus<TopicMessage> {
        &self.bus
    }

    pub fn subscribe(&self) -> Subscription<TopicMessage> {
        self.bus.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Disconnect the consumer handle, then complete the bus.
    ///
    /// Safe to call more than once and before the connection was established;
    /// only the first call has any effect.
    pub async fn disconnect(&self) -> Result<(), BridgeError> {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.handle.disconnect().await;

        let task = match self.task.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
        }

        self.bus.close();
        self.state_tx.send_replace(ConnectionState::Disconnected);

        match result {
            Ok(()) => {
                tracing::info!(group = %self.group_id, "consumer disconnected");
                Ok(())
            }
            Err(e) => {
                tracing::error!(group = %self.group_id, error = %e, "consumer disconnect error");
                Err(BridgeError::Broker(e.with_context("consumer disconnect")))
            }
        }
    }
}

impl Drop for ConsumerChannel {
    fn drop(&mut self) {
        let task = match self.task.get_mut() {
            Ok(t) => t.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
        }
    }
}

async fn run_consumer(
    manager: ConnectionManager,
    handle: Arc<dyn ConsumerHandle>,
    topics: Vec<String>,
    bus: Arc<ObserverBus<TopicMessage>>,
    log_all_events: bool,
    control: Arc<dyn ProcessControl>,
) {
    manager.set_state(ConnectionState::Connecting);
    if manager.establish("connect", || handle.connect()).await.is_err() {
        return;
    }

    for topic in &topics {
        let operation = format!("subscribe to '{topic}'");
        if manager
            .establish(&operation, || handle.subscribe(topic))
            .await
            .is_err()
        {
            return;
        }
    }

    tracing::info!(topics = ?topics, "consumer has started processing messages");

    let handler: RecordHandler = Arc::new(move |record: BrokerRecord| {
        let topic = record.topic.clone();
        let offset = record.offset;
        if let Err(e) = process_record(&bus, log_all_events, record) {
            tracing::error!(%topic, offset, error = %e, "error processing record, skipping");
        }
    });

    match handle.run(handler).await {
        Ok(()) => tracing::info!("consumer run loop finished"),
        Err(e) => {
            tracing::error!(error = %e, "error during processing messages (terminating)");
            manager.set_state(ConnectionState::Fatal);
            control.exit(FATAL_EXIT_CODE);
        }
    }
}

/// Decode one record and push it onto the bus. Errors are per-record only.
fn process_record(
    bus: &ObserverBus<TopicMessage>,
    log_all_events: bool,
    record: BrokerRecord,
) -> Result<(), BridgeError> {
    if record.topic.is_empty() {
        return Ok(());
    }
    let message = TopicMessage {
        topic: record.topic.clone(),
        message: decode_record(&record)?,
    };

    // Rendered before publish so the logged event is exactly what observers got.
    let rendered = if log_all_events {
        Some(serde_json::to_string(&message).map_err(BrokerError::from)?)
    } else {
        None
    };

    bus.publish(message)?;

    if let Some(rendered) = rendered {
        tracing::info!(event = %rendered, "consumed event");
    }
    Ok(())
}

pub(crate) fn decode_record(record: &BrokerRecord) -> Result<Event, BrokerError> {
    let value = record
        .value
        .as_deref()
        .ok_or_else(|| BrokerError::format("record has no value"))?;

    let headers = if record.headers.is_empty() {
        None
    } else {
        Some(
            record
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<Headers>(),
        )
    };

    Ok(Event {
        key: record
            .key
            .as_deref()
            .map(|k| String::from_utf8_lossy(k).into_owned()),
        value: Payload::decode(value),
        partition: Some(record.partition),
        headers,
        timestamp: record.timestamp.clone(),
    })
}
