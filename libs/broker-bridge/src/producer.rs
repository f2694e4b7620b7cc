use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use broker_api::{BrokerClient, BrokerError, Event, OutboundRecord, ProducerHandle, TopicMessage};

use crate::bus::ObserverBus;
use crate::config::ProducerConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::error::{BridgeError, BusError};
use crate::process::ProcessControl;
use crate::shutdown::{FatalEvent, FatalReporter};

/// Publication intake: every event pushed onto the bus is sent to all
/// configured destination topics.
///
/// Per event, the destination sends are issued concurrently and awaited
/// together before the next event is taken. A failed send is escalated
/// through the [`FatalReporter`].
pub struct ProducerChannel {
    topics: Arc<Vec<String>>,
    handle: Arc<dyn ProducerHandle>,
    bus: Arc<ObserverBus<TopicMessage>>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    disconnected: AtomicBool,
}

impl std::fmt::Debug for ProducerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerChannel")
            .field("topics", &self.topics)
            .field("state", &*self.state_rx.borrow())
            .finish()
    }
}

impl ProducerChannel {
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: &ProducerConfig,
        client: Arc<dyn BrokerClient>,
        control: Arc<dyn ProcessControl>,
        fatal: FatalReporter,
    ) -> Result<Self, BridgeError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BridgeError::NoRuntime(e.to_string()))?;

        let handle = client
            .producer(&config.tuning())
            .map_err(|e| e.with_context("producer"))?;
        let topics = Arc::new(config.topics.clone());
        let bus = Arc::new(ObserverBus::<TopicMessage>::new());
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let manager = ConnectionManager::new("producer", state_tx.clone(), control);
        let connect_handle = handle.clone();
        let connect = runtime.spawn(async move {
            manager.set_state(ConnectionState::Connecting);
            if manager
                .establish("connect", || connect_handle.connect())
                .await
                .is_ok()
            {
                tracing::info!("producer connected");
            }
        });

        // Subscribed before returning so nothing published afterwards is missed.
        let mut intake = bus.subscribe();
        let pump_handle = handle.clone();
        let pump_topics = topics.clone();
        let mut pump_state = state_rx.clone();
        let pump = runtime.spawn(async move {
            while let Some(msg) = intake.recv().await {
                let ready = pump_state
                    .wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Fatal))
                    .await
                    .map(|s| *s == ConnectionState::Connected)
                    .unwrap_or(false);
                if !ready {
                    tracing::warn!(source = %msg.topic, "producer not connected, dropping event");
                    continue;
                }
                for (topic, result) in fan_out(&*pump_handle, &pump_topics, &msg.message).await {
                    if let Err(error) = result {
                        tracing::error!(%topic, error = %error, "send error");
                        fatal.report(FatalEvent::SendFailed { topic, error });
                    }
                }
            }
            tracing::info!("producer intake closed");
        });

        tracing::info!(topics = ?config.topics, "producer channel created");

        Ok(Self {
            topics,
            handle,
            bus,
            state_tx,
            state_rx,
            tasks: Mutex::new(vec![connect, pump]),
            disconnected: AtomicBool::new(false),
        })
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// The publish intake. Items pushed here are fanned out to every destination topic.
    pub fn subject(&self) -> &ObserverBus<TopicMessage> {
        &self.bus
    }

    /// Push an event onto the intake. `topic` names the origin; destinations come from config.
    pub fn publish(&self, topic: impl Into<String>, event: Event) -> Result<(), BusError> {
        self.bus.publish(TopicMessage::new(topic, event)).map(|_| ())
    }

    /// Send `event` to all destinations and wait for every send to complete.
    ///
    /// Bypasses the intake; the first failure (in topic order) is returned.
    pub async fn send(&self, event: &Event) -> Result<(), BridgeError> {
        let mut first_error = None;
        for (topic, result) in fan_out(&*self.handle, &self.topics, event).await {
            match result {
                Err(source) if first_error.is_none() => {
                    first_error = Some(BridgeError::Send { topic, source });
                }
                _ => {}
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Close the intake and disconnect the producer handle. Only the first call has effect.
    ///
    /// Events still buffered in the intake are not sent.
    pub async fn disconnect(&self) -> Result<(), BridgeError> {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.bus.close();
        let tasks = match self.tasks.lock() {
            Ok(mut g) => std::mem::take(&mut *g),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for task in tasks {
            task.abort();
        }

        let result = self.handle.disconnect().await;
        self.state_tx.send_replace(ConnectionState::Disconnected);
        match result {
            Ok(()) => {
                tracing::info!("producer disconnected");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "producer disconnect error");
                Err(BridgeError::Broker(e.with_context("producer disconnect")))
            }
        }
    }
}

impl Drop for ProducerChannel {
    fn drop(&mut self) {
        let tasks = match self.tasks.get_mut() {
            Ok(t) => std::mem::take(t),
            Err(poisoned) => std::mem::take(poisoned.into_inner()),
        };
        for task in tasks {
            task.abort();
        }
    }
}

/// One send per destination topic, all in flight at once.
///
/// Results come back in `topics` order regardless of completion order.
async fn fan_out(
    handle: &dyn ProducerHandle,
    topics: &[String],
    event: &Event,
) -> Vec<(String, Result<(), BrokerError>)> {
    let value = match event.value.to_json_text() {
        Ok(v) => v,
        Err(e) => {
            let error = BrokerError::from(e);
            return topics.iter().map(|t| (t.clone(), Err(error.clone()))).collect();
        }
    };
    let record = OutboundRecord {
        key: event.key.clone(),
        value,
        partition: event.partition,
        headers: event.headers.clone(),
        timestamp: event.timestamp.clone(),
    };

    let sends = topics.iter().map(|topic| {
        let records = vec![record.clone()];
        async move { (topic.clone(), handle.send(topic, records).await) }
    });
    futures::future::join_all(sends).await
}
