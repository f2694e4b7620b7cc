//! Scripted broker and recording process control shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use broker_api::{
    BrokerClient, BrokerError, BrokerRecord, ConsumerHandle, ConsumerTuning, OutboundRecord,
    ProducerHandle, ProducerTuning, RecordHandler,
};
use broker_bridge::{ConnectionState, ProcessControl};

type BoxFuture<'a> = Pin<Box<dyn Future<Output = Result<(), BrokerError>> + Send + 'a>>;

pub const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// ScriptedBroker
// ============================================================================

/// Broker whose failures and deliveries are set up front by the test.
#[derive(Default)]
pub struct Script {
    consumer_connect_failures: AtomicUsize,
    producer_connect_failures: AtomicUsize,
    subscribe_failures: Mutex<HashMap<String, usize>>,
    records: Mutex<Vec<BrokerRecord>>,
    run_error: Mutex<Option<BrokerError>>,
    send_failures: Mutex<HashSet<String>>,
    disconnect_error: Mutex<Option<BrokerError>>,
    hang_disconnect: AtomicBool,

    pub consumer_connects: AtomicUsize,
    pub producer_connects: AtomicUsize,
    pub subscribe_attempts: Mutex<Vec<String>>,
    pub run_entered: AtomicBool,
    pub consumer_disconnects: AtomicUsize,
    pub producer_disconnects: AtomicUsize,
    pub sent: Mutex<Vec<(String, OutboundRecord)>>,
    stopped: AtomicBool,
}

#[derive(Clone, Default)]
pub struct ScriptedBroker {
    pub script: Arc<Script>,
}

impl ScriptedBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_consumer_connect(self, times: usize) -> Self {
        self.script.consumer_connect_failures.store(times, Ordering::SeqCst);
        self
    }

    pub fn fail_producer_connect(self, times: usize) -> Self {
        self.script.producer_connect_failures.store(times, Ordering::SeqCst);
        self
    }

    pub fn fail_subscribe(self, topic: &str, times: usize) -> Self {
        self.script
            .subscribe_failures
            .lock()
            .unwrap()
            .insert(topic.to_string(), times);
        self
    }

    /// Delivered in order once `run` starts.
    pub fn deliver(self, record: BrokerRecord) -> Self {
        self.script.records.lock().unwrap().push(record);
        self
    }

    pub fn fail_run(self, error: BrokerError) -> Self {
        *self.script.run_error.lock().unwrap() = Some(error);
        self
    }

    pub fn fail_send_to(self, topic: &str) -> Self {
        self.script.send_failures.lock().unwrap().insert(topic.to_string());
        self
    }

    pub fn fail_disconnect(self, error: BrokerError) -> Self {
        *self.script.disconnect_error.lock().unwrap() = Some(error);
        self
    }

    /// Consumer `disconnect()` never resolves.
    pub fn hang_disconnect(self) -> Self {
        self.script.hang_disconnect.store(true, Ordering::SeqCst);
        self
    }

    pub fn client(&self) -> Arc<dyn BrokerClient> {
        Arc::new(self.clone())
    }

    pub fn sent(&self) -> Vec<(String, OutboundRecord)> {
        self.script.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self) -> Vec<String> {
        self.sent().into_iter().map(|(t, _)| t).collect()
    }

    pub fn run_entered(&self) -> bool {
        self.script.run_entered.load(Ordering::SeqCst)
    }

    pub fn subscribe_attempts(&self) -> Vec<String> {
        self.script.subscribe_attempts.lock().unwrap().clone()
    }

    pub async fn wait_for_sends(&self, count: usize) -> Vec<(String, OutboundRecord)> {
        wait_until(|| self.script.sent.lock().unwrap().len() >= count).await;
        self.sent()
    }
}

impl BrokerClient for ScriptedBroker {
    fn consumer(
        &self,
        _group_id: &str,
        _tuning: &ConsumerTuning,
    ) -> Result<Arc<dyn ConsumerHandle>, BrokerError> {
        Ok(Arc::new(ScriptedConsumer(self.script.clone())))
    }

    fn producer(&self, _tuning: &ProducerTuning) -> Result<Arc<dyn ProducerHandle>, BrokerError> {
        Ok(Arc::new(ScriptedProducer(self.script.clone())))
    }
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

struct ScriptedConsumer(Arc<Script>);

impl ConsumerHandle for ScriptedConsumer {
    fn connect(&self) -> BoxFuture<'_> {
        Box::pin(async move {
            self.0.consumer_connects.fetch_add(1, Ordering::SeqCst);
            if take_failure(&self.0.consumer_connect_failures) {
                return Err(BrokerError::connection("broker unreachable"));
            }
            Ok(())
        })
    }

    fn subscribe(&self, topic: &str) -> BoxFuture<'_> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.0.subscribe_attempts.lock().unwrap().push(topic.clone());
            let mut failures = self.0.subscribe_failures.lock().unwrap();
            if let Some(n) = failures.get_mut(&topic) {
                if *n > 0 {
                    *n -= 1;
                    return Err(BrokerError::subscription(format!("unknown topic '{topic}'")));
                }
            }
            Ok(())
        })
    }

    fn run(&self, handler: RecordHandler) -> BoxFuture<'_> {
        Box::pin(async move {
            self.0.run_entered.store(true, Ordering::SeqCst);
            if let Some(e) = self.0.run_error.lock().unwrap().take() {
                return Err(e);
            }
            let records = std::mem::take(&mut *self.0.records.lock().unwrap());
            for record in records {
                handler(record);
            }
            while !self.0.stopped.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Ok(())
        })
    }

    fn disconnect(&self) -> BoxFuture<'_> {
        Box::pin(async move {
            self.0.consumer_disconnects.fetch_add(1, Ordering::SeqCst);
            self.0.stopped.store(true, Ordering::SeqCst);
            if self.0.hang_disconnect.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            match self.0.disconnect_error.lock().unwrap().take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }
}

struct ScriptedProducer(Arc<Script>);

impl ProducerHandle for ScriptedProducer {
    fn connect(&self) -> BoxFuture<'_> {
        Box::pin(async move {
            self.0.producer_connects.fetch_add(1, Ordering::SeqCst);
            if take_failure(&self.0.producer_connect_failures) {
                return Err(BrokerError::connection("broker unreachable"));
            }
            Ok(())
        })
    }

    fn send(&self, topic: &str, records: Vec<OutboundRecord>) -> BoxFuture<'_> {
        let topic = topic.to_string();
        Box::pin(async move {
            if self.0.send_failures.lock().unwrap().contains(&topic) {
                return Err(BrokerError::send(format!("leader not available for '{topic}'")));
            }
            let mut sent = self.0.sent.lock().unwrap();
            for record in records {
                sent.push((topic.clone(), record));
            }
            Ok(())
        })
    }

    fn disconnect(&self) -> BoxFuture<'_> {
        Box::pin(async move {
            self.0.producer_disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

// ============================================================================
// RecordingProcess
// ============================================================================

/// Records exit and raise requests instead of terminating.
#[derive(Default)]
pub struct RecordingProcess {
    exits: Mutex<Vec<i32>>,
    raised: Mutex<Vec<i32>>,
}

impl RecordingProcess {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn exits(&self) -> Vec<i32> {
        self.exits.lock().unwrap().clone()
    }

    pub fn raised(&self) -> Vec<i32> {
        self.raised.lock().unwrap().clone()
    }

    pub async fn wait_exit(&self) -> i32 {
        wait_until(|| !self.exits.lock().unwrap().is_empty()).await;
        self.exits()[0]
    }

    pub async fn wait_raise(&self) -> i32 {
        wait_until(|| !self.raised.lock().unwrap().is_empty()).await;
        self.raised()[0]
    }
}

impl ProcessControl for RecordingProcess {
    fn exit(&self, code: i32) {
        self.exits.lock().unwrap().push(code);
    }

    fn raise(&self, signal: i32) {
        self.raised.lock().unwrap().push(signal);
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Poll `cond` until it holds; panics after [`WAIT`].
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub async fn wait_for_state(mut rx: watch::Receiver<ConnectionState>, state: ConnectionState) {
    tokio::time::timeout(WAIT, rx.wait_for(|s| *s == state))
        .await
        .expect("state not reached in time")
        .expect("state sender dropped");
}

pub fn record(topic: &str, value: &[u8]) -> BrokerRecord {
    BrokerRecord::new(topic, value.to_vec())
}
