use broker_api::BrokerError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("observer bus is closed")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("broker: {0}")]
    Broker(#[from] BrokerError),

    #[error("{0}")]
    Bus(#[from] BusError),

    #[error("send to topic '{topic}': {source}")]
    Send { topic: String, source: BrokerError },

    #[error("no tokio runtime available: {0}")]
    NoRuntime(String),

    #[error("no broker client supplied and no client factory configured")]
    NoBrokerClient,

    #[error("signal hook: {0}")]
    Signal(#[from] std::io::Error),

    #[error("{operation} failed after retry: {source}")]
    Fatal { operation: String, source: BrokerError },
}

impl BridgeError {
    /// Add context to the error. Only `Broker` carries it; other variants pass through.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            BridgeError::Broker(e) => BridgeError::Broker(e.with_context(ctx)),
            other => other,
        }
    }
}
