#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("no {0} configured")]
    NoComponents(&'static str),

    #[error("broker '{0}' is not available in this build")]
    BrokerUnavailable(&'static str),

    #[error("{0}")]
    Bridge(#[from] broker_bridge::BridgeError),
}
