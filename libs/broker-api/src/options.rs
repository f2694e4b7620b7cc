use std::sync::Arc;

use serde::Deserialize;

use crate::client::BrokerClient;
use crate::error::BrokerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SaslMechanism {
    Plain,
    #[serde(rename = "scram-sha-256")]
    ScramSha256,
    #[serde(rename = "scram-sha-512")]
    ScramSha512,
}

impl SaslMechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaslMechanism::Plain => "PLAIN",
            SaslMechanism::ScramSha256 => "SCRAM-SHA-256",
            SaslMechanism::ScramSha512 => "SCRAM-SHA-512",
        }
    }
}

#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct SaslConfig {
    pub mechanism: SaslMechanism,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for SaslConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaslConfig")
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Connection settings for the broker endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientOptions {
    /// Bootstrap address, `host:port`.
    pub kafka_host: String,
    /// Client id reported to the broker.
    pub service_id: String,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub sasl: Option<SaslConfig>,
}

/// Builds a broker client from connection settings.
///
/// Implementations: the memory and kafka broker plugins.
pub trait ClientFactory: Send + Sync {
    fn create(&self, options: &ClientOptions) -> Result<Arc<dyn BrokerClient>, BrokerError>;
}
