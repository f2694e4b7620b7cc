use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use broker_bridge::InstanceOptions;

use crate::error::RelayError;

#[derive(Parser)]
#[command(name = "bridge-relay", about = "Consume broker topics, log or relay the events")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the relay until a termination signal arrives.
    Run(RunArgs),
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Path to TOML configuration file.
    #[arg(long, default_value = "bridge.toml", env = "BRIDGE_CONFIG")]
    pub config: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    Kafka,
    /// Local loopback for trying a config out. Nothing outside this process
    /// can publish to it, so the relay only sees what it produces itself.
    Memory,
}

fn default_broker() -> BrokerKind {
    BrokerKind::Kafka
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_broker")]
    pub broker: BrokerKind,
    /// Forward every consumed event to the producer's destination topics.
    #[serde(default)]
    pub relay: bool,
    #[serde(flatten)]
    pub options: InstanceOptions,
}

impl RelayConfig {
    pub fn load(path: &str) -> Result<Self, RelayError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content)
            .map_err(|e| RelayError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }

    pub fn parse(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }
}
