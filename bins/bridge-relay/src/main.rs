mod config;
mod error;

use std::sync::Arc;

use clap::Parser;
use config::{BrokerKind, Cli, Commands, RelayConfig, RunArgs};
use error::RelayError;

use broker_api::ClientFactory;
use broker_bridge::{BridgeContext, install_shutdown_hooks};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(args) => run(args).await,
    };
    if let Err(e) = result {
        tracing::error!(error = %e, "bridge-relay failed");
        std::process::exit(1);
    }
}

/// Records kept per topic by the in-process broker.
const MEMORY_RETENTION: usize = 10_000;

fn client_factory(kind: BrokerKind) -> Result<Arc<dyn ClientFactory>, RelayError> {
    match kind {
        BrokerKind::Memory => {
            tracing::warn!(
                retention = MEMORY_RETENTION,
                "memory broker is process-local; no external producer can reach it"
            );
            Ok(Arc::new(broker_memory::MemoryClientFactory::new(
                broker_memory::MemoryBroker::with_retention(MEMORY_RETENTION),
            )))
        }
        #[cfg(feature = "kafka")]
        BrokerKind::Kafka => Ok(Arc::new(broker_kafka::KafkaClientFactory)),
        #[cfg(not(feature = "kafka"))]
        BrokerKind::Kafka => Err(RelayError::BrokerUnavailable("kafka")),
    }
}

async fn run(args: RunArgs) -> Result<(), RelayError> {
    let config = RelayConfig::load(&args.config)?;
    tracing::info!(config = %args.config, broker = ?config.broker, relay = config.relay, "loaded config");

    if config.options.consumer_config.is_none() {
        return Err(RelayError::NoComponents("[consumer_config]"));
    }
    if config.relay && config.options.producer_config.is_none() {
        return Err(RelayError::NoComponents("[producer_config] for relay"));
    }

    let ctx = BridgeContext::global();
    ctx.set_client_factory(client_factory(config.broker)?);

    // Hooks first: they resolve the instance when they fire.
    let hooks = install_shutdown_hooks(ctx.clone())?;
    let instance = ctx.get_instance(config.options)?;

    let Some(consumer) = instance.consumer() else {
        return Err(RelayError::NoComponents("consumer"));
    };
    let producer = if config.relay { instance.producer() } else { None };

    tracing::info!(group = %consumer.group_id(), topics = ?consumer.topics(), "relay ready");

    let mut events = consumer.subscribe();
    while let Some(msg) = events.recv().await {
        match producer {
            Some(p) => {
                if let Err(e) = p.publish(msg.topic.clone(), msg.message) {
                    tracing::warn!(source = %msg.topic, error = %e, "relay intake closed");
                }
            }
            None => tracing::info!(
                topic = %msg.topic,
                key = ?msg.message.key,
                partition = ?msg.message.partition,
                "event"
            ),
        }
    }

    tracing::info!("consumer stream completed");
    hooks.remove();
    Ok(())
}
