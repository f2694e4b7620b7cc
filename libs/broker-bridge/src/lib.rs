pub mod bus;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod instance;
pub mod process;
pub mod producer;
pub mod shutdown;

pub use bus::{ObserverBus, Subscription};
pub use config::{ConsumerConfig, InstanceOptions, ProducerConfig};
pub use connection::{ConnectionManager, ConnectionState};
pub use consumer::ConsumerChannel;
pub use error::{BridgeError, BusError};
pub use instance::{BridgeContext, Instance, create_instance};
pub use process::{OsProcess, ProcessControl};
pub use producer::ProducerChannel;
pub use shutdown::{
    FatalEvent, FatalReporter, ShutdownCoordinator, ShutdownHooks, install_shutdown_hooks,
};
