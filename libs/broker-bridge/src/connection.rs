use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use broker_api::BrokerError;

use crate::error::BridgeError;
use crate::process::{FATAL_EXIT_CODE, ProcessControl};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Retrying,
    Fatal,
}

/// Two-attempt establish policy shared by connect and subscribe.
///
/// A failed operation is retried exactly once. A second failure terminates
/// the process through [`ProcessControl`]; it is never handed back as a
/// recoverable error.
pub struct ConnectionManager {
    channel: &'static str,
    state: watch::Sender<ConnectionState>,
    control: Arc<dyn ProcessControl>,
}

impl ConnectionManager {
    pub fn new(
        channel: &'static str,
        state: watch::Sender<ConnectionState>,
        control: Arc<dyn ProcessControl>,
    ) -> Self {
        Self { channel, state, control }
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Run `operation`, retrying once on failure.
    ///
    /// Returns `Err(BridgeError::Fatal)` only after the exit has been requested.
    pub async fn establish<F, Fut>(&self, operation: &str, op: F) -> Result<(), BridgeError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), BrokerError>>,
    {
        let first = match op().await {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                return Ok(());
            }
            Err(e) => e,
        };

        tracing::error!(channel = self.channel, operation, error = %first, "error during {operation}");
        tracing::warn!(channel = self.channel, operation, "retrying {operation}");
        self.set_state(ConnectionState::Retrying);

        match op().await {
            Ok(()) => {
                tracing::info!(channel = self.channel, operation, "{operation} succeeded on retry");
                self.set_state(ConnectionState::Connected);
                Ok(())
            }
            Err(second) => {
                tracing::error!(
                    channel = self.channel,
                    operation,
                    error = %second,
                    "error during final {operation} attempt"
                );
                tracing::error!(channel = self.channel, operation, "terminating: {operation} failed twice");
                self.set_state(ConnectionState::Fatal);
                self.control.exit(FATAL_EXIT_CODE);
                Err(BridgeError::Fatal {
                    operation: operation.to_string(),
                    source: second,
                })
            }
        }
    }
}
