use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use broker_api::BrokerError;

use crate::error::BridgeError;
use crate::instance::BridgeContext;
use crate::process::{FATAL_EXIT_CODE, restore_default_dispositions};

// ═══════════════════════════════════════════════════════════════
//  Fatal events
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub enum FatalEvent {
    /// A panic anywhere in the process (forwarded by the panic hook).
    Panic { message: String },
    /// An asynchronous producer send failed.
    SendFailed { topic: String, error: BrokerError },
    /// Raised by application code.
    Application(String),
}

impl std::fmt::Display for FatalEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FatalEvent::Panic { message } => write!(f, "panic: {message}"),
            FatalEvent::SendFailed { topic, error } => write!(f, "send to '{topic}' failed: {error}"),
            FatalEvent::Application(msg) => write!(f, "application: {msg}"),
        }
    }
}

/// Handle for escalating unrecoverable failures to the installed shutdown hooks.
///
/// Cloned into every component that can fail asynchronously. With no hooks
/// installed a report is only logged.
#[derive(Clone, Default)]
pub struct FatalReporter {
    slot: Arc<RwLock<Option<mpsc::UnboundedSender<FatalEvent>>>>,
}

impl std::fmt::Debug for FatalReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FatalReporter")
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl FatalReporter {
    /// Returns `true` when the event reached an installed hook.
    pub fn report(&self, event: FatalEvent) -> bool {
        let sender = match self.slot.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        match sender {
            Some(tx) if tx.send(event.clone()).is_ok() => true,
            _ => {
                tracing::error!(%event, "fatal event with no shutdown hooks installed");
                false
            }
        }
    }

    pub fn is_attached(&self) -> bool {
        match self.slot.read() {
            Ok(g) => g.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }

    fn attach(&self) -> mpsc::UnboundedReceiver<FatalEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.set(Some(tx));
        rx
    }

    fn detach(&self) {
        self.set(None);
    }

    fn set(&self, sender: Option<mpsc::UnboundedSender<FatalEvent>>) {
        let mut guard = match self.slot.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("fatal reporter lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        *guard = sender;
    }
}

// ═══════════════════════════════════════════════════════════════
//  Termination signals
// ═══════════════════════════════════════════════════════════════

#[cfg(unix)]
struct TerminationSignals {
    hangup: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl TerminationSignals {
    /// Handlers are registered by the time this returns.
    fn register() -> Result<Self, BridgeError> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn recv(&mut self) -> Option<i32> {
        use crate::process::signals::{SIGHUP, SIGINT, SIGTERM};
        tokio::select! {
            Some(()) = self.hangup.recv() => Some(SIGHUP),
            Some(()) = self.interrupt.recv() => Some(SIGINT),
            Some(()) = self.terminate.recv() => Some(SIGTERM),
            else => None,
        }
    }
}

#[cfg(not(unix))]
struct TerminationSignals;

#[cfg(not(unix))]
impl TerminationSignals {
    fn register() -> Result<Self, BridgeError> {
        Ok(Self)
    }

    async fn recv(&mut self) -> Option<i32> {
        tokio::signal::ctrl_c().await.ok()?;
        Some(crate::process::signals::SIGINT)
    }
}

async fn next_signal(signals: &mut Option<TerminationSignals>) -> Option<i32> {
    match signals {
        Some(s) => s.recv().await,
        None => std::future::pending().await,
    }
}

// ═══════════════════════════════════════════════════════════════
//  Coordinator
// ═══════════════════════════════════════════════════════════════

type PanicHook = Arc<dyn Fn(&std::panic::PanicHookInfo<'_>) + Send + Sync + 'static>;

/// Builder for the process-wide shutdown hooks.
///
/// Both hook families resolve the context's instance when they fire, so
/// channels constructed after installation are still drained.
pub struct ShutdownCoordinator {
    ctx: Arc<BridgeContext>,
    signals: bool,
    panic_hook: bool,
}

impl ShutdownCoordinator {
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self {
            ctx,
            signals: true,
            panic_hook: true,
        }
    }

    /// Listen for SIGHUP, SIGINT and SIGTERM (default on).
    pub fn with_signals(mut self, enabled: bool) -> Self {
        self.signals = enabled;
        self
    }

    /// Forward panics as fatal events (default on).
    pub fn with_panic_hook(mut self, enabled: bool) -> Self {
        self.panic_hook = enabled;
        self
    }

    /// Must be called from within a tokio runtime.
    pub fn install(self) -> Result<ShutdownHooks, BridgeError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BridgeError::NoRuntime(e.to_string()))?;

        let signals = if self.signals {
            Some(TerminationSignals::register()?)
        } else {
            None
        };

        let reporter = self.ctx.fatal_reporter();
        let fatal_rx = reporter.attach();

        let previous_hook = if self.panic_hook {
            let panic_reporter = reporter.clone();
            let previous: PanicHook = Arc::from(std::panic::take_hook());
            let chained = previous.clone();
            std::panic::set_hook(Box::new(move |info| {
                chained(info);
                panic_reporter.report(FatalEvent::Panic {
                    message: info.to_string(),
                });
            }));
            Some(previous)
        } else {
            None
        };

        let task = runtime.spawn(coordinate(self.ctx, fatal_rx, signals));
        tracing::info!(signals = self.signals, panic_hook = self.panic_hook, "shutdown hooks installed");

        Ok(ShutdownHooks {
            task,
            reporter,
            signals: self.signals,
            previous_hook,
        })
    }
}

/// Install every hook with defaults.
pub fn install_shutdown_hooks(ctx: Arc<BridgeContext>) -> Result<ShutdownHooks, BridgeError> {
    ShutdownCoordinator::new(ctx).install()
}

/// Installed hooks. Handles exactly one trigger, then finishes.
pub struct ShutdownHooks {
    task: JoinHandle<()>,
    reporter: FatalReporter,
    signals: bool,
    /// Hook that was active before `install`, restored by `remove`.
    previous_hook: Option<PanicHook>,
}

impl ShutdownHooks {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until a trigger has been handled.
    pub async fn join(self) {
        let _ = self.task.await;
    }

    /// Uninstall. The panic hook active before `install` is put back and
    /// the termination signals regain their default action.
    pub fn remove(self) {
        self.task.abort();
        self.reporter.detach();
        if self.signals {
            restore_default_dispositions();
        }
        if let Some(previous) = self.previous_hook {
            std::panic::set_hook(Box::new(move |info| previous(info)));
        }
        tracing::info!("shutdown hooks removed");
    }
}

async fn coordinate(
    ctx: Arc<BridgeContext>,
    mut fatal_rx: mpsc::UnboundedReceiver<FatalEvent>,
    mut signals: Option<TerminationSignals>,
) {
    tokio::select! {
        Some(event) = fatal_rx.recv() => {
            tracing::error!(%event, "fatal error, draining channels");
            let code = match drain(&ctx).await {
                Ok(()) => 0,
                Err(e) => {
                    tracing::error!(error = %e, "disconnect failed during fatal shutdown");
                    FATAL_EXIT_CODE
                }
            };
            ctx.control().exit(code);
        }
        Some(signal) = next_signal(&mut signals) => {
            tracing::info!(signal, "termination signal received, draining channels");
            // A second signal during a stuck drain must still terminate.
            restore_default_dispositions();
            if let Err(e) = drain(&ctx).await {
                tracing::error!(signal, error = %e, "disconnect failed during signal shutdown");
            }
            ctx.control().raise(signal);
        }
        else => {}
    }
}

async fn drain(ctx: &BridgeContext) -> Result<(), BridgeError> {
    match ctx.current() {
        Some(instance) => instance.disconnect().await,
        None => Ok(()),
    }
}
