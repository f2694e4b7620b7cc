/// Exit status used when a channel hits an unrecoverable failure.
pub const FATAL_EXIT_CODE: i32 = 1;

/// Process termination seam.
///
/// Every fatal path in the bridge ends here. [`OsProcess`] terminates the
/// real process; tests substitute a recording implementation.
pub trait ProcessControl: Send + Sync {
    /// Terminate with `code`. The OS implementation does not return.
    fn exit(&self, code: i32);

    /// Re-deliver `signal` with its default disposition.
    fn raise(&self, signal: i32);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OsProcess;

impl ProcessControl for OsProcess {
    fn exit(&self, code: i32) {
        std::process::exit(code);
    }

    #[cfg(unix)]
    fn raise(&self, signal: i32) {
        use nix::sys::signal::{SigHandler, Signal};

        let sig = match Signal::try_from(signal) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(signal, error = %e, "cannot re-deliver unknown signal");
                std::process::exit(FATAL_EXIT_CODE);
            }
        };
        // SAFETY: SIG_DFL installs no Rust handler; the process is about to terminate.
        if let Err(e) = unsafe { nix::sys::signal::signal(sig, SigHandler::SigDfl) } {
            tracing::error!(signal = %sig, error = %e, "failed to restore default signal disposition");
        }
        if let Err(e) = nix::sys::signal::raise(sig) {
            tracing::error!(signal = %sig, error = %e, "failed to re-deliver signal");
        }
        // Default action did not terminate us (signal blocked); mimic the shell convention.
        std::process::exit(128 + signal);
    }

    #[cfg(not(unix))]
    fn raise(&self, signal: i32) {
        std::process::exit(128 + signal);
    }
}

/// Put SIGHUP, SIGINT and SIGTERM back to their default action.
///
/// Replaces the handlers tokio installed, so a later delivery terminates the
/// process instead of being queued for a listener that no longer drains.
#[cfg(unix)]
pub(crate) fn restore_default_dispositions() {
    use nix::sys::signal::{SigHandler, Signal};

    for sig in [Signal::SIGHUP, Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: SIG_DFL installs no Rust handler.
        if let Err(e) = unsafe { nix::sys::signal::signal(sig, SigHandler::SigDfl) } {
            tracing::warn!(signal = %sig, error = %e, "failed to restore default signal disposition");
        }
    }
}

#[cfg(not(unix))]
pub(crate) fn restore_default_dispositions() {}

/// Raw numbers of the termination signals the shutdown hooks listen for.
#[cfg(unix)]
pub mod signals {
    pub const SIGHUP: i32 = nix::libc::SIGHUP;
    pub const SIGINT: i32 = nix::libc::SIGINT;
    pub const SIGTERM: i32 = nix::libc::SIGTERM;
}

#[cfg(not(unix))]
pub mod signals {
    pub const SIGHUP: i32 = 1;
    pub const SIGINT: i32 = 2;
    pub const SIGTERM: i32 = 15;
}
