//! Shutdown/restart coordination between signal delivery and the session.

use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use tracing::info;

#[derive(Debug, Default)]
struct LifecycleState {
    shutdown: bool,
    restart: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<LifecycleState>,
    wake: Condvar,
}

/// Why [`Lifecycle::wait`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// Shutdown was requested; the flag stays set.
    Shutdown,
    /// A restart was requested; the request has been consumed.
    Restart,
}

/// Cancellation token the session thread blocks on while streaming.
///
/// The shutdown flag is monotonic: once set it is never cleared. Both flags
/// are written under the same lock the waiter checks, and the waiter
/// re-checks after every wakeup.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    shared: Arc<Shared>,
}

impl Lifecycle {
    /// Create a controller in the running state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the shutdown flag and wake the waiter. Returns `true` only for the
    /// call that actually set the flag.
    pub fn request_shutdown(&self) -> bool {
        let mut state = self.shared.state.lock();
        let first = !state.shutdown;
        state.shutdown = true;
        self.shared.wake.notify_all();
        first
    }

    /// Ask the session to cycle its streams. Ignored after shutdown.
    pub fn request_restart(&self) {
        let mut state = self.shared.state.lock();
        if !state.shutdown {
            state.restart = true;
        }
        self.shared.wake.notify_all();
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    /// Block until shutdown or a restart is requested.
    pub fn wait(&self) -> WakeReason {
        let mut state = self.shared.state.lock();
        loop {
            if state.shutdown {
                return WakeReason::Shutdown;
            }
            if state.restart {
                state.restart = false;
                return WakeReason::Restart;
            }
            self.shared.wake.wait(&mut state);
        }
    }
}

/// Listener thread translating process signals into [`Lifecycle`] requests.
///
/// SIGINT and SIGTERM request shutdown, SIGHUP requests a restart. The
/// listener stops when dropped.
pub struct SignalListener {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

/// Register handlers for SIGINT, SIGTERM and SIGHUP.
pub fn install_signal_handlers(lifecycle: &Lifecycle) -> std::io::Result<SignalListener> {
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;
    let handle = signals.handle();
    let lifecycle = lifecycle.clone();

    let thread = std::thread::Builder::new()
        .name("signal-listener".to_owned())
        .spawn(move || {
            for signal in signals.forever() {
                if signal == SIGHUP {
                    lifecycle.request_restart();
                    info!("received SIGHUP, restarting capture");
                } else if lifecycle.request_shutdown() {
                    info!(signal, "shutdown requested");
                }
            }
        })?;

    Ok(SignalListener {
        handle,
        thread: Some(thread),
    })
}

impl Drop for SignalListener {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
