//! `SignalRouter`: a dedicated thread that blocks on the next
//! signal and reacts to it, rather than interrupting whichever worker
//! thread happened to be scheduled.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use signal_hook::consts::{SIGINT, SIGPIPE, SIGSEGV, SIGTERM, SIGUSR1};
use signal_hook::iterator::{Handle, Signals};
use tracing::{error, info, warn};

/// `shutdownsig` values: 0 = running, 1 = a shutdown
/// signal has been requested, 2 = the supervisor has acted on it.
pub const SHUTDOWN_RUNNING: u8 = 0;
pub const SHUTDOWN_REQUESTED: u8 = 1;
pub const SHUTDOWN_INITIATED: u8 = 2;

/// Raised by USR1; the supervisor (or whoever owns the ring/registry)
/// checks this and dumps parameters at elevated verbosity, then clears it.
pub struct SignalRouter {
    handle: Handle,
    join: Option<JoinHandle<()>>,
}

impl SignalRouter {
    /// Spawn the signal thread. `shutdownsig` is shared with the
    /// supervisor's tick loop; `dump_requested` is set on USR1 for the
    /// supervisor to notice and act on during its next tick.
    pub fn spawn(shutdownsig: Arc<AtomicU8>, dump_requested: Arc<AtomicBool>) -> io::Result<Self> {
        // SIGSEGV is included so a fault gets logged before exit; signal-hook
        // only forbids SIGKILL/SIGSTOP from registration, but a handler
        // running this far from the faulting frame is best-effort at most.
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGUSR1, SIGSEGV, SIGPIPE])?;
        let handle = signals.handle();

        let join = std::thread::Builder::new()
            .name("signal-router".into())
            .spawn(move || {
                for signal in signals.forever() {
                    match signal {
                        SIGTERM | SIGINT => {
                            info!(signal, "shutdown signal received");
                            shutdownsig.store(SHUTDOWN_REQUESTED, Ordering::SeqCst);
                        }
                        SIGUSR1 => {
                            info!("USR1 received, elevating verbosity and dumping parameters");
                            dump_requested.store(true, Ordering::SeqCst);
                        }
                        SIGSEGV => {
                            error!("SEGV received, exiting immediately");
                            std::process::exit(139);
                        }
                        SIGPIPE => {
                            // permanently ignored
                        }
                        other => {
                            warn!(signal = other, "unhandled signal, ignoring");
                        }
                    }
                }
            })?;

        Ok(Self {
            handle,
            join: Some(join),
        })
    }

    /// Cancel and join the signal thread.
    pub fn shutdown(mut self) {
        self.handle.close();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
