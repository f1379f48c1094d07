//! Daemon stop requests.
//!
//! [`Daemon::serve_unix`](crate::Daemon::serve_unix) blocks in `accept`, so a
//! stop request sets the flag and then connects to the listening socket once;
//! the accept loop wakes, sees the flag, and drops that connection.

use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

#[derive(Default)]
struct SignalState {
    requested: AtomicBool,
    wake: Mutex<Option<PathBuf>>,
}

#[derive(Clone, Default)]
pub struct ShutdownSignal {
    state: Arc<SignalState>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to `socket` when a stop is requested.
    pub fn wake_on(&self, socket: &Path) {
        if let Ok(mut wake) = self.state.wake.lock() {
            *wake = Some(socket.to_path_buf());
        }
    }

    /// Ask the daemon to stop accepting clients. Returns false if a stop
    /// had already been requested.
    pub fn request(&self) -> bool {
        if self.state.requested.swap(true, Ordering::SeqCst) {
            return false;
        }
        let wake = self.state.wake.lock().ok().and_then(|w| w.clone());
        if let Some(socket) = wake {
            if let Err(e) = UnixStream::connect(&socket) {
                debug!("wake-up connect to {} failed: {e}", socket.display());
            }
        }
        true
    }

    pub fn is_requested(&self) -> bool {
        self.state.requested.load(Ordering::SeqCst)
    }

    /// Route SIGINT/SIGTERM to this signal. The first asks the daemon to
    /// finish in-flight operations and exit; a second exits immediately.
    pub fn install_handler(&self) -> Result<(), ctrlc::Error> {
        let signal = self.clone();
        ctrlc::set_handler(move || {
            if !signal.request() {
                std::process::exit(1);
            }
            eprintln!("\nshutdown requested, finishing in-flight operations...");
        })?;
        info!("signal handler installed");
        Ok(())
    }
}
