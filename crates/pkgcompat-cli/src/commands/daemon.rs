use super::{executor, CliError, EXIT_SUCCESS};
use pkgcompat_core::{Daemon, DaemonOptions, ShutdownSignal};
use pkgcompat_schema::CompatConfig;
use std::fs;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

fn bind(socket: &Path) -> Result<UnixListener, String> {
    if let Some(parent) = socket.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
    }
    if socket.exists() {
        if UnixStream::connect(socket).is_ok() {
            return Err(format!("a daemon is already listening on {}", socket.display()));
        }
        fs::remove_file(socket)
            .map_err(|e| format!("failed to remove stale socket {}: {e}", socket.display()))?;
    }
    UnixListener::bind(socket).map_err(|e| format!("failed to bind {}: {e}", socket.display()))
}

pub fn run(config: &CompatConfig, socket: &Path, keep_roots: bool) -> Result<u8, CliError> {
    let executor = Arc::new(executor(config)?);
    let launcher = executor.launcher();
    if !launcher.available() {
        warn!(
            "launcher '{}' is unavailable on this system; operations will fail",
            launcher.name()
        );
    }

    // Installed before the socket appears, so a client that sees the socket
    // can always stop the daemon gracefully.
    let signal = ShutdownSignal::new();
    signal.wake_on(socket);
    signal
        .install_handler()
        .map_err(|e| format!("failed to install signal handler: {e}"))?;
    let listener = bind(socket)?;

    let daemon = Daemon::start(Arc::clone(&executor), DaemonOptions::from_config(config));
    let served = daemon.serve_unix(&listener, &signal);
    daemon.shutdown();
    let _ = fs::remove_file(socket);

    if !keep_roots {
        executor.shutdown()?;
    }
    served.map_err(|e| format!("daemon socket: {e}"))?;
    info!("daemon exited");
    Ok(EXIT_SUCCESS)
}
