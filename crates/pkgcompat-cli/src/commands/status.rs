use super::{colorize_state, executor, json_pretty, CliError, EXIT_SUCCESS};
use pkgcompat_schema::CompatConfig;
use std::os::unix::net::UnixStream;
use std::path::Path;

pub fn run(config: &CompatConfig, socket: &Path, json: bool) -> Result<u8, CliError> {
    let executor = executor(config)?;
    let daemon_running = UnixStream::connect(socket).is_ok();
    let launcher = executor.launcher();
    let launcher_available = launcher.available();

    let mut rows = Vec::new();
    for distro in executor.supported_distros() {
        let state = executor.state(&distro)?;
        let missing: Vec<String> = executor
            .missing_binaries(&distro)?
            .into_iter()
            .map(|m| m.name)
            .collect();
        rows.push((distro, state.to_string(), missing));
    }

    if json {
        let distros: Vec<_> = rows
            .iter()
            .map(|(distro, state, missing)| {
                serde_json::json!({
                    "distro": distro,
                    "state": state,
                    "missing_binaries": missing,
                })
            })
            .collect();
        let payload = serde_json::json!({
            "socket": socket,
            "daemon_running": daemon_running,
            "launcher": launcher.name(),
            "launcher_available": launcher_available,
            "distros": distros,
        });
        println!("{}", json_pretty(&payload)?);
        return Ok(EXIT_SUCCESS);
    }

    let daemon = if daemon_running { "running" } else { "not running" };
    println!("daemon: {daemon} ({})", socket.display());
    if launcher_available {
        println!("launcher: {}", launcher.name());
    } else {
        println!("launcher: {} (unavailable on this system)", launcher.name());
    }
    println!("{:<10} {:<10} COMPAT BINARIES", "DISTRO", "ROOT");
    for (distro, state, missing) in &rows {
        let binaries = if missing.is_empty() {
            "ok".to_owned()
        } else {
            format!("missing {}", missing.join(", "))
        };
        // Escape codes would count towards the width, so pad by hand.
        let pad = " ".repeat(10usize.saturating_sub(state.len()));
        println!("{:<10} {}{pad} {binaries}", distro.as_str(), colorize_state(state));
    }
    Ok(EXIT_SUCCESS)
}
