pub mod completions;
pub mod daemon;
pub mod install;
pub mod man_pages;
pub mod remove;
pub mod status;
pub mod teardown;
pub mod translate;
pub mod verify;

use indicatif::{ProgressBar, ProgressStyle};
use pkgcompat_core::{
    BindingRegistry, CoreError, Daemon, DaemonOptions, DispatchError, Dispatcher,
    DispatcherOptions, Executor, StatusCode,
};
use pkgcompat_runtime::RuntimeError;
use pkgcompat_schema::{CompatConfig, ConfigError, DistroId, OperationKind};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_ROOT_ERROR: u8 = 3;

/// A command failure, classified by the exit status it maps to.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Root(RuntimeError),
    #[error("{0}")]
    Failure(String),
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => EXIT_CONFIG_ERROR,
            Self::Root(_) => EXIT_ROOT_ERROR,
            Self::Failure(_) => EXIT_FAILURE,
        }
    }
}

impl From<String> for CliError {
    fn from(msg: String) -> Self {
        Self::Failure(msg)
    }
}

impl From<CoreError> for CliError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Runtime(
                e @ (RuntimeError::RootCorrupted(_) | RuntimeError::StagingFailed(_)),
            ) => Self::Root(e),
            CoreError::Config(e) => Self::Config(e),
            other => Self::Failure(other.to_string()),
        }
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn finish_spinner(pb: &ProgressBar, msg: String) {
    if let Ok(style) = ProgressStyle::with_template("{msg}") {
        pb.set_style(style);
    }
    pb.finish_with_message(msg);
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    finish_spinner(pb, format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    finish_spinner(pb, format!("✗ {msg}"));
}

pub fn colorize_state(state: &str) -> String {
    use console::Style;
    match state {
        "staged" => Style::new().green().apply_to(state).to_string(),
        "active" => Style::new().cyan().bold().apply_to(state).to_string(),
        "unstaged" => Style::new().yellow().apply_to(state).to_string(),
        "torn_down" => Style::new().dim().apply_to(state).to_string(),
        other => other.to_owned(),
    }
}

pub fn parse_distro(input: &str) -> Result<DistroId, String> {
    DistroId::parse(input).ok_or_else(|| format!("invalid distro identifier '{input}'"))
}

pub fn executor(config: &CompatConfig) -> Result<Executor, CliError> {
    Ok(Executor::from_config(config)?)
}

/// A dispatcher plus, in embedded mode, the in-process daemon behind it.
pub struct Session {
    dispatcher: Dispatcher,
    daemon: Option<Arc<Daemon>>,
}

impl Session {
    pub fn open(config: &CompatConfig, socket: &Path, embedded: bool) -> Result<Self, CliError> {
        let supported = BindingRegistry::builtin(config).distros();
        let options = DispatcherOptions::from_config(config);
        if embedded {
            let daemon = Daemon::start(
                Arc::new(executor(config)?),
                DaemonOptions::from_config(config),
            );
            let transport = daemon.connect_in_memory();
            let dispatcher = Dispatcher::connect(Arc::new(transport), supported, options)
                .map_err(|e| e.to_string())?;
            Ok(Self {
                dispatcher,
                daemon: Some(daemon),
            })
        } else {
            let dispatcher = Dispatcher::connect_unix(socket, supported, options)
                .map_err(|e| format!("cannot reach daemon: {e}"))?;
            Ok(Self {
                dispatcher,
                daemon: None,
            })
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispatcher.shutdown();
        if let Some(daemon) = &self.daemon {
            daemon.shutdown();
        }
    }
}

/// Submit one install/remove and report it. A foreign tool's exit status
/// becomes the process exit status.
pub fn run_operation(
    session: &Session,
    kind: OperationKind,
    distro: &str,
    packages: &[String],
    json: bool,
) -> Result<u8, CliError> {
    let verb = match kind {
        OperationKind::Install => "installing",
        OperationKind::Remove => "removing",
    };
    let pb = if json {
        None
    } else {
        Some(spinner(&format!("{verb} {} ({distro})...", packages.join(" "))))
    };

    let outcome = session.dispatcher().submit_specs(kind, distro, packages);
    if let Some(ref pb) = pb {
        match &outcome {
            Ok(_) => spin_ok(pb, &format!("{kind} finished")),
            Err(_) => spin_fail(pb, &format!("{kind} failed")),
        }
    }

    match outcome {
        Ok(done) => {
            if json {
                let payload = serde_json::json!({
                    "kind": kind.to_string(),
                    "distro": distro,
                    "packages": packages,
                    "status": done.status.raw(),
                    "warnings": done.warnings,
                });
                println!("{}", json_pretty(&payload)?);
            } else {
                println!("{kind} {distro}: {}", packages.join(" "));
                for name in &done.warnings {
                    println!("warning: no native package for '{name}'");
                }
            }
            Ok(EXIT_SUCCESS)
        }
        Err(DispatchError::Daemon(StatusCode::ForeignExit(n))) => {
            eprintln!("error: foreign package manager exited with status {n}");
            Ok(u8::try_from(n).unwrap_or(EXIT_FAILURE))
        }
        Err(DispatchError::Daemon(
            code @ (StatusCode::StagingFailed | StatusCode::RootCorrupted),
        )) => {
            eprintln!("error: isolation root unusable ({code})");
            Ok(EXIT_ROOT_ERROR)
        }
        Err(e) => Err(CliError::Failure(e.to_string())),
    }
}
