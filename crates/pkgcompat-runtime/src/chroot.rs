use crate::isolation::IsolationEnvironment;
use crate::launcher::{LaunchOutput, Launcher};
use crate::RuntimeError;
use std::process::Command;
use tracing::debug;

const ROOT_PATH_ENV: &str = "/bin:/sbin:/usr/bin:/usr/sbin";

/// Runs the foreign tool in a user + mount namespace, chrooted into the staged root.
///
/// The host environment is not inherited; the tool sees only `PATH`, `HOME`,
/// and a marker variable.
#[derive(Debug, Default)]
pub struct ChrootLauncher;

impl ChrootLauncher {
    pub fn new() -> Self {
        Self
    }

    fn build_command(env: &IsolationEnvironment, argv: &[String]) -> Command {
        let mut cmd = Command::new("unshare");
        cmd.args([
            "--user",
            "--map-root-user",
            "--mount",
            "--fork",
            "--kill-child=SIGTERM",
            "chroot",
        ]);
        cmd.arg(&env.root_path);
        cmd.args(argv);
        cmd.env_clear()
            .env("PATH", ROOT_PATH_ENV)
            .env("HOME", "/tmp")
            .env("PKGCOMPAT_DISTRO", env.distro.as_str());
        cmd
    }
}

impl Launcher for ChrootLauncher {
    fn name(&self) -> &'static str {
        "chroot"
    }

    fn available(&self) -> bool {
        let output = Command::new("unshare")
            .args(["--user", "--map-root-user", "--fork", "true"])
            .output();
        matches!(output, Ok(o) if o.status.success())
    }

    fn run(
        &self,
        env: &IsolationEnvironment,
        argv: &[String],
    ) -> Result<LaunchOutput, RuntimeError> {
        if argv.is_empty() {
            return Err(RuntimeError::LaunchFailed("empty argv".to_owned()));
        }
        debug!("chroot {}: {}", env.root_path.display(), argv.join(" "));
        let output = Self::build_command(env, argv).output().map_err(|e| {
            RuntimeError::LaunchFailed(format!("failed to spawn unshare for {}: {e}", argv[0]))
        })?;
        Ok(LaunchOutput::from_process(&output))
    }
}
