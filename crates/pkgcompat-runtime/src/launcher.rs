use crate::isolation::IsolationEnvironment;
use crate::RuntimeError;
use std::sync::Arc;

/// Result of one foreign-binary invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LaunchOutput {
    /// Exit code, or `128 + signal` when the process was killed.
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
    /// Set when the process did not exit on its own.
    pub signal: Option<i32>,
}

impl LaunchOutput {
    pub fn success(&self) -> bool {
        self.status == 0 && self.signal.is_none()
    }

    pub fn from_process(output: &std::process::Output) -> Self {
        use std::os::unix::process::ExitStatusExt;

        let signal = output.status.signal();
        let status = output
            .status
            .code()
            .unwrap_or_else(|| 128 + signal.unwrap_or(0));
        Self {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            signal,
        }
    }
}

/// Process-launch primitive: run `argv` inside a staged isolation root.
///
/// `argv[0]` is the in-root path of the tool (e.g. `/bin/apk`).
pub trait Launcher: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    fn run(&self, env: &IsolationEnvironment, argv: &[String])
        -> Result<LaunchOutput, RuntimeError>;
}

pub fn select_launcher(name: &str) -> Result<Arc<dyn Launcher>, RuntimeError> {
    match name {
        "chroot" => Ok(Arc::new(crate::chroot::ChrootLauncher::new())),
        "mock" => Ok(Arc::new(crate::mock::MockLauncher::new())),
        other => Err(RuntimeError::LauncherUnavailable(other.to_owned())),
    }
}
