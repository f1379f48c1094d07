use std::fmt;
use std::path::Path;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn user_namespaces_work() -> bool {
    Command::new("unshare")
        .args(["--user", "--map-root-user", "--fork", "true"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check what the chroot launcher needs on the host.
/// An empty list means every prerequisite is met.
pub fn check_chroot_prereqs() -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists("unshare") {
        missing.push(MissingPrereq {
            name: "unshare".to_owned(),
            purpose: "user and mount namespace isolation",
            install_hint: "part of util-linux (usually pre-installed)",
        });
    } else if !user_namespaces_work() {
        missing.push(MissingPrereq {
            name: "user namespaces".to_owned(),
            purpose: "unprivileged isolation roots",
            install_hint:
                "enable CONFIG_USER_NS=y in kernel, or: sysctl kernel.unprivileged_userns_clone=1",
        });
    }

    if !command_exists("chroot") {
        missing.push(MissingPrereq {
            name: "chroot".to_owned(),
            purpose: "entering the isolation root",
            install_hint: "part of coreutils",
        });
    }

    missing
}

/// Check that the statically linked foreign tools are present under `source_dir/bin`.
pub fn check_compat_binaries(source_dir: &Path, tools: &[String]) -> Vec<MissingPrereq> {
    tools
        .iter()
        .filter(|tool| !source_dir.join("bin").join(tool).is_file())
        .map(|tool| MissingPrereq {
            name: format!("{}/bin/{tool}", source_dir.display()),
            purpose: "foreign package tool staged into the isolation root",
            install_hint: "install the pkgcompat compat bundle for this distro",
        })
        .collect()
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\npkgcompat needs these to run foreign package managers in isolation.");
    msg
}
