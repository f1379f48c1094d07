//! Isolation roots and process launching for pkgcompat.
//!
//! This crate owns everything that touches the host: per-distro isolation roots
//! (staging, integrity verification, rebuild, teardown), single-writer locking,
//! and the pluggable `Launcher` that runs a staged foreign tool inside its root
//! (`unshare` + `chroot`, or a scripted mock for tests).

pub mod chroot;
pub mod isolation;
pub mod launcher;
pub mod layout;
pub mod lock;
pub mod mock;
pub mod prereq;
pub mod staging;

pub use chroot::ChrootLauncher;
pub use isolation::{IsolationEnvironment, IsolationHandle, IsolationManager, LifecycleState};
pub use launcher::{select_launcher, LaunchOutput, Launcher};
pub use layout::RootLayout;
pub use lock::RootLock;
pub use mock::MockLauncher;
pub use prereq::{check_chroot_prereqs, check_compat_binaries, format_missing, MissingPrereq};
pub use staging::{StagingMarker, StagingPlan};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("staging failed: {0}")]
    StagingFailed(String),
    #[error("isolation root corrupted: {0}")]
    RootCorrupted(String),
    #[error("launch failed: {0}")]
    LaunchFailed(String),
    #[error("lock failed: {0}")]
    LockFailed(String),
    #[error("launcher '{0}' is not available on this system")]
    LauncherUnavailable(String),
    #[error("marker serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
