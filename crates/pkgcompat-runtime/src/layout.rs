use std::path::{Path, PathBuf};

pub const STAGED_MARKER: &str = ".pkgcompat-staged";
pub const ACTIVE_MARKER: &str = ".pkgcompat-active";

/// Directory layout for isolation roots under the pkgcompat state directory.
///
/// ```text
/// <state_dir>/roots/<distro>/        private root filesystem
/// <state_dir>/roots/<distro>.lock    single-writer lock file
/// ```
#[derive(Debug, Clone)]
pub struct RootLayout {
    state_dir: PathBuf,
}

impl RootLayout {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    #[inline]
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    #[inline]
    pub fn roots_dir(&self) -> PathBuf {
        self.state_dir.join("roots")
    }

    #[inline]
    pub fn root_path(&self, distro: &str) -> PathBuf {
        self.roots_dir().join(distro)
    }

    /// The lock lives beside the root so tearing the root down never drops it.
    #[inline]
    pub fn lock_file(&self, distro: &str) -> PathBuf {
        self.roots_dir().join(format!("{distro}.lock"))
    }

    #[inline]
    pub fn staged_marker(&self, distro: &str) -> PathBuf {
        self.root_path(distro).join(STAGED_MARKER)
    }

    #[inline]
    pub fn active_marker(&self, distro: &str) -> PathBuf {
        self.root_path(distro).join(ACTIVE_MARKER)
    }
}
