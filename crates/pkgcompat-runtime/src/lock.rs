use crate::layout::RootLayout;
use crate::RuntimeError;
use fs2::FileExt;
use pkgcompat_schema::DistroId;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, info};

/// Cross-process exclusive lock on one distro's isolation root.
///
/// The in-process slot in [`IsolationManager`](crate::IsolationManager) orders
/// threads; this lock orders a daemon against an `--embedded` CLI run or a
/// second daemon on the same state directory. While held, the lock file
/// contains the holder's pid.
pub struct RootLock {
    file: File,
    distro: DistroId,
}

impl RootLock {
    /// Block until no other process holds `distro`'s root.
    pub fn acquire(layout: &RootLayout, distro: &DistroId) -> Result<Self, RuntimeError> {
        let path = layout.lock_file(distro);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            info!(
                "isolation root for {distro} is held by another process (pid {}), waiting",
                read_holder(&path).unwrap_or_else(|| "unknown".to_owned())
            );
            file.lock_exclusive()
                .map_err(|e| RuntimeError::LockFailed(format!("{}: {e}", path.display())))?;
        }

        let mut lock = Self {
            file,
            distro: distro.clone(),
        };
        lock.stamp_holder()?;
        debug!("locked isolation root for {distro}");
        Ok(lock)
    }

    fn stamp_holder(&mut self) -> Result<(), RuntimeError> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        writeln!(self.file, "{}", std::process::id())?;
        Ok(())
    }
}

fn read_holder(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let pid = content.trim();
    (!pid.is_empty()).then(|| pid.to_owned())
}

impl Drop for RootLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = self.file.unlock();
        debug!("released isolation root lock for {}", self.distro);
    }
}
