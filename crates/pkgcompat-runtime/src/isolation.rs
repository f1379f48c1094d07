//! Isolation Environment Manager.
//!
//! Each foreign distro gets one private root under `<state_dir>/roots/<distro>`.
//! Roots are staged lazily on first acquisition, reused across operations, and
//! lent to exactly one operation at a time through an [`IsolationHandle`].
//!
//! Single-writer discipline is enforced twice: an in-process slot (mutex plus
//! condvar) orders threads of this process, and an `fs2` exclusive lock on the
//! root's lock file orders separate processes. Releasing happens in `Drop`, so
//! every exit path (error returns and unwinding panics included) gives the root back.

use crate::launcher::{LaunchOutput, Launcher};
use crate::layout::RootLayout;
use crate::lock::RootLock;
use crate::staging::{remove_root, stage_root, verify_root, StagingMarker, StagingPlan};
use crate::RuntimeError;
use pkgcompat_schema::DistroId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unstaged,
    Staged,
    Active,
    TornDown,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Unstaged => write!(f, "unstaged"),
            LifecycleState::Staged => write!(f, "staged"),
            LifecycleState::Active => write!(f, "active"),
            LifecycleState::TornDown => write!(f, "torn_down"),
        }
    }
}

/// Snapshot of one isolation root as lent to an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationEnvironment {
    pub distro: DistroId,
    pub root_path: PathBuf,
    pub staged_binary_path: PathBuf,
    pub state: LifecycleState,
    /// Per-root acquisition counter, starting at 1.
    pub sequence: u64,
}

struct SlotState {
    busy: bool,
    lifecycle: LifecycleState,
    sequence: u64,
}

struct Slot {
    state: Mutex<SlotState>,
    released: Condvar,
}

impl Slot {
    fn new(lifecycle: LifecycleState) -> Self {
        Self {
            state: Mutex::new(SlotState {
                busy: false,
                lifecycle,
                sequence: 0,
            }),
            released: Condvar::new(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, SlotState>, RuntimeError> {
        self.state
            .lock()
            .map_err(|e| RuntimeError::LockFailed(format!("slot mutex poisoned: {e}")))
    }

    /// Block until the slot is free, then claim it.
    fn claim(self: &Arc<Self>) -> Result<SlotClaim, RuntimeError> {
        let mut state = self.lock()?;
        while state.busy {
            state = self
                .released
                .wait(state)
                .map_err(|e| RuntimeError::LockFailed(format!("slot mutex poisoned: {e}")))?;
        }
        state.busy = true;
        Ok(SlotClaim {
            slot: Arc::clone(self),
        })
    }
}

/// Busy flag on a slot, cleared on drop.
struct SlotClaim {
    slot: Arc<Slot>,
}

impl SlotClaim {
    fn set_lifecycle(&self, lifecycle: LifecycleState) {
        if let Ok(mut state) = self.slot.state.lock() {
            state.lifecycle = lifecycle;
        }
    }
}

impl Drop for SlotClaim {
    fn drop(&mut self) {
        // Recover from poisoning: a stuck busy flag would block every later acquire.
        let mut state = match self.slot.state.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.busy = false;
        drop(state);
        self.slot.released.notify_one();
    }
}

pub struct IsolationManager {
    layout: RootLayout,
    slots: Mutex<HashMap<DistroId, Arc<Slot>>>,
    acquisitions: AtomicU64,
}

impl IsolationManager {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            layout: RootLayout::new(state_dir),
            slots: Mutex::new(HashMap::new()),
            acquisitions: AtomicU64::new(0),
        }
    }

    pub fn layout(&self) -> &RootLayout {
        &self.layout
    }

    /// Total number of `acquire` calls made on this manager.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::SeqCst)
    }

    fn slot(&self, distro: &DistroId) -> Result<Arc<Slot>, RuntimeError> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|e| RuntimeError::LockFailed(format!("slot table poisoned: {e}")))?;
        let initial = self.on_disk_state(distro);
        Ok(Arc::clone(
            slots
                .entry(distro.clone())
                .or_insert_with(|| Arc::new(Slot::new(initial))),
        ))
    }

    fn on_disk_state(&self, distro: &str) -> LifecycleState {
        if self.layout.staged_marker(distro).exists() {
            LifecycleState::Staged
        } else {
            LifecycleState::Unstaged
        }
    }

    /// Lend the distro's root to one operation, staging or rebuilding it first.
    ///
    /// Blocks while another operation holds the same root. A root that fails
    /// staging or integrity verification is discarded and rebuilt once; a
    /// second failure is returned.
    pub fn acquire(&self, plan: &StagingPlan) -> Result<IsolationHandle, RuntimeError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        let distro = plan.distro.clone();
        let slot = self.slot(&distro)?;
        let claim = slot.claim()?;
        let lock = RootLock::acquire(&self.layout, &distro)?;

        let root = self.layout.root_path(&distro);
        self.prepare(plan, &root)?;

        let active_marker = self.layout.active_marker(&distro);
        let sequence = {
            let mut state = slot.lock()?;
            state.sequence += 1;
            state.lifecycle = LifecycleState::Active;
            state.sequence
        };
        if let Err(e) = std::fs::write(&active_marker, sequence.to_string()) {
            claim.set_lifecycle(LifecycleState::Staged);
            return Err(RuntimeError::Io(e));
        }

        debug!("acquired isolation root {} (#{sequence})", root.display());
        Ok(IsolationHandle {
            env: IsolationEnvironment {
                distro,
                staged_binary_path: plan.staged_binary_path(&root),
                root_path: root,
                state: LifecycleState::Active,
                sequence,
            },
            active_marker,
            corrupted: false,
            lock: Some(lock),
            claim: Some(claim),
        })
    }

    fn prepare(&self, plan: &StagingPlan, root: &Path) -> Result<(), RuntimeError> {
        let first = if root.exists() {
            verify_root(plan, root).map(|_| ())
        } else {
            info!("staging isolation root for {} at {}", plan.distro, root.display());
            stage_root(plan, root).map(|_| ())
        };

        match first {
            Ok(()) => Ok(()),
            Err(e @ (RuntimeError::StagingFailed(_) | RuntimeError::RootCorrupted(_))) => {
                warn!("isolation root for {} unusable ({e}); rebuilding", plan.distro);
                remove_root(root)?;
                stage_root(plan, root).map(|_| ()).inspect_err(|e| {
                    warn!("rebuild of isolation root for {} failed: {e}", plan.distro);
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Check the staged root without staging or rebuilding it.
    /// Returns `None` when the distro has never been staged.
    pub fn verify(&self, plan: &StagingPlan) -> Result<Option<StagingMarker>, RuntimeError> {
        let slot = self.slot(&plan.distro)?;
        let _claim = slot.claim()?;
        let _lock = RootLock::acquire(&self.layout, &plan.distro)?;
        let root = self.layout.root_path(&plan.distro);
        if !root.exists() {
            return Ok(None);
        }
        verify_root(plan, &root).map(Some)
    }

    /// Remove the distro's root, waiting for any in-flight operation to release it.
    pub fn teardown(&self, distro: &DistroId) -> Result<(), RuntimeError> {
        let slot = self.slot(distro)?;
        let claim = slot.claim()?;
        let _lock = RootLock::acquire(&self.layout, distro)?;
        remove_root(&self.layout.root_path(distro))?;
        claim.set_lifecycle(LifecycleState::TornDown);
        info!("tore down isolation root for {distro}");
        Ok(())
    }

    /// Tear down every root this manager has touched.
    pub fn shutdown(&self) -> Result<Vec<DistroId>, RuntimeError> {
        let distros: Vec<DistroId> = self
            .slots
            .lock()
            .map_err(|e| RuntimeError::LockFailed(format!("slot table poisoned: {e}")))?
            .keys()
            .cloned()
            .collect();
        for distro in &distros {
            self.teardown(distro)?;
        }
        Ok(distros)
    }

    pub fn state(&self, distro: &DistroId) -> LifecycleState {
        let slots = match self.slots.lock() {
            Ok(s) => s,
            Err(_) => return self.on_disk_state(distro),
        };
        let tracked = slots
            .get(distro)
            .and_then(|slot| slot.state.lock().ok().map(|state| state.lifecycle));
        tracked.unwrap_or_else(|| self.on_disk_state(distro))
    }
}

/// Exclusive, scoped use of one isolation root.
///
/// Dropping the handle removes the active marker and releases both locks.
/// If the handle is dropped during a panic, or after [`mark_corrupted`](Self::mark_corrupted),
/// the active marker is left behind so the next acquisition rebuilds the root.
pub struct IsolationHandle {
    env: IsolationEnvironment,
    active_marker: PathBuf,
    corrupted: bool,
    lock: Option<RootLock>,
    claim: Option<SlotClaim>,
}

impl IsolationHandle {
    pub fn environment(&self) -> &IsolationEnvironment {
        &self.env
    }

    pub fn root(&self) -> &Path {
        &self.env.root_path
    }

    pub fn sequence(&self) -> u64 {
        self.env.sequence
    }

    /// Record that the root may be inconsistent; it is rebuilt before reuse.
    pub fn mark_corrupted(&mut self) {
        self.corrupted = true;
    }

    pub fn run(
        &self,
        launcher: &dyn Launcher,
        argv: &[String],
    ) -> Result<LaunchOutput, RuntimeError> {
        launcher.run(&self.env, argv)
    }
}

impl Drop for IsolationHandle {
    fn drop(&mut self) {
        if self.corrupted || std::thread::panicking() {
            warn!(
                "isolation root {} released in an inconsistent state; it will be rebuilt",
                self.env.root_path.display()
            );
        } else if let Err(e) = std::fs::remove_file(&self.active_marker) {
            warn!(
                "failed to clear active marker {}: {e}",
                self.active_marker.display()
            );
        }
        if let Some(claim) = &self.claim {
            claim.set_lifecycle(LifecycleState::Staged);
        }
        // File lock first, so a waiter woken by the slot never blocks on it.
        drop(self.lock.take());
        drop(self.claim.take());
        debug!("released isolation root {}", self.env.root_path.display());
    }
}
