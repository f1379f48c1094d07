use crate::translate::{NativeAction, NativeStep};
use crate::CoreError;
use std::sync::Mutex;
use tracing::info;

/// Boundary to the host's native package manager.
///
/// Receives each completed [`NativeAction`]; what it does with it (record it in
/// the native database, queue native installs) is up to the host.
pub trait NativeSink: Send + Sync {
    fn apply(&self, action: &NativeAction) -> Result<(), CoreError>;
}

/// Logs every action and does nothing else.
#[derive(Debug, Default)]
pub struct TracingSink;

impl NativeSink for TracingSink {
    fn apply(&self, action: &NativeAction) -> Result<(), CoreError> {
        for step in &action.steps {
            match step {
                NativeStep::Add(id) => info!("native add {id} (via {})", action.distro),
                NativeStep::Remove(id) => info!("native remove {id} (via {})", action.distro),
            }
        }
        Ok(())
    }
}

/// Keeps every applied action in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    actions: Mutex<Vec<NativeAction>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actions(&self) -> Vec<NativeAction> {
        self.actions.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

impl NativeSink for RecordingSink {
    fn apply(&self, action: &NativeAction) -> Result<(), CoreError> {
        self.actions
            .lock()
            .map_err(|e| CoreError::Internal(format!("sink mutex poisoned: {e}")))?
            .push(action.clone());
        Ok(())
    }
}
