use crate::interface::{PackageManager, DBUS_INTERFACE, DBUS_PATH};
use pkgcompat_core::Dispatcher;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use zbus::connection::Builder;

/// Default idle timeout before the service exits (for bus activation).
const IDLE_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bus {
    System,
    Session,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("DBus error: {0}")]
    Dbus(#[from] zbus::Error),
}

/// Serve `org.pkgcompat.Manager1` until the idle timeout elapses.
pub async fn run_service(dispatcher: Arc<Dispatcher>, bus: Bus) -> Result<(), ServiceError> {
    run_service_with_timeout(dispatcher, bus, Some(IDLE_TIMEOUT_SECS)).await
}

/// `None` runs until the process is killed.
pub async fn run_service_with_timeout(
    dispatcher: Arc<Dispatcher>,
    bus: Bus,
    idle_timeout: Option<u64>,
) -> Result<(), ServiceError> {
    let manager = PackageManager::new(dispatcher);
    let builder = match bus {
        Bus::System => Builder::system()?,
        Bus::Session => Builder::session()?,
    };
    let _conn = builder
        .name(DBUS_INTERFACE)?
        .serve_at(DBUS_PATH, manager)?
        .build()
        .await?;

    info!("pkgcompat-dbus serving {DBUS_INTERFACE} on the {bus:?} bus");

    match idle_timeout {
        Some(secs) => {
            info!("idle timeout: {secs}s");
            // The bus broker restarts the service on the next method call.
            tokio::time::sleep(std::time::Duration::from_secs(secs)).await;
            info!("idle timeout reached, shutting down");
        }
        None => std::future::pending::<()>().await,
    }

    Ok(())
}
