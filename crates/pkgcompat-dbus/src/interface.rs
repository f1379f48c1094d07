use pkgcompat_core::{Completion, DispatchError, Dispatcher};
use pkgcompat_schema::OperationKind;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use zbus::interface;

pub const DBUS_INTERFACE: &str = "org.pkgcompat.Manager1";
pub const DBUS_PATH: &str = "/org/pkgcompat/Manager1";
pub const API_VERSION: u32 = 1;

/// JSON body returned by `Install` and `Remove`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationReply {
    pub kind: String,
    pub distro: String,
    pub packages: Vec<String>,
    pub status: i32,
    pub warnings: Vec<String>,
}

fn to_fdo(err: &DispatchError) -> zbus::fdo::Error {
    let msg = err.to_string();
    match err {
        DispatchError::InvalidPayload(_) | DispatchError::UnsupportedDistro(_) => {
            zbus::fdo::Error::InvalidArgs(msg)
        }
        DispatchError::DaemonUnresponsive(_) => zbus::fdo::Error::TimedOut(msg),
        DispatchError::ChannelClosed | DispatchError::Transport(_) => {
            zbus::fdo::Error::Disconnected(msg)
        }
        DispatchError::Daemon(code) => {
            zbus::fdo::Error::Failed(format!("{msg} (status {})", code.raw()))
        }
    }
}

fn send_notification(summary: &str, body: &str) {
    if let Err(e) = notify_rust::Notification::new()
        .appname("pkgcompat")
        .summary(summary)
        .body(body)
        .timeout(notify_rust::Timeout::Milliseconds(5000))
        .show()
    {
        tracing::debug!("desktop notification failed (non-fatal): {e}");
    }
}

pub struct PackageManager {
    dispatcher: Arc<Dispatcher>,
}

impl PackageManager {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Run one operation on the blocking pool; the dispatcher waits on a condvar.
    async fn submit(
        &self,
        kind: OperationKind,
        distro: String,
        packages: Vec<String>,
    ) -> Result<String, zbus::fdo::Error> {
        info!("D-Bus: {kind} {distro} {packages:?}");
        let dispatcher = Arc::clone(&self.dispatcher);
        let (distro, packages, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = dispatcher.submit_specs(kind, &distro, &packages);
            (distro, packages, outcome)
        })
        .await
        .map_err(|e| zbus::fdo::Error::Failed(format!("dispatcher task failed: {e}")))?;

        let Completion { status, warnings } = match outcome {
            Ok(done) => done,
            Err(e) => {
                error!("{kind} {distro} failed: {e}");
                send_notification(&format!("pkgcompat {kind} failed"), &e.to_string());
                return Err(to_fdo(&e));
            }
        };
        let body = if warnings.is_empty() {
            format!("{kind} {} ({distro})", packages.join(" "))
        } else {
            format!(
                "{kind} {} ({distro}); no native package for {}",
                packages.join(" "),
                warnings.join(", ")
            )
        };
        send_notification("pkgcompat", &body);

        serde_json::to_string(&OperationReply {
            kind: kind.to_string(),
            distro,
            packages,
            status: status.raw(),
            warnings,
        })
        .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }
}

#[allow(clippy::unused_async)]
#[interface(name = "org.pkgcompat.Manager1")]
impl PackageManager {
    #[zbus(property)]
    async fn api_version(&self) -> u32 {
        API_VERSION
    }

    #[zbus(property)]
    async fn distros(&self) -> Vec<String> {
        self.dispatcher.supported().map(ToString::to_string).collect()
    }

    async fn install(
        &self,
        distro: String,
        packages: Vec<String>,
    ) -> Result<String, zbus::fdo::Error> {
        self.submit(OperationKind::Install, distro, packages).await
    }

    async fn remove(
        &self,
        distro: String,
        packages: Vec<String>,
    ) -> Result<String, zbus::fdo::Error> {
        self.submit(OperationKind::Remove, distro, packages).await
    }
}
