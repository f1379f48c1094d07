use pkgcompat_core::{BindingRegistry, Dispatcher, DispatcherOptions};
use pkgcompat_dbus::Bus;
use std::sync::Arc;
use tracing::info;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("PKGCOMPAT_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .without_time()
        .init();

    let config = pkgcompat_schema::load_config(None)?;
    let bus = if std::env::var("PKGCOMPAT_DBUS_SESSION").as_deref() == Ok("1") {
        Bus::Session
    } else {
        Bus::System
    };

    info!("pkgcompat-dbus starting, daemon: {}", config.daemon.socket.display());
    let dispatcher = Dispatcher::connect_unix(
        &config.daemon.socket,
        BindingRegistry::builtin(&config).distros(),
        DispatcherOptions::from_config(&config),
    )?;
    pkgcompat_dbus::run_service(Arc::new(dispatcher), bus).await?;

    Ok(())
}
