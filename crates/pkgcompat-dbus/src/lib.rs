//! D-Bus front-end for pkgcompat.
//!
//! Exposes `org.pkgcompat.Manager1` so desktop software centers and system
//! services can install and remove foreign packages without shelling out to
//! the CLI. Every call is forwarded through a [`pkgcompat_core::Dispatcher`]
//! to the daemon; the bus service itself never touches an isolation root.

pub mod interface;
pub mod service;

pub use interface::{PackageManager, API_VERSION, DBUS_INTERFACE, DBUS_PATH};
pub use service::{run_service, run_service_with_timeout, Bus, ServiceError};
