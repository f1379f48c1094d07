//! Translation and dispatch core for pkgcompat.
//!
//! This crate ties the schema and runtime layers together: distro proxy
//! bindings (`apk`, `xbps`) behind the `ProxyBinding` trait, the pure
//! foreign-to-native translation layer, the `Executor` that runs one operation
//! inside an isolation root, and the IPC path to it: wire codec, frame
//! transports, the lane-per-kind `Daemon`, and the blocking `Dispatcher` with
//! correlation ids and single-flight deduplication.

pub mod alpine;
pub mod binding;
pub mod concurrency;
pub mod daemon;
pub mod dispatcher;
pub mod executor;
pub mod flight;
pub mod registry;
pub mod sink;
pub mod status;
pub mod transport;
pub mod translate;
pub mod void;
pub mod wire;

pub use alpine::AlpineBinding;
pub use binding::{ForeignDependency, ProxyBinding};
pub use concurrency::ShutdownSignal;
pub use daemon::{Daemon, DaemonOptions};
pub use dispatcher::{Completion, Dispatcher, DispatcherOptions};
pub use executor::Executor;
pub use flight::SingleFlight;
pub use registry::BindingRegistry;
pub use sink::{NativeSink, RecordingSink, TracingSink};
pub use status::StatusCode;
pub use transport::{FrameTransport, MemoryTransport, UnixSocketTransport};
pub use translate::{
    translate, DependencyGraph, DependencyReport, NativeAction, NativeStep, Translator,
    UnmappedDependency, Verb,
};
pub use void::VoidBinding;
pub use wire::{Frame, IpcMessage, WireError, MAX_PKG_DATA, MAX_REPLY_DATA};

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("schema error: {0}")]
    Schema(#[from] pkgcompat_schema::SchemaError),
    #[error("config error: {0}")]
    Config(#[from] pkgcompat_schema::ConfigError),
    #[error("runtime error: {0}")]
    Runtime(#[from] pkgcompat_runtime::RuntimeError),
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
    #[error("unsupported distro: {0}")]
    UnsupportedDistro(String),
    #[error("foreign binary failed with exit status {0}")]
    ForeignBinaryFailed(i32),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a [`Dispatcher::submit`] call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("unsupported distro: {0}")]
    UnsupportedDistro(String),
    #[error("daemon did not answer within {0:?}")]
    DaemonUnresponsive(Duration),
    #[error("daemon reported failure: {0}")]
    Daemon(StatusCode),
    #[error("daemon channel closed")]
    ChannelClosed,
    #[error("transport error: {0}")]
    Transport(String),
}

impl DispatchError {
    /// Status code to report for this failure, as the daemon would have.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidPayload(_) => StatusCode::InvalidPayload,
            Self::UnsupportedDistro(_) => StatusCode::UnsupportedDistro,
            Self::Daemon(code) => *code,
            Self::DaemonUnresponsive(_) | Self::ChannelClosed | Self::Transport(_) => {
                StatusCode::Internal
            }
        }
    }
}
