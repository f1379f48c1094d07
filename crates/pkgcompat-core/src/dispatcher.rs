//! Client side of the daemon protocol.
//!
//! A [`Dispatcher`] owns one transport to the daemon. Callers on any thread
//! [`submit`](Dispatcher::submit) an operation and block until the reply with
//! the matching correlation id arrives, the timeout elapses, or the channel
//! closes. Identical operations already in flight are joined rather than sent
//! again; a caller that times out leaves its request running so a later
//! identical submit observes the daemon's answer.

use crate::flight::{SingleFlight, WaitOutcome};
use crate::status::StatusCode;
use crate::transport::{FrameTransport, UnixSocketTransport};
use crate::wire::{Frame, IpcMessage, MAX_REPLY_DATA};
use crate::DispatchError;
use pkgcompat_schema::{CompatConfig, DistroId, Fingerprint, OperationKind, PackageOperation};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherOptions {
    /// How long one caller waits for its reply.
    pub timeout: Duration,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
        }
    }
}

impl DispatcherOptions {
    pub fn from_config(config: &CompatConfig) -> Self {
        Self {
            timeout: config.request_timeout(),
        }
    }
}

/// Successful outcome of one submitted operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub status: StatusCode,
    /// Foreign dependencies the daemon could not map to native packages.
    pub warnings: Vec<String>,
}

type Outcome = Result<Completion, DispatchError>;

struct Pending {
    closed: bool,
    by_id: HashMap<u64, Fingerprint>,
}

struct Shared {
    transport: Arc<dyn FrameTransport>,
    flights: SingleFlight<Outcome>,
    pending: Mutex<Pending>,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, Pending> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn deliver(&self, frame: &Frame) {
        let id = frame.correlation_id;
        let Some(key) = self.pending().by_id.remove(&id) else {
            debug!("reply #{id} has no waiter");
            return;
        };
        let status = StatusCode::from_raw(frame.message.result);
        let outcome = if status.is_success() {
            Ok(Completion {
                status,
                warnings: frame.message.words(),
            })
        } else {
            Err(DispatchError::Daemon(status))
        };
        debug!("reply #{id}: {status}");
        self.flights.complete(&key, outcome);
    }

    fn fail(&self, id: u64, err: DispatchError) {
        if let Some(key) = self.pending().by_id.remove(&id) {
            self.flights.complete(&key, Err(err));
        }
    }

    /// Mark the channel closed and fail every outstanding request.
    fn close_all(&self) {
        let drained: Vec<Fingerprint> = {
            let mut pending = self.pending();
            pending.closed = true;
            pending.by_id.drain().map(|(_, key)| key).collect()
        };
        if !drained.is_empty() {
            warn!("daemon channel closed with {} request(s) outstanding", drained.len());
        }
        for key in drained {
            self.flights.complete(&key, Err(DispatchError::ChannelClosed));
        }
    }
}

fn reader_loop(shared: &Shared) {
    loop {
        let raw = match shared.transport.recv_frame() {
            Ok(Some(raw)) => raw,
            Ok(None) => break,
            Err(e) => {
                warn!("daemon connection read failed: {e}");
                break;
            }
        };
        match Frame::decode(&raw, MAX_REPLY_DATA) {
            Ok(frame) => shared.deliver(&frame),
            Err(e) => {
                warn!("discarding undecodable reply: {e}");
                if let Some((id, _)) = Frame::peek_header(&raw) {
                    shared.fail(id, DispatchError::Transport(e.to_string()));
                }
            }
        }
    }
    shared.close_all();
}

pub struct Dispatcher {
    shared: Arc<Shared>,
    supported: BTreeSet<DistroId>,
    next_id: AtomicU64,
    options: DispatcherOptions,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Start demultiplexing replies arriving on `transport`.
    ///
    /// `supported` is the set of distros the daemon serves; anything else is
    /// rejected before a frame is sent.
    pub fn connect(
        transport: Arc<dyn FrameTransport>,
        supported: impl IntoIterator<Item = DistroId>,
        options: DispatcherOptions,
    ) -> Result<Self, DispatchError> {
        let shared = Arc::new(Shared {
            transport,
            flights: SingleFlight::new(),
            pending: Mutex::new(Pending {
                closed: false,
                by_id: HashMap::new(),
            }),
        });
        let reader = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("pkgcompat-dispatch".to_owned())
                .spawn(move || reader_loop(&shared))
                .map_err(|e| DispatchError::Transport(e.to_string()))?
        };
        Ok(Self {
            shared,
            supported: supported.into_iter().collect(),
            next_id: AtomicU64::new(1),
            options,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// Connect to a daemon listening on a Unix socket.
    pub fn connect_unix(
        path: &Path,
        supported: impl IntoIterator<Item = DistroId>,
        options: DispatcherOptions,
    ) -> Result<Self, DispatchError> {
        let transport = UnixSocketTransport::connect(path)
            .map_err(|e| DispatchError::Transport(format!("{}: {e}", path.display())))?;
        Self::connect(Arc::new(transport), supported, options)
    }

    pub fn supported(&self) -> impl Iterator<Item = &DistroId> {
        self.supported.iter()
    }

    pub fn options(&self) -> DispatcherOptions {
        self.options
    }

    /// Validate, build, and submit an operation from raw strings.
    pub fn submit_specs(
        &self,
        kind: OperationKind,
        distro: &str,
        specs: &[impl AsRef<str>],
    ) -> Result<Completion, DispatchError> {
        let op = PackageOperation::parse(kind, distro, specs)
            .map_err(|e| DispatchError::InvalidPayload(e.to_string()))?;
        self.submit(&op)
    }

    /// Send `op` to the daemon and block for its outcome.
    ///
    /// Exactly one frame is sent, or none when an identical operation is
    /// already in flight. Never retries.
    pub fn submit(&self, op: &PackageOperation) -> Result<Completion, DispatchError> {
        if !self.supported.contains(&op.distro) {
            return Err(DispatchError::UnsupportedDistro(op.distro.to_string()));
        }
        let message = IpcMessage::from_operation(op)
            .map_err(|e| DispatchError::InvalidPayload(e.to_string()))?;

        let key = op.fingerprint();
        let join = self.shared.flights.join(&key);
        if join.is_leader() {
            self.send(&key, message);
        } else {
            debug!("{} {} joins an identical request in flight", op.kind, op.distro);
        }

        match join.call().wait_timeout(self.options.timeout) {
            WaitOutcome::Ready(outcome) => outcome,
            WaitOutcome::TimedOut => {
                warn!(
                    "{} {} got no reply within {:?}",
                    op.kind, op.distro, self.options.timeout
                );
                Err(DispatchError::DaemonUnresponsive(self.options.timeout))
            }
            WaitOutcome::Abandoned => Err(DispatchError::ChannelClosed),
        }
    }

    /// Register the flight under a fresh correlation id and put it on the wire.
    fn send(&self, key: &Fingerprint, message: IpcMessage) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut pending = self.shared.pending();
            if pending.closed {
                drop(pending);
                self.shared
                    .flights
                    .complete(key, Err(DispatchError::ChannelClosed));
                return;
            }
            pending.by_id.insert(id, key.clone());
        }
        debug!("request #{id}: {}", message.kind);
        let frame = Frame::new(id, message).encode();
        if let Err(e) = self.shared.transport.send_frame(&frame) {
            warn!("failed to send request #{id}: {e}");
            self.shared.fail(id, DispatchError::Transport(e.to_string()));
        }
    }

    /// Close the transport, fail outstanding waiters, and stop the reader.
    pub fn shutdown(&self) {
        let reader = self.reader.lock().ok().and_then(|mut r| r.take());
        let Some(reader) = reader else { return };
        self.shared.transport.close();
        let _ = reader.join();
        info!("dispatcher disconnected");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
