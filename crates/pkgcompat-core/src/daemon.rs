//! Long-lived package-manager daemon.
//!
//! Each attached transport gets a reader thread that decodes request frames
//! and routes them by operation kind into that kind's lane: a queue drained by
//! its own worker pool, so a slow remove never holds up a pending install.
//! Workers deduplicate identical in-flight requests by fingerprint, run the
//! operation through the [`Executor`], and answer on the transport the request
//! came from under the same correlation id.

use crate::executor::Executor;
use crate::concurrency::ShutdownSignal;
use crate::flight::SingleFlight;
use crate::status::StatusCode;
use crate::transport::{FrameTransport, MemoryTransport, UnixSocketTransport};
use crate::translate::NativeAction;
use crate::wire::{Frame, IpcMessage, MAX_PKG_DATA, MAX_REPLY_DATA};
use crate::CoreError;
use pkgcompat_schema::{CompatConfig, OperationKind, PackageOperation};
use std::collections::BTreeMap;
use std::io;
use std::os::unix::net::UnixListener;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pause after a failed `accept` so a persistent error (e.g. EMFILE) does
/// not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonOptions {
    pub workers_per_lane: usize,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            workers_per_lane: 2,
        }
    }
}

impl DaemonOptions {
    pub fn from_config(config: &CompatConfig) -> Self {
        Self {
            workers_per_lane: config.daemon.workers_per_lane.max(1),
        }
    }
}

/// What every caller of one fingerprint receives.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Reply {
    result: i32,
    data: Vec<u8>,
}

impl Reply {
    fn status(code: StatusCode) -> Self {
        Self {
            result: code.raw(),
            data: Vec::new(),
        }
    }

    fn from_outcome(outcome: Result<NativeAction, CoreError>) -> Self {
        match outcome {
            Ok(action) => {
                let data = action.unmapped_names().join(" ").into_bytes();
                if data.len() > MAX_REPLY_DATA {
                    warn!(
                        "unmapped dependency list is {} bytes; replying with overflow",
                        data.len()
                    );
                    return Self::status(StatusCode::ReplyOverflow);
                }
                Self { result: 0, data }
            }
            Err(e) => {
                let code = StatusCode::from(&e);
                warn!("operation failed ({code}): {e}");
                Self::status(code)
            }
        }
    }
}

struct Job {
    correlation_id: u64,
    op: PackageOperation,
    reply_to: Arc<dyn FrameTransport>,
}

type Lanes = BTreeMap<OperationKind, Mutex<Option<Sender<Job>>>>;

pub struct Daemon {
    executor: Arc<Executor>,
    lanes: Arc<Lanes>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    connections: Mutex<Vec<(Arc<dyn FrameTransport>, JoinHandle<()>)>>,
}

impl Daemon {
    /// Start the worker pools. Requests arrive through [`attach`](Self::attach).
    pub fn start(executor: Arc<Executor>, options: DaemonOptions) -> Arc<Self> {
        let flights = Arc::new(SingleFlight::<Reply>::new());
        let mut lanes = Lanes::new();
        let mut workers = Vec::new();

        for kind in OperationKind::ALL {
            let (tx, rx) = mpsc::channel::<Job>();
            let rx = Arc::new(Mutex::new(rx));
            for n in 0..options.workers_per_lane.max(1) {
                let rx = Arc::clone(&rx);
                let executor = Arc::clone(&executor);
                let flights = Arc::clone(&flights);
                let spawned = thread::Builder::new()
                    .name(format!("pkgcompat-{kind}-{n}"))
                    .spawn(move || worker_loop(&rx, &executor, &flights));
                match spawned {
                    Ok(handle) => workers.push(handle),
                    Err(e) => error!("failed to spawn {kind} worker: {e}"),
                }
            }
            lanes.insert(kind, Mutex::new(Some(tx)));
        }

        info!(
            "daemon started: {} worker(s) per lane, distros: {}",
            options.workers_per_lane.max(1),
            executor
                .supported_distros()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );

        Arc::new(Self {
            executor,
            lanes: Arc::new(lanes),
            workers: Mutex::new(workers),
            connections: Mutex::new(Vec::new()),
        })
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Serve requests arriving on `transport` until it closes.
    pub fn attach(&self, transport: Arc<dyn FrameTransport>) {
        let lanes = Arc::clone(&self.lanes);
        let conn = Arc::clone(&transport);
        let spawned = thread::Builder::new()
            .name("pkgcompat-conn".to_owned())
            .spawn(move || connection_loop(&conn, &lanes));
        match spawned {
            Ok(handle) => {
                if let Ok(mut connections) = self.connections.lock() {
                    connections.push((transport, handle));
                }
            }
            Err(e) => {
                error!("failed to spawn connection reader: {e}");
                transport.close();
            }
        }
    }

    /// Attach one end of an in-memory pair and hand back the other.
    pub fn connect_in_memory(&self) -> MemoryTransport {
        let (client, server) = MemoryTransport::pair();
        self.attach(Arc::new(server));
        client
    }

    /// Accept connections on `listener` until `shutdown` is requested.
    ///
    /// `accept` blocks; the signal must have been pointed at this listener's
    /// path with [`ShutdownSignal::wake_on`] so a request can unblock it.
    pub fn serve_unix(&self, listener: &UnixListener, shutdown: &ShutdownSignal) -> io::Result<()> {
        info!("listening on {:?}", listener.local_addr().ok());
        while !shutdown.is_requested() {
            match listener.accept() {
                Ok(_) if shutdown.is_requested() => break,
                Ok((stream, _)) => match UnixSocketTransport::from_stream(stream, MAX_PKG_DATA) {
                    Ok(transport) => {
                        debug!("client connected");
                        self.attach(Arc::new(transport));
                    }
                    Err(e) => warn!("failed to set up client connection: {e}"),
                },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("accept failed: {e}");
                    thread::sleep(ACCEPT_BACKOFF);
                }
            }
        }
        info!("no longer accepting clients");
        Ok(())
    }

    /// Stop taking requests, let queued and running operations finish, then
    /// close every connection.
    pub fn shutdown(&self) {
        for lane in self.lanes.values() {
            if let Ok(mut tx) = lane.lock() {
                tx.take();
            }
        }
        let workers = self
            .workers
            .lock()
            .map(|mut w| std::mem::take(&mut *w))
            .unwrap_or_default();
        for worker in workers {
            let _ = worker.join();
        }

        let connections = self
            .connections
            .lock()
            .map(|mut c| std::mem::take(&mut *c))
            .unwrap_or_default();
        for (transport, _) in &connections {
            transport.close();
        }
        for (_, reader) in connections {
            let _ = reader.join();
        }
        info!("daemon stopped");
    }
}

fn send_reply(
    transport: &dyn FrameTransport,
    correlation_id: u64,
    kind: OperationKind,
    reply: &Reply,
) {
    let message = match IpcMessage::reply(kind, &reply.data, reply.result) {
        Ok(m) => m,
        Err(e) => {
            error!("cannot encode reply #{correlation_id}: {e}");
            return;
        }
    };
    if let Err(e) = transport.send_frame(&Frame::new(correlation_id, message).encode()) {
        warn!("failed to deliver reply #{correlation_id}: {e}");
    }
}

fn connection_loop(transport: &Arc<dyn FrameTransport>, lanes: &Lanes) {
    loop {
        let raw = match transport.recv_frame() {
            Ok(Some(raw)) => raw,
            Ok(None) => break,
            Err(e) => {
                warn!("connection read failed: {e}");
                break;
            }
        };

        let frame = match Frame::decode(&raw, MAX_PKG_DATA) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("rejecting request: {e}");
                if let Some((id, code)) = Frame::peek_header(&raw) {
                    let kind =
                        OperationKind::from_wire_code(code).unwrap_or(OperationKind::Install);
                    let reply = Reply::status(StatusCode::InvalidPayload);
                    send_reply(transport.as_ref(), id, kind, &reply);
                }
                continue;
            }
        };
        let id = frame.correlation_id;
        let kind = frame.message.kind;

        let op = match frame.message.to_operation() {
            Ok(op) => op,
            Err(e) => {
                warn!("rejecting request #{id}: {e}");
                let reply = Reply::status(StatusCode::InvalidPayload);
                send_reply(transport.as_ref(), id, kind, &reply);
                continue;
            }
        };
        debug!("request #{id}: {kind} {} {:?}", op.distro, op.payload_strings());

        let job = Job {
            correlation_id: id,
            op,
            reply_to: Arc::clone(transport),
        };
        let routed = lanes
            .get(&kind)
            .and_then(|lane| lane.lock().ok())
            .and_then(|tx| tx.as_ref().map(|tx| tx.send(job).is_ok()))
            .unwrap_or(false);
        if !routed {
            warn!("request #{id} arrived during shutdown");
            let reply = Reply::status(StatusCode::Internal);
            send_reply(transport.as_ref(), id, kind, &reply);
        }
    }
    debug!("connection closed");
}

fn worker_loop(rx: &Mutex<Receiver<Job>>, executor: &Executor, flights: &SingleFlight<Reply>) {
    loop {
        let job = {
            let Ok(rx) = rx.lock() else { break };
            match rx.recv() {
                Ok(job) => job,
                Err(_) => break,
            }
        };

        let fingerprint = job.op.fingerprint();
        let reply = flights
            .run(&fingerprint, || {
                catch_unwind(AssertUnwindSafe(|| executor.execute(&job.op)))
                    .map_or_else(
                        |_| {
                            error!("operation panicked: {} {}", job.op.kind, job.op.distro);
                            Reply::status(StatusCode::Internal)
                        },
                        Reply::from_outcome,
                    )
            })
            .unwrap_or_else(|| Reply::status(StatusCode::Internal));

        info!(
            "reply #{}: {} {} -> {}",
            job.correlation_id,
            job.op.kind,
            job.op.distro,
            StatusCode::from_raw(reply.result)
        );
        send_reply(job.reply_to.as_ref(), job.correlation_id, job.op.kind, &reply);
    }
}
