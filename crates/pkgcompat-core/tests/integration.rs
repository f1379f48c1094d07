use pkgcompat_core::{
    AlpineBinding, BindingRegistry, Completion, Daemon, DaemonOptions, DispatchError, Dispatcher,
    DispatcherOptions, Executor, Frame, FrameTransport, IpcMessage, StatusCode, VoidBinding,
    MAX_PKG_DATA, MAX_REPLY_DATA,
};
use pkgcompat_runtime::{IsolationEnvironment, IsolationManager, Launcher, MockLauncher};
use pkgcompat_schema::{OperationKind, PolicySection};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn fake_tools(compat: &Path, distro: &str, tools: &[&str]) {
    let bin = compat.join(distro).join("bin");
    fs::create_dir_all(&bin).unwrap();
    for tool in tools {
        fs::write(bin.join(tool), format!("static {tool}")).unwrap();
    }
    let lib = compat.join(distro).join("lib");
    fs::create_dir_all(&lib).unwrap();
    fs::write(lib.join("libc.so"), format!("{distro} libc")).unwrap();
}

struct Harness {
    _dir: tempfile::TempDir,
    launcher: Arc<MockLauncher>,
    daemon: Arc<Daemon>,
}

impl Harness {
    fn new(launcher: MockLauncher, workers_per_lane: usize) -> Self {
        Self::with_distros(launcher, workers_per_lane, true)
    }

    fn with_distros(launcher: MockLauncher, workers_per_lane: usize, void_tools: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let compat = dir.path().join("compat");
        fake_tools(&compat, "alpine", &["apk"]);
        if void_tools {
            fake_tools(&compat, "void", &["xbps-install", "xbps-remove", "xbps-query"]);
        }

        let mut registry = BindingRegistry::new();
        registry.register(Arc::new(AlpineBinding::new(&compat, None)));
        registry.register(Arc::new(VoidBinding::new(&compat, None)));

        let launcher = Arc::new(launcher);
        let executor = Executor::new(
            registry,
            IsolationManager::new(dir.path().join("state")),
            Arc::clone(&launcher) as Arc<dyn Launcher>,
            PolicySection::default(),
        );
        let daemon = Daemon::start(Arc::new(executor), DaemonOptions { workers_per_lane });
        Self {
            _dir: dir,
            launcher,
            daemon,
        }
    }

    fn dispatcher(&self, timeout: Duration) -> Dispatcher {
        let transport = self.daemon.connect_in_memory();
        Dispatcher::connect(
            Arc::new(transport),
            self.daemon.executor().supported_distros(),
            DispatcherOptions { timeout },
        )
        .unwrap()
    }

    fn acquisitions(&self) -> u64 {
        self.daemon.executor().isolation().acquisitions()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.daemon.shutdown();
    }
}

/// Blocks `apk add` until opened.
#[derive(Clone, Default)]
struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
    fn wait(&self) {
        let (open, cv) = &*self.0;
        let mut open = open.lock().unwrap();
        while !*open {
            open = cv.wait(open).unwrap();
        }
    }

    fn open(&self) {
        let (open, cv) = &*self.0;
        *open.lock().unwrap() = true;
        cv.notify_all();
    }
}

fn is_apk_add(argv: &[String]) -> bool {
    argv.first().is_some_and(|a| a.ends_with("apk")) && argv.get(1).is_some_and(|a| a == "add")
}

fn gated_launcher(gate: &Gate) -> MockLauncher {
    let gate = gate.clone();
    MockLauncher::new().with_hook(move |_env: &IsolationEnvironment, argv: &[String]| {
        if is_apk_add(argv) {
            gate.wait();
        }
    })
}

fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn alpine_install_maps_every_dependency() {
    let launcher = MockLauncher::new();
    launcher.respond_stdout(
        &["apk", "info", "--depends", "curl"],
        "curl-8.9.1-r0 depends on:\nca-certificates-bundle\nlibcurl=8.9.1-r0\nmusl>=1.2\nso:libc.musl-x86_64.so.1\n",
    );
    launcher.respond_stdout(
        &["apk", "info", "--depends", "bash"],
        "bash-5.2.26-r0 depends on:\nbusybox\nmusl\nreadline\n",
    );
    let h = Harness::new(launcher, 2);
    let d = h.dispatcher(Duration::from_secs(10));

    let done = d
        .submit_specs(OperationKind::Install, "alpine", &["curl", "bash"])
        .unwrap();
    assert_eq!(
        done,
        Completion {
            status: StatusCode::Ok,
            warnings: Vec::new(),
        }
    );
    assert_eq!(h.launcher.count_matching(&["apk", "add", "curl", "bash"]), 1);
}

#[test]
fn void_unmapped_dependency_is_a_warning() {
    let launcher = MockLauncher::new();
    launcher.respond_stdout(
        &["xbps-query", "-R", "-x", "steam"],
        "glibc>=2.39_1\nglibc-compat-2.39_1\nzlib>=1.3_1\n",
    );
    let h = Harness::new(launcher, 2);
    let d = h.dispatcher(Duration::from_secs(10));

    let done = d
        .submit_specs(OperationKind::Install, "void", &["steam"])
        .unwrap();
    assert_eq!(done.status.raw(), 0);
    assert_eq!(done.warnings, ["glibc-compat"]);
    assert_eq!(h.launcher.count_matching(&["xbps-install", "-y", "steam"]), 1);
}

#[test]
fn oversized_request_never_reaches_isolation() {
    let h = Harness::new(MockLauncher::new(), 2);
    let d = h.dispatcher(Duration::from_secs(10));

    let specs = vec!["x".repeat(120); 10];
    let err = d
        .submit_specs(OperationKind::Install, "alpine", &specs[..])
        .unwrap_err();
    assert!(matches!(err, DispatchError::InvalidPayload(_)));

    // A client that skips validation is rejected by the daemon from the length field alone.
    let raw = h.daemon.connect_in_memory();
    let data = vec![b'a'; MAX_PKG_DATA + 1];
    let message = IpcMessage::reply(OperationKind::Install, &data, 0).unwrap();
    raw.send_frame(&Frame::new(9, message).encode()).unwrap();
    let reply = Frame::decode(&raw.recv_frame().unwrap().unwrap(), MAX_REPLY_DATA).unwrap();
    assert_eq!(reply.correlation_id, 9);
    assert_eq!(reply.message.result, StatusCode::InvalidPayload.raw());

    assert_eq!(h.acquisitions(), 0);
    assert!(h.launcher.invocations().is_empty());
}

#[test]
fn operations_on_one_distro_never_overlap() {
    let busy = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let sequences = Arc::new(Mutex::new(Vec::new()));
    let launcher = {
        let busy = Arc::clone(&busy);
        let overlaps = Arc::clone(&overlaps);
        let sequences = Arc::clone(&sequences);
        MockLauncher::new().with_hook(move |env: &IsolationEnvironment, argv: &[String]| {
            if !is_apk_add(argv) {
                return;
            }
            if busy.swap(true, Ordering::SeqCst) {
                overlaps.fetch_add(1, Ordering::SeqCst);
            }
            sequences.lock().unwrap().push(env.sequence);
            thread::sleep(Duration::from_millis(10));
            busy.store(false, Ordering::SeqCst);
        })
    };
    let h = Harness::new(launcher, 4);
    let d = Arc::new(h.dispatcher(Duration::from_secs(30)));

    let callers: Vec<_> = (0..8)
        .map(|i| {
            let d = Arc::clone(&d);
            thread::spawn(move || {
                d.submit_specs(OperationKind::Install, "alpine", &[format!("pkg{i}")])
            })
        })
        .collect();
    for caller in callers {
        caller.join().unwrap().unwrap();
    }

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    let mut seen = sequences.lock().unwrap().clone();
    seen.sort_unstable();
    assert_eq!(seen, (1..=8).collect::<Vec<u64>>());
    assert_eq!(h.acquisitions(), 8);
}

#[test]
fn identical_concurrent_requests_run_once() {
    let gate = Gate::default();
    let h = Harness::new(gated_launcher(&gate), 2);
    let d = Arc::new(h.dispatcher(Duration::from_secs(30)));
    let barrier = Arc::new(Barrier::new(4));

    let callers: Vec<_> = (0..4)
        .map(|_| {
            let d = Arc::clone(&d);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                d.submit_specs(OperationKind::Install, "alpine", &["curl"])
            })
        })
        .collect();

    wait_for(|| h.launcher.count_matching(&["apk", "add"]) == 1);
    thread::sleep(Duration::from_millis(100));
    gate.open();

    let results: Vec<_> = callers.into_iter().map(|c| c.join().unwrap()).collect();
    assert!(results.iter().all(|r| r == &results[0]));
    assert!(results[0].is_ok());
    assert_eq!(h.launcher.count_matching(&["apk", "add"]), 1);
}

#[test]
fn identical_requests_from_separate_clients_run_once() {
    let gate = Gate::default();
    let h = Harness::new(gated_launcher(&gate), 2);
    let first = Arc::new(h.dispatcher(Duration::from_secs(30)));
    let second = Arc::new(h.dispatcher(Duration::from_secs(30)));

    let a = {
        let d = Arc::clone(&first);
        thread::spawn(move || d.submit_specs(OperationKind::Install, "alpine", &["jq"]))
    };
    wait_for(|| h.launcher.count_matching(&["apk", "add"]) == 1);
    let b = {
        let d = Arc::clone(&second);
        thread::spawn(move || d.submit_specs(OperationKind::Install, "alpine", &["jq"]))
    };
    thread::sleep(Duration::from_millis(200));
    gate.open();

    assert_eq!(a.join().unwrap(), b.join().unwrap());
    assert_eq!(h.launcher.count_matching(&["apk", "add"]), 1);
}

#[test]
fn unresponsive_daemon_never_hangs_the_caller() {
    let gate = Gate::default();
    let h = Harness::new(gated_launcher(&gate), 2);
    let d = h.dispatcher(Duration::from_millis(200));

    let start = Instant::now();
    let err = d
        .submit_specs(OperationKind::Install, "alpine", &["curl"])
        .unwrap_err();
    assert_eq!(err, DispatchError::DaemonUnresponsive(Duration::from_millis(200)));
    assert!(start.elapsed() < Duration::from_secs(5));

    // The timed-out operation is still running; a retry joins it instead of
    // starting another one.
    let d = Arc::new(h.dispatcher(Duration::from_secs(30)));
    let retry = {
        let d = Arc::clone(&d);
        thread::spawn(move || d.submit_specs(OperationKind::Install, "alpine", &["curl"]))
    };
    thread::sleep(Duration::from_millis(100));
    gate.open();
    assert!(retry.join().unwrap().is_ok());
    assert_eq!(h.launcher.count_matching(&["apk", "add"]), 1);
}

#[test]
fn daemon_status_reaches_caller_unchanged() {
    let launcher = MockLauncher::new();
    launcher.respond_status(&["apk", "del"], 3);
    let h = Harness::with_distros(launcher, 2, false);
    let d = h.dispatcher(Duration::from_secs(10));

    let err = d
        .submit_specs(OperationKind::Remove, "alpine", &["curl"])
        .unwrap_err();
    assert_eq!(err, DispatchError::Daemon(StatusCode::ForeignExit(3)));
    assert_eq!(err.status().raw(), 3);

    // Void tools were never shipped: staging fails twice and is surfaced.
    let err = d
        .submit_specs(OperationKind::Install, "void", &["jq"])
        .unwrap_err();
    assert_eq!(err.status(), StatusCode::StagingFailed);
    assert_eq!(err.status().raw(), -3);
}

#[test]
fn remove_is_not_queued_behind_a_blocked_install() {
    let gate = Gate::default();
    let h = Harness::new(gated_launcher(&gate), 1);
    let d = Arc::new(h.dispatcher(Duration::from_secs(30)));

    let install = {
        let d = Arc::clone(&d);
        thread::spawn(move || d.submit_specs(OperationKind::Install, "alpine", &["curl"]))
    };
    wait_for(|| h.launcher.count_matching(&["apk", "add"]) == 1);

    let done = d
        .submit_specs(OperationKind::Remove, "void", &["jq"])
        .unwrap();
    assert_eq!(done.status, StatusCode::Ok);
    assert!(!install.is_finished());

    gate.open();
    assert!(install.join().unwrap().is_ok());
}
