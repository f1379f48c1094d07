use crate::registry::BindingRegistry;
use crate::sink::{NativeSink, TracingSink};
use crate::translate::{NativeAction, Translator};
use crate::CoreError;
use pkgcompat_runtime::{
    check_compat_binaries, select_launcher, IsolationManager, Launcher, LifecycleState,
    MissingPrereq, StagingMarker,
};
use pkgcompat_schema::{
    CompatConfig, DistroId, OperationKind, PackageOperation, PackageSpec, PolicySection,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Runs validated operations: binding lookup, isolation, translation, native hand-off.
///
/// Owned by the daemon; every method may be called from many worker threads.
pub struct Executor {
    registry: BindingRegistry,
    isolation: IsolationManager,
    launcher: Arc<dyn Launcher>,
    policy: PolicySection,
    sink: Arc<dyn NativeSink>,
}

impl Executor {
    pub fn new(
        registry: BindingRegistry,
        isolation: IsolationManager,
        launcher: Arc<dyn Launcher>,
        policy: PolicySection,
    ) -> Self {
        Self {
            registry,
            isolation,
            launcher,
            policy,
            sink: Arc::new(TracingSink),
        }
    }

    /// Built-in bindings, the configured launcher, and roots under `state_dir`.
    pub fn from_config(config: &CompatConfig) -> Result<Self, CoreError> {
        let launcher = select_launcher(&config.isolation.launcher)?;
        Ok(Self::new(
            BindingRegistry::builtin(config),
            IsolationManager::new(&config.isolation.state_dir),
            launcher,
            config.policy.clone(),
        ))
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn NativeSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn supported_distros(&self) -> Vec<DistroId> {
        self.registry.distros()
    }

    pub fn isolation(&self) -> &IsolationManager {
        &self.isolation
    }

    pub fn launcher(&self) -> &Arc<dyn Launcher> {
        &self.launcher
    }

    /// Run one operation to completion inside its distro's isolation root.
    pub fn execute(&self, op: &PackageOperation) -> Result<NativeAction, CoreError> {
        let binding = self.registry.get(&op.distro)?;
        let mut handle = self.isolation.acquire(binding.staging_plan())?;
        debug!(
            "{} {} {:?} in root #{}",
            op.distro,
            op.kind,
            op.payload_strings(),
            handle.sequence()
        );

        let translator = Translator::new(binding.as_ref(), self.launcher.as_ref());
        let action = match op.kind {
            OperationKind::Install => translator.install(&mut handle, op.payload())?,
            OperationKind::Remove => translator.remove(
                &mut handle,
                op.payload(),
                self.policy.remove_resolves_deps,
            )?,
        };
        drop(handle);

        self.sink.apply(&action)?;
        Ok(action)
    }

    /// Resolve and translate dependencies without installing anything.
    pub fn resolve(
        &self,
        distro: &DistroId,
        specs: &[PackageSpec],
    ) -> Result<NativeAction, CoreError> {
        let binding = self.registry.get(distro)?;
        let mut handle = self.isolation.acquire(binding.staging_plan())?;
        Translator::new(binding.as_ref(), self.launcher.as_ref()).resolve_deps(&mut handle, specs)
    }

    /// Integrity of the distro's root; `None` if it was never staged.
    pub fn verify(&self, distro: &DistroId) -> Result<Option<StagingMarker>, CoreError> {
        let binding = self.registry.get(distro)?;
        Ok(self.isolation.verify(binding.staging_plan())?)
    }

    /// Foreign tools the distro's binding needs that are absent from the compat root.
    pub fn missing_binaries(&self, distro: &DistroId) -> Result<Vec<MissingPrereq>, CoreError> {
        let plan = self.registry.get(distro)?.staging_plan().clone();
        Ok(check_compat_binaries(&plan.source_dir, &plan.binaries))
    }

    pub fn teardown(&self, distro: &DistroId) -> Result<(), CoreError> {
        self.registry.get(distro)?;
        Ok(self.isolation.teardown(distro)?)
    }

    pub fn state(&self, distro: &DistroId) -> Result<LifecycleState, CoreError> {
        self.registry.get(distro)?;
        Ok(self.isolation.state(distro))
    }

    /// Tear down every root touched by this executor.
    pub fn shutdown(&self) -> Result<Vec<DistroId>, CoreError> {
        let torn = self.isolation.shutdown()?;
        if !torn.is_empty() {
            info!("tore down {} isolation root(s)", torn.len());
        }
        Ok(torn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alpine::AlpineBinding;
    use crate::sink::RecordingSink;
    use crate::translate::Verb;
    use crate::void::VoidBinding;
    use pkgcompat_runtime::{LaunchOutput, MockLauncher};
    use std::path::Path;

    struct Fixture {
        dir: tempfile::TempDir,
        launcher: Arc<MockLauncher>,
        sink: Arc<RecordingSink>,
        executor: Executor,
    }

    fn fake_tools(compat: &Path, distro: &str, tools: &[&str]) {
        let bin = compat.join(distro).join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        for tool in tools {
            std::fs::write(bin.join(tool), format!("static {tool}")).unwrap();
        }
    }

    fn fixture(policy: PolicySection) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let compat = dir.path().join("compat");
        fake_tools(&compat, "alpine", &["apk"]);
        fake_tools(&compat, "void", &["xbps-install", "xbps-remove", "xbps-query"]);

        let mut registry = BindingRegistry::new();
        registry.register(Arc::new(AlpineBinding::new(&compat, None)));
        registry.register(Arc::new(VoidBinding::new(&compat, None)));

        let launcher = Arc::new(MockLauncher::new());
        let sink = Arc::new(RecordingSink::new());
        let executor = Executor::new(
            registry,
            IsolationManager::new(dir.path().join("state")),
            Arc::clone(&launcher) as Arc<dyn Launcher>,
            policy,
        )
        .with_sink(Arc::clone(&sink) as Arc<dyn NativeSink>);
        Fixture {
            dir,
            launcher,
            sink,
            executor,
        }
    }

    fn op(kind: OperationKind, distro: &str, specs: &[&str]) -> PackageOperation {
        PackageOperation::parse(kind, distro, specs).unwrap()
    }

    #[test]
    fn alpine_install_runs_apk_add() {
        let f = fixture(PolicySection::default());
        f.launcher.respond_stdout(
            &["apk", "info", "--depends", "curl"],
            "curl-8 depends on:\nmusl\nca-certificates\n",
        );
        f.launcher.respond_stdout(
            &["apk", "info", "--depends", "bash"],
            "bash-5 depends on:\nmusl\n",
        );

        let action = f
            .executor
            .execute(&op(OperationKind::Install, "alpine", &["curl", "bash"]))
            .unwrap();
        assert!(action.warnings.is_empty());
        assert_eq!(action.exit_status, Some(0));
        assert_eq!(f.launcher.count_matching(&["apk", "add", "curl", "bash"]), 1);
        assert_eq!(f.sink.actions(), vec![action]);
        assert_eq!(
            f.executor.state(&DistroId::new("alpine")).unwrap(),
            LifecycleState::Staged
        );
    }

    #[test]
    fn foreign_failure_is_reported_with_status() {
        let f = fixture(PolicySection::default());
        f.launcher.respond_status(&["xbps-install"], 19);

        let err = f
            .executor
            .execute(&op(OperationKind::Install, "void", &["jq"]))
            .unwrap_err();
        assert!(matches!(err, CoreError::ForeignBinaryFailed(19)));
        assert!(f.sink.actions().is_empty());
    }

    #[test]
    fn remove_skips_resolution_by_default() {
        let f = fixture(PolicySection::default());
        f.executor
            .execute(&op(OperationKind::Remove, "alpine", &["curl"]))
            .unwrap();
        assert_eq!(f.launcher.count_matching(&["apk", "info"]), 0);
        assert_eq!(f.launcher.count_matching(&["apk", "del", "curl"]), 1);
    }

    #[test]
    fn remove_resolves_when_policy_says_so() {
        let f = fixture(PolicySection {
            remove_resolves_deps: true,
        });
        f.launcher
            .respond_stdout(&["apk", "info", "--depends"], "curl-8 depends on:\nmusl\n");
        let action = f
            .executor
            .execute(&op(OperationKind::Remove, "alpine", &["curl"]))
            .unwrap();
        assert_eq!(f.launcher.count_matching(&["apk", "info"]), 1);
        assert_eq!(action.verb, Verb::Remove);
        assert!(action.graph.values().any(|deps| !deps.is_empty()));
    }

    #[test]
    fn unsupported_distro_touches_nothing() {
        let f = fixture(PolicySection::default());
        let err = f
            .executor
            .execute(&op(OperationKind::Install, "gentoo", &["curl"]))
            .unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedDistro(_)));
        assert_eq!(f.executor.isolation().acquisitions(), 0);
        assert!(f.launcher.invocations().is_empty());
    }

    #[test]
    fn killed_tool_forces_rebuild() {
        let f = fixture(PolicySection::default());
        f.launcher.respond(
            &["apk", "add"],
            LaunchOutput {
                status: 137,
                signal: Some(9),
                ..LaunchOutput::default()
            },
        );
        let err = f
            .executor
            .execute(&op(OperationKind::Install, "alpine", &["curl"]))
            .unwrap_err();
        assert!(matches!(err, CoreError::ForeignBinaryFailed(137)));
        let alpine = DistroId::new("alpine");
        assert!(f.executor.verify(&alpine).is_err());
    }

    #[test]
    fn resolve_reports_unmapped_void_dependency() {
        let f = fixture(PolicySection::default());
        f.launcher
            .respond_stdout(&["xbps-query"], "glibc>=2.39_1\nglibc-compat-2.39_1\n");
        let action = f
            .executor
            .resolve(&DistroId::new("void"), &[PackageSpec::parse("steam").unwrap()])
            .unwrap();
        assert_eq!(action.unmapped_names(), ["glibc-compat"]);
        assert_eq!(f.launcher.count_matching(&["xbps-install"]), 0);
    }

    #[test]
    fn teardown_and_shutdown() {
        let f = fixture(PolicySection::default());
        f.executor
            .execute(&op(OperationKind::Install, "void", &["jq"]))
            .unwrap();
        let void = DistroId::new("void");
        assert!(f.executor.verify(&void).unwrap().is_some());

        f.executor.teardown(&void).unwrap();
        assert_eq!(f.executor.state(&void).unwrap(), LifecycleState::TornDown);
        assert!(f.executor.verify(&void).unwrap().is_none());
        assert_eq!(f.executor.shutdown().unwrap(), vec![void]);
    }

    #[test]
    fn reports_missing_compat_binaries() {
        let f = fixture(PolicySection::default());
        assert!(f
            .executor
            .missing_binaries(&DistroId::new("alpine"))
            .unwrap()
            .is_empty());

        let compat = f.dir.path().join("compat");
        std::fs::remove_file(compat.join("void/bin/xbps-query")).unwrap();
        let missing = f.executor.missing_binaries(&DistroId::new("void")).unwrap();
        assert_eq!(missing.len(), 1);
        assert!(missing[0].name.contains("xbps-query"));
    }
}
