use crate::CoreError;
use pkgcompat_runtime::{IsolationHandle, Launcher, StagingPlan};
use pkgcompat_schema::{DistroId, MappingTable, PackageSpec};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One dependency as reported by a foreign package manager, reduced to its bare name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ForeignDependency {
    pub name: String,
    /// The line as the foreign tool printed it, constraint included.
    pub raw: String,
}

impl ForeignDependency {
    pub fn new(name: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            raw: raw.into(),
        }
    }
}

/// Distro-specific knowledge of one foreign package manager.
///
/// Implementations only describe their tool: where it is staged, how its
/// verbs are spelled, how its dependency listing reads, and how its names map
/// onto native ones. Running the tool is shared by the provided methods, so no
/// other component ever needs to branch on a distro name.
pub trait ProxyBinding: Send + Sync {
    fn distro(&self) -> &DistroId;

    /// Binaries and libraries to stage into this distro's isolation root.
    fn staging_plan(&self) -> &StagingPlan;

    fn mapping(&self) -> &MappingTable;

    fn install_argv(&self, specs: &[PackageSpec]) -> Vec<String>;

    fn remove_argv(&self, specs: &[PackageSpec]) -> Vec<String>;

    fn resolve_deps_argv(&self, spec: &PackageSpec) -> Vec<String>;

    /// Parse the output of the resolution verb. Must be a pure function of `output`.
    fn parse_dependencies(&self, output: &str) -> Vec<ForeignDependency>;

    /// Run the install verb and return the tool's exit status.
    fn install(
        &self,
        handle: &mut IsolationHandle,
        launcher: &dyn Launcher,
        specs: &[PackageSpec],
    ) -> Result<i32, CoreError> {
        invoke(handle, launcher, &self.install_argv(specs))
    }

    /// Run the remove verb and return the tool's exit status.
    fn remove(
        &self,
        handle: &mut IsolationHandle,
        launcher: &dyn Launcher,
        specs: &[PackageSpec],
    ) -> Result<i32, CoreError> {
        invoke(handle, launcher, &self.remove_argv(specs))
    }

    fn resolve_deps(
        &self,
        handle: &mut IsolationHandle,
        launcher: &dyn Launcher,
        spec: &PackageSpec,
    ) -> Result<Vec<ForeignDependency>, CoreError> {
        let argv = self.resolve_deps_argv(spec);
        let output = handle.run(launcher, &argv)?;
        if output.signal.is_some() {
            handle.mark_corrupted();
        }
        if !output.success() {
            warn!(
                "{} dependency query for {spec} failed ({}): {}",
                self.distro(),
                output.status,
                output.stderr.trim()
            );
            return Err(CoreError::ForeignBinaryFailed(output.status));
        }
        let deps = self.parse_dependencies(&output.stdout);
        debug!("{} reports {} dependencies for {spec}", self.distro(), deps.len());
        Ok(deps)
    }
}

fn invoke(
    handle: &mut IsolationHandle,
    launcher: &dyn Launcher,
    argv: &[String],
) -> Result<i32, CoreError> {
    let output = handle.run(launcher, argv)?;
    // A tool killed mid-transaction may leave its database half-written.
    if output.signal.is_some() {
        handle.mark_corrupted();
    }
    if !output.success() && !output.stderr.is_empty() {
        warn!("{} exited {}: {}", argv.join(" "), output.status, output.stderr.trim());
    }
    Ok(output.status)
}

/// argv for a staged tool followed by verb arguments and package specs.
pub(crate) fn tool_argv(tool: &str, args: &[&str], specs: &[PackageSpec]) -> Vec<String> {
    let mut argv = Vec::with_capacity(1 + args.len() + specs.len());
    argv.push(StagingPlan::in_root_path(tool));
    argv.extend(args.iter().map(|a| (*a).to_owned()));
    argv.extend(specs.iter().map(|s| s.as_str().to_owned()));
    argv
}

/// Cut a dependency pattern at its first version-constraint character.
pub(crate) fn strip_constraint(pattern: &str) -> &str {
    pattern
        .split(['<', '>', '=', '~'])
        .next()
        .unwrap_or(pattern)
}
