//! Translation of foreign package operations into native ones.
//!
//! [`translate`] is the pure half: given a binding's mapping table, the
//! requested specs, and the dependencies the foreign tool reported for them, it
//! builds the native dependency graph and the ordered native steps. The
//! [`Translator`] is the effectful half that asks the foreign tool for those
//! dependencies and drives its install/remove verbs inside an isolation root.

use crate::binding::{ForeignDependency, ProxyBinding};
use crate::CoreError;
use pkgcompat_runtime::{IsolationHandle, Launcher};
use pkgcompat_schema::{DistroId, NativeId, PackageSpec};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info};

/// Native package -> native packages it depends on.
pub type DependencyGraph = BTreeMap<NativeId, BTreeSet<NativeId>>;

/// Dependencies reported by the foreign tool, per requested spec.
pub type DependencyReport = BTreeMap<PackageSpec, Vec<ForeignDependency>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    Install,
    Remove,
    ResolveDeps,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verb::Install => write!(f, "install"),
            Verb::Remove => write!(f, "remove"),
            Verb::ResolveDeps => write!(f, "resolve_deps"),
        }
    }
}

impl From<pkgcompat_schema::OperationKind> for Verb {
    fn from(kind: pkgcompat_schema::OperationKind) -> Self {
        match kind {
            pkgcompat_schema::OperationKind::Install => Verb::Install,
            pkgcompat_schema::OperationKind::Remove => Verb::Remove,
        }
    }
}

/// A foreign dependency with no native counterpart. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnmappedDependency {
    pub foreign: String,
    pub required_by: String,
}

impl fmt::Display for UnmappedDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (required by {})", self.foreign, self.required_by)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "package", rename_all = "snake_case")]
pub enum NativeStep {
    Add(NativeId),
    Remove(NativeId),
}

/// Everything the native package manager needs to mirror one foreign operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeAction {
    pub verb: Verb,
    pub distro: DistroId,
    /// Native ids of the requested packages, in request order.
    pub requested: Vec<NativeId>,
    pub graph: DependencyGraph,
    /// Sorted and deduplicated.
    pub warnings: Vec<UnmappedDependency>,
    pub steps: Vec<NativeStep>,
    pub mapping_version: u32,
    /// Exit status of the foreign install/remove verb, once it has run.
    pub exit_status: Option<i32>,
}

impl NativeAction {
    /// Distinct unmapped foreign names, in sorted order.
    pub fn unmapped_names(&self) -> Vec<&str> {
        let names: BTreeSet<&str> = self.warnings.iter().map(|w| w.foreign.as_str()).collect();
        names.into_iter().collect()
    }
}

/// Native id for a requested package. Unmapped roots keep their foreign
/// name under a `distro:` prefix; they are installed by the foreign tool itself.
fn root_id(binding: &dyn ProxyBinding, spec: &PackageSpec) -> NativeId {
    binding
        .mapping()
        .lookup(spec.name())
        .cloned()
        .unwrap_or_else(|| NativeId::new(format!("{}:{}", binding.distro(), spec.name())))
}

/// Build the native view of a foreign operation. Pure: no I/O, no hidden state.
pub fn translate(
    binding: &dyn ProxyBinding,
    verb: Verb,
    specs: &[PackageSpec],
    reported: &DependencyReport,
) -> NativeAction {
    let table = binding.mapping();
    let mut graph = DependencyGraph::new();
    let mut warnings = BTreeSet::new();
    let mut requested = Vec::with_capacity(specs.len());

    for spec in specs {
        let root = root_id(binding, spec);
        let mut edges = BTreeSet::new();
        for dep in reported.get(spec).map_or(&[][..], Vec::as_slice) {
            match table.lookup(&dep.name) {
                Some(native) if *native != root => {
                    edges.insert(native.clone());
                }
                Some(_) => {}
                None => {
                    warnings.insert(UnmappedDependency {
                        foreign: dep.name.clone(),
                        required_by: spec.name().to_owned(),
                    });
                }
            }
        }
        for native in &edges {
            graph.entry(native.clone()).or_default();
        }
        graph.entry(root.clone()).or_default().extend(edges);
        if !requested.contains(&root) {
            requested.push(root);
        }
    }

    let steps = match verb {
        Verb::Install => install_order(&graph)
            .into_iter()
            .map(NativeStep::Add)
            .collect(),
        Verb::Remove => requested.iter().cloned().map(NativeStep::Remove).collect(),
        Verb::ResolveDeps => Vec::new(),
    };

    NativeAction {
        verb,
        distro: binding.distro().clone(),
        requested,
        graph,
        warnings: warnings.into_iter().collect(),
        steps,
        mapping_version: table.version,
        exit_status: None,
    }
}

/// Dependencies before dependents; ties broken by name. Cycles are cut at the
/// first revisit.
fn install_order(graph: &DependencyGraph) -> Vec<NativeId> {
    fn visit(
        node: &NativeId,
        graph: &DependencyGraph,
        seen: &mut BTreeSet<NativeId>,
        out: &mut Vec<NativeId>,
    ) {
        if !seen.insert(node.clone()) {
            return;
        }
        if let Some(deps) = graph.get(node) {
            for dep in deps {
                visit(dep, graph, seen, out);
            }
        }
        out.push(node.clone());
    }

    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(graph.len());
    for node in graph.keys() {
        visit(node, graph, &mut seen, &mut out);
    }
    out
}

/// Drives one binding inside one held isolation root.
pub struct Translator<'a> {
    binding: &'a dyn ProxyBinding,
    launcher: &'a dyn Launcher,
}

impl<'a> Translator<'a> {
    pub fn new(binding: &'a dyn ProxyBinding, launcher: &'a dyn Launcher) -> Self {
        Self { binding, launcher }
    }

    fn report(
        &self,
        handle: &mut IsolationHandle,
        specs: &[PackageSpec],
    ) -> Result<DependencyReport, CoreError> {
        let mut report = DependencyReport::new();
        for spec in specs {
            if report.contains_key(spec) {
                continue;
            }
            let deps = self.binding.resolve_deps(handle, self.launcher, spec)?;
            report.insert(spec.clone(), deps);
        }
        Ok(report)
    }

    /// Ask the foreign tool for dependencies and map them, without changing anything.
    pub fn resolve_deps(
        &self,
        handle: &mut IsolationHandle,
        specs: &[PackageSpec],
    ) -> Result<NativeAction, CoreError> {
        let report = self.report(handle, specs)?;
        Ok(translate(self.binding, Verb::ResolveDeps, specs, &report))
    }

    pub fn install(
        &self,
        handle: &mut IsolationHandle,
        specs: &[PackageSpec],
    ) -> Result<NativeAction, CoreError> {
        let report = self.report(handle, specs)?;
        let mut action = translate(self.binding, Verb::Install, specs, &report);
        let status = self.binding.install(handle, self.launcher, specs)?;
        finish(&mut action, status)?;
        Ok(action)
    }

    /// Remove `specs`; the dependency pass only runs when `resolve_first` is set.
    pub fn remove(
        &self,
        handle: &mut IsolationHandle,
        specs: &[PackageSpec],
        resolve_first: bool,
    ) -> Result<NativeAction, CoreError> {
        let report = if resolve_first {
            self.report(handle, specs)?
        } else {
            DependencyReport::new()
        };
        let mut action = translate(self.binding, Verb::Remove, specs, &report);
        let status = self.binding.remove(handle, self.launcher, specs)?;
        finish(&mut action, status)?;
        Ok(action)
    }
}

fn finish(action: &mut NativeAction, status: i32) -> Result<(), CoreError> {
    action.exit_status = Some(status);
    if status != 0 {
        return Err(CoreError::ForeignBinaryFailed(status));
    }
    if action.warnings.is_empty() {
        info!(
            "{} {} {} package(s): {} native step(s)",
            action.distro,
            action.verb,
            action.requested.len(),
            action.steps.len()
        );
    } else {
        info!(
            "{} {} finished with unmapped dependencies: {}",
            action.distro,
            action.verb,
            action.unmapped_names().join(" ")
        );
    }
    debug!("native graph: {:?}", action.graph);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alpine::AlpineBinding;
    use crate::void::VoidBinding;
    use std::path::Path;

    fn spec(s: &str) -> PackageSpec {
        PackageSpec::parse(s).unwrap()
    }

    fn deps(names: &[&str]) -> Vec<ForeignDependency> {
        names.iter().map(|n| ForeignDependency::new(*n, *n)).collect()
    }

    #[test]
    fn alpine_install_maps_dependencies() {
        let binding = AlpineBinding::new(Path::new("/compat"), None);
        let specs = vec![spec("curl"), spec("bash")];
        let mut report = DependencyReport::new();
        report.insert(spec("curl"), deps(&["musl", "ca-certificates"]));
        report.insert(spec("bash"), deps(&["musl", "readline"]));

        let action = translate(&binding, Verb::Install, &specs, &report);
        assert!(action.warnings.is_empty());
        assert_eq!(action.requested, [NativeId::new("alpine:curl"), NativeId::new("alpine:bash")]);
        let curl = &action.graph[&NativeId::new("alpine:curl")];
        assert!(curl.contains(&NativeId::new("libc")));
        assert!(curl.contains(&NativeId::new("ca-certificates")));
        assert!(action.graph.contains_key(&NativeId::new("libc")));
        assert_eq!(action.mapping_version, 1);
        assert_eq!(action.exit_status, None);
    }

    #[test]
    fn install_steps_put_dependencies_first() {
        let binding = AlpineBinding::new(Path::new("/compat"), None);
        let mut report = DependencyReport::new();
        report.insert(spec("curl"), deps(&["zlib", "musl"]));

        let action = translate(&binding, Verb::Install, &[spec("curl")], &report);
        let order: Vec<&str> = action
            .steps
            .iter()
            .map(|s| match s {
                NativeStep::Add(id) | NativeStep::Remove(id) => id.as_str(),
            })
            .collect();
        let curl_at = order.iter().position(|n| *n == "alpine:curl").unwrap();
        let libc_at = order.iter().position(|n| *n == "libc").unwrap();
        let zlib_at = order.iter().position(|n| *n == "zlib").unwrap();
        assert!(libc_at < curl_at && zlib_at < curl_at);
    }

    #[test]
    fn void_unmapped_dependency_is_a_warning() {
        let binding = VoidBinding::new(Path::new("/compat"), None);
        let mut report = DependencyReport::new();
        report.insert(spec("steam"), deps(&["glibc", "glibc-compat", "libcurl"]));

        let action = translate(&binding, Verb::ResolveDeps, &[spec("steam")], &report);
        assert_eq!(
            action.warnings,
            [UnmappedDependency {
                foreign: "glibc-compat".to_owned(),
                required_by: "steam".to_owned(),
            }]
        );
        let steam = &action.graph[&NativeId::new("void:steam")];
        assert_eq!(
            steam.iter().map(NativeId::as_str).collect::<Vec<_>>(),
            ["libc", "libcurl"]
        );
        assert!(action.steps.is_empty());
        assert_eq!(action.unmapped_names(), ["glibc-compat"]);
    }

    #[test]
    fn translation_is_deterministic() {
        let binding = VoidBinding::new(Path::new("/compat"), None);
        let specs = vec![spec("curl"), spec("git"), spec("curl>=8")];
        let mut report = DependencyReport::new();
        report.insert(spec("curl"), deps(&["libcurl", "glibc", "mystery"]));
        report.insert(spec("git"), deps(&["glibc", "libcurl", "perl-compat"]));

        let first = translate(&binding, Verb::Install, &specs, &report);
        let second = translate(&binding, Verb::Install, &specs, &report);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        // `curl` and `curl>=8` are one native node.
        assert_eq!(first.requested.len(), 2);
    }

    #[test]
    fn remove_steps_follow_request_order() {
        let binding = AlpineBinding::new(Path::new("/compat"), None);
        let action = translate(
            &binding,
            Verb::Remove,
            &[spec("zlib"), spec("curl")],
            &DependencyReport::new(),
        );
        assert_eq!(
            action.steps,
            [
                NativeStep::Remove(NativeId::new("zlib")),
                NativeStep::Remove(NativeId::new("alpine:curl")),
            ]
        );
    }

    #[test]
    fn mapping_version_is_carried() {
        let user = pkgcompat_schema::MappingTable::from_pairs(4, &[]);
        let binding = AlpineBinding::new(Path::new("/compat"), Some(&user));
        let report = DependencyReport::new();
        let action = translate(&binding, Verb::ResolveDeps, &[spec("curl")], &report);
        assert_eq!(action.mapping_version, 4);
    }
}
