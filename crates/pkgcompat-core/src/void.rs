//! Void Linux binding for the static xbps tool set.

use crate::binding::{strip_constraint, tool_argv, ForeignDependency, ProxyBinding};
use pkgcompat_runtime::StagingPlan;
use pkgcompat_schema::{DistroId, MappingTable, PackageSpec};
use std::path::Path;

pub const VOID: &str = "void";

const XBPS_INSTALL: &str = "xbps-install";
const XBPS_REMOVE: &str = "xbps-remove";
const XBPS_QUERY: &str = "xbps-query";

const BUILTIN_VERSION: u32 = 1;

// glibc-compat and similar shims have no native counterpart on purpose.
const BUILTIN_MAPPING: &[(&str, &str)] = &[
    ("glibc", "libc"),
    ("glibc-locales", "locales"),
    ("base-files", "base-files"),
    ("ca-certificates", "ca-certificates"),
    ("openssl", "openssl"),
    ("libssl3", "openssl"),
    ("libcrypto3", "openssl"),
    ("zlib", "zlib"),
    ("libzstd", "zstd"),
    ("liblz4", "lz4"),
    ("liblzma", "xz"),
    ("libbz2", "bzip2"),
    ("libcurl", "libcurl"),
    ("libnghttp2", "nghttp2"),
    ("libidn2", "libidn2"),
    ("libpsl", "libpsl"),
    ("libssh2", "libssh2"),
    ("ncurses-libs", "ncurses"),
    ("readline", "readline"),
    ("libarchive", "libarchive"),
    ("bash", "bash"),
    ("coreutils", "coreutils"),
];

pub struct VoidBinding {
    distro: DistroId,
    plan: StagingPlan,
    mapping: MappingTable,
}

impl VoidBinding {
    /// `compat_root` holds `void/bin/{xbps-install,xbps-remove,xbps-query}`.
    pub fn new(compat_root: &Path, overrides: Option<&MappingTable>) -> Self {
        let distro = DistroId::new(VOID);
        let builtin = MappingTable::from_pairs(BUILTIN_VERSION, BUILTIN_MAPPING);
        Self {
            plan: StagingPlan::new(
                distro.clone(),
                compat_root.join(VOID),
                &[XBPS_INSTALL, XBPS_REMOVE, XBPS_QUERY],
            ),
            mapping: match overrides {
                Some(user) => builtin.merged_with(user),
                None => builtin,
            },
            distro,
        }
    }
}

/// Reduce an xbps package pattern to its name.
///
/// Patterns are `name>=ver`, `name<ver`, or a fully versioned
/// `name-ver_rev` (`glibc-2.39_1`).
fn pattern_name(pattern: &str) -> &str {
    let stripped = strip_constraint(pattern);
    if stripped.len() != pattern.len() {
        return stripped;
    }
    match pattern.rsplit_once('-') {
        Some((name, version))
            if !name.is_empty()
                && version.contains('_')
                && version.starts_with(|c: char| c.is_ascii_digit()) =>
        {
            name
        }
        _ => pattern,
    }
}

impl ProxyBinding for VoidBinding {
    fn distro(&self) -> &DistroId {
        &self.distro
    }

    fn staging_plan(&self) -> &StagingPlan {
        &self.plan
    }

    fn mapping(&self) -> &MappingTable {
        &self.mapping
    }

    fn install_argv(&self, specs: &[PackageSpec]) -> Vec<String> {
        tool_argv(XBPS_INSTALL, &["-y"], specs)
    }

    fn remove_argv(&self, specs: &[PackageSpec]) -> Vec<String> {
        tool_argv(XBPS_REMOVE, &["-y"], specs)
    }

    fn resolve_deps_argv(&self, spec: &PackageSpec) -> Vec<String> {
        tool_argv(XBPS_QUERY, &["-R", "-x"], std::slice::from_ref(spec))
    }

    fn parse_dependencies(&self, output: &str) -> Vec<ForeignDependency> {
        let mut deps: Vec<ForeignDependency> = Vec::new();
        for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let name = pattern_name(line);
            if name.is_empty() || deps.iter().any(|d| d.name == name) {
                continue;
            }
            deps.push(ForeignDependency::new(name, line));
        }
        deps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding() -> VoidBinding {
        VoidBinding::new(Path::new("/compat"), None)
    }

    fn specs(names: &[&str]) -> Vec<PackageSpec> {
        names.iter().map(|n| PackageSpec::parse(n).unwrap()).collect()
    }

    #[test]
    fn verbs_use_xbps_syntax() {
        let b = binding();
        assert_eq!(
            b.install_argv(&specs(&["curl"])),
            ["/bin/xbps-install", "-y", "curl"]
        );
        assert_eq!(
            b.remove_argv(&specs(&["curl", "jq"])),
            ["/bin/xbps-remove", "-y", "curl", "jq"]
        );
        assert_eq!(
            b.resolve_deps_argv(&PackageSpec::parse("curl").unwrap()),
            ["/bin/xbps-query", "-R", "-x", "curl"]
        );
    }

    #[test]
    fn stages_all_three_tools() {
        let b = binding();
        assert_eq!(
            b.staging_plan().binaries,
            ["xbps-install", "xbps-remove", "xbps-query"]
        );
        assert_eq!(b.staging_plan().primary_binary(), "xbps-install");
    }

    #[test]
    fn pattern_forms_reduce_to_name() {
        assert_eq!(pattern_name("glibc>=2.39_1"), "glibc");
        assert_eq!(pattern_name("libcurl<9.0"), "libcurl");
        assert_eq!(pattern_name("ca-certificates-20240203_1"), "ca-certificates");
        assert_eq!(pattern_name("glibc-compat"), "glibc-compat");
        assert_eq!(pattern_name("libssh2"), "libssh2");
    }

    #[test]
    fn parses_query_listing() {
        let output = "glibc>=2.39_1\nglibc-compat-2.39_1\nlibcurl>=8.6.0_1\n\nglibc>=2.32_1\n";
        let deps = binding().parse_dependencies(output);
        let names: Vec<&str> = deps.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["glibc", "glibc-compat", "libcurl"]);
    }

    #[test]
    fn glibc_compat_has_no_native_mapping() {
        let b = binding();
        assert_eq!(b.mapping().lookup("glibc").unwrap(), "libc");
        assert!(b.mapping().lookup("glibc-compat").is_none());
    }
}
