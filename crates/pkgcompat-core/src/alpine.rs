//! Alpine Linux binding for the statically linked `apk`.

use crate::binding::{strip_constraint, tool_argv, ForeignDependency, ProxyBinding};
use pkgcompat_runtime::StagingPlan;
use pkgcompat_schema::{DistroId, MappingTable, PackageSpec};
use std::path::Path;

pub const ALPINE: &str = "alpine";

const APK: &str = "apk";

/// Virtual provides (`so:libc.musl-x86_64.so.1`) name files, not packages.
const VIRTUAL_PREFIXES: &[&str] = &["so:", "cmd:", "pc:"];

const BUILTIN_VERSION: u32 = 1;

const BUILTIN_MAPPING: &[(&str, &str)] = &[
    ("musl", "libc"),
    ("musl-utils", "libc-bin"),
    ("libc-utils", "libc-bin"),
    ("busybox", "coreutils"),
    ("busybox-binsh", "sh"),
    ("ca-certificates", "ca-certificates"),
    ("ca-certificates-bundle", "ca-certificates"),
    ("openssl", "openssl"),
    ("libssl3", "openssl"),
    ("libcrypto3", "openssl"),
    ("zlib", "zlib"),
    ("zstd-libs", "zstd"),
    ("brotli-libs", "brotli"),
    ("nghttp2-libs", "nghttp2"),
    ("c-ares", "c-ares"),
    ("libidn2", "libidn2"),
    ("libunistring", "libunistring"),
    ("libpsl", "libpsl"),
    ("ncurses-libs", "ncurses"),
    ("ncurses-terminfo-base", "ncurses-base"),
    ("readline", "readline"),
    ("libcurl", "libcurl"),
];

pub struct AlpineBinding {
    distro: DistroId,
    plan: StagingPlan,
    mapping: MappingTable,
}

impl AlpineBinding {
    /// `compat_root` holds `alpine/bin/apk` and its `lib/` directory.
    pub fn new(compat_root: &Path, overrides: Option<&MappingTable>) -> Self {
        let distro = DistroId::new(ALPINE);
        let builtin = MappingTable::from_pairs(BUILTIN_VERSION, BUILTIN_MAPPING);
        Self {
            plan: StagingPlan::new(distro.clone(), compat_root.join(ALPINE), &[APK]),
            mapping: match overrides {
                Some(user) => builtin.merged_with(user),
                None => builtin,
            },
            distro,
        }
    }
}

impl ProxyBinding for AlpineBinding {
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
        tool_argv(APK, &["add"], specs)
    }

    fn remove_argv(&self, specs: &[PackageSpec]) -> Vec<String> {
        tool_argv(APK, &["del"], specs)
    }

    fn resolve_deps_argv(&self, spec: &PackageSpec) -> Vec<String> {
        tool_argv(APK, &["info", "--depends"], std::slice::from_ref(spec))
    }

    /// `apk info --depends` prints a `<pkg>-<ver> depends on:` header per
    /// matching package, one dependency per line, and a blank separator.
    fn parse_dependencies(&self, output: &str) -> Vec<ForeignDependency> {
        let mut deps: Vec<ForeignDependency> = Vec::new();
        for line in output.lines().map(str::trim) {
            if line.is_empty() || line.ends_with("depends on:") {
                continue;
            }
            // `!pkg` is a conflict, not a dependency.
            if line.starts_with('!') || VIRTUAL_PREFIXES.iter().any(|p| line.starts_with(p)) {
                continue;
            }
            let name = strip_constraint(line);
            if name.is_empty() || deps.iter().any(|d| d.name == name) {
                continue;
            }
            deps.push(ForeignDependency::new(name, line));
        }
        deps
    }
}
