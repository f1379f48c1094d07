use crate::types::NativeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Versioned lookup from foreign package identifiers to native identifiers.
///
/// Pure data: lookups have no side effects, so translation over a table is
/// deterministic for a given `version`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingTable {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub packages: BTreeMap<String, NativeId>,
}

fn default_version() -> u32 {
    1
}

impl MappingTable {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            packages: BTreeMap::new(),
        }
    }

    /// Build a table from `(foreign, native)` pairs.
    pub fn from_pairs(version: u32, pairs: &[(&str, &str)]) -> Self {
        Self {
            version,
            packages: pairs
                .iter()
                .map(|(foreign, native)| ((*foreign).to_owned(), NativeId::new(*native)))
                .collect(),
        }
    }

    pub fn lookup(&self, foreign: &str) -> Option<&NativeId> {
        self.packages.get(foreign)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Overlay `other` on top of `self`. Entries and version from `other` win.
    #[must_use]
    pub fn merged_with(mut self, other: &MappingTable) -> Self {
        self.version = other.version;
        for (foreign, native) in &other.packages {
            self.packages.insert(foreign.clone(), native.clone());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_hits_and_misses() {
        let table = MappingTable::from_pairs(1, &[("musl", "libc"), ("openssl", "openssl3")]);
        assert_eq!(table.lookup("musl").map(NativeId::as_str), Some("libc"));
        assert!(table.lookup("glibc-compat").is_none());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn merge_overrides_entries_and_version() {
        let base = MappingTable::from_pairs(1, &[("musl", "libc"), ("zlib", "zlib")]);
        let user = MappingTable::from_pairs(4, &[("musl", "musl-libc")]);
        let merged = base.merged_with(&user);
        assert_eq!(merged.version, 4);
        assert_eq!(merged.lookup("musl").unwrap(), "musl-libc");
        assert_eq!(merged.lookup("zlib").unwrap(), "zlib");
    }

    #[test]
    fn deserializes_from_toml() {
        let table: MappingTable = toml::from_str(
            r#"
version = 3
[packages]
musl = "libc"
"#,
        )
        .unwrap();
        assert_eq!(table.version, 3);
        assert_eq!(table.lookup("musl").unwrap(), "libc");
    }

    #[test]
    fn version_defaults_to_one() {
        let table: MappingTable = toml::from_str("[packages]\n").unwrap();
        assert_eq!(table.version, 1);
        assert!(table.is_empty());
    }
}
