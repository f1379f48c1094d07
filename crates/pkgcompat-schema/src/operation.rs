use crate::types::{DistroId, Fingerprint};
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest accepted package spec, in bytes.
pub const MAX_SPEC_LEN: usize = 128;

/// Characters that start a version constraint inside a spec (`curl>=8.0`).
const CONSTRAINT_CHARS: &[char] = &['<', '>', '=', '~'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Install,
    Remove,
}

impl OperationKind {
    pub const ALL: [OperationKind; 2] = [OperationKind::Install, OperationKind::Remove];

    /// Message type byte used on the daemon wire.
    pub fn wire_code(self) -> u8 {
        match self {
            Self::Install => 1,
            Self::Remove => 2,
        }
    }

    pub fn from_wire_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Install),
            2 => Some(Self::Remove),
            _ => None,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Install => f.write_str("install"),
            Self::Remove => f.write_str("remove"),
        }
    }
}

impl FromStr for OperationKind {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "install" => Ok(Self::Install),
            "remove" => Ok(Self::Remove),
            other => Err(SchemaError::UnknownKind(other.to_owned())),
        }
    }
}

/// A single package-name token handed to a foreign package manager.
///
/// Validated on construction: non-empty, at most [`MAX_SPEC_LEN`] bytes, no
/// path separators, whitespace, or control characters, and no leading `-` so
/// the token can never be read as a flag by the foreign binary.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageSpec(String);

impl PackageSpec {
    pub fn parse(raw: &str) -> Result<Self, SchemaError> {
        if raw.is_empty() {
            return Err(SchemaError::InvalidPayload(
                "package spec must not be empty".to_owned(),
            ));
        }
        if raw.len() > MAX_SPEC_LEN {
            return Err(SchemaError::InvalidPayload(format!(
                "package spec is {} bytes, limit is {MAX_SPEC_LEN}",
                raw.len()
            )));
        }
        if raw.starts_with('-') {
            return Err(SchemaError::InvalidPayload(format!(
                "package spec '{raw}' must not start with '-'"
            )));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| *c == '/' || *c == '\\' || c.is_whitespace() || c.is_control())
        {
            return Err(SchemaError::InvalidPayload(format!(
                "package spec {raw:?} contains forbidden character {bad:?}"
            )));
        }
        Ok(Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Package name with any version constraint removed.
    pub fn name(&self) -> &str {
        self.0
            .split(CONSTRAINT_CHARS)
            .next()
            .filter(|n| !n.is_empty())
            .unwrap_or(self.0.as_str())
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PackageSpec {
    type Error = SchemaError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PackageSpec> for String {
    fn from(spec: PackageSpec) -> Self {
        spec.0
    }
}

/// A validated install/remove request for one foreign distro.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageOperation {
    pub kind: OperationKind,
    pub distro: DistroId,
    payload: Vec<PackageSpec>,
}

impl PackageOperation {
    pub fn new(
        kind: OperationKind,
        distro: DistroId,
        payload: Vec<PackageSpec>,
    ) -> Result<Self, SchemaError> {
        if payload.is_empty() {
            return Err(SchemaError::InvalidPayload(
                "operation payload must name at least one package".to_owned(),
            ));
        }
        Ok(Self {
            kind,
            distro,
            payload,
        })
    }

    /// Validate raw strings from an untrusted boundary into an operation.
    pub fn parse(
        kind: OperationKind,
        distro: &str,
        specs: &[impl AsRef<str>],
    ) -> Result<Self, SchemaError> {
        let distro =
            DistroId::parse(distro).ok_or_else(|| SchemaError::InvalidDistro(distro.to_owned()))?;
        let payload = specs
            .iter()
            .map(|s| PackageSpec::parse(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(kind, distro, payload)
    }

    pub fn payload(&self) -> &[PackageSpec] {
        &self.payload
    }

    pub fn payload_strings(&self) -> Vec<String> {
        self.payload.iter().map(|s| s.as_str().to_owned()).collect()
    }

    /// Deduplication key over `(distro, kind, payload)`, payload in caller order.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.distro.as_bytes());
        hasher.update(&[0, self.kind.wire_code(), 0]);
        for spec in &self.payload {
            hasher.update(spec.as_str().as_bytes());
            hasher.update(&[0]);
        }
        Fingerprint::new(hasher.finalize().to_hex().to_string())
    }
}
