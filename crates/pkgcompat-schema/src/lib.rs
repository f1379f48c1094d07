//! Operation model, package spec validation, mapping tables, and configuration for pkgcompat.
//!
//! This crate defines the schema layer: validated package-operation requests
//! (`PackageOperation`, `PackageSpec`), open distro identifiers (`DistroId`),
//! request fingerprints used for single-flight deduplication, versioned
//! foreign-to-native `MappingTable`s, and the TOML `CompatConfig`.

pub mod config;
pub mod mapping;
pub mod operation;
pub mod types;

pub use config::{
    load_config, parse_config_file, parse_config_str, CompatConfig, ConfigError, DaemonSection,
    IsolationSection, PolicySection,
};
pub use mapping::MappingTable;
pub use operation::{OperationKind, PackageOperation, PackageSpec, MAX_SPEC_LEN};
pub use types::{DistroId, Fingerprint, InvalidDistroId, NativeId};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("invalid distro identifier: {0:?}")]
    InvalidDistro(String),
    #[error("unknown operation kind: {0}")]
    UnknownKind(String),
}
