use super::{run_operation, CliError, Session};
use pkgcompat_schema::{CompatConfig, OperationKind};
use std::path::Path;

pub fn run(
    config: &CompatConfig,
    socket: &Path,
    distro: &str,
    packages: &[String],
    embedded: bool,
    json: bool,
) -> Result<u8, CliError> {
    let session = Session::open(config, socket, embedded)?;
    run_operation(&session, OperationKind::Install, distro, packages, json)
}
