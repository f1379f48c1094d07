use super::{executor, json_pretty, parse_distro, CliError, EXIT_ROOT_ERROR, EXIT_SUCCESS};
use pkgcompat_core::CoreError;
use pkgcompat_runtime::RuntimeError;
use pkgcompat_schema::CompatConfig;

pub fn run(config: &CompatConfig, distro: &str, json: bool) -> Result<u8, CliError> {
    let distro = parse_distro(distro)?;
    let result = executor(config)?.verify(&distro);

    let (state, detail, code) = match result {
        Ok(Some(marker)) => (
            "intact",
            format!("{} files, staged at {}", marker.files.len(), marker.staged_at),
            EXIT_SUCCESS,
        ),
        Ok(None) => ("unstaged", "no isolation root".to_owned(), EXIT_SUCCESS),
        Err(CoreError::Runtime(
            e @ (RuntimeError::RootCorrupted(_) | RuntimeError::StagingFailed(_)),
        )) => ("corrupted", e.to_string(), EXIT_ROOT_ERROR),
        Err(e) => return Err(e.into()),
    };

    if json {
        let payload = serde_json::json!({
            "distro": distro,
            "root": state,
            "detail": detail,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{distro}: {state} ({detail})");
    }
    Ok(code)
}
