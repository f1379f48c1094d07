use super::{executor, json_pretty, parse_distro, CliError, EXIT_SUCCESS};
use pkgcompat_schema::CompatConfig;

pub fn run(config: &CompatConfig, distros: &[String], json: bool) -> Result<u8, CliError> {
    let distros = distros
        .iter()
        .map(|d| parse_distro(d))
        .collect::<Result<Vec<_>, _>>()?;
    let executor = executor(config)?;
    for distro in &distros {
        executor.teardown(distro)?;
    }

    if json {
        let payload = serde_json::json!({ "torn_down": distros });
        println!("{}", json_pretty(&payload)?);
    } else {
        for distro in &distros {
            println!("tore down {distro}");
        }
    }
    Ok(EXIT_SUCCESS)
}
