use super::{executor, json_pretty, parse_distro, CliError, EXIT_SUCCESS};
use pkgcompat_core::NativeStep;
use pkgcompat_schema::{CompatConfig, NativeId, PackageSpec};

pub fn run(
    config: &CompatConfig,
    distro: &str,
    packages: &[String],
    json: bool,
) -> Result<u8, CliError> {
    let distro = parse_distro(distro)?;
    let specs = packages
        .iter()
        .map(|p| PackageSpec::parse(p))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;

    let action = executor(config)?.resolve(&distro, &specs)?;

    if json {
        println!("{}", json_pretty(&action)?);
        return Ok(EXIT_SUCCESS);
    }

    println!(
        "{distro}: {} (mapping v{})",
        packages.join(" "),
        action.mapping_version
    );
    for (native, deps) in &action.graph {
        if deps.is_empty() {
            println!("  {native}");
        } else {
            let deps: Vec<&str> = deps.iter().map(NativeId::as_str).collect();
            println!("  {native} -> {}", deps.join(", "));
        }
    }
    for step in &action.steps {
        match step {
            NativeStep::Add(id) => println!("  + {id}"),
            NativeStep::Remove(id) => println!("  - {id}"),
        }
    }
    for warning in &action.warnings {
        println!("warning: no native package for {warning}");
    }
    Ok(EXIT_SUCCESS)
}
