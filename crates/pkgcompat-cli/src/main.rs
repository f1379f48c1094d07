mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::CliError;
use pkgcompat_schema::load_config;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "pkgcompat",
    version,
    about = "Run foreign distro package managers against an isolated root"
)]
struct Cli {
    /// Path to the configuration file (default: $PKGCOMPAT_CONFIG, then
    /// /etc/pkgcompat/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Daemon socket path (overrides the config file).
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Install foreign packages through the daemon.
    Install {
        /// Foreign distro (e.g. alpine, void).
        distro: String,
        /// Package specs, optionally with version constraints.
        #[arg(required = true)]
        packages: Vec<String>,
        /// Run the operation in-process instead of through the daemon socket.
        #[arg(long, default_value_t = false)]
        embedded: bool,
    },
    /// Remove foreign packages through the daemon.
    Remove {
        /// Foreign distro (e.g. alpine, void).
        distro: String,
        /// Package specs.
        #[arg(required = true)]
        packages: Vec<String>,
        /// Run the operation in-process instead of through the daemon socket.
        #[arg(long, default_value_t = false)]
        embedded: bool,
    },
    /// Serve package operations on the daemon socket until interrupted.
    Daemon {
        /// Leave isolation roots staged on exit instead of tearing them down.
        #[arg(long, default_value_t = false)]
        keep_roots: bool,
    },
    /// Resolve dependencies and show the native translation without installing.
    Translate {
        distro: String,
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Check the integrity of a distro's isolation root.
    Verify { distro: String },
    /// Remove the isolation roots of the given distros.
    Teardown {
        #[arg(required = true)]
        distros: Vec<String>,
    },
    /// Show supported distros, their root state, and daemon reachability.
    Status,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if matches!(cli.command, Commands::Daemon { .. }) {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("PKGCOMPAT_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    let result = match cli.command {
        Commands::Completions { shell } => {
            commands::completions::run::<Cli>(shell).map_err(CliError::from)
        }
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir).map_err(CliError::from),
        command => run_configured(command, cli.config.as_deref(), cli.socket, cli.json),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn run_configured(
    command: Commands,
    config_path: Option<&Path>,
    socket: Option<PathBuf>,
    json: bool,
) -> Result<u8, CliError> {
    let config = load_config(config_path)?;
    let socket = socket.unwrap_or_else(|| config.daemon.socket.clone());

    let runs_locally = matches!(
        command,
        Commands::Daemon { .. }
            | Commands::Translate { .. }
            | Commands::Install { embedded: true, .. }
            | Commands::Remove { embedded: true, .. }
    );
    if runs_locally
        && config.isolation.launcher == "chroot"
        && std::env::var("PKGCOMPAT_SKIP_PREREQS").as_deref() != Ok("1")
    {
        let missing = pkgcompat_runtime::check_chroot_prereqs();
        if !missing.is_empty() {
            return Err(CliError::Failure(pkgcompat_runtime::format_missing(&missing)));
        }
    }

    match command {
        Commands::Install {
            distro,
            packages,
            embedded,
        } => commands::install::run(&config, &socket, &distro, &packages, embedded, json),
        Commands::Remove {
            distro,
            packages,
            embedded,
        } => commands::remove::run(&config, &socket, &distro, &packages, embedded, json),
        Commands::Daemon { keep_roots } => commands::daemon::run(&config, &socket, keep_roots),
        Commands::Translate { distro, packages } => {
            commands::translate::run(&config, &distro, &packages, json)
        }
        Commands::Verify { distro } => commands::verify::run(&config, &distro, json),
        Commands::Teardown { distros } => commands::teardown::run(&config, &distros, json),
        Commands::Status => commands::status::run(&config, &socket, json),
        Commands::Completions { shell } => Ok(commands::completions::run::<Cli>(shell)?),
        Commands::ManPages { dir } => Ok(commands::man_pages::run::<Cli>(&dir)?),
    }
}
