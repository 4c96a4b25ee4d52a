//! Gatehouse sidecar entry point.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use gatehouse_config::{ConfigLoader, FileWatcher, FileWatcherBuilder, GatewayConfig};
use gatehouse_handler::{AccessHandler, Collaborators};
use gatehouse_rules::FunctionLibrary;
use gatehouse_sidecar::{ShutdownSignal, SidecarServer};
use tracing::{error, info, warn};

const ENV_PREFIX: &str = "GATEHOUSE";

/// Command-line arguments.
#[derive(Debug, Clone, Default)]
struct Args {
    /// Main configuration file.
    config: Option<PathBuf>,
    /// LemonLDAP::NG configuration export replacing the handler section.
    handler_config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut parsed = Self::default();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => parsed.config = args.next().map(PathBuf::from),
                "--handler-config" => parsed.handler_config = args.next().map(PathBuf::from),
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("gatehouse-sidecar {}", gatehouse_sidecar::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        parsed
    }

    fn load(&self) -> anyhow::Result<GatewayConfig> {
        let mut loader = ConfigLoader::new();
        if let Some(path) = &self.config {
            loader = loader
                .with_file(path)
                .with_context(|| format!("reading {}", path.display()))?;
        }
        if let Some(path) = &self.handler_config {
            loader = loader
                .with_handler_file(path)
                .with_context(|| format!("reading {}", path.display()))?;
        }
        let config = loader
            .with_dotenv()
            .with_env_prefix(ENV_PREFIX)
            .load()
            .context("invalid configuration")?;
        Ok(config)
    }

    fn watched(&self) -> Vec<&Path> {
        self.config
            .iter()
            .chain(self.handler_config.iter())
            .map(PathBuf::as_path)
            .collect()
    }
}

fn print_help() {
    println!(
        r"Gatehouse Sidecar - web access control in front of any application

USAGE:
    gatehouse-sidecar [OPTIONS]

OPTIONS:
    -c, --config <PATH>            Configuration file (TOML or JSON)
        --handler-config <PATH>    LemonLDAP::NG configuration export (JSON)
    -h, --help                     Print help information
    -v, --version                  Print version information

ENVIRONMENT VARIABLES:
    GATEHOUSE__SIDECAR__LISTEN_ADDR      Bind address (default: 0.0.0.0:8090)
    GATEHOUSE__SIDECAR__MODE             auth_request or proxy
    GATEHOUSE__SIDECAR__UPSTREAM_URL     Upstream application (proxy mode)
    GATEHOUSE__HANDLER__PORTAL           Portal URL
    GATEHOUSE__TELEMETRY__LOGGING__LEVEL Log level or filter directive

Configuration files are watched; rules and headers are reloaded on change.
"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.load()?;
    gatehouse_telemetry::init_telemetry(&config.telemetry).context("initializing telemetry")?;

    info!(version = gatehouse_sidecar::VERSION, "starting gatehouse sidecar");

    let collaborators = Collaborators::from_conf(&config.handler, FunctionLibrary::new())
        .context("building handler collaborators")?;
    let handler = Arc::new(
        AccessHandler::new(config.handler.clone(), collaborators)
            .context("building handler configuration")?,
    );

    let shutdown = ShutdownSignal::with_os_signals();
    spawn_reloader(args, Arc::clone(&handler), shutdown.clone());

    SidecarServer::new(&config, handler)?
        .run_with_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Reload handler configuration whenever a configuration file changes.
fn spawn_reloader(args: Args, handler: Arc<AccessHandler>, shutdown: ShutdownSignal) {
    let paths = args.watched();
    if paths.is_empty() {
        return;
    }
    let watcher = paths
        .into_iter()
        .try_fold(FileWatcher::builder(), FileWatcherBuilder::watch_path)
        .and_then(FileWatcherBuilder::build);
    let mut watcher = match watcher {
        Ok(watcher) => watcher,
        Err(e) => {
            warn!(error = %e, "configuration hot reload disabled");
            return;
        }
    };

    tokio::spawn(async move {
        loop {
            let change = tokio::select! {
                change = watcher.next() => change,
                () = shutdown.recv() => None,
            };
            let Some(change) = change else { break };
            info!(path = %change.path.display(), kind = ?change.kind, "configuration changed");

            match args.load() {
                Ok(config) => {
                    if let Err(e) = handler.reload(config.handler) {
                        error!(error = %e, "reload rejected, keeping current configuration");
                    }
                }
                Err(e) => error!(
                    error = %format_args!("{e:#}"),
                    "reload failed, keeping current configuration"
                ),
            }
        }
    });
}
