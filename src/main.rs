use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};

use coursedrop::{AdmissionPipeline, Config, TokenStore, WebServer};

/// Authenticated course file drop box.
#[derive(Debug, Parser)]
#[command(name = "coursedrop")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

fn load_config(path: &Path) -> Config {
    match Config::load_with_env(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {e}", path.display());
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    }
}

/// Log duplicated credentials; request-time lookup picks the first id.
fn report_duplicate_credentials(store: &TokenStore) {
    match store.duplicate_credentials() {
        Ok(groups) => {
            for ids in groups {
                error!(
                    client_ids = %ids.join(", "),
                    "Credential shared by several clients; only the first id can sign in"
                );
            }
        }
        Err(e) => warn!(error = %e, "Could not read credential store"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = load_config(&cli.config);

    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    if let Err(e) = coursedrop::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        coursedrop::logging::init_console_only(&config.logging.level);
    }

    info!("coursedrop {}", env!("CARGO_PKG_VERSION"));
    info!(
        upload_dir = %config.paths.upload_dir,
        token_file = %config.paths.token_file,
        client_quota_mb = config.storage.client_quota_mb,
        max_file_size_mb = config.storage.max_file_size_mb,
        "Storage configured"
    );

    report_duplicate_credentials(&TokenStore::new(config.token_file()));

    let pipeline = match AdmissionPipeline::from_config(&config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!(error = %e, "Failed to open upload directory");
            return ExitCode::FAILURE;
        }
    };

    let server = match WebServer::new(&config.server, pipeline) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "Failed to create web server");
            return ExitCode::FAILURE;
        }
    };

    info!(addr = %server.addr(), "Starting web server");
    if let Err(e) = server.run().await {
        error!(error = %e, "Web server failed");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
