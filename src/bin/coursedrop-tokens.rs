//! Credential store provisioning for coursedrop.
//!
//! Every command is safe to re-run: adding an existing client prints its
//! current credential, bulk imports skip registered ids.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use coursedrop::{ClientId, Config, CourseDropError, Result, TokenStore};

#[derive(Debug, Parser)]
#[command(name = "coursedrop-tokens")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(arg_required_else_help = true)]
#[command(about = "Manage coursedrop client credentials")]
struct Cli {
    /// Token file (overrides the config file's paths.token_file)
    #[arg(long, global = true)]
    tokens: Option<PathBuf>,

    /// Configuration file used to locate the token file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Register a client and print its credential
    Add {
        /// Client id (e.g. NetID)
        client_id: String,
    },
    /// Issue a new credential for a client, invalidating the old one
    Rotate { client_id: String },
    /// Revoke a client's credential
    Remove { client_id: String },
    /// List registered client ids
    List {},
    /// Register every client id listed in a file (one per line)
    Bulk { file: PathBuf },
    /// Export `client_id,token` rows to a CSV file for distribution
    Export { output: PathBuf },
    /// Report credentials shared by several clients
    Check {},
}

fn parse_client_id(raw: &str) -> Result<ClientId> {
    ClientId::parse(raw)
        .map_err(|e| CourseDropError::Validation(format!("invalid client id {raw:?}: {e}")))
}

fn token_file(cli: &Cli) -> PathBuf {
    if let Some(path) = &cli.tokens {
        return path.clone();
    }
    match Config::load_with_env(&cli.config) {
        Ok(config) => config.token_file(),
        Err(_) => {
            let mut config = Config::default();
            config.apply_env_overrides();
            config.token_file()
        }
    }
}

fn run(cli: &Cli) -> Result<bool> {
    let store = TokenStore::new(token_file(cli));

    match &cli.command {
        Command::Add { client_id } => {
            let id = parse_client_id(client_id)?;
            let outcome = store.add(&id)?;
            if outcome.created {
                println!("Added {id}: {}", outcome.token);
            } else {
                println!("{id} already registered: {}", outcome.token);
            }
        }
        Command::Rotate { client_id } => {
            let id = parse_client_id(client_id)?;
            let token = store.rotate(&id)?;
            println!("New credential for {id}: {token}");
        }
        Command::Remove { client_id } => {
            let id = parse_client_id(client_id)?;
            if store.remove(&id)? {
                println!("Removed {id}");
            } else {
                println!("{id} is not registered");
            }
        }
        Command::List {} => {
            let ids = store.list()?;
            for id in &ids {
                println!("{id}");
            }
            println!("{} client(s) registered", ids.len());
        }
        Command::Bulk { file } => {
            let summary = store.bulk_import_file(file)?;
            println!(
                "Added {}, already registered {}, total {}",
                summary.added, summary.existing, summary.total
            );
            for line in &summary.rejected {
                eprintln!("Rejected invalid client id: {line}");
            }
            return Ok(summary.rejected.is_empty());
        }
        Command::Export { output } => {
            let rows = store.export_csv(output)?;
            if rows == 0 {
                println!("No credentials to export");
            } else {
                println!("Exported {rows} credential(s) to {}", output.display());
            }
        }
        Command::Check {} => {
            let groups = store.duplicate_credentials()?;
            if groups.is_empty() {
                println!("No duplicate credentials");
                return Ok(true);
            }
            for ids in &groups {
                eprintln!("Shared credential: {}", ids.join(", "));
            }
            return Ok(false);
        }
    }

    Ok(true)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    coursedrop::logging::init_console_only("warn");

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
