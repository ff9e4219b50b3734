use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use schemadoc_core::{Config, PostgresDocker, PostgresEmbedded, Runner, SqlxMigrator, Tbls};

#[derive(Parser)]
#[command(name = "schemadoc")]
#[command(about = "Generate schema documentation against a throwaway PostgreSQL instance")]
struct Args {
    /// Env file to load before reading configuration
    #[arg(long, global = true, value_name = "PATH")]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline against a PostgreSQL backend
    Postgres {
        #[command(subcommand)]
        backend: PostgresBackend,
    },
}

#[derive(Subcommand)]
enum PostgresBackend {
    /// Containerized server (requires a reachable Docker engine)
    Docker,
    /// Embedded server child process (no Docker required)
    Embedded,
}

#[tokio::main]
async fn main() {
    // Logs go to stderr; stdout is reserved for generator output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")),
        )
        .init();

    let args = Args::parse();

    let cfg = match Config::load(args.env_file.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("❌ {e}");
            std::process::exit(1);
        }
    };

    let result = match args.command {
        Command::Postgres {
            backend: PostgresBackend::Docker,
        } => {
            info!("run=start backend=docker");
            Runner::new(
                cfg.clone(),
                PostgresDocker::new(cfg),
                SqlxMigrator::new(),
                Tbls::new(),
            )
            .run()
            .await
        }
        Command::Postgres {
            backend: PostgresBackend::Embedded,
        } => {
            info!("run=start backend=embedded");
            Runner::new(
                cfg.clone(),
                PostgresEmbedded::new(cfg),
                SqlxMigrator::new(),
                Tbls::new(),
            )
            .run()
            .await
        }
    };

    if let Err(e) = result {
        eprintln!("❌ {e}");
        std::process::exit(1);
    }
    println!("✅ documentation generated");
}
