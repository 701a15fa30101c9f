//! evidence-map CLI tool
//!
//! ## Commands
//!
//! - `serve`: run the HTTP API until Ctrl-C
//! - `export <map>`: write a map's export document as JSON
//! - `import <file>`: create a map from an export document

use clap::{Parser, Subcommand};
use evidence_map::{
    config::{ConfigProvider, TomlConfigProvider},
    db::{GraphStore, EVIDENCE_MAP_DB},
    exchange::MapImport,
    server,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "evidence-map")]
#[command(author, version, about = "Evidence map and quality matrix graph service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Configuration file path
        #[arg(short, long, default_value = "evidence-map.toml")]
        config: PathBuf,

        /// Address to listen on, overrides the config file
        #[arg(long)]
        bind: Option<String>,

        /// SQLite database file, overrides the config file
        #[arg(long)]
        database: Option<PathBuf>,
    },

    /// Export one map (factors and evidence) as JSON
    Export {
        /// Name of the map to export
        map: String,

        /// Map password, if the map is protected
        #[arg(short, long)]
        password: Option<String>,

        /// SQLite database file
        #[arg(long, default_value = EVIDENCE_MAP_DB)]
        database: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Import an export document as a new map
    Import {
        /// Path to the JSON export document
        file: PathBuf,

        /// SQLite database file
        #[arg(long, default_value = EVIDENCE_MAP_DB)]
        database: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Commands::Serve {
            config,
            bind,
            database,
        } => {
            let mut service_config = TomlConfigProvider::new(config).load()?;
            if let Some(bind) = bind {
                service_config.bind = bind;
            }
            if let Some(database) = database {
                service_config.database = database;
            }
            runtime.block_on(server::serve(service_config, server::shutdown_signal()))?;
            Ok(())
        }

        Commands::Export {
            map,
            password,
            database,
            out,
        } => {
            let document = runtime.block_on(async {
                let store = GraphStore::open(database).await?;
                let exported = store.export_map(&map, password.as_deref()).await;
                store.close().await;
                exported
            })?;
            let json = serde_json::to_string_pretty(&document)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    println!(
                        "✓ Exported '{}' ({} factors, {} evidence edges) to {}",
                        map,
                        document.nodes.len(),
                        document.edges.len(),
                        path.display()
                    );
                }
                None => println!("{json}"),
            }
            Ok(())
        }

        Commands::Import { file, database } => {
            let payload: MapImport = serde_json::from_str(&std::fs::read_to_string(&file)?)?;
            runtime.block_on(async {
                let store = GraphStore::open(database).await?;
                let imported = store.import_map(&payload).await;
                store.close().await;
                imported
            })?;
            let name = payload
                .map_record()
                .map(|m| m.name.as_str())
                .unwrap_or_default();
            println!("✓ Imported map '{name}' from {}", file.display());
            Ok(())
        }
    }
}
