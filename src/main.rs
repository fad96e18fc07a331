//! uristore CLI - raw access to URI-addressed storage

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uristore::config::{self, StoreConfig};
use uristore::service::IN_MEMORY_DATABASE;
use uristore::storage::create_table_sql;
use uristore::{Provider, ResourceUri, Service, SqliteProvider, TypeMetadata};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "uristore")]
#[command(version = "0.0.1")]
#[command(about = "URI-addressed storage over memory, filesystem and SQLite backends")]
#[command(long_about = r#"
uristore reads and writes values addressed as scheme://namespace/path.
The scheme picks the backend:
  file://   one file per URI under data_dir
  sql://    one row per URI (namespace = table, path = key)
  memory:// process-local, mostly useful for testing

Example usage:
  uristore init
  uristore set file://notes/today.txt "buy milk"
  uristore get sql://users/u1
  uristore exec file://notes/list
  uristore ddl schema/user.toml --execute
"#)]
struct Cli {
    /// Path to the config file
    #[arg(short, long, global = true, default_value = "uristore.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config in the current directory
    Init {
        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Print the value stored at a URI
    Get {
        uri: String,
    },

    /// Store a value at a URI
    Set {
        uri: String,
        value: String,
    },

    /// Delete the value at a URI
    Delete {
        uri: String,
    },

    /// Check whether a URI holds a value
    Exists {
        uri: String,
    },

    /// Run a backend action (e.g. `list`, or a named SQL query)
    Exec {
        uri: String,

        /// Request payload, usually JSON
        #[arg(short, long, default_value = "")]
        payload: String,
    },

    /// Generate CREATE TABLE from a TOML type descriptor
    Ddl {
        /// TOML file holding the type metadata
        schema: PathBuf,

        /// Also run the DDL against the configured database
        #[arg(short, long)]
        execute: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    if let Commands::Init { force } = &cli.command {
        let cwd = std::env::current_dir()?;
        let store_config = StoreConfig::default_in(&cwd);
        config::write_config(&cli.config, &store_config, *force)?;
        if let Some(database) = &store_config.database {
            config::ensure_db_dir(Path::new(database))?;
        }
        println!("Wrote {}", cli.config.display());
        return Ok(());
    }

    let store_config = match config::load_config(Some(&cli.config))? {
        Some(c) => c,
        None => {
            tracing::warn!("No config at {}; only memory:// is available", cli.config.display());
            StoreConfig::default()
        }
    };

    if let Commands::Ddl { schema, execute } = &cli.command {
        return run_ddl(&store_config, schema, *execute);
    }

    let service = Service::from_config(&store_config)?;
    let result = run(&service, cli.command).await;
    service.close().await?;
    result
}

async fn run(service: &Service, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Get { uri } => {
            let (uri, provider) = resolve(service, &uri)?;
            let value = provider.get(&uri).await?;
            println!("{}", String::from_utf8_lossy(&value));
        }
        Commands::Set { uri, value } => {
            let (uri, provider) = resolve(service, &uri)?;
            provider.set(&uri, value.as_bytes()).await?;
            tracing::info!("Stored {} bytes at {}", value.len(), uri);
        }
        Commands::Delete { uri } => {
            let (uri, provider) = resolve(service, &uri)?;
            provider.delete(&uri).await?;
            tracing::info!("Deleted {}", uri);
        }
        Commands::Exists { uri } => {
            let (uri, provider) = resolve(service, &uri)?;
            println!("{}", provider.exists(&uri).await?);
        }
        Commands::Exec { uri, payload } => {
            let (uri, provider) = resolve(service, &uri)?;
            let out = provider.execute(&uri, payload.as_bytes()).await?;
            println!("{}", String::from_utf8_lossy(&out));
        }
        // Handled in main; they need no service
        Commands::Init { .. } | Commands::Ddl { .. } => {}
    }
    Ok(())
}

fn resolve(service: &Service, raw: &str) -> anyhow::Result<(ResourceUri, Arc<dyn Provider>)> {
    let uri = ResourceUri::parse(raw);
    if !uri.is_valid() {
        anyhow::bail!("invalid URI {:?} (expected scheme://namespace/path)", raw);
    }
    let provider = service.providers().resolve(&uri)?;
    Ok((uri, provider))
}

fn run_ddl(store_config: &StoreConfig, schema: &Path, execute: bool) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(schema)?;
    let meta: TypeMetadata = toml::from_str(&contents)?;

    if !execute {
        println!("{}", create_table_sql(&meta));
        return Ok(());
    }

    let Some(database) = &store_config.database else {
        anyhow::bail!("--execute needs `database` set in the config");
    };
    let provider = if database == IN_MEMORY_DATABASE {
        SqliteProvider::open_in_memory()?
    } else {
        config::ensure_db_dir(Path::new(database))?;
        SqliteProvider::open(Path::new(database))?
    };
    let sql = provider.create_table(&meta, true)?;
    println!("{}", sql);
    tracing::info!("Created table for {} in {}", meta.name, database);
    Ok(())
}
