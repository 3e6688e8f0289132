mod config;
mod server;

use clap::Parser;
use config::{Config, DatabaseOverrides, DEFAULT_CONFIG_PATH};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use wysci_postgres::PgConnector;

/// Serves configured SQL queries as streamed CSV over HTTP.
#[derive(Parser, Debug)]
#[command(name = "wysci", version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, env = "CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[arg(long, env = "DBHOST")]
    dbhost: Option<String>,

    #[arg(long, env = "DBUSER")]
    dbuser: Option<String>,

    /// Database name
    #[arg(long, env = "DATABASE")]
    database: Option<String>,

    #[arg(long, env = "DBPASS", hide_env_values = true)]
    dbpass: Option<String>,

    #[arg(long, env = "DBPORT")]
    dbport: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = Config::from_path(&args.config)?;
    let overrides = DatabaseOverrides {
        host: args.dbhost,
        user: args.dbuser,
        password: args.dbpass,
        database: args.database,
        port: args.dbport,
    };
    let settings = config.database_settings(&overrides);
    info!(
        host = %settings.host,
        port = settings.port,
        user = %settings.user,
        database = %settings.database,
        max_connections = settings.max_connections,
        "connecting to database"
    );
    let connector = PgConnector::new(settings.pg_config(), settings.max_connections);
    connector.ping().await?;
    server::run(config, connector).await?;
    Ok(())
}
