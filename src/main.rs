use std::path::PathBuf;

use clap::Parser;
use course_server::{cache::Cache, config::ServerConfig, server, state::AppState, utils::init_log};
use sqlx::{SqlitePool, sqlite::SqliteConnectOptions};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to database file
    #[arg(short, long, default_value = "./database/course.db")]
    database: PathBuf,

    /// Path to server config file
    #[arg(short, long, default_value = "./course_server.toml")]
    config: PathBuf,

    /// Directory for daily-rotated log files; logs to stdout when omitted
    #[arg(short, long)]
    log: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let _guard = init_log(args.log);
    let config = ServerConfig::load(&args.config)?;

    // Ensure foreign keys are enabled on every pooled connection
    let options = SqliteConnectOptions::new()
        .filename(&args.database)
        .create_if_missing(true)
        .foreign_keys(true);
    let database = SqlitePool::connect_with(options).await?;
    sqlx::raw_sql(include_str!("../schema.sql"))
        .execute(&database)
        .await?;

    let cache = match &config.redis_url {
        Some(url) => Cache::redis(url).await?,
        None => {
            tracing::warn!("no redis url configured, using the in-process cache");
            Cache::memory()
        }
    };

    let state = AppState::new(database, cache, config);
    server::serve(state).await
}
