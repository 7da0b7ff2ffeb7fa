//! HTTP entry point for the LMS backup service.
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=lms_backup=info lms-backup \
//!   --mongo-uri mongodb://localhost:27017 \
//!   --mongo-database university_lms \
//!   --listen-addr 0.0.0.0:4000
//! ```
//!
//! Every flag can also come from the environment: `MONGO_URI`,
//! `MONGO_DATABASE`, `MYSQL_HOST`, `MYSQL_PORT`, `MYSQL_USER`,
//! `MYSQL_PASSWORD`, `MYSQL_DATABASE`, `LISTEN_ADDR`.

use anyhow::Context;
use clap::Parser;
use lms_backup::api::{self, AppState};
use lms_backup::{mongodb, MongoOpts, MySqlOpts};

#[derive(Parser)]
#[command(name = "lms-backup")]
#[command(about = "Relational backup service for the university LMS")]
struct Cli {
    /// Address for the HTTP server
    #[arg(long, default_value = "0.0.0.0:4000", env = "LISTEN_ADDR")]
    listen_addr: String,

    #[command(flatten)]
    mongo: MongoOpts,

    #[command(flatten)]
    mysql: MySqlOpts,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mongo = mongodb::connect(&cli.mongo.mongo_uri, cli.mongo.mongo_database.as_deref())
        .await
        .context("Failed to set up MongoDB client")?;
    tracing::info!("Using MongoDB database '{}'", mongo.name());

    let mysql = cli.mysql.to_pool();
    tracing::info!(
        "MySQL target is {}:{} (database '{}')",
        cli.mysql.mysql_host,
        cli.mysql.mysql_port,
        cli.mysql.mysql_database
    );

    let app = api::router(AppState {
        mongo,
        mysql,
        settings: cli.mysql,
    });

    let listener = tokio::net::TcpListener::bind(&cli.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cli.listen_addr))?;
    tracing::info!("Listening on {}", cli.listen_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
