use anyhow::Result;
use axum::Router;
use clap::Parser;
use server::{build_app, ServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Directory holding index snapshots, caches and vectors
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,
    /// Directory of JSON record tables usable as an index source
    #[arg(long)]
    records_dir: Option<PathBuf>,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
    /// Embedding service endpoint; semantic search is disabled without it
    #[arg(long, env = "EMBEDDING_URL")]
    embedding_url: Option<String>,
    /// Timeout applied to every embedding and vector index call
    #[arg(long, default_value_t = 10)]
    upstream_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let admin_token = std::env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty());
    let app: Router = build_app(ServerConfig {
        data_dir: args.data_dir,
        records_dir: args.records_dir,
        embedding_url: args.embedding_url,
        upstream_timeout: Duration::from_secs(args.upstream_timeout_secs),
        admin_token,
    })?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
