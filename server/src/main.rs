use anyhow::Result;
use axum::Router;
use clap::Parser;
use lexicon_core::CompatMode;
use lexicon_server::{build_app, load_catalog, ServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Dictionary file to load (repeatable)
    #[arg(long = "source", value_name = "PATH")]
    sources: Vec<PathBuf>,
    /// Directory scanned recursively for dictionary files
    #[arg(long)]
    scan_dir: Option<PathBuf>,
    /// Build directory written by `lexicon build`
    #[arg(long)]
    index: Option<PathBuf>,
    /// Policy for reusing the persisted full-text index
    #[arg(long, default_value_t = CompatMode::Auto)]
    compat: CompatMode,
    /// Full-text build workers, 0 for available parallelism
    #[arg(long, default_value_t = 0)]
    workers: usize,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let config = ServerConfig {
        sources: args.sources,
        scan_dir: args.scan_dir,
        index_dir: args.index,
        workers: args.workers,
        compat: args.compat,
    };
    let catalog = tokio::task::spawn_blocking(move || load_catalog(&config)).await??;
    let app: Router = build_app(catalog);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
