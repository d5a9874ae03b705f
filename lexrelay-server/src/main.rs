use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use lexrelay_server::http::{self, HttpState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "lexrelay.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    // Load config and build the upstream client
    let state = match HttpState::load(&args.config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to start from config {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    if args.health {
        let (status, body) = http::health_inner(state.backend.as_ref()).await;
        if status.is_success() {
            println!("✅ Upstream reachable: {}", body["upstream"].as_str().unwrap_or("?"));
            return Ok(());
        }
        println!(
            "❌ Upstream check failed: {}",
            body["error"].as_str().unwrap_or("unknown error")
        );
        std::process::exit(1);
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    http::start_http_server(state, tx.subscribe()).await?;

    Ok(())
}
