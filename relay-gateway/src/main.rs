//! Binary entry point for the relay gateway server.
//!
//! ## Usage
//!
//! ```bash
//! relay-gateway
//! relay-gateway --config my-config.toml
//! relay-gateway --host 0.0.0.0 --port 8080
//! relay-gateway --log-level debug
//! ```

use clap::Parser;
use relay_gateway::{config::Config, server::create_server};
use std::net::SocketAddr;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file; missing is not an error.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .init();

    let config = Config::load(&args.config)?;
    config.validate()?;

    let app = create_server(config).await?;

    let addr = SocketAddr::new(args.host.parse()?, args.port);
    tracing::info!("starting relay gateway on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
