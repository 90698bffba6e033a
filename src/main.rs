//! Categories service.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────┐
//!                         │              CATEGORIES SERVICE              │
//!     Client Request      │  ┌────────┐   ┌───────────┐   ┌───────────┐  │
//!     ────────────────────┼─▶│  http  │──▶│ instrument│──▶│ categories│  │
//!                         │  │ server │   │  wrapper  │   │  handlers │  │
//!                         │  └────────┘   └─────┬─────┘   └─────┬─────┘  │
//!                         │                     │               │        │
//!                         │          span, count, duration   audit log   │
//!                         │                     │               │        │
//!                         │            ┌────────┴───┐   ┌───────┴──────┐ │
//!                         │            │ trace/meter│   │ app.log      │ │
//!                         │            │ providers  │   │ + index queue│ │
//!                         │            └────────┬───┘   └───────┬──────┘ │
//!                         └─────────────────────┼───────────────┼────────┘
//!                                               ▼               ▼
//!                                        OTLP collector   search index
//! ```

use std::path::PathBuf;

use clap::Parser;

use categories_service::config::load_config;
use categories_service::Application;

#[derive(Parser)]
#[command(name = "categories-service")]
#[command(about = "Categories API with OTLP tracing, metrics and dual-sink audit logging", long_about = None)]
struct Cli {
    /// Optional TOML configuration file. Environment variables override it.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;

    let app = Application::start(config).await?;
    tracing::info!(address = %app.local_addr()?, "Listening for connections");

    app.run().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
