use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use genrelay::commands;
use genrelay::config::Config;

#[derive(Parser)]
#[command(
    name = "genrelay",
    version,
    about = "Streaming chat relay and image-generation job service"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server
    Serve {
        /// Path to the YAML config file
        #[arg(short, long, default_value = "genrelay.yaml")]
        config: String,
        /// Override the configured listen host
        #[arg(long)]
        host: Option<String>,
        /// Override the configured listen port
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config, host, port } => {
            let mut config = Config::load(&config)?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            commands::serve::run(config).await
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}
