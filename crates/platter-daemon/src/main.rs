use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use platter_config::logging::{init_logging, LogLevel};
use platter_config::{log_fetch_debug, Config};
use platter_daemon::{build_registry, stack, Server};
use platter_ipc::{ObjectClient, PeerClient, DEFAULT_LABEL};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::signal;

#[derive(Parser)]
#[command(name = "platterd")]
#[command(version, about = "Media storage and caching server", long_about = None)]
struct Cli {
    /// Config file, replacing the global and project search
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "info")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the configured stack (default)
    Serve {
        /// Listen address, overriding the config
        #[arg(long)]
        listen: Option<String>,
    },
    /// Download one object from a peer
    Fetch {
        #[arg(long, default_value = platter_config::DEFAULT_LISTEN)]
        addr: String,
        #[arg(long, default_value = DEFAULT_LABEL)]
        label: String,
        path: String,
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the default configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    match cli.command.unwrap_or(Commands::Serve { listen: None }) {
        Commands::Serve { listen } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            serve(config).await?
        }
        Commands::Fetch {
            addr,
            label,
            path,
            output,
        } => fetch(addr, label, path, output).await?,
        Commands::Config => print!("{}", Config::default_toml()?),
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_file(path),
        None => Config::load(),
    };
    config.context("Failed to load configuration")
}

async fn serve(config: Config) -> Result<()> {
    let registry = build_registry(&config).await?;
    tracing::info!(labels = ?registry.labels(), "Filesystems ready");

    let listener = TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen))?;

    let server = Server::new(registry, stack::server_options(&config));
    server
        .serve(listener, async {
            let _ = signal::ctrl_c().await;
        })
        .await?;

    tracing::info!("Shutting down");
    Ok(())
}

async fn fetch(addr: String, label: String, path: String, output: Option<PathBuf>) -> Result<()> {
    let client = PeerClient::new(addr)
        .with_label(label)
        .with_timeout(Some(Duration::from_secs(10)));
    let mut object = client.fetch(&path).await?;
    log_fetch_debug!("Receiving", path = path.as_str(), size = object.size);

    let copied = match &output {
        Some(file) => {
            let mut out = tokio::fs::File::create(file)
                .await
                .with_context(|| format!("Failed to create {}", file.display()))?;
            let n = tokio::io::copy(&mut object.stream, &mut out).await?;
            out.sync_all().await?;
            n
        }
        None => {
            let mut stdout = tokio::io::stdout();
            let n = tokio::io::copy(&mut object.stream, &mut stdout).await?;
            stdout.flush().await?;
            n
        }
    };

    if copied != object.size {
        bail!("Short transfer: got {copied} of {} bytes", object.size);
    }
    log_fetch_debug!("Done", path = path.as_str(), bytes = copied);
    Ok(())
}
