//! Upload store administration tool.
//!
//! Usage:
//!   upload-store put abc123 ./photo.png --url https://send.example/abc123
//!   upload-store force-delete abc123

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use upload_store::{Config, Storage};

/// Inspect and manage stored uploads.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a file and print its delete token and share URL.
    Put {
        id: String,
        path: PathBuf,
        /// Display name to record (default: the file's name).
        #[arg(long)]
        filename: Option<String>,
        /// Share URL to return or shorten.
        #[arg(long, default_value = "")]
        url: String,
    },
    /// Write a stored upload to a file, or stdout.
    Get {
        id: String,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Print the size of a stored upload in bytes.
    Length { id: String },
    /// Print the original filename of an upload.
    Filename { id: String },
    /// Delete an upload with its delete token.
    Delete { id: String, token: String },
    /// Delete an upload without a token.
    ForceDelete { id: String },
    /// Delete blobs whose metadata has expired.
    Sweep {
        /// Keep sweeping every SWEEP_INTERVAL_SECS until interrupted.
        #[arg(long)]
        watch: bool,
    },
    /// Check the blob backend and metadata store.
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();

    let config = Config::from_env().context("failed to load configuration")?;
    let storage = Storage::from_config(&config)
        .await
        .context("failed to initialize storage")?;

    let outcome = run(&storage, &config, cli.command).await;

    storage.shutdown().await.context("failed to shut down storage")?;
    outcome
}

async fn run(storage: &Storage, config: &Config, command: Command) -> Result<()> {
    match command {
        Command::Put {
            id,
            path,
            filename,
            url,
        } => {
            let filename = match filename {
                Some(name) => name,
                None => path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string)
                    .context("path has no usable file name; pass --filename")?,
            };
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;

            let stored = storage.set(&id, Box::pin(file), &filename, &url).await?;
            println!("{}", serde_json::to_string_pretty(&stored)?);
        }
        Command::Get { id, output } => {
            let mut stream = storage.get(&id).await?;
            let written = match output {
                Some(path) => {
                    let mut file = tokio::fs::File::create(&path)
                        .await
                        .with_context(|| format!("failed to create {}", path.display()))?;
                    let written = tokio::io::copy(&mut stream, &mut file).await?;
                    file.flush().await?;
                    written
                }
                None => {
                    let mut stdout = tokio::io::stdout();
                    let written = tokio::io::copy(&mut stream, &mut stdout).await?;
                    stdout.flush().await?;
                    written
                }
            };
            info!(id = %id, size = written, "upload written");
        }
        Command::Length { id } => println!("{}", storage.length(&id).await?),
        Command::Filename { id } => println!("{}", storage.filename(&id).await?),
        Command::Delete { id, token } => {
            storage.delete(&id, &token).await?;
            println!("deleted {id}");
        }
        Command::ForceDelete { id } => {
            storage.force_delete(&id).await?;
            println!("deleted {id}");
        }
        Command::Sweep { watch: true } => {
            let sweeper = storage.spawn_sweeper(config.sweep_interval);
            info!(interval = ?config.sweep_interval, "orphan sweeper running, ctrl-c to stop");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
            sweeper.stop().await;
        }
        Command::Sweep { watch: false } => {
            let report = storage.sweep_orphans().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Health => {
            let health = storage.health().await;
            println!("{}", serde_json::to_string_pretty(&health)?);
            if !health.is_healthy() {
                bail!("storage is unhealthy");
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,upload_store=debug"));

    // Logs go to stderr so `get` can stream the blob to stdout.
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
