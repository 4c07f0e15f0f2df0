use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod transfer;

use api::{ApiClient, ApiError};
use config::Config;

#[derive(Parser)]
#[command(name = "shareport")]
#[command(about = "Browse, download and upload files on a shareport server", long_about = None)]
struct Cli {
    /// Server URL (defaults to the saved config, then http://localhost:8000)
    #[arg(long, global = true, env = "SHAREPORT_URL")]
    url: Option<String>,

    /// Upload chunk size in bytes
    #[arg(long, global = true)]
    chunk_size: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show server settings
    Info,
    /// List a remote directory
    List {
        #[arg(default_value = "")]
        path: String,
    },
    /// Download a file, resuming a previous partial download
    Download {
        remote: String,
        local: PathBuf,
        /// Start over instead of resuming
        #[arg(long)]
        no_resume: bool,
    },
    /// Upload a file in chunks
    Upload {
        local: PathBuf,
        /// Remote path; a trailing `/` keeps the local file name
        remote: String,
        /// Always start a fresh session
        #[arg(long)]
        no_resume: bool,
        /// Replace an existing remote file
        #[arg(long)]
        overwrite: bool,
    },
    /// Create a remote directory
    Mkdir { path: String },
    /// Delete a remote file or directory
    Delete { path: String },
    /// Move or rename a remote entry
    Move { source: String, destination: String },
    /// Download several paths as one ZIP archive
    Zip {
        output: PathBuf,
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Save the server URL and chunk size given with --url / --chunk-size
    Config,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shareport=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(err) = run(Cli::parse()).await {
        match err.downcast_ref::<ApiError>() {
            Some(api_err) => eprintln!("{}", api_err),
            None => eprintln!("error: {:#}", err),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(url) = cli.url {
        config.server_url = Some(url);
    }
    if let Some(chunk_size) = cli.chunk_size {
        config.chunk_size = Some(chunk_size);
    }
    let client = ApiClient::new(config.server_url());

    match cli.command {
        Commands::Info => {
            let info = client.info().await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::List { path } => {
            let listing = client.list(&path).await?;
            if listing.entries.is_empty() {
                println!("/{} is empty", listing.path);
            }
            for entry in listing.entries {
                let size = if entry.kind == "dir" {
                    "-".to_string()
                } else {
                    format_size(entry.size)
                };
                println!("{:<4}  {}  {:>10}  {}", entry.kind, entry.modified, size, entry.name);
            }
        }
        Commands::Download {
            remote,
            local,
            no_resume,
        } => {
            let bytes = transfer::download(&client, &remote, &local, !no_resume).await?;
            println!("downloaded {} ({})", local.display(), format_size(bytes));
        }
        Commands::Upload {
            local,
            remote,
            no_resume,
            overwrite,
        } => {
            let view = transfer::upload(
                &client,
                &local,
                &remote,
                config.chunk_size(),
                !no_resume,
                overwrite,
            )
            .await?;
            println!(
                "uploaded {} ({}, overwrite: {})",
                view.target_path,
                format_size(view.total_size),
                view.overwrite
            );
        }
        Commands::Mkdir { path } => {
            println!("{}", client.mkdir(&path).await?);
        }
        Commands::Delete { path } => {
            println!("{}", client.delete(&path).await?);
        }
        Commands::Move {
            source,
            destination,
        } => {
            println!("{}", client.move_entry(&source, &destination).await?);
        }
        Commands::Zip { output, paths } => {
            let bytes = transfer::zip(&client, &paths, &output).await?;
            println!("wrote {} ({})", output.display(), format_size(bytes));
        }
        Commands::Config => {
            config.save()?;
            println!("server: {}", config.server_url());
            println!("chunk size: {}", format_size(config.chunk_size()));
            println!("saved to {}", Config::config_path()?.display());
        }
    }

    Ok(())
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
