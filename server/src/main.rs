//! shareport LAN file sharing daemon (shareportd)

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod storage;

use config::Config;
use storage::{ShareRoot, UploadStore};

#[derive(Parser)]
#[command(name = "shareportd")]
#[command(about = "Share a directory over HTTP with resumable uploads", long_about = None)]
struct Cli {
    /// Directory to share (overrides SHARE_ROOT)
    #[arg(long, global = true)]
    share_root: Option<PathBuf>,

    /// Where upload sessions are kept (overrides STATE_DIR)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server in the foreground
    Serve(ServeArgs),
    /// Inspect or cancel persisted upload sessions
    Uploads {
        #[command(subcommand)]
        command: UploadCommands,
    },
}

#[derive(Args)]
struct ServeArgs {
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
    /// Serve index.html and /static from this directory
    #[arg(long)]
    static_dir: Option<PathBuf>,
    /// Refuse every mutating request (default)
    #[arg(long)]
    read_only: bool,
    /// Allow uploads and file operations
    #[arg(long)]
    read_write: bool,
    /// Let uploads replace existing files unless a session says otherwise
    #[arg(long)]
    allow_overwrite: bool,
}

#[derive(Subcommand)]
enum UploadCommands {
    /// List unfinished uploads
    List,
    /// Cancel an upload and delete its staged bytes
    Cancel {
        /// Upload id
        id: String,
    },
}

impl ServeArgs {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.static_dir.is_some() {
            config.static_dir = self.static_dir;
        }
        if self.read_write {
            config.read_only = false;
        } else if self.read_only {
            config.read_only = true;
        }
        if self.allow_overwrite {
            config.allow_overwrite = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shareportd=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let mut config = Config::from_env()?;
    if let Some(root) = cli.share_root {
        config.share_root = Some(root);
    }
    if let Some(state_dir) = cli.state_dir {
        config.state_dir = state_dir;
    }

    match cli.command {
        Commands::Serve(args) => {
            args.apply(&mut config);
            run_server(config).await?;
        }
        Commands::Uploads { command } => {
            let store = open_store(&config)?;
            match command {
                UploadCommands::List => list_uploads(&store)?,
                UploadCommands::Cancel { id } => cancel_upload(&store, &id)?,
            }
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> anyhow::Result<UploadStore> {
    let share = ShareRoot::new(config.share_root()?)?;
    std::fs::create_dir_all(&config.state_dir)?;
    Ok(UploadStore::open(share, &config.state_dir)?)
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let store = open_store(&config)?;

    store.recover_all()?;

    let addr = config.bind_addr()?;
    tracing::info!(
        share_root = %store.share().path().display(),
        read_only = config.read_only,
        allow_overwrite = config.allow_overwrite,
        "Starting shareportd"
    );

    let app_state = api::AppState::new(store, config);
    api::rest::serve(addr, app_state).await?;

    tracing::info!("Server stopped");
    Ok(())
}

fn list_uploads(store: &UploadStore) -> anyhow::Result<()> {
    let uploads = store.list()?;
    if uploads.is_empty() {
        println!("no unfinished uploads");
        return Ok(());
    }

    for upload in uploads {
        println!(
            "{}  {:>12}/{:<12}  {}  {}",
            upload.upload_id,
            upload.received,
            upload.total_size,
            upload.created_at.format("%Y-%m-%d %H:%M:%S"),
            upload.target_path
        );
    }
    Ok(())
}

fn cancel_upload(store: &UploadStore, id: &str) -> anyhow::Result<()> {
    if store.cancel(id)? {
        println!("cancelled {}", id);
    } else {
        println!("no upload {}", id);
    }
    Ok(())
}
