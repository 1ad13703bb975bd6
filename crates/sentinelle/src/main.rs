//! # SentinELLE CLI (`sentinelle`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sentinelle init` | Create the three collections if missing |
//! | `sentinelle seed [--images DIR]` | Load demo knowledge, imagery and profiles |
//! | `sentinelle moderate --user ID ...` | Moderate one post and print the report |
//! | `sentinelle history <user_id>` | Print a user's aggregated history |
//! | `sentinelle serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! sentinelle --config ./config/sentinelle.toml init
//! sentinelle seed --images ./seed_images
//! sentinelle moderate --user user123 --text "I know where you live" --image post.png
//! sentinelle moderate --user user123 --audio clip.wav --json
//! RUST_LOG=debug sentinelle serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use sentinelle::{config, moderate, seed, server, services};

/// SentinELLE: retrieval-augmented multimodal moderation for online
/// gender-based violence.
#[derive(Parser)]
#[command(
    name = "sentinelle",
    about = "SentinELLE: retrieval-augmented multimodal moderation for online gender-based violence",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sentinelle.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ensure the knowledge, imagery and reputation collections exist.
    ///
    /// Idempotent: existing collections are left untouched.
    Init,

    /// Seed the collections with demo records.
    Seed {
        /// Directory of reference images (.png/.jpg/.jpeg) to label as toxic.
        #[arg(long)]
        images: Option<PathBuf>,
    },

    /// Moderate one post.
    Moderate {
        /// Author of the post.
        #[arg(long)]
        user: String,

        /// Post text.
        #[arg(long)]
        text: Option<String>,

        /// Attached image file.
        #[arg(long)]
        image: Option<PathBuf>,

        /// Attached audio file.
        #[arg(long)]
        audio: Option<PathBuf>,

        /// Print the full report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print a user's aggregated reputation history as JSON.
    History {
        user_id: String,
    },

    /// Start the HTTP API (`/health`, `/moderate`).
    Serve,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let services = services::build(&cfg).await?;
            services.archivist.ensure_collections().await?;
            println!("Collections ready.");
        }
        Commands::Seed { images } => {
            let services = services::build(&cfg).await?;
            seed::run_seed(&services, images.as_deref()).await?;
        }
        Commands::Moderate {
            user,
            text,
            image,
            audio,
            json,
        } => {
            let services = services::build(&cfg).await?;
            moderate::run_moderate(
                &services,
                &user,
                text,
                image.as_deref(),
                audio.as_deref(),
                json,
            )
            .await?;
        }
        Commands::History { user_id } => {
            let services = services::build(&cfg).await?;
            moderate::run_history(&services, &user_id).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
