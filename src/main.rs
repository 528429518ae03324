use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use roomchat::config::Config;
use roomchat::ui::conversation::ConversationManager;
use roomchat::{HttpBackend, RoomId, RoomSessionController};

#[derive(Parser)]
#[command(name = "roomchat")]
#[command(version)]
#[command(about = "Chat with the conversation backend from the terminal", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.roomchat/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the backend base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List your rooms, newest first
    Rooms,
    /// Print a room's messages
    History { room_id: String },
    /// Send one message and stream the reply
    Send {
        /// Room to post to; omit to start a new one
        #[arg(long)]
        room: Option<String>,
        message: String,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("roomchat={level}")));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose),
        )
        .try_init()
        .ok();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(url) = &cli.base_url {
        config.set_base_url(url.clone());
    }
    if !config.auth.has_credentials() {
        tracing::warn!("no credentials configured; the backend may reject requests");
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = load_config(&cli)?;
    let backend = HttpBackend::new(config.backend.clone(), &config.auth)
        .context("Failed to create HTTP client")?;
    let session = RoomSessionController::new(Arc::new(backend), config.session.clone());
    let mut manager = ConversationManager::new(session, std::io::stdout());

    match cli.command {
        None => {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            manager.run(stdin).await?;
        }
        Some(Commands::Rooms) => {
            manager.session_mut().mount().await;
            manager.print_rooms()?;
        }
        Some(Commands::History { room_id }) => {
            manager
                .session_mut()
                .select_room(Some(RoomId::new(room_id)))
                .await;
            manager.print_history()?;
        }
        Some(Commands::Send { room, message }) => {
            let room = room.map(RoomId::new);
            let was_new = room.is_none();
            let resolved = manager.send(room, &message).await?;
            if was_new && resolved.is_none() {
                eprintln!("The new room could not be identified; check `roomchat rooms`.");
            }
        }
    }

    Ok(())
}
