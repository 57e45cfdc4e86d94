//! soundboard-bot: runs the creator and manager identities.
//!
//! The manager hosts the application commands; both identities feed their
//! gateway events to the correlator.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use soundboard_sdk::event::Event;
use soundboard_sdk::gateway;
use soundboard_sdk::http::RestClient;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use soundboard_bot::bot::{Actor, Bot, BotConfig};
use soundboard_bot::correlator::{Correlator, Side};
use soundboard_bot::db::Db;
use soundboard_bot::reconcile::Reconciler;
use soundboard_bot::registry::Grants;

#[derive(Parser)]
#[command(name = "soundboard-bot", about = "Soundboard server provisioning bots")]
struct Args {
    /// Token of the identity that clones and hands off soundboards
    #[arg(long, env = "CREATOR_TOKEN", hide_env_values = true)]
    creator_token: String,

    /// Token of the identity that hosts commands and stays in soundboards
    #[arg(long, env = "MANAGER_TOKEN", hide_env_values = true)]
    manager_token: String,

    /// Usernames allowed to run administrative commands
    #[arg(long, env = "SUPER_ADMINS", value_delimiter = ',')]
    admins: Vec<String>,

    /// Code of the guild template soundboards are cloned from
    #[arg(long, env = "SOUNDBOARD_TEMPLATE")]
    template: String,

    /// Database path (default: ~/.soundboardbot/db)
    #[arg(long)]
    db: Option<PathBuf>,
}

fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".soundboardbot")
        .join("db")
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs in production (SOUNDBOARD_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("SOUNDBOARD_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "soundboard_bot=info,soundboard_sdk=info".into());
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let args = Args::parse();

    let db_path = args.db.clone().unwrap_or_else(default_db_path);
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let db = Arc::new(
        Db::open(&db_path).with_context(|| format!("Failed to open {}", db_path.display()))?,
    );

    let creator = Actor::resolve(Arc::new(RestClient::new(&args.creator_token)))
        .await
        .context("Failed to resolve creator identity")?;
    let manager = Actor::resolve(Arc::new(RestClient::new(&args.manager_token)))
        .await
        .context("Failed to resolve manager identity")?;
    tracing::info!(creator = %creator.user, manager = %manager.user, db = %db_path.display(), "Starting soundboard-bot");

    let grants = Arc::new(Grants::new());
    let config = BotConfig::new(args.admins.iter().map(|a| a.trim().to_string()), &args.template);
    let bot = Arc::new(
        Bot::new(config, creator.clone(), manager.clone(), Arc::clone(&db), Arc::clone(&grants))
            .await
            .context("Failed to initialise bot")?,
    );
    bot.register_commands().await?;

    let reconciler = Reconciler::new(Arc::clone(&manager.platform), Arc::clone(&db));
    let correlator = Arc::new(Correlator::new(creator, manager, grants, reconciler));

    let (creator_gateway, creator_events) = gateway::connect(&args.creator_token)
        .await
        .context("Failed to connect creator gateway")?;
    let (manager_gateway, manager_events) = gateway::connect(&args.manager_token)
        .await
        .context("Failed to connect manager gateway")?;

    let creator_loop = tokio::spawn(event_loop(
        Side::Creator,
        creator_events,
        Arc::clone(&correlator),
        None,
    ));
    let manager_loop = tokio::spawn(event_loop(
        Side::Manager,
        manager_events,
        Arc::clone(&correlator),
        Some(Arc::clone(&bot)),
    ));

    tracing::info!("Bots running. Ctrl+C to stop.");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
        _ = creator_loop => tracing::warn!("Creator event stream ended"),
        _ = manager_loop => tracing::warn!("Manager event stream ended"),
    }
    creator_gateway.shutdown().await;
    manager_gateway.shutdown().await;
    Ok(())
}

/// Drain one identity's events. Events are handled one at a time; commands
/// run on their own tasks.
async fn event_loop(
    side: Side,
    mut events: mpsc::Receiver<Event>,
    correlator: Arc<Correlator>,
    commands: Option<Arc<Bot>>,
) {
    while let Some(event) = events.recv().await {
        match event {
            Event::Ready { user } => tracing::info!(?side, %user, "Gateway ready"),
            Event::Command(interaction) => match &commands {
                Some(bot) => {
                    bot.dispatch(interaction);
                }
                None => tracing::debug!(?side, command = %interaction.command, "Ignoring command"),
            },
            Event::Disconnected { reason } => {
                tracing::warn!(?side, %reason, "Disconnected");
                break;
            }
            event => {
                correlator.handle(side, &event).await;
            }
        }
    }
}
