use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use multi_leaderboard::api::{build_router, state::AppState};
use multi_leaderboard::config::{AppConfig, Credentials};
use multi_leaderboard::fetch::{FetcherConfig, MatchProvider, OsuClient, SnapshotFetcher};
use multi_leaderboard::models::{MatchId, Policy};
use multi_leaderboard::parse_duration;
use multi_leaderboard::storage::{RankingStore, Standings};
use multi_leaderboard::sync::{RefreshScheduler, RefreshSettings};

#[derive(Parser)]
#[command(name = "multi-leaderboard")]
#[command(about = "Live leaderboard for osu! multiplayer matches")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "./config.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track a match and serve the leaderboard
    Serve {
        /// Match id or match URL (prompted for when omitted)
        #[arg(long = "match")]
        match_id: Option<MatchId>,

        /// Scoring policy: "position" or "total-score"
        #[arg(long)]
        policy: Option<Policy>,

        /// Bind address
        #[arg(long)]
        host: Option<String>,

        /// Port number
        #[arg(long)]
        port: Option<u16>,

        /// Refresh interval (e.g., "10s", "1m")
        #[arg(long)]
        interval: Option<String>,
    },

    /// Fetch the match once and print the ranking
    Once {
        /// Match id or match URL (prompted for when omitted)
        #[arg(long = "match")]
        match_id: Option<MatchId>,

        /// Scoring policy: "position" or "total-score"
        #[arg(long)]
        policy: Option<Policy>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenv::dotenv().ok();
    let config = AppConfig::load_or_default(&cli.config);

    // Initialize tracing
    let level = cli
        .log_level
        .clone()
        .or_else(|| config.as_ref().ok().map(|c| c.log_level.clone()))
        .unwrap_or_else(|| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level));

    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting multi-leaderboard v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        config.with_context(|| format!("Failed to load {}", cli.config.display()))?;

    match cli.command {
        Commands::Serve {
            match_id,
            policy,
            host,
            port,
            interval,
        } => {
            if let Some(policy) = policy {
                config.refresh.policy = policy;
            }
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(raw) = interval {
                let parsed = parse_duration(&raw)
                    .filter(|d| !d.is_zero())
                    .with_context(|| format!("Invalid --interval: {}", raw))?;
                config.refresh.interval_seconds = parsed.as_secs();
            }
            config.validate()?;

            let match_id = match match_id {
                Some(id) => id,
                None => prompt_match_id().await?,
            };
            let policy = config.refresh.policy;

            let store = Arc::new(RankingStore::new(policy));
            let settings = RefreshSettings {
                match_id,
                policy,
                interval: config.refresh.interval(),
            };
            let scheduler = Arc::new(RefreshScheduler::new(
                settings,
                snapshot_fetcher(&config)?,
                Arc::clone(&store),
            ));
            tokio::spawn(Arc::clone(&scheduler).run_periodic());

            let app = build_router(AppState::new(store), &config.server);
            let addr = format!("{}:{}", config.server.host, config.server.port);
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to bind {}", addr))?;

            println!("\n=== osu! Multi Leaderboard ===");
            println!("Match:   {}", match_id);
            match policy {
                Policy::Position => println!("Scoring: position-based (lower points = better)"),
                Policy::TotalScore => println!("Scoring: total score (higher = better)"),
            }
            println!("\nOpen http://{} in your browser or add it as an OBS browser source", addr);
            println!("Press Ctrl+C to exit");

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
        Commands::Once { match_id, policy } => {
            if let Some(policy) = policy {
                config.refresh.policy = policy;
            }
            let match_id = match match_id {
                Some(id) => id,
                None => prompt_match_id().await?,
            };
            let policy = config.refresh.policy;

            let store = Arc::new(RankingStore::new(policy));
            let scheduler = RefreshScheduler::new(
                RefreshSettings::new(match_id, policy),
                snapshot_fetcher(&config)?,
                Arc::clone(&store),
            );

            scheduler
                .tick()
                .await
                .with_context(|| format!("Failed to refresh match {}", match_id))?;
            let standings = store.read().await;
            print_standings(standings.as_ref());
        }
    }

    Ok(())
}

fn snapshot_fetcher(config: &AppConfig) -> Result<SnapshotFetcher> {
    let credentials = Credentials::from_env()
        .context("Set OSU_CLIENT_ID and OSU_CLIENT_SECRET (a .env file works too)")?;
    let provider: Arc<dyn MatchProvider> =
        Arc::new(OsuClient::new(&config.provider, credentials)?);

    Ok(SnapshotFetcher::new(
        provider,
        FetcherConfig {
            enrichment_ttl: Duration::from_secs(config.provider.enrichment_ttl_seconds),
        },
    ))
}

async fn prompt_match_id() -> Result<MatchId> {
    tokio::task::spawn_blocking(|| -> Result<MatchId> {
        println!(
            "You can find the match id in the match link, or by inviting yourself with \
             '/invite YOUR_USERNAME' in the multiplayer channel"
        );
        loop {
            print!("Please enter match id: ");
            io::stdout().flush()?;

            let mut line = String::new();
            if io::stdin().read_line(&mut line)? == 0 {
                bail!("No match id given");
            }
            match line.parse::<MatchId>() {
                Ok(id) => return Ok(id),
                Err(e) => eprintln!("{}", e),
            }
        }
    })
    .await?
}

fn print_standings(standings: &Standings) {
    println!("\n=== {} ===", standings.match_name);
    let unit = if standings.table.policy.lower_is_better() {
        "pts"
    } else {
        ""
    };
    for (i, entry) in standings.table.iter().enumerate() {
        let rank = entry
            .global_rank
            .map(|r| format!(" (#{})", r))
            .unwrap_or_default();
        println!(
            "{:>3}. {:<20} {:>12} {}  [{} maps]{}",
            i + 1,
            entry.player_name,
            entry.score,
            unit,
            entry.maps_played,
            rank
        );
    }
    if standings.table.is_empty() {
        println!("(no completed maps yet)");
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
