// Almanac command-line entry point.
//
// Startup sequence:
// 1. Parse arguments
// 2. Initialize tracing (stderr, so stdout stays pure JSON)
// 3. Load config and build the roster
// 4. Open the database and pick the match source
// 5. Run the subcommand and print its result as JSON

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use almanac_core::config;
use almanac_core::db::Database;
use almanac_core::engine::Engine;
use almanac_core::identity::Roster;
use almanac_core::legacy;
use almanac_core::model::Season;
use almanac_core::source::{HttpMatchSource, MatchSource, OfflineSource};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::info;

#[derive(Parser)]
#[command(name = "almanac")]
#[command(about = "Head-to-head league almanac: history, streaks, ratings and h2h records")]
#[command(version)]
struct Cli {
    /// Path to almanac.toml (default: ./almanac.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration file
    Init {
        /// Where to write it (default: the resolved config path)
        path: Option<PathBuf>,
    },

    #[command(flatten)]
    Engine(EngineCommand),
}

/// Commands that need a loaded configuration and an open database.
#[derive(Subcommand)]
enum EngineCommand {
    /// Synchronize the current season from the match source
    Sync,

    /// All-time totals for every manager
    Stats,

    /// Season-by-season breakdown for one manager
    Seasons {
        manager: String,
    },

    /// Head-to-head table, for everyone or one manager
    H2h {
        manager: Option<String>,

        /// Restrict to one season, e.g. 2023/24
        #[arg(short, long)]
        season: Option<String>,
    },

    /// Composite manager ratings
    Ratings,

    /// Import a legacy CSV archive directory
    Import {
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Parse arguments
    let cli = Cli::parse();

    // 2. Initialize tracing
    init_tracing()?;

    let output = match cli.command {
        Commands::Init { path } => init_config(path.as_deref().or(cli.config.as_deref()))?,
        Commands::Engine(command) => {
            let engine = open_engine(cli.config.as_deref())?;
            run(command, &engine).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Steps 3 and 4: config, roster, database, match source.
fn open_engine(config_path: Option<&Path>) -> anyhow::Result<Engine> {
    let config = config::load_config(config_path).context("failed to load configuration")?;
    let roster = Roster::from_config(&config.roster).context("invalid roster")?;
    info!(
        "Config loaded: league={}, season={}, {} managers",
        config.league.name,
        config.current_season,
        roster.len()
    );

    let db = Database::open(&config.db_path, roster.clone()).context("failed to open database")?;
    info!("Database opened at {}", config.db_path);

    let source: Arc<dyn MatchSource> = match &config.source.base_url {
        Some(url) => {
            info!("Match source: {url}");
            Arc::new(
                HttpMatchSource::new(url, Duration::from_secs(config.source.timeout_secs))
                    .context("failed to build HTTP match source")?,
            )
        }
        None => {
            info!("No match source configured, running offline");
            Arc::new(OfflineSource)
        }
    };

    Ok(Engine::from_config(&config, Arc::new(db), source, roster))
}

/// Step 5: run one command and return its JSON output.
async fn run(command: EngineCommand, engine: &Engine) -> anyhow::Result<Value> {
    let output = match command {
        EngineCommand::Sync => serde_json::to_value(engine.sync().await?)?,
        EngineCommand::Stats => serde_json::to_value(engine.all_time_stats().await)?,
        EngineCommand::Seasons { manager } => {
            let id = engine.resolve_manager(&manager)?;
            json!({
                "manager": id,
                "aliases": engine.variants(&manager)?,
                "seasons": engine.season_stats(&manager).await?,
            })
        }
        EngineCommand::H2h { manager, season } => {
            let season = season
                .as_deref()
                .map(Season::parse)
                .transpose()
                .context("invalid --season")?;
            match manager {
                Some(m) => serde_json::to_value(engine.pairwise_for(&m, season.as_ref()).await?)?,
                None => serde_json::to_value(engine.pairwise(season.as_ref()).await)?,
            }
        }
        EngineCommand::Ratings => serde_json::to_value(engine.ratings().await)?,
        EngineCommand::Import { dir } => {
            let batch = legacy::load_legacy_dir(&dir, engine.roster())
                .with_context(|| format!("failed to read legacy archive {}", dir.display()))?;
            serde_json::to_value(engine.import_legacy(&batch)?)?
        }
    };
    Ok(output)
}

fn init_config(path: Option<&Path>) -> anyhow::Result<Value> {
    let path = config::resolve_config_path(path);
    let written = config::write_default_config(&path)?;
    let output = json!({
        "path": path.display().to_string(),
        "written": written,
    });
    if !written {
        info!("{} already exists, left unchanged", path.display());
    }
    Ok(output)
}

fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("almanac=info,almanac_core=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
