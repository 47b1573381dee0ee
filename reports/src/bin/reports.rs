use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use music_reports::config::StoreConfig;
use music_reports::db::PgStore;
use music_reports::memory::MemoryStore;
use music_reports::{get_query, run_query, QueryExecutor, QueryName, QueryOverrides};

#[derive(Parser)]
#[command(name = "reports")]
#[command(about = "music streaming business reports", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the registered reports
    List,

    /// Print the SQL a report runs against postgres
    Explain {
        /// Report name or alias
        #[arg(value_name = "QUERY")]
        query: String,
    },

    /// Run a report and print its rows as JSON
    Run {
        /// Report name or alias
        #[arg(value_name = "QUERY")]
        query: String,

        /// Time anchor (RFC 3339), defaults to the current time
        #[arg(long)]
        now: Option<DateTime<Utc>>,

        /// Abandon the report after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Evaluate against a JSON seed file instead of postgres
        #[arg(long, value_name = "FILE")]
        seed: Option<PathBuf>,

        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Show row counts of the three collections
    Stats {
        /// Inspect a JSON seed file instead of postgres
        #[arg(long, value_name = "FILE")]
        seed: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Default)]
struct OverrideArgs {
    /// Length of the trailing window in days
    #[arg(long, allow_hyphen_values = true)]
    window_days: Option<i64>,

    /// Listener country code
    #[arg(long)]
    country: Option<String>,

    /// Subscription tier
    #[arg(long)]
    tier: Option<String>,

    /// Song genre
    #[arg(long)]
    genre: Option<String>,

    /// Artist name
    #[arg(long)]
    artist: Option<String>,

    /// Maximum number of rows
    #[arg(long, allow_hyphen_values = true)]
    limit: Option<i64>,

    /// Comma separated age bucket boundaries
    #[arg(long)]
    boundaries: Option<String>,
}

impl From<OverrideArgs> for QueryOverrides {
    fn from(args: OverrideArgs) -> Self {
        QueryOverrides {
            window_days: args.window_days,
            country: args.country,
            tier: args.tier,
            genre: args.genre,
            artist: args.artist,
            limit: args.limit,
            boundaries: args.boundaries,
        }
    }
}

enum Store {
    Memory(MemoryStore),
    Postgres(PgStore),
}

impl Store {
    async fn open(seed: Option<&Path>) -> Result<Self> {
        match seed {
            Some(path) => Ok(Store::Memory(
                MemoryStore::open(path).context("Failed to load seed file")?,
            )),
            None => {
                let config = StoreConfig::from_env().context("Invalid store configuration")?;
                let store = PgStore::connect(&config)
                    .await
                    .context("Failed to connect to database")?;
                Ok(Store::Postgres(store))
            }
        }
    }

    fn executor(&self) -> &dyn QueryExecutor {
        match self {
            Store::Memory(store) => store,
            Store::Postgres(store) => store,
        }
    }

    async fn close(self) {
        if let Store::Postgres(store) = self {
            store.close().await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter("reports=info,music_reports=info")
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => handle_list(),
        Commands::Explain { query } => handle_explain(&query),
        Commands::Run {
            query,
            now,
            timeout_secs,
            seed,
            overrides,
        } => {
            handle_run(
                &query,
                now,
                timeout_secs.map(Duration::from_secs),
                seed.as_deref(),
                overrides.into(),
            )
            .await
        }
        Commands::Stats { seed } => handle_stats(seed.as_deref()).await,
    }
}

fn handle_list() -> Result<()> {
    println!("registered reports:");
    for name in QueryName::ALL {
        println!("  {} (alias {})", name, name.alias());
        println!("    {}", name.description());
        println!(
            "    root: {}, parameters: {}",
            name.root(),
            name.parameters().join(", ")
        );
    }
    Ok(())
}

fn handle_explain(query: &str) -> Result<()> {
    let spec = get_query(query)?;
    println!("-- {} with defaults {}", spec.name(), serde_json::to_string(&spec)?);
    println!("{}", spec.explain().trim());
    Ok(())
}

async fn handle_run(
    query: &str,
    now: Option<DateTime<Utc>>,
    deadline: Option<Duration>,
    seed: Option<&Path>,
    overrides: QueryOverrides,
) -> Result<()> {
    let mut spec = get_query(query)?;
    spec.apply(&overrides)
        .with_context(|| format!("Invalid parameters for {}", spec.name()))?;
    let now = now.unwrap_or_else(Utc::now);

    let store = Store::open(seed).await?;
    let result = run_query(store.executor(), &spec, now, deadline).await;
    store.close().await;

    let rows = result.with_context(|| format!("Report {} failed", spec.name()))?;
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

async fn handle_stats(seed: Option<&Path>) -> Result<()> {
    let store = Store::open(seed).await?;
    let counts = store.executor().counts().await;
    store.close().await;

    let counts = counts.context("Failed to count collections")?;
    println!("collection stats:");
    println!("  users: {}", counts.users);
    println!("  songs: {}", counts.songs);
    println!("  streams: {}", counts.streams);
    Ok(())
}
