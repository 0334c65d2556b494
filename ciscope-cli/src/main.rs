//! ciscope CLI - map the CI/CD attack surface of an organization
//!
//! Crawls GitHub and CircleCI into a local DuckDB property graph that can be
//! queried for paths from people to secrets.

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;
mod output;

use ciscope_core::ingest::circleci;
use ciscope_core::names::resolve_ingestor_names;
use ciscope_store::GraphDb;
use commands::crawl::{self, Platform};
use commands::{enrich, stats};
use config::{CiscopeConfig, Overrides};
use output::OutputFormat;

/// Map the CI/CD attack surface of a GitHub organization.
#[derive(Parser)]
#[command(name = "ciscope")]
#[command(author, version)]
#[command(about = "Map the CI/CD attack surface of a GitHub organization")]
#[command(propagate_version = true)]
#[command(after_help = "Quick Start:
  ciscope github -o acme              Crawl teams, users and repositories
  ciscope github -o acme -i secrets   Crawl every kind of secret
  ciscope circleci -o acme            Add CircleCI contexts and projects
  ciscope enrich                      Tag CI files with env vars and services
  ciscope stats                       Show what the graph holds")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Graph database file (default: .ciscope/graph.duckdb)
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl a GitHub organization
    Github {
        #[command(flatten)]
        crawl: CrawlArgs,

        /// Unit to run; repeatable. Accepts `default`, `secrets` and unit names
        #[arg(short, long = "ingestor", value_name = "NAME")]
        ingestors: Vec<String>,

        /// GitHub personal access token
        #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// Crawl the CircleCI organization of the same name
    Circleci {
        #[command(flatten)]
        crawl: CrawlArgs,

        /// `ring-session` cookie of a logged-in CircleCI browser session
        #[arg(long, env = "CIRCLECI_COOKIE", hide_env_values = true)]
        cookie: Option<String>,
    },

    /// Tag stored CI configuration files with env vars and services
    Enrich,

    /// Show node, edge and session counts
    Stats,
}

#[derive(Args)]
struct CrawlArgs {
    /// Organization login
    #[arg(short, long, env = "CISCOPE_ORGANIZATION")]
    organization: Option<String>,

    /// Session id tagged onto every write (default: fresh UUID, or the last GitHub
    /// session for circleci)
    #[arg(long)]
    session: Option<String>,

    /// Maximum number of entities crawled at once
    #[arg(short, long)]
    concurrency: Option<usize>,
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        "error"
    } else if verbose {
        "debug,hyper=info,reqwest=info"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();
}

async fn run_crawl(
    platform: Platform,
    config: &CiscopeConfig,
    db: &Path,
    args: CrawlArgs,
    overrides: Overrides,
    selected: Vec<String>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let store = GraphDb::open(db)?;
    let session = crawl::resolve_session(args.session, platform, &store)?;
    tracing::info!("Session {}", session);

    let overrides = Overrides {
        organization: args.organization,
        concurrency: args.concurrency,
        ..overrides
    };
    let crawl_config = config.crawl_config(&session, overrides)?;
    crawl::run(platform, crawl_config, store, &selected, format).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    // Load configuration from .ciscope.toml
    let config = CiscopeConfig::load(Path::new("."));
    let db = config.db_path(cli.db.as_deref());

    match cli.command {
        Commands::Github {
            crawl,
            ingestors,
            token,
        } => {
            let requested = if ingestors.is_empty() {
                config.github.ingestors.clone()
            } else {
                ingestors
            };
            let selected = resolve_ingestor_names(&requested)?;
            let overrides = Overrides {
                github_token: token,
                ..Overrides::default()
            };
            run_crawl(
                Platform::GitHub,
                &config,
                &db,
                crawl,
                overrides,
                selected,
                cli.format,
            )
            .await
        }
        Commands::Circleci { crawl, cookie } => {
            let selected = circleci::UNIT_NAMES.iter().map(|s| s.to_string()).collect();
            let overrides = Overrides {
                circleci_cookie: cookie,
                ..Overrides::default()
            };
            run_crawl(
                Platform::CircleCi,
                &config,
                &db,
                crawl,
                overrides,
                selected,
                cli.format,
            )
            .await
        }
        Commands::Enrich => enrich::run(GraphDb::open(&db)?, cli.format),
        Commands::Stats => {
            if !db.exists() {
                anyhow::bail!(
                    "No graph database at {}; run `ciscope github` first",
                    db.display()
                );
            }
            stats::run(&GraphDb::open_read_only(&db)?, cli.format)
        }
    }
}
