//! ciscope core - crawl engine for CI/CD attack-surface graphs.
//!
//! Crawls a GitHub organization (and the CircleCI organization of the same name) and
//! writes what it finds into a [`ciscope_store::GraphDb`] property graph.
//!
//! # Features
//!
//! - **Paged fetchers**: cursor-paginated GraphQL, page-numbered and token-paged REST
//! - **Error triage**: fatal errors abort, everything else is counted per message
//! - **Phased orchestration**: units run per entity discovered earlier in the same session
//! - **Bounded concurrency**: entity phases fan out over tokio tasks
//! - **Enrichment**: env var and service tagging of stored CI files
//!
//! # Usage
//!
//! ```no_run
//! use ciscope_core::{names, CrawlConfig, Orchestrator, UnitContext};
//! use ciscope_store::GraphDb;
//!
//! # async fn crawl() -> anyhow::Result<()> {
//! let mut config = CrawlConfig::new("acme", "5f0c2d3e");
//! config.github.token = Some(std::env::var("GITHUB_TOKEN")?);
//!
//! let store = GraphDb::open(".ciscope/graph.duckdb")?;
//! let orchestrator = Orchestrator::new(
//!     ciscope_core::ingest::github::registry(),
//!     UnitContext::github(&config)?,
//!     store,
//!     config.session.clone(),
//!     config.concurrency,
//! );
//! let summary = orchestrator.run(&names::resolve_ingestor_names(&["default"])?).await?;
//! println!("{} tolerated errors", summary.errors.total());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod enrich;
pub mod error;
pub mod ingest;
pub mod names;
pub mod orchestrator;

pub use client::{ErrorSummary, Fetched, GraphQlClient, HttpClient, RestClient};
pub use config::CrawlConfig;
pub use enrich::Enricher;
pub use error::{IngestError, Result};
pub use ingest::{Ingestor, Registry, Target, UnitContext};
pub use orchestrator::{Orchestrator, PhaseSummary, RunSummary};
