//! Storage layer for ciscope.
//!
//! Provides a DuckDB-backed property graph with:
//! - Schema management
//! - MERGE-style node and edge upserts tagged with a crawl session
//! - Read-back queries used for phase discovery
//! - Graph statistics

mod edges;
mod graphdb;
mod nodes;
mod schema;

pub use edges::{EdgeUpsert, NodeMatch};
pub use graphdb::{AccessMode, GraphDb, GraphStats, QueryResult, Statement, StoredNode};
pub use nodes::NodeUpsert;
pub use schema::{EdgeType, NodeLabel, SCHEMA_VERSION};
