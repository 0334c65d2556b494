//! Command implementations for the ciscope CLI.

pub mod crawl;
pub mod enrich;
pub mod stats;
