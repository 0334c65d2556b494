//! Enrich command - tag stored CI files with env vars and services

use crate::output::{render, OutputFormat, TableDisplay};
use anyhow::Result;
use ciscope_core::Enricher;
use ciscope_store::GraphDb;
use colored::Colorize;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct EnrichReport {
    pub files_enriched: usize,
}

impl TableDisplay for EnrichReport {
    fn to_table(&self) -> String {
        format!(
            "{} {} CI file(s)",
            "Enriched".green().bold(),
            self.files_enriched
        )
    }
}

pub fn run(store: GraphDb, format: OutputFormat) -> Result<()> {
    let files_enriched = Enricher::new(store).enrich()?;
    render(&EnrichReport { files_enriched }, format)
}
