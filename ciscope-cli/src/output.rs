//! Output rendering for command results.
//!
//! Results are printed as colored text and tables for humans, or as JSON for scripts.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tabled::{builder::Builder, settings::style::Style};

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format (default)
    #[default]
    Table,
    /// JSON format for machine consumption
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown output format: '{}'", s)),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Types that can be displayed as a table.
pub trait TableDisplay: Serialize {
    fn to_table(&self) -> String;
}

/// Print `data` to stdout in the requested format.
pub fn render<T: TableDisplay>(data: &T, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Table => println!("{}", data.to_table()),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(data)?),
    }
    Ok(())
}

/// Two-column table of counts, largest first, ties by name.
pub fn counts_table(header: &str, counts: &HashMap<String, usize>) -> String {
    if counts.is_empty() {
        return "(no results)".to_string();
    }

    let mut rows: Vec<(&String, &usize)> = counts.iter().collect();
    rows.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    let mut builder = Builder::default();
    builder.push_record([header, "Count"]);
    for (name, count) in rows {
        let name = if name.is_empty() { "(none)" } else { name.as_str() };
        builder.push_record([name.to_string(), count.to_string()]);
    }

    let mut table = builder.build();
    table.with(Style::rounded());
    table.to_string()
}
