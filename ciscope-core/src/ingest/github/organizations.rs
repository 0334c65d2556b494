use async_trait::async_trait;
use ciscope_store::{NodeLabel, NodeUpsert, Statement};

use crate::client::ErrorSummary;
use crate::error::Result;
use crate::ingest::{Ingestor, UnitContext};

/// Writes the crawled organization itself. Only one organization per run is supported.
pub struct Organizations {
    login: String,
    url: Option<String>,
}

impl Organizations {
    pub fn new(ctx: &UnitContext) -> Self {
        Self {
            login: ctx.organization.clone(),
            url: None,
        }
    }
}

#[async_trait]
impl Ingestor for Organizations {
    fn name(&self) -> &'static str {
        "organizations"
    }

    async fn fetch(&mut self) -> Result<ErrorSummary> {
        self.url = Some(format!("https://github.com/{}", self.login));
        Ok(ErrorSummary::new())
    }

    fn statements(&self) -> Vec<Statement> {
        let Some(url) = &self.url else {
            return Vec::new();
        };
        vec![NodeUpsert::new(NodeLabel::Organization, url.as_str())
            .set("login", self.login.as_str())
            .set("url", url.as_str())
            .into()]
    }
}
