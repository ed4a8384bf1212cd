use async_trait::async_trait;
use party_proto::party::PartyConfig;
use tracing::{debug, warn};

use crate::error::PartyError;

/// One live stream returned by a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamListing {
    /// Channel login, used as the stream identifier.
    pub name: String,
    /// Descriptive text the keyword is matched against.
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub keyword: String,
    pub client_id: String,
    pub token: Option<String>,
}

/// Upstream search for candidate streams.
#[async_trait]
pub trait StreamSource: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<StreamListing>, PartyError>;
}

/// Names of the listings whose title contains `keyword`, ignoring case.
pub fn matching_names(listings: Vec<StreamListing>, keyword: &str) -> Vec<String> {
    let keyword = keyword.to_lowercase();
    listings
        .into_iter()
        .filter(|l| l.title.to_lowercase().contains(&keyword))
        .map(|l| l.name)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Replaced,
    /// Empty result after a non-empty one; the previous list was kept.
    Discarded,
}

/// Latest raw candidate list.  Filtering by the party config happens on
/// read so a config change takes effect without a refetch.
#[derive(Debug)]
pub struct StreamCatalog {
    streams: Vec<String>,
    discard_empty: bool,
}

impl StreamCatalog {
    pub fn new(discard_empty: bool) -> Self {
        Self {
            streams: Vec::new(),
            discard_empty,
        }
    }

    pub fn apply_fetch(&mut self, streams: Vec<String>) -> FetchOutcome {
        if self.discard_empty && streams.is_empty() && !self.streams.is_empty() {
            warn!(
                "catalog: empty search result after {} candidates, keeping previous list",
                self.streams.len()
            );
            return FetchOutcome::Discarded;
        }
        debug!("catalog: {} candidates", streams.len());
        self.streams = streams;
        FetchOutcome::Replaced
    }

    pub fn streams(&self) -> &[String] {
        &self.streams
    }

    pub fn visible<'a>(&'a self, config: &PartyConfig) -> Vec<&'a str> {
        self.streams
            .iter()
            .map(String::as_str)
            .filter(|s| config.is_visible(s))
            .collect()
    }

    pub fn clear(&mut self) {
        self.streams.clear();
    }
}
