//! Wikipedia source-text client
//!
//! Fetches plain-text page extracts from the MediaWiki Action API and
//! returns the first `preview_chars` characters.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use tracing::debug;

use crate::config::SourceConfig;
use crate::domain::knowledge::SourceText;
use crate::error::{Error, Result};

/// Wikipedia page preview fetcher
#[derive(Debug, Clone)]
pub struct WikipediaSource {
    http_client: HttpClient,
    api_url: String,
    preview_chars: usize,
}

impl WikipediaSource {
    /// Create a client for the language edition in `config`
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let http_client = HttpClient::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(Error::NetworkError)?;

        Ok(Self {
            http_client,
            api_url: format!("https://{}.wikipedia.org/w/api.php", config.language),
            preview_chars: config.preview_chars,
        })
    }

    /// Point the client at another MediaWiki API endpoint
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Number of characters returned per preview
    pub fn preview_chars(&self) -> usize {
        self.preview_chars
    }
}

#[async_trait]
impl SourceText for WikipediaSource {
    async fn preview(&self, topic: &str) -> Result<String> {
        let title = topic.trim();
        if title.is_empty() {
            return Err(Error::TopicNotFound(topic.to_string()));
        }

        debug!(topic = %title, "Fetching Wikipedia extract");

        let response = self
            .http_client
            .get(&self.api_url)
            .query(&[
                ("action", "query"),
                ("format", "json"),
                ("formatversion", "2"),
                ("prop", "extracts"),
                ("explaintext", "1"),
                ("redirects", "1"),
                ("titles", title),
            ])
            .send()
            .await
            .map_err(Error::NetworkError)?
            .error_for_status()
            .map_err(Error::NetworkError)?;

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| Error::Other(format!("Invalid MediaWiki response: {}", e)))?;

        let text = page_text(title, body)?;
        Ok(truncate_chars(&text, self.preview_chars))
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    query: Option<QueryBody>,
}

#[derive(Debug, Deserialize)]
struct QueryBody {
    #[serde(default)]
    pages: Vec<Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    invalid: bool,
    #[serde(default)]
    extract: Option<String>,
}

fn page_text(title: &str, body: QueryResponse) -> Result<String> {
    let page = body
        .query
        .and_then(|q| q.pages.into_iter().next())
        .ok_or_else(|| Error::TopicNotFound(title.to_string()))?;

    if page.missing || page.invalid {
        return Err(Error::TopicNotFound(title.to_string()));
    }
    Ok(page.extract.unwrap_or_default())
}

/// First `max_chars` characters of `text`
fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
