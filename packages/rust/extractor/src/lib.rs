//! Page fetching and readable-text extraction.
//!
//! This crate provides:
//! - [`Extractor`]: bounded HTTP fetch (timeout, body size, content type)
//! - [`extract_from_html`]: markup cleanup, main-content heuristic, title resolution

mod content;
mod fetch;

use std::time::Duration;

use reqwest::Client;
use reqwest::redirect::Policy;
use tracing::{debug, info, instrument};
use url::Url;

use pagebrief_shared::{ExtractorConfig, PageBriefError, Result};

pub use content::{extract_from_html, extract_from_text};
pub use fetch::Document;

/// Readable content of a fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPage {
    /// Resolved page title; empty when the page has none.
    pub title: String,
    /// Whitespace-collapsed text, bounded by `max_content_chars`.
    pub text: String,
}

/// Fetches pages and turns them into [`ExtractedPage`]s.
pub struct Extractor {
    config: ExtractorConfig,
    client: Client,
}

impl Extractor {
    /// Create an extractor with one reusable HTTP client that follows up to
    /// five redirects.
    pub fn new(config: ExtractorConfig) -> Result<Self> {
        Self::with_redirect_policy(config, Policy::limited(5))
    }

    /// Like [`new`](Self::new), with a caller-supplied redirect policy.
    pub fn with_redirect_policy(config: ExtractorConfig, redirect: Policy) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(redirect)
            .timeout(config.timeout())
            .connect_timeout(Duration::from_secs(config.timeout_secs.min(10)))
            .build()
            .map_err(|e| PageBriefError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    /// Fetch `url` and extract its title and readable text.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn extract(&self, url: &Url) -> Result<ExtractedPage> {
        let document = fetch::fetch_document(&self.client, url, &self.config).await?;
        debug!(kind = document.kind(), bytes = document.len(), "page fetched");

        let page = match document {
            Document::Html(html) => extract_from_html(&html, &self.config)?,
            Document::PlainText(text) => extract_from_text(&text, &self.config)?,
        };

        info!(
            title = %page.title,
            chars = page.text.chars().count(),
            "content extracted"
        );
        Ok(page)
    }
}
