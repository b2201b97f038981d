//! Bounded HTTP fetch.

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response};
use tracing::debug;
use url::Url;

use pagebrief_shared::{ExtractorConfig, FetchError, PageBriefError, Result};

const ACCEPT_HEADER: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// A fetched response body, tagged by the content type it was served as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Document {
    Html(String),
    PlainText(String),
}

impl Document {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Html(_) => "html",
            Self::PlainText(_) => "text",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Html(s) | Self::PlainText(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fetch `url`, enforcing the deadline, status, content type and size bound.
pub(crate) async fn fetch_document(
    client: &Client,
    url: &Url,
    config: &ExtractorConfig,
) -> Result<Document> {
    // The client timeout already covers the body; this is the hard outer deadline.
    match tokio::time::timeout(config.timeout(), fetch_inner(client, url, config)).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout {
            secs: config.timeout_secs,
        }
        .into()),
    }
}

async fn fetch_inner(client: &Client, url: &Url, config: &ExtractorConfig) -> Result<Document> {
    debug!(%url, "fetching page");

    let mut response = client
        .get(url.as_str())
        .header(ACCEPT, ACCEPT_HEADER)
        .send()
        .await
        .map_err(|e| map_reqwest_error(e, config))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
        }
        .into());
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let lowered = content_type.to_ascii_lowercase();
    let is_html = lowered.contains("text/html");
    if !is_html && !lowered.contains("text/plain") {
        return Err(PageBriefError::UnsupportedContentType { content_type });
    }

    let body = read_bounded(&mut response, config).await?;
    let body = String::from_utf8_lossy(&body).into_owned();

    Ok(if is_html {
        Document::Html(body)
    } else {
        Document::PlainText(body)
    })
}

/// Read the body chunk by chunk, aborting once it exceeds `max_body_bytes`.
async fn read_bounded(response: &mut Response, config: &ExtractorConfig) -> Result<Vec<u8>> {
    let limit = config.max_body_bytes;
    if response.content_length().is_some_and(|len| len > limit as u64) {
        return Err(FetchError::TooLarge { limit }.into());
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| map_reqwest_error(e, config))?
    {
        if body.len() + chunk.len() > limit {
            return Err(FetchError::TooLarge { limit }.into());
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn map_reqwest_error(err: reqwest::Error, config: &ExtractorConfig) -> PageBriefError {
    if err.is_timeout() {
        FetchError::Timeout {
            secs: config.timeout_secs,
        }
        .into()
    } else if err.is_redirect() {
        FetchError::Network("redirect rejected".into()).into()
    } else {
        FetchError::Network(err.to_string()).into()
    }
}
