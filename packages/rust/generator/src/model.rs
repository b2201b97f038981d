//! The text-generation capability and its OpenAI-compatible implementation.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::Stream;
use futures::stream::BoxStream;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use pagebrief_shared::{LlmConfig, PageBriefError, Result};

/// Incremental model output. Items arrive in generation order.
pub type ChunkStream = BoxStream<'static, Result<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// A chat model that can stream its reply.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Start a completion. Errors before the first chunk are returned here;
    /// errors mid-stream arrive as `Err` items.
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<ChunkStream>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// One parsed server-sent-event line.
#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Delta(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseLine> {
    let Some(data) = line.strip_prefix("data:") else {
        // Blank separators, comments, `event:` and `id:` fields.
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    if data.is_empty() {
        return Ok(SseLine::Skip);
    }

    let frame: StreamFrame = serde_json::from_str(data)
        .map_err(|e| PageBriefError::Generation(format!("malformed stream frame: {e}")))?;
    if let Some(err) = frame.error {
        return Err(PageBriefError::Generation(format!(
            "LLM API error: {}",
            err.message
        )));
    }

    Ok(frame
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|c| !c.is_empty())
        .map_or(SseLine::Skip, SseLine::Delta))
}

// ---------------------------------------------------------------------------
// OpenAiCompatibleModel
// ---------------------------------------------------------------------------

/// Streams chat completions from any `/chat/completions` endpoint speaking
/// the OpenAI wire format.
pub struct OpenAiCompatibleModel {
    base_url: String,
    model: String,
    api_key: String,
    http: Client,
}

impl OpenAiCompatibleModel {
    pub fn new(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PageBriefError::config(format!("failed to build LLM client: {e}")))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key.into(),
            http,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatibleModel {
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<ChunkStream> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(model = %self.model, "chat completion request");

        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: true,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| PageBriefError::Generation(format!("LLM request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(PageBriefError::Generation(format!(
                "LLM API error ({status}): {error_text}"
            )));
        }

        Ok(Box::pin(sse_chunks(response.bytes_stream())))
    }
}

/// Split an SSE byte stream into lines and yield the content deltas.
fn sse_chunks<S, B>(bytes: S) -> impl Stream<Item = Result<String>> + Send + 'static
where
    S: Stream<Item = reqwest::Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    async_stream::try_stream! {
        let mut bytes = Box::pin(bytes);
        let mut buf: Vec<u8> = Vec::new();
        let mut done = false;

        while !done {
            let Some(chunk) = bytes.next().await else { break };
            let chunk = chunk
                .map_err(|e| PageBriefError::Generation(format!("LLM stream error: {e}")))?;
            buf.extend_from_slice(chunk.as_ref());

            while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw).trim_end().to_string();
                match parse_sse_line(&line)? {
                    SseLine::Delta(text) => {
                        yield text;
                    }
                    SseLine::Done => {
                        done = true;
                        break;
                    }
                    SseLine::Skip => {}
                }
            }
        }

        // Final event without a trailing newline.
        if !done && !buf.is_empty() {
            let line = String::from_utf8_lossy(&buf).trim_end().to_string();
            if let SseLine::Delta(text) = parse_sse_line(&line)? {
                yield text;
            }
        }
    }
}
