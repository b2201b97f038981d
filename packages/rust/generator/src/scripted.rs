//! Deterministic [`LanguageModel`] for tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use pagebrief_shared::{PageBriefError, Result};

use crate::model::{ChatMessage, ChunkStream, LanguageModel};

/// How a scripted reply ends once its chunks are exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEnd {
    /// Stream ends normally.
    Finish,
    /// Stream yields this error as its last item.
    Fail(String),
    /// Stream never ends.
    Stall,
}

/// Replays a fixed list of chunks, optionally with a delay between them.
pub struct ScriptedModel {
    chunks: Vec<String>,
    end: ScriptEnd,
    delay: Duration,
    refuse: Option<String>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            end: ScriptEnd::Finish,
            delay: Duration::ZERO,
            refuse: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Fail with `message` after all chunks were delivered.
    pub fn failing_with(mut self, message: impl Into<String>) -> Self {
        self.end = ScriptEnd::Fail(message.into());
        self
    }

    /// Never finish after all chunks were delivered.
    pub fn stalling(mut self) -> Self {
        self.end = ScriptEnd::Stall;
        self
    }

    /// Reject the request before any chunk is produced.
    pub fn refusing(mut self, message: impl Into<String>) -> Self {
        self.refuse = Some(message.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every message list this model was called with, oldest first.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<ChunkStream> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages);
        }
        if let Some(message) = &self.refuse {
            return Err(PageBriefError::Generation(message.clone()));
        }

        let chunks = self.chunks.clone();
        let end = self.end.clone();
        let delay = self.delay;

        let stream = async_stream::stream! {
            for chunk in chunks {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(chunk);
            }
            match end {
                ScriptEnd::Finish => {}
                ScriptEnd::Fail(message) => {
                    yield Err(PageBriefError::Generation(message));
                }
                ScriptEnd::Stall => {
                    futures::future::pending::<()>().await;
                }
            }
        };

        Ok(stream.boxed())
    }
}
