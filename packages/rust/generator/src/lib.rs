//! Streaming summary generation.
//!
//! This crate provides:
//! - [`LanguageModel`]: the text-generation capability, with an
//!   OpenAI-compatible implementation in [`OpenAiCompatibleModel`]
//! - [`SummaryGenerator`]: prompt framing plus a single producer task that
//!   forwards chunks live and accumulates the full text

mod model;
#[cfg(any(test, feature = "test-support"))]
mod scripted;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use pagebrief_shared::{PageBriefError, Result};

pub use model::{ChatMessage, ChatRole, ChunkStream, LanguageModel, OpenAiCompatibleModel};
#[cfg(any(test, feature = "test-support"))]
pub use scripted::{ScriptEnd, ScriptedModel};

const SYSTEM_PROMPT: &str = "\
You are a helpful assistant that summarizes webpage content.
Given the text content of a webpage, provide a clear, well-structured summary that captures the key points.
Use markdown formatting for readability. Keep the summary concise but informative.
Do not open with a title such as \"Summary of...\"; start directly with the content.
Always respond in English regardless of the source language.
If the content appears to be minimal or not meaningful, say so in your summary.";

/// Build the chat messages for one summary request.
pub fn summary_messages(content: &str, title: &str) -> Vec<ChatMessage> {
    let title = title.trim();
    let prompt = if title.is_empty() {
        format!("Summarize the following webpage:\n\n{content}")
    } else {
        format!("Summarize the following webpage titled \"{title}\":\n\n{content}")
    };
    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)]
}

/// Drives a [`LanguageModel`] for summaries.
#[derive(Clone)]
pub struct SummaryGenerator {
    model: Arc<dyn LanguageModel>,
    deadline: Duration,
}

impl SummaryGenerator {
    pub fn new(model: Arc<dyn LanguageModel>, deadline: Duration) -> Self {
        Self { model, deadline }
    }

    /// Start generating. Returns immediately; must be called within a Tokio
    /// runtime.
    pub fn generate(&self, content: &str, title: &str) -> StreamHandle {
        let messages = summary_messages(content, title);
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (full_tx, full_rx) = oneshot::channel();

        let model = Arc::clone(&self.model);
        let deadline = self.deadline;
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(deadline, produce(model, messages, chunk_tx))
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(PageBriefError::Generation(format!(
                    "generation timed out after {}s",
                    deadline.as_secs()
                ))),
            };
            if let Err(e) = &outcome {
                warn!(error = %e, "generation failed");
            }
            // The receiver is gone only if the caller abandoned finalization.
            let _ = full_tx.send(outcome);
        });

        StreamHandle {
            chunks: chunk_rx,
            full_text: FullText(full_rx),
        }
    }
}

/// Single producer: every chunk is appended to the accumulator and then
/// offered to the live receiver, in model order.
async fn produce(
    model: Arc<dyn LanguageModel>,
    messages: Vec<ChatMessage>,
    forward: mpsc::UnboundedSender<String>,
) -> Result<String> {
    let mut stream = model.stream_chat(messages).await?;
    let mut full = String::new();
    let mut forwarding = true;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if chunk.is_empty() {
            continue;
        }
        full.push_str(&chunk);
        if forwarding && forward.send(chunk).is_err() {
            debug!("live receiver dropped, accumulating only");
            forwarding = false;
        }
    }

    if full.trim().is_empty() {
        return Err(PageBriefError::Generation(
            "model returned an empty summary".into(),
        ));
    }
    Ok(full)
}

/// Output of one [`SummaryGenerator::generate`] call.
pub struct StreamHandle {
    /// Chunks in generation order. Closes when generation ends, successfully
    /// or not; dropping it does not stop generation.
    pub chunks: mpsc::UnboundedReceiver<String>,
    /// Resolves once the model stream is exhausted.
    pub full_text: FullText,
}

/// Deferred full-text accumulation.
pub struct FullText(oneshot::Receiver<Result<String>>);

impl FullText {
    /// Wait for the accumulated text, or the failure that ended generation.
    pub async fn wait(self) -> Result<String> {
        self.0.await.unwrap_or_else(|_| {
            Err(PageBriefError::Generation(
                "generation task ended unexpectedly".into(),
            ))
        })
    }
}
