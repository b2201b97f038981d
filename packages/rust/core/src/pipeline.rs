//! Submission pipeline: URL → admission → session → extract → stream → finalize.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{error, info, instrument, warn};
use url::Url;

use pagebrief_extractor::Extractor;
use pagebrief_generator::{FullText, StreamHandle, SummaryGenerator};
use pagebrief_shared::{PageBriefError, SessionId, SessionPatch};
use pagebrief_storage::SessionStore;

use crate::guard::SsrfGuard;
use crate::rate_limit::RateLimiter;

/// Longest accepted URL, in characters.
pub const MAX_URL_CHARS: usize = 2048;

/// Why a submission did not produce a stream.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// Missing, malformed or non-http(s) URL. No session exists.
    #[error("{0}")]
    InvalidUrl(String),

    #[error("URLs pointing to private or internal networks are not allowed")]
    PrivateHost,

    #[error("Too many requests. Please try again later.")]
    RateLimited,

    #[error("This URL has already been summarized. You can find it in your session list.")]
    Duplicate,

    /// The page could not be fetched or had no readable text. The session
    /// exists and is marked `error` with `message`.
    #[error("Failed to fetch page: {message}")]
    Extraction {
        session_id: SessionId,
        message: String,
    },

    /// Store or runtime failure. If a session was created it has been marked
    /// `error` on a best-effort basis.
    #[error("Failed to create summary")]
    Internal { session_id: Option<SessionId> },
}

/// An admitted submission whose summary is being generated.
#[derive(Debug)]
pub struct Submission {
    pub session_id: SessionId,
    /// Live chunks for the caller. Dropping this does not affect persistence.
    pub chunks: mpsc::UnboundedReceiver<String>,
    /// Finalization task. Dropping the handle detaches it; the pipeline
    /// still tracks it for [`SessionPipeline::drain`].
    pub finalization: JoinHandle<()>,
}

/// Sole writer of session records during a submission.
pub struct SessionPipeline {
    store: Arc<dyn SessionStore>,
    extractor: Arc<Extractor>,
    generator: SummaryGenerator,
    guard: SsrfGuard,
    limiter: Arc<RateLimiter>,
    finalizers: TaskTracker,
}

impl SessionPipeline {
    pub fn new(
        store: Arc<dyn SessionStore>,
        extractor: Arc<Extractor>,
        generator: SummaryGenerator,
        guard: SsrfGuard,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            store,
            extractor,
            generator,
            guard,
            limiter,
            finalizers: TaskTracker::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Run a submission up to the point where chunks start flowing.
    ///
    /// Admission (validation, guard, limiter, dedup) happens before any
    /// record exists. From creation on, every failure is recorded on the
    /// session.
    #[instrument(skip_all, fields(origin = %origin))]
    pub async fn submit(&self, raw_url: &str, origin: &str) -> Result<Submission, SubmitError> {
        let raw_url = raw_url.trim();
        let url = parse_url(raw_url)?;

        self.guard.check(&url).map_err(|e| match e {
            PageBriefError::SsrfRejected => SubmitError::PrivateHost,
            other => SubmitError::InvalidUrl(other.to_string()),
        })?;

        if !self.limiter.check(origin).await {
            info!("submission rate limited");
            return Err(SubmitError::RateLimited);
        }

        match self.store.latest_for_url(raw_url).await {
            Ok(Some(existing)) if existing.has_completed_summary() => {
                info!(existing = %existing.id, "duplicate submission");
                return Err(SubmitError::Duplicate);
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "dedup lookup failed");
                return Err(SubmitError::Internal { session_id: None });
            }
        }

        let session = self.store.create(raw_url).await.map_err(|e| {
            error!(error = %e, "failed to create session");
            SubmitError::Internal { session_id: None }
        })?;
        let id = session.id;
        info!(session_id = %id, url = %raw_url, "session created");

        let page = match self.extractor.extract(&url).await {
            Ok(page) => page,
            Err(e) if !e.is_extraction_failure() => return Err(self.abort(id, e).await),
            Err(e) => {
                let message = e.to_string();
                warn!(session_id = %id, error = %message, "extraction failed");
                if let Err(store_err) = self.store.update(id, SessionPatch::failed(&message)).await
                {
                    return Err(self.abort(id, store_err).await);
                }
                return Err(SubmitError::Extraction {
                    session_id: id,
                    message,
                });
            }
        };

        let title = Some(page.title.clone()).filter(|t| !t.is_empty());
        if let Err(e) = self.store.update(id, SessionPatch::streaming(title)).await {
            return Err(self.abort(id, e).await);
        }
        info!(session_id = %id, status = "streaming", "session advanced");

        let StreamHandle { chunks, full_text } = self.generator.generate(&page.text, &page.title);
        let finalization = self
            .finalizers
            .spawn(finalize(Arc::clone(&self.store), id, full_text));

        Ok(Submission {
            session_id: id,
            chunks,
            finalization,
        })
    }

    /// Wait up to `deadline` for running finalizations, e.g. at shutdown.
    /// Returns `false` if some were still running when it expired.
    pub async fn drain(&self, deadline: Duration) -> bool {
        self.finalizers.close();
        let running = self.finalizers.len();
        if running > 0 {
            info!(running, "waiting for in-flight sessions to finalize");
        }
        let drained = tokio::time::timeout(deadline, self.finalizers.wait())
            .await
            .is_ok();
        if !drained {
            warn!(
                running = self.finalizers.len(),
                "shutdown deadline reached with sessions still generating"
            );
        }
        drained
    }

    /// Mark a created session as failed after an unexpected error.
    async fn abort(&self, id: SessionId, err: PageBriefError) -> SubmitError {
        error!(session_id = %id, error = %err, "unexpected pipeline failure");
        let patch = SessionPatch::failed(format!("Unexpected error: {err}"));
        if let Err(e) = self.store.update(id, patch).await {
            warn!(session_id = %id, error = %e, "could not mark session as failed");
        }
        SubmitError::Internal {
            session_id: Some(id),
        }
    }
}

/// Persist the terminal state once generation settles. Store failures are
/// logged and dropped.
#[instrument(skip_all, fields(session_id = %id))]
async fn finalize(store: Arc<dyn SessionStore>, id: SessionId, full_text: FullText) {
    let patch = match full_text.wait().await {
        Ok(text) => {
            info!(chars = text.chars().count(), status = "completed", "generation finished");
            SessionPatch::completed(text)
        }
        Err(e) => {
            warn!(error = %e, status = "error", "generation failed");
            SessionPatch::failed(format!("LLM error: {e}"))
        }
    };

    if let Err(e) = store.update(id, patch).await {
        error!(error = %e, "failed to persist final session state");
    }
}

fn parse_url(raw: &str) -> Result<Url, SubmitError> {
    if raw.is_empty() {
        return Err(SubmitError::InvalidUrl("A valid URL is required".into()));
    }
    if raw.chars().count() > MAX_URL_CHARS {
        return Err(SubmitError::InvalidUrl(format!(
            "URL too long (max {MAX_URL_CHARS} characters)"
        )));
    }
    Url::parse(raw).map_err(|_| SubmitError::InvalidUrl("Invalid URL format".into()))
}
