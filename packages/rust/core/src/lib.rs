//! Session lifecycle orchestration for PageBrief.
//!
//! This crate ties the extractor, generator and session store together behind
//! admission control:
//! - [`SsrfGuard`]: rejects URLs that target private or internal hosts
//! - [`RateLimiter`]: fixed-window submission limit per origin
//! - [`SessionPipeline`]: create, extract, stream, finalize

pub mod guard;
pub mod pipeline;
pub mod rate_limit;

pub use guard::SsrfGuard;
pub use pipeline::{MAX_URL_CHARS, SessionPipeline, SubmitError, Submission};
pub use rate_limit::RateLimiter;
