//! Shared types, error model, and configuration for PageBrief.
//!
//! This crate is the foundation depended on by all other PageBrief crates.
//! It provides:
//! - [`PageBriefError`]: the unified error type
//! - Domain types ([`Session`], [`SessionId`], [`SessionStatus`], [`SessionPatch`])
//! - Configuration ([`AppConfig`] and its sections, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ExtractorConfig, GuardConfig, LlmConfig, RateLimitConfig, ServerConfig,
    StorageConfig, config_dir, config_file_path, expand_home, init_config, load_config,
    load_config_from, validate_api_key,
};
pub use error::{FetchError, PageBriefError, Result};
pub use types::{Session, SessionId, SessionPatch, SessionStatus};
