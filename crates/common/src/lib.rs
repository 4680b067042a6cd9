//! DealMemo Common Library
//!
//! Shared code for the DealMemo services including:
//! - Database models and repository patterns
//! - Generative text client abstraction
//! - Error types and handling
//! - Configuration management
//! - Injectable clock for time-dependent logic
//! - Metrics and observability

pub mod clock;
pub mod config;
pub mod db;
pub mod errors;
pub mod llm;
pub mod metrics;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use db::{DbPool, Repository};
pub use errors::{AppError, Result};
pub use llm::GenerativeClient;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default generative model
pub const DEFAULT_LLM_MODEL: &str = "gpt-4.1";
