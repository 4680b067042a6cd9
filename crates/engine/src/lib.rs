//! DealMemo Engine
//!
//! The investment memo pipeline:
//! - Section catalog (ten fixed sections with prompts)
//! - Section generator backed by a generative text client
//! - Orchestrator: batched dispatch, per-section retries, stuck recovery, polling
//! - Assembler: ordering, text normalization, citation renumbering, references
//!
//! All state lives behind the [`store`] traits; all time flows through
//! [`dealmemo_common::Clock`].

pub mod assembler;
pub mod citations;
pub mod errors;
pub mod format;
pub mod generator;
pub mod orchestrator;
pub mod sections;
pub mod store;

pub use assembler::{Assembler, FinalDocument};
pub use errors::{MemoError, Result};
pub use generator::{LlmSectionGenerator, SectionGenerator, SectionRequest};
pub use orchestrator::{GenerationInput, GenerationOutcome, Orchestrator, RunReport};
pub use sections::{PromptContext, SectionConfig, SectionType};
pub use store::{InMemoryStore, MemoStore, SectionStore};
