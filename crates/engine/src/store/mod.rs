//! Persistence seam for the memo pipeline
//!
//! The orchestrator, generators and assembler only talk to these traits.
//! [`dealmemo_common::Repository`] backs them with PostgreSQL and
//! [`InMemoryStore`] keeps everything in process.

mod memory;
mod postgres;

pub use memory::InMemoryStore;

use crate::sections::SectionType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealmemo_common::db::models::{Deal, GenerationStatus, Memo, MemoSection};
use dealmemo_common::db::SectionUpdate;
use dealmemo_common::errors::Result;
use uuid::Uuid;

/// Per-(memo, section) status records
#[async_trait]
pub trait SectionStore: Send + Sync {
    /// Create a `pending` record for each section that has none yet
    async fn seed(&self, memo_id: Uuid, sections: &[SectionType]) -> Result<()>;

    /// Write a status change, creating the record if needed
    async fn upsert(&self, memo_id: Uuid, section: SectionType, update: SectionUpdate) -> Result<()>;

    /// All records of a memo ordered by order index
    async fn list_by_memo(&self, memo_id: Uuid) -> Result<Vec<MemoSection>>;

    /// Move records stuck in `generating` since before `cutoff` back to `pending`
    async fn reset_stuck(&self, memo_id: Uuid, cutoff: DateTime<Utc>) -> Result<Vec<MemoSection>>;

    async fn count_completed(&self, memo_id: Uuid) -> Result<u64>;
}

/// Memo and deal records
#[async_trait]
pub trait MemoStore: Send + Sync {
    async fn find_deal(&self, deal_id: Uuid) -> Result<Option<Deal>>;

    async fn find_memo(&self, memo_id: Uuid) -> Result<Option<Memo>>;

    /// Memos of a deal, newest version first
    async fn list_memos(&self, deal_id: Uuid) -> Result<Vec<Memo>>;

    /// Create the next `pending` version for a deal
    async fn create_memo(
        &self,
        deal_id: Uuid,
        title: String,
        created_by: Option<String>,
    ) -> Result<Memo>;

    async fn update_progress(
        &self,
        memo_id: Uuid,
        status: GenerationStatus,
        sections_completed: i32,
    ) -> Result<()>;

    /// Write the completed-section count without touching status
    async fn update_sections_completed(&self, memo_id: Uuid, sections_completed: i32)
        -> Result<()>;

    /// Store the assembled document and mark the memo `completed`
    async fn complete(&self, memo_id: Uuid, content: String, sections_completed: i32)
        -> Result<()>;

    /// Readiness probe
    async fn ping(&self) -> Result<()>;
}
