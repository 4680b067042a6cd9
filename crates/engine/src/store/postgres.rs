use super::{MemoStore, SectionStore};
use crate::sections::SectionType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealmemo_common::db::models::{Deal, GenerationStatus, Memo, MemoSection};
use dealmemo_common::db::SectionUpdate;
use dealmemo_common::errors::Result;
use dealmemo_common::Repository;
use uuid::Uuid;

#[async_trait]
impl SectionStore for Repository {
    async fn seed(&self, memo_id: Uuid, sections: &[SectionType]) -> Result<()> {
        let rows: Vec<(&str, i32)> = sections.iter().map(|s| (s.key(), s.order())).collect();
        self.seed_memo_sections(memo_id, &rows).await
    }

    async fn upsert(&self, memo_id: Uuid, section: SectionType, update: SectionUpdate) -> Result<()> {
        self.upsert_memo_section(memo_id, section.key(), section.order(), update)
            .await
    }

    async fn list_by_memo(&self, memo_id: Uuid) -> Result<Vec<MemoSection>> {
        self.list_memo_sections(memo_id).await
    }

    async fn reset_stuck(&self, memo_id: Uuid, cutoff: DateTime<Utc>) -> Result<Vec<MemoSection>> {
        self.reset_stuck_memo_sections(memo_id, cutoff).await
    }

    async fn count_completed(&self, memo_id: Uuid) -> Result<u64> {
        self.count_completed_sections(memo_id).await
    }
}

#[async_trait]
impl MemoStore for Repository {
    async fn find_deal(&self, deal_id: Uuid) -> Result<Option<Deal>> {
        self.find_deal_by_id(deal_id).await
    }

    async fn find_memo(&self, memo_id: Uuid) -> Result<Option<Memo>> {
        self.find_memo_by_id(memo_id).await
    }

    async fn list_memos(&self, deal_id: Uuid) -> Result<Vec<Memo>> {
        self.list_memos_by_deal(deal_id).await
    }

    async fn create_memo(
        &self,
        deal_id: Uuid,
        title: String,
        created_by: Option<String>,
    ) -> Result<Memo> {
        Repository::create_memo(self, deal_id, title, created_by).await
    }

    async fn update_progress(
        &self,
        memo_id: Uuid,
        status: GenerationStatus,
        sections_completed: i32,
    ) -> Result<()> {
        self.update_memo_progress(memo_id, status, sections_completed)
            .await
            .map(|_| ())
    }

    async fn update_sections_completed(&self, memo_id: Uuid, sections_completed: i32) -> Result<()> {
        Repository::update_sections_completed(self, memo_id, sections_completed).await
    }

    async fn complete(&self, memo_id: Uuid, content: String, sections_completed: i32) -> Result<()> {
        self.complete_memo(memo_id, content, sections_completed)
            .await
            .map(|_| ())
    }

    async fn ping(&self) -> Result<()> {
        Repository::ping(self).await
    }
}
