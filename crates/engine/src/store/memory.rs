//! In-process store for local runs and tests

use super::{MemoStore, SectionStore};
use crate::sections::SectionType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealmemo_common::db::models::{Deal, GenerationStatus, Memo, MemoSection, SectionStatus};
use dealmemo_common::db::{SectionUpdate, STUCK_RESET_ERROR};
use dealmemo_common::errors::{AppError, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    deals: HashMap<Uuid, Deal>,
    memos: HashMap<Uuid, Memo>,
    sections: HashMap<(Uuid, String), MemoSection>,
}

/// Mutex-guarded maps implementing both store traits
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a deal
    pub fn insert_deal(&self, deal: Deal) {
        self.lock().deals.insert(deal.id, deal);
    }

    /// Insert or replace a memo row as-is
    pub fn insert_memo(&self, memo: Memo) {
        self.lock().memos.insert(memo.id, memo);
    }

    /// Insert or replace a section row as-is
    pub fn insert_section(&self, section: MemoSection) {
        let key = (section.memo_id, section.section_type.clone());
        self.lock().sections.insert(key, section);
    }

    fn sorted_sections(tables: &Tables, memo_id: Uuid) -> Vec<MemoSection> {
        let mut rows: Vec<MemoSection> = tables
            .sections
            .values()
            .filter(|s| s.memo_id == memo_id)
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.order_index);
        rows
    }

    fn memo_mut(tables: &mut Tables, memo_id: Uuid) -> Result<&mut Memo> {
        tables
            .memos
            .get_mut(&memo_id)
            .ok_or_else(|| AppError::MemoNotFound { id: memo_id.to_string() })
    }
}

fn pending_row(memo_id: Uuid, section: SectionType, now: DateTime<Utc>) -> MemoSection {
    MemoSection {
        id: Uuid::new_v4(),
        memo_id,
        section_type: section.key().to_string(),
        order_index: section.order(),
        status: SectionStatus::Pending.into(),
        content: None,
        error: None,
        started_at: None,
        completed_at: None,
        created_at: now.into(),
        updated_at: now.into(),
    }
}

#[async_trait]
impl SectionStore for InMemoryStore {
    async fn seed(&self, memo_id: Uuid, sections: &[SectionType]) -> Result<()> {
        let now = Utc::now();
        let mut tables = self.lock();
        for section in sections {
            tables
                .sections
                .entry((memo_id, section.key().to_string()))
                .or_insert_with(|| pending_row(memo_id, *section, now));
        }
        Ok(())
    }

    async fn upsert(&self, memo_id: Uuid, section: SectionType, update: SectionUpdate) -> Result<()> {
        let now = Utc::now();
        let mut tables = self.lock();
        let row = tables
            .sections
            .entry((memo_id, section.key().to_string()))
            .or_insert_with(|| pending_row(memo_id, section, now));

        row.status = update.status.into();
        row.content = update.content;
        row.error = update.error;
        row.completed_at = update.completed_at.map(Into::into);
        if let Some(started_at) = update.started_at {
            row.started_at = Some(started_at.into());
        }
        row.updated_at = now.into();
        Ok(())
    }

    async fn list_by_memo(&self, memo_id: Uuid) -> Result<Vec<MemoSection>> {
        Ok(Self::sorted_sections(&self.lock(), memo_id))
    }

    async fn reset_stuck(&self, memo_id: Uuid, cutoff: DateTime<Utc>) -> Result<Vec<MemoSection>> {
        let now = Utc::now();
        let mut tables = self.lock();
        let mut reset = Vec::new();

        for row in tables.sections.values_mut() {
            let stale = row
                .started_at
                .map_or(true, |started| started.with_timezone(&Utc) < cutoff);
            if row.memo_id != memo_id || row.section_status() != SectionStatus::Generating || !stale {
                continue;
            }

            row.status = SectionStatus::Pending.into();
            row.started_at = None;
            row.error = Some(STUCK_RESET_ERROR.to_string());
            row.updated_at = now.into();
            reset.push(row.clone());
        }

        reset.sort_by_key(|s| s.order_index);
        Ok(reset)
    }

    async fn count_completed(&self, memo_id: Uuid) -> Result<u64> {
        let tables = self.lock();
        let count = tables
            .sections
            .values()
            .filter(|s| s.memo_id == memo_id && s.section_status() == SectionStatus::Completed)
            .count();
        Ok(count as u64)
    }
}

#[async_trait]
impl MemoStore for InMemoryStore {
    async fn find_deal(&self, deal_id: Uuid) -> Result<Option<Deal>> {
        Ok(self.lock().deals.get(&deal_id).cloned())
    }

    async fn find_memo(&self, memo_id: Uuid) -> Result<Option<Memo>> {
        Ok(self.lock().memos.get(&memo_id).cloned())
    }

    async fn list_memos(&self, deal_id: Uuid) -> Result<Vec<Memo>> {
        let tables = self.lock();
        let mut memos: Vec<Memo> = tables
            .memos
            .values()
            .filter(|m| m.deal_id == deal_id)
            .cloned()
            .collect();
        memos.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(memos)
    }

    async fn create_memo(
        &self,
        deal_id: Uuid,
        title: String,
        created_by: Option<String>,
    ) -> Result<Memo> {
        let mut tables = self.lock();
        if !tables.deals.contains_key(&deal_id) {
            return Err(AppError::DealNotFound { id: deal_id.to_string() });
        }

        let version = tables
            .memos
            .values()
            .filter(|m| m.deal_id == deal_id)
            .map(|m| m.version)
            .max()
            .unwrap_or(0)
            + 1;
        let now = Utc::now();

        let memo = Memo {
            id: Uuid::new_v4(),
            deal_id,
            title,
            content: String::new(),
            generation_status: GenerationStatus::Pending.into(),
            sections_completed: 0,
            version,
            created_by,
            created_at: now.into(),
            updated_at: now.into(),
        };
        tables.memos.insert(memo.id, memo.clone());
        Ok(memo)
    }

    async fn update_progress(
        &self,
        memo_id: Uuid,
        status: GenerationStatus,
        sections_completed: i32,
    ) -> Result<()> {
        let mut tables = self.lock();
        let memo = Self::memo_mut(&mut tables, memo_id)?;
        memo.generation_status = status.into();
        memo.sections_completed = sections_completed;
        memo.updated_at = Utc::now().into();
        Ok(())
    }

    async fn update_sections_completed(&self, memo_id: Uuid, sections_completed: i32) -> Result<()> {
        let mut tables = self.lock();
        let memo = Self::memo_mut(&mut tables, memo_id)?;
        memo.sections_completed = sections_completed;
        memo.updated_at = Utc::now().into();
        Ok(())
    }

    async fn complete(&self, memo_id: Uuid, content: String, sections_completed: i32) -> Result<()> {
        let mut tables = self.lock();
        let memo = Self::memo_mut(&mut tables, memo_id)?;
        memo.content = content;
        memo.generation_status = GenerationStatus::Completed.into();
        memo.sections_completed = sections_completed;
        memo.updated_at = Utc::now().into();
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
