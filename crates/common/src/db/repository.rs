//! Repository pattern for database operations
//!
//! Provides a clean interface for all data access operations
//! with proper error handling.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

/// Error recorded on sections reclaimed from a crashed run
pub const STUCK_RESET_ERROR: &str = "Reset due to timeout";

/// One status write against a memo section.
///
/// `status`, `content`, `error` and `completed_at` are always written.
/// `started_at` is only written when it is `Some`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionUpdate {
    pub status: SectionStatus,
    pub content: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SectionUpdate {
    /// Section picked up by a generator
    pub fn generating(now: DateTime<Utc>) -> Self {
        Self {
            status: SectionStatus::Generating,
            content: None,
            error: None,
            started_at: Some(now),
            completed_at: None,
        }
    }

    /// Section produced content
    pub fn completed(content: String, now: DateTime<Utc>) -> Self {
        Self {
            status: SectionStatus::Completed,
            content: Some(content),
            error: None,
            started_at: None,
            completed_at: Some(now),
        }
    }

    /// Section gave up
    pub fn failed(error: String, now: DateTime<Utc>) -> Self {
        Self {
            status: SectionStatus::Failed,
            content: None,
            error: Some(error),
            started_at: None,
            completed_at: Some(now),
        }
    }
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Deal Operations
    // ========================================================================

    /// Find deal by ID
    pub async fn find_deal_by_id(&self, id: Uuid) -> Result<Option<Deal>> {
        DealEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Memo Operations
    // ========================================================================

    /// Create the next memo version for a deal in `pending`
    pub async fn create_memo(
        &self,
        deal_id: Uuid,
        title: String,
        created_by: Option<String>,
    ) -> Result<Memo> {
        let latest = MemoEntity::find()
            .filter(MemoColumn::DealId.eq(deal_id))
            .order_by_desc(MemoColumn::Version)
            .one(self.write_conn())
            .await?;
        let version = latest.map(|m| m.version + 1).unwrap_or(1);
        let now = Utc::now();

        let memo = MemoActiveModel {
            id: Set(Uuid::new_v4()),
            deal_id: Set(deal_id),
            title: Set(title),
            content: Set(String::new()),
            generation_status: Set(GenerationStatus::Pending.into()),
            sections_completed: Set(0),
            version: Set(version),
            created_by: Set(created_by),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        memo.insert(self.write_conn()).await.map_err(Into::into)
    }

    /// Find memo by ID
    pub async fn find_memo_by_id(&self, id: Uuid) -> Result<Option<Memo>> {
        MemoEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// List memos for a deal, newest version first
    pub async fn list_memos_by_deal(&self, deal_id: Uuid) -> Result<Vec<Memo>> {
        MemoEntity::find()
            .filter(MemoColumn::DealId.eq(deal_id))
            .order_by_desc(MemoColumn::Version)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Update memo status and completed-section count
    pub async fn update_memo_progress(
        &self,
        memo_id: Uuid,
        status: GenerationStatus,
        sections_completed: i32,
    ) -> Result<Memo> {
        let mut memo: MemoActiveModel = MemoEntity::find_by_id(memo_id)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::MemoNotFound { id: memo_id.to_string() })?
            .into();

        memo.generation_status = Set(status.into());
        memo.sections_completed = Set(sections_completed);
        memo.updated_at = Set(Utc::now().into());

        memo.update(self.write_conn()).await.map_err(Into::into)
    }

    /// Write only the completed-section count, leaving status untouched
    pub async fn update_sections_completed(
        &self,
        memo_id: Uuid,
        sections_completed: i32,
    ) -> Result<()> {
        MemoEntity::update_many()
            .col_expr(MemoColumn::SectionsCompleted, Expr::value(sections_completed))
            .col_expr(MemoColumn::UpdatedAt, Expr::current_timestamp().into())
            .filter(MemoColumn::Id.eq(memo_id))
            .exec(self.write_conn())
            .await?;
        Ok(())
    }

    /// Store the assembled document and mark the memo completed
    pub async fn complete_memo(
        &self,
        memo_id: Uuid,
        content: String,
        sections_completed: i32,
    ) -> Result<Memo> {
        let mut memo: MemoActiveModel = MemoEntity::find_by_id(memo_id)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::MemoNotFound { id: memo_id.to_string() })?
            .into();

        memo.content = Set(content);
        memo.generation_status = Set(GenerationStatus::Completed.into());
        memo.sections_completed = Set(sections_completed);
        memo.updated_at = Set(Utc::now().into());

        memo.update(self.write_conn()).await.map_err(Into::into)
    }

    // ========================================================================
    // Memo Section Operations
    // ========================================================================

    /// Insert a `pending` row for every (section_type, order_index) not yet present.
    ///
    /// Existing rows are left untouched.
    pub async fn seed_memo_sections(
        &self,
        memo_id: Uuid,
        sections: &[(&str, i32)],
    ) -> Result<()> {
        if sections.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let rows = sections.iter().map(|(section_type, order_index)| {
            MemoSectionActiveModel {
                id: Set(Uuid::new_v4()),
                memo_id: Set(memo_id),
                section_type: Set(section_type.to_string()),
                order_index: Set(*order_index),
                status: Set(SectionStatus::Pending.into()),
                content: Set(None),
                error: Set(None),
                started_at: Set(None),
                completed_at: Set(None),
                created_at: Set(now.into()),
                updated_at: Set(now.into()),
            }
        });

        MemoSectionEntity::insert_many(rows)
            .on_conflict(
                OnConflict::columns([MemoSectionColumn::MemoId, MemoSectionColumn::SectionType])
                    .do_nothing()
                    .to_owned(),
            )
            .do_nothing()
            .exec(self.write_conn())
            .await?;

        Ok(())
    }

    /// Upsert a section keyed on (memo_id, section_type)
    pub async fn upsert_memo_section(
        &self,
        memo_id: Uuid,
        section_type: &str,
        order_index: i32,
        update: SectionUpdate,
    ) -> Result<()> {
        let now = Utc::now();

        let mut update_columns = vec![
            MemoSectionColumn::Status,
            MemoSectionColumn::Content,
            MemoSectionColumn::Error,
            MemoSectionColumn::CompletedAt,
            MemoSectionColumn::UpdatedAt,
        ];
        if update.started_at.is_some() {
            update_columns.push(MemoSectionColumn::StartedAt);
        }

        let row = MemoSectionActiveModel {
            id: Set(Uuid::new_v4()),
            memo_id: Set(memo_id),
            section_type: Set(section_type.to_string()),
            order_index: Set(order_index),
            status: Set(update.status.into()),
            content: Set(update.content),
            error: Set(update.error),
            started_at: Set(update.started_at.map(Into::into)),
            completed_at: Set(update.completed_at.map(Into::into)),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        MemoSectionEntity::insert(row)
            .on_conflict(
                OnConflict::columns([MemoSectionColumn::MemoId, MemoSectionColumn::SectionType])
                    .update_columns(update_columns)
                    .to_owned(),
            )
            .exec_without_returning(self.write_conn())
            .await?;

        Ok(())
    }

    /// All sections of a memo in canonical order
    pub async fn list_memo_sections(&self, memo_id: Uuid) -> Result<Vec<MemoSection>> {
        MemoSectionEntity::find()
            .filter(MemoSectionColumn::MemoId.eq(memo_id))
            .order_by_asc(MemoSectionColumn::OrderIndex)
            // primary: pollers must see writes from concurrent generators
            .all(self.write_conn())
            .await
            .map_err(Into::into)
    }

    /// Reset sections stuck in `generating` since before `cutoff` back to `pending`.
    ///
    /// Returns the rows that were reset.
    pub async fn reset_stuck_memo_sections(
        &self,
        memo_id: Uuid,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MemoSection>> {
        let stuck = MemoSectionEntity::find()
            .filter(MemoSectionColumn::MemoId.eq(memo_id))
            .filter(MemoSectionColumn::Status.eq(SectionStatus::Generating.as_str()))
            .filter(
                Condition::any()
                    .add(MemoSectionColumn::StartedAt.lt(cutoff))
                    .add(MemoSectionColumn::StartedAt.is_null()),
            )
            .all(self.write_conn())
            .await?;

        if stuck.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = stuck.iter().map(|s| s.id).collect();

        MemoSectionEntity::update_many()
            .col_expr(MemoSectionColumn::Status, Expr::value(SectionStatus::Pending.as_str()))
            .col_expr(MemoSectionColumn::StartedAt, Expr::cust("NULL"))
            .col_expr(MemoSectionColumn::Error, Expr::value(STUCK_RESET_ERROR))
            .col_expr(MemoSectionColumn::UpdatedAt, Expr::current_timestamp().into())
            .filter(MemoSectionColumn::Id.is_in(ids.clone()))
            // a generator may have finished between the read and this write
            .filter(MemoSectionColumn::Status.eq(SectionStatus::Generating.as_str()))
            .exec(self.write_conn())
            .await?;

        MemoSectionEntity::find()
            .filter(MemoSectionColumn::Id.is_in(ids))
            .filter(MemoSectionColumn::Status.eq(SectionStatus::Pending.as_str()))
            .order_by_asc(MemoSectionColumn::OrderIndex)
            .all(self.write_conn())
            .await
            .map_err(Into::into)
    }

    /// Number of completed sections for a memo
    pub async fn count_completed_sections(&self, memo_id: Uuid) -> Result<u64> {
        MemoSectionEntity::find()
            .filter(MemoSectionColumn::MemoId.eq(memo_id))
            .filter(MemoSectionColumn::Status.eq(SectionStatus::Completed.as_str()))
            .count(self.read_conn())
            .await
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generating_update_stamps_start_only() {
        let now = Utc::now();
        let update = SectionUpdate::generating(now);
        assert_eq!(update.status, SectionStatus::Generating);
        assert_eq!(update.started_at, Some(now));
        assert!(update.completed_at.is_none());
        assert!(update.error.is_none());
    }

    #[test]
    fn test_terminal_updates_keep_invariants() {
        let now = Utc::now();

        let done = SectionUpdate::completed("body".into(), now);
        assert_eq!(done.content.as_deref(), Some("body"));
        assert!(done.error.is_none());
        assert!(done.started_at.is_none());

        let failed = SectionUpdate::failed("boom".into(), now);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert_eq!(failed.completed_at, Some(now));
    }
}
