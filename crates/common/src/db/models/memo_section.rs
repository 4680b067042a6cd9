//! Memo section entity - generation status of one section of one memo

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Section status enum
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

impl SectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SectionStatus::Pending => "pending",
            SectionStatus::Generating => "generating",
            SectionStatus::Completed => "completed",
            SectionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SectionStatus::Completed | SectionStatus::Failed)
    }
}

impl From<String> for SectionStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "generating" => SectionStatus::Generating,
            "completed" => SectionStatus::Completed,
            "failed" => SectionStatus::Failed,
            _ => SectionStatus::Pending,
        }
    }
}

impl From<SectionStatus> for String {
    fn from(status: SectionStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for SectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "memo_sections")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Unique together with `section_type`
    pub memo_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub section_type: String,

    pub order_index: i32,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub content: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub error: Option<String>,

    pub started_at: Option<DateTimeWithTimeZone>,

    pub completed_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn section_status(&self) -> SectionStatus {
        SectionStatus::from(self.status.clone())
    }

    pub fn is_terminal(&self) -> bool {
        self.section_status().is_terminal()
    }

    /// Non-empty content of a completed section
    pub fn completed_content(&self) -> Option<&str> {
        if self.section_status() != SectionStatus::Completed {
            return None;
        }
        self.content.as_deref().filter(|c| !c.trim().is_empty())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::memo::Entity",
        from = "Column::MemoId",
        to = "super::memo::Column::Id",
        on_delete = "Cascade"
    )]
    Memo,
}

impl Related<super::memo::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Memo.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
