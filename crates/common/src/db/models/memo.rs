//! Memo entity - one generated investment memo for one deal

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Overall generation status of a memo
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

impl GenerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Pending => "pending",
            GenerationStatus::Generating => "generating",
            GenerationStatus::Completed => "completed",
            GenerationStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationStatus::Completed | GenerationStatus::Failed)
    }

    /// Whether a memo may move from `self` to `to`.
    ///
    /// Terminal memos never change again; regeneration creates a new version.
    pub fn can_transition(&self, to: GenerationStatus) -> bool {
        use GenerationStatus::*;
        match (self, to) {
            (Pending, Generating) | (Pending, Failed) => true,
            (Generating, Generating) | (Generating, Completed) | (Generating, Failed) => true,
            _ => false,
        }
    }
}

impl From<String> for GenerationStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "generating" => GenerationStatus::Generating,
            "completed" => GenerationStatus::Completed,
            "failed" => GenerationStatus::Failed,
            _ => GenerationStatus::Pending,
        }
    }
}

impl From<GenerationStatus> for String {
    fn from(status: GenerationStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "memos")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub deal_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub title: String,

    /// Assembled markdown; empty until the memo completes
    #[sea_orm(column_type = "Text")]
    pub content: String,

    #[sea_orm(column_type = "Text")]
    pub generation_status: String,

    pub sections_completed: i32,

    pub version: i32,

    #[sea_orm(column_type = "Text", nullable)]
    pub created_by: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Get the generation status as an enum
    pub fn status(&self) -> GenerationStatus {
        GenerationStatus::from(self.generation_status.clone())
    }

    /// Check if the memo is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::deal::Entity",
        from = "Column::DealId",
        to = "super::deal::Column::Id"
    )]
    Deal,

    #[sea_orm(has_many = "super::memo_section::Entity", on_delete = "Cascade")]
    Sections,
}

impl Related<super::deal::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Deal.def()
    }
}

impl Related<super::memo_section::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sections.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
