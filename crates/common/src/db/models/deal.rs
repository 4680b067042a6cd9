//! Deal entity
//!
//! Only the display fields the memo header needs are mapped here.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "deals")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub company_name: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub stage: Option<String>,

    /// Amounts are whole US dollars
    pub requested_amount: Option<i64>,

    pub valuation: Option<i64>,

    pub allocation: Option<i64>,

    #[sea_orm(column_type = "Text", nullable)]
    pub website: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub pitch_deck_name: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::memo::Entity")]
    Memos,
}

impl Related<super::memo::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Memos.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
