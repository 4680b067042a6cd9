//! SeaORM entity models
//!
//! Database entities for DealMemo

mod deal;
mod memo;
mod memo_section;

pub use deal::{
    Entity as DealEntity,
    Model as Deal,
    ActiveModel as DealActiveModel,
    Column as DealColumn,
};

pub use memo::{
    Entity as MemoEntity,
    Model as Memo,
    ActiveModel as MemoActiveModel,
    Column as MemoColumn,
    GenerationStatus,
};

pub use memo_section::{
    Entity as MemoSectionEntity,
    Model as MemoSection,
    ActiveModel as MemoSectionActiveModel,
    Column as MemoSectionColumn,
    SectionStatus,
};
