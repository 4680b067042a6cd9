//! Memo assembly
//!
//! Stitches completed sections into the final markdown document: header
//! callout, table of contents, normalized sections in canonical order, and
//! a references block listing every cited source.

use crate::citations::CitationRegistry;
use crate::errors::{MemoError, Result};
use crate::format;
use crate::sections::SectionType;
use crate::store::{MemoStore, SectionStore};
use chrono::{DateTime, Utc};
use dealmemo_common::db::models::{Deal, Memo, MemoSection};
use dealmemo_common::Clock;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const SECTION_SEPARATOR: &str = "\n\n---\n\n";
const TBD: &str = "TBD";

/// The assembled memo
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalDocument {
    pub content: String,
    /// Sections that contributed a block
    pub sections_included: usize,
    /// Distinct sources cited
    pub citations: usize,
}

pub struct Assembler {
    sections: Arc<dyn SectionStore>,
    memos: Arc<dyn MemoStore>,
    clock: Arc<dyn Clock>,
}

impl Assembler {
    pub fn new(
        sections: Arc<dyn SectionStore>,
        memos: Arc<dyn MemoStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sections,
            memos,
            clock,
        }
    }

    /// Build the document from stored sections and mark the memo completed
    #[instrument(skip(self), fields(memo_id = %memo_id))]
    pub async fn assemble(&self, memo_id: Uuid, sections_completed: i32) -> Result<FinalDocument> {
        let memo = self
            .memos
            .find_memo(memo_id)
            .await?
            .ok_or(MemoError::MemoNotFound(memo_id))?;

        let deal = self.memos.find_deal(memo.deal_id).await?;
        if deal.is_none() {
            warn!(deal_id = %memo.deal_id, "Deal missing, assembling with placeholder header");
        }

        let records = self.sections.list_by_memo(memo_id).await?;
        let document = render(&memo, deal.as_ref(), &records, self.clock.now());

        if document.sections_included == 0 || document.content.trim().is_empty() {
            return Err(MemoError::EmptyDocument(memo_id));
        }

        self.memos
            .complete(memo_id, document.content.clone(), sections_completed)
            .await?;

        info!(
            sections = document.sections_included,
            citations = document.citations,
            bytes = document.content.len(),
            "Memo assembled"
        );
        Ok(document)
    }
}

/// Render the full document. Pure: same inputs, same bytes.
pub fn render(
    memo: &Memo,
    deal: Option<&Deal>,
    records: &[MemoSection],
    now: DateTime<Utc>,
) -> FinalDocument {
    let mut included: Vec<(SectionType, &str)> = records
        .iter()
        .filter_map(|record| {
            let content = record.completed_content()?;
            match SectionType::from_key(&record.section_type) {
                Some(section) => Some((section, content)),
                None => {
                    warn!(section_type = %record.section_type, "Skipping unknown section type");
                    None
                }
            }
        })
        .collect();
    included.sort_by_key(|(section, _)| section.order());

    let mut registry = CitationRegistry::new();
    let blocks: Vec<String> = included
        .iter()
        .map(|(section, content)| {
            let sourced = format::strip_unsourced_citations(content);
            let renumbered = registry.renumber(&sourced);
            let body = format::normalize_section(&renumbered, section.title());
            format!("## {}\n\n{}", section.title(), body)
        })
        .collect();

    let parts = [
        header(memo, deal, now),
        table_of_contents(&included),
        blocks.join(SECTION_SEPARATOR),
        references(deal, &registry, now),
    ];

    let content = format::canonicalize_sup_markers(&parts.join("\n\n"));

    FinalDocument {
        content,
        sections_included: included.len(),
        citations: registry.sources().len(),
    }
}

fn header(memo: &Memo, deal: Option<&Deal>, now: DateTime<Utc>) -> String {
    let company = deal.map_or("Unknown Company", |d| d.company_name.as_str());
    let title = if memo.title.trim().is_empty() {
        format!("Investment Memo: {}", company)
    } else {
        memo.title.trim().to_string()
    };

    let stage = deal.and_then(|d| d.stage.clone()).filter(|s| !s.trim().is_empty());
    let amount = |pick: fn(&Deal) -> Option<i64>| deal.and_then(pick).map(format_currency);

    let fields = [
        ("Company", Some(company.to_string())),
        ("Date", Some(format_date(now))),
        ("Stage", stage),
        ("Requested Amount", amount(|d| d.requested_amount)),
        ("Valuation", amount(|d| d.valuation)),
        ("Allocation", amount(|d| d.allocation)),
    ];

    let callout: Vec<String> = fields
        .into_iter()
        .map(|(label, value)| format!("> - **{}:** {}", label, value.as_deref().unwrap_or(TBD)))
        .collect();

    format!("# {}\n\n{}", title, callout.join("\n"))
}

fn table_of_contents(included: &[(SectionType, &str)]) -> String {
    let lines: Vec<String> = included
        .iter()
        .enumerate()
        .map(|(i, (section, _))| format!("{}. {}", i + 1, section.title()))
        .collect();

    format!("## Table of Contents\n\n{}", lines.join("\n"))
}

fn references(deal: Option<&Deal>, registry: &CitationRegistry, now: DateTime<Utc>) -> String {
    let mut out = String::from("---\n\n## References\n\n### Company Materials\n\n");

    let deck = deal
        .and_then(|d| d.pitch_deck_name.as_deref())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("Company pitch deck");
    out.push_str(&format!("- {} (provided by the company)\n", deck));
    if let Some(website) = deal.and_then(|d| d.website.as_deref()).filter(|s| !s.trim().is_empty()) {
        out.push_str(&format!("- Company website: {}\n", website));
    }

    out.push_str(
        "\n### Research Sources\n\n\
         - Web research on market size, industry trends and comparable companies\n\
         - Public information on the founding team and key hires\n\
         - Competitive intelligence from public filings and industry reports\n",
    );

    if !registry.is_empty() {
        out.push_str("\n### Cited Sources\n\n");
        out.push_str(&registry.definitions());
        out.push('\n');
    }

    out.push_str(
        "\n*Superscript numbers in the text point to the cited sources above. \
         Statements without a marker draw on the company materials and general research.*\n",
    );
    out.push_str(&format!("\n*Analysis date: {}*", format_date(now)));
    out
}

fn format_date(now: DateTime<Utc>) -> String {
    now.format("%B %-d, %Y").to_string()
}

/// `$2.5M`-style rendering of whole dollars
pub fn format_currency(amount: i64) -> String {
    let value = amount as f64;
    let (scaled, suffix) = if amount.abs() >= 1_000_000_000 {
        (value / 1e9, "B")
    } else if amount.abs() >= 1_000_000 {
        (value / 1e6, "M")
    } else if amount.abs() >= 1_000 {
        (value / 1e3, "K")
    } else {
        return format!("${}", amount);
    };

    let rendered = format!("{:.1}", scaled);
    format!("${}{}", rendered.trim_end_matches(".0"), suffix)
}
