//! Section catalog
//!
//! The ten memo sections, their canonical order and titles, and the prompt
//! configuration each section generator runs with.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Shared system instructions prepended to every section's own instructions
const ANALYST_PREAMBLE: &str = "You are a senior venture capital analyst writing one section of an \
investment memo for an investment committee. Write in clear, direct markdown. Use short paragraphs, \
bullet lists for enumerations, and bold labels for sub-headings. Ground claims in the provided deal \
data and analysis, and use the research tools to verify or extend them. Do not repeat the section \
title as a heading. Do not invent figures; say when data is unavailable.";

/// One of the ten fixed memo sections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    ExecutiveSummary,
    CompanyOverview,
    MarketOpportunity,
    ProductTechnology,
    BusinessModel,
    TractionMetrics,
    TeamAssessment,
    CompetitiveLandscape,
    RisksMitigations,
    Recommendation,
}

impl SectionType {
    /// Every section in canonical order
    pub const ALL: [SectionType; 10] = [
        SectionType::ExecutiveSummary,
        SectionType::CompanyOverview,
        SectionType::MarketOpportunity,
        SectionType::ProductTechnology,
        SectionType::BusinessModel,
        SectionType::TractionMetrics,
        SectionType::TeamAssessment,
        SectionType::CompetitiveLandscape,
        SectionType::RisksMitigations,
        SectionType::Recommendation,
    ];

    /// Total number of sections in a memo
    pub const COUNT: usize = Self::ALL.len();

    /// Storage key
    pub fn key(&self) -> &'static str {
        match self {
            SectionType::ExecutiveSummary => "executive_summary",
            SectionType::CompanyOverview => "company_overview",
            SectionType::MarketOpportunity => "market_opportunity",
            SectionType::ProductTechnology => "product_technology",
            SectionType::BusinessModel => "business_model",
            SectionType::TractionMetrics => "traction_metrics",
            SectionType::TeamAssessment => "team_assessment",
            SectionType::CompetitiveLandscape => "competitive_landscape",
            SectionType::RisksMitigations => "risks_mitigations",
            SectionType::Recommendation => "recommendation",
        }
    }

    /// Canonical 1-based position in the memo
    pub fn order(&self) -> i32 {
        match self {
            SectionType::ExecutiveSummary => 1,
            SectionType::CompanyOverview => 2,
            SectionType::MarketOpportunity => 3,
            SectionType::ProductTechnology => 4,
            SectionType::BusinessModel => 5,
            SectionType::TractionMetrics => 6,
            SectionType::TeamAssessment => 7,
            SectionType::CompetitiveLandscape => 8,
            SectionType::RisksMitigations => 9,
            SectionType::Recommendation => 10,
        }
    }

    /// Heading used in the assembled memo
    pub fn title(&self) -> &'static str {
        match self {
            SectionType::ExecutiveSummary => "Executive Summary",
            SectionType::CompanyOverview => "Company Overview",
            SectionType::MarketOpportunity => "Market Opportunity",
            SectionType::ProductTechnology => "Product & Technology",
            SectionType::BusinessModel => "Business Model",
            SectionType::TractionMetrics => "Traction & Metrics",
            SectionType::TeamAssessment => "Team Assessment",
            SectionType::CompetitiveLandscape => "Competitive Landscape",
            SectionType::RisksMitigations => "Risks & Mitigations",
            SectionType::Recommendation => "Recommendation",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.key() == key)
    }

    /// Prompt configuration for this section
    pub fn config(&self) -> SectionConfig {
        let (instructions, focus, max_tokens) = match self {
            SectionType::ExecutiveSummary => (
                "Summarize the investment opportunity in four to six paragraphs: what the company \
                does, why now, the key strengths, the main concerns and the proposed terms.",
                "Write the executive summary. Lead with the thesis, then the evidence for it.",
                1_500,
            ),
            SectionType::CompanyOverview => (
                "Describe the company factually: founding, headquarters, mission, stage, funding \
                history and what it sells to whom.",
                "Write the company overview.",
                2_000,
            ),
            SectionType::MarketOpportunity => (
                "Size the market with TAM, SAM and SOM where defensible, cite growth rates, and \
                explain the tailwinds that make the timing attractive.",
                "Write the market opportunity analysis with sourced market figures.",
                2_500,
            ),
            SectionType::ProductTechnology => (
                "Explain the product, how it works, what is technically differentiated and how \
                defensible it is. Note the roadmap and technical risks.",
                "Write the product and technology assessment.",
                2_000,
            ),
            SectionType::BusinessModel => (
                "Explain how the company makes money: pricing, revenue streams, unit economics, \
                sales motion and gross margin profile.",
                "Write the business model analysis.",
                2_000,
            ),
            SectionType::TractionMetrics => (
                "Report traction with concrete metrics: revenue, growth, customers, retention, \
                pipeline. Compare against stage benchmarks.",
                "Write the traction and metrics section. Prefer numbers over adjectives.",
                2_000,
            ),
            SectionType::TeamAssessment => (
                "Assess the founders and key hires: relevant experience, prior outcomes, \
                founder-market fit and gaps in the team.",
                "Write the team assessment.",
                2_000,
            ),
            SectionType::CompetitiveLandscape => (
                "Map direct and indirect competitors, their funding and positioning, and explain \
                where this company wins and loses.",
                "Write the competitive landscape analysis.",
                2_500,
            ),
            SectionType::RisksMitigations => (
                "List the material risks (market, execution, technical, financial, regulatory) \
                each with a concrete mitigation.",
                "Write the risks and mitigations section as labelled risk/mitigation pairs.",
                2_000,
            ),
            SectionType::Recommendation => (
                "Give a clear invest or pass recommendation with the reasoning, proposed terms, \
                conditions and the key diligence items still open.",
                "Write the investment recommendation.",
                1_500,
            ),
        };

        SectionConfig {
            section: *self,
            instructions,
            focus,
            max_tokens,
        }
    }
}

impl fmt::Display for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Deal attributes and prior analysis results passed to every section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptContext {
    pub deal: Value,
    pub analysis: Value,
}

impl PromptContext {
    pub fn new(deal: Value, analysis: Value) -> Self {
        Self { deal, analysis }
    }

    /// Company display name from whichever field the caller used
    pub fn company_name(&self) -> &str {
        ["company_name", "companyName", "name"]
            .iter()
            .find_map(|k| self.deal.get(*k).and_then(Value::as_str))
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("the company")
    }
}

/// Prompt configuration for one section
#[derive(Debug, Clone, Copy)]
pub struct SectionConfig {
    pub section: SectionType,
    instructions: &'static str,
    focus: &'static str,
    pub max_tokens: u32,
}

impl SectionConfig {
    /// Fixed system instructions
    pub fn system_instructions(&self) -> String {
        format!("{}\n\n{}", ANALYST_PREAMBLE, self.instructions)
    }

    /// Render the user prompt from deal and analysis context.
    ///
    /// The first line always names the section and company.
    pub fn render_prompt(&self, context: &PromptContext) -> String {
        let mut prompt = format!(
            "{} for {}\n\n{}\n",
            self.section.title(),
            context.company_name(),
            self.focus
        );

        prompt.push_str("\n## Deal\n\n");
        prompt.push_str(&render_json(&context.deal));

        if !context.analysis.is_null() {
            prompt.push_str("\n\n## Prior Analysis\n\n");
            prompt.push_str(&render_json(&context.analysis));
        }

        prompt
    }
}

fn render_json(value: &Value) -> String {
    match value {
        Value::Null => "Not provided".to_string(),
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}
