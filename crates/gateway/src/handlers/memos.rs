//! Memo handlers: versions, reads, and the generation trigger

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use dealmemo_common::{
    db::models::{Memo, MemoSection},
    errors::{AppError, Result},
    metrics::RequestMetrics,
};
use dealmemo_engine::{GenerationInput, GenerationOutcome, PromptContext, SectionType};

/// Request to create a new memo version
#[derive(Debug, Default, Deserialize, Validate)]
pub struct CreateMemoRequest {
    #[validate(length(min = 1, max = 500))]
    pub title: Option<String>,

    #[validate(length(min = 1, max = 320))]
    pub created_by: Option<String>,
}

/// Trigger body for a generation run
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub deal_context: Value,

    #[serde(default)]
    pub analysis_context: Value,

    #[validate(length(min = 1, max = 200))]
    pub document_index_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub success: bool,
    pub sections_processed: usize,
    pub completed_count: usize,
}

#[derive(Serialize)]
pub struct MemoResponse {
    pub id: Uuid,
    pub deal_id: Uuid,
    pub title: String,
    pub generation_status: String,
    pub sections_completed: i32,
    pub total_sections: usize,
    pub version: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl MemoResponse {
    fn from_memo(memo: Memo, with_content: bool) -> Self {
        Self {
            id: memo.id,
            deal_id: memo.deal_id,
            title: memo.title,
            generation_status: memo.generation_status,
            sections_completed: memo.sections_completed,
            total_sections: SectionType::COUNT,
            version: memo.version,
            content: with_content.then_some(memo.content),
            created_by: memo.created_by,
            created_at: memo.created_at.to_rfc3339(),
            updated_at: memo.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct SectionResponse {
    pub section_type: String,
    pub title: Option<&'static str>,
    pub order_index: i32,
    pub status: String,
    pub content: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl From<MemoSection> for SectionResponse {
    fn from(section: MemoSection) -> Self {
        Self {
            title: SectionType::from_key(&section.section_type).map(|s| s.title()),
            section_type: section.section_type,
            order_index: section.order_index,
            status: section.status,
            content: section.content,
            error: section.error,
            started_at: section.started_at.map(|t| t.to_rfc3339()),
            completed_at: section.completed_at.map(|t| t.to_rfc3339()),
        }
    }
}

fn validation_error(e: validator::ValidationErrors) -> AppError {
    AppError::Validation {
        message: e.to_string(),
        field: None,
    }
}

/// Create the next memo version for a deal
pub async fn create_memo(
    State(state): State<AppState>,
    Path(deal_id): Path<Uuid>,
    Json(request): Json<CreateMemoRequest>,
) -> Result<(StatusCode, Json<MemoResponse>)> {
    request.validate().map_err(validation_error)?;

    let deal = state
        .memos
        .find_deal(deal_id)
        .await?
        .ok_or_else(|| AppError::DealNotFound { id: deal_id.to_string() })?;

    let title = request
        .title
        .unwrap_or_else(|| format!("Investment Memo: {}", deal.company_name));

    let memo = state
        .memos
        .create_memo(deal_id, title, request.created_by)
        .await?;

    tracing::info!(
        memo_id = %memo.id,
        deal_id = %deal_id,
        version = memo.version,
        "Memo created"
    );

    Ok((StatusCode::CREATED, Json(MemoResponse::from_memo(memo, false))))
}

/// List memo versions for a deal, newest first
pub async fn list_memos(
    State(state): State<AppState>,
    Path(deal_id): Path<Uuid>,
) -> Result<Json<Vec<MemoResponse>>> {
    if state.memos.find_deal(deal_id).await?.is_none() {
        return Err(AppError::DealNotFound { id: deal_id.to_string() });
    }

    let memos = state.memos.list_memos(deal_id).await?;

    Ok(Json(
        memos
            .into_iter()
            .map(|m| MemoResponse::from_memo(m, false))
            .collect(),
    ))
}

/// Get a memo with its assembled content
pub async fn get_memo(
    State(state): State<AppState>,
    Path(memo_id): Path<Uuid>,
) -> Result<Json<MemoResponse>> {
    let memo = state
        .memos
        .find_memo(memo_id)
        .await?
        .ok_or_else(|| AppError::MemoNotFound { id: memo_id.to_string() })?;

    Ok(Json(MemoResponse::from_memo(memo, true)))
}

/// Per-section status trail for a memo
pub async fn list_sections(
    State(state): State<AppState>,
    Path(memo_id): Path<Uuid>,
) -> Result<Json<Vec<SectionResponse>>> {
    if state.memos.find_memo(memo_id).await?.is_none() {
        return Err(AppError::MemoNotFound { id: memo_id.to_string() });
    }

    let sections = state.sections.list_by_memo(memo_id).await?;

    Ok(Json(sections.into_iter().map(SectionResponse::from).collect()))
}

/// Run section generation for a memo and wait for the outcome
pub async fn generate(
    State(state): State<AppState>,
    Path(memo_id): Path<Uuid>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>> {
    let metrics = RequestMetrics::start("POST", "/v1/memos/{id}/generate");
    request.validate().map_err(validation_error)?;

    if state.memos.find_memo(memo_id).await?.is_none() {
        return Err(AppError::MemoNotFound { id: memo_id.to_string() });
    }

    let input = GenerationInput {
        memo_id,
        context: PromptContext::new(request.deal_context, request.analysis_context),
        document_index_id: request.document_index_id,
    };

    // detached from the request: a dropped connection does not cancel the run
    let orchestrator = state.orchestrator.clone();
    let run = tokio::spawn(async move { orchestrator.run_generation(input).await });

    let report = match run.await {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => {
            metrics.finish(500);
            return Err(AppError::Internal { message: e.to_string() });
        }
        Err(e) => {
            metrics.finish(500);
            tracing::error!(memo_id = %memo_id, error = %e, "Generation task aborted");
            return Err(AppError::Internal {
                message: format!("Generation task aborted: {}", e),
            });
        }
    };

    tracing::info!(
        memo_id = %memo_id,
        outcome = report.outcome.as_str(),
        sections_processed = report.sections_processed,
        completed_count = report.completed_count,
        "Generation run finished"
    );
    metrics.finish(200);

    Ok(Json(GenerateResponse {
        success: report.outcome == GenerationOutcome::Completed,
        sections_processed: report.sections_processed,
        completed_count: report.completed_count,
    }))
}
