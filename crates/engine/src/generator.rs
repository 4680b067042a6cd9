//! Section generator
//!
//! Produces the content of one memo section with a generative text client
//! and records every status change in the [`SectionStore`]. Generators never
//! retry; the orchestrator owns the retry budget.

use crate::citations;
use crate::errors::{MemoError, Result};
use crate::sections::{PromptContext, SectionType};
use crate::store::{MemoStore, SectionStore};
use async_trait::async_trait;
use dealmemo_common::db::SectionUpdate;
use dealmemo_common::llm::{GenerationRequest, GenerativeClient, Tool};
use dealmemo_common::{metrics, Clock};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Everything a generator needs for one section of one memo
#[derive(Debug, Clone)]
pub struct SectionRequest {
    pub memo_id: Uuid,
    pub section: SectionType,
    pub context: Arc<PromptContext>,
    /// Semantic index over the deal's uploaded documents
    pub document_index_id: Option<String>,
}

impl SectionRequest {
    /// Research tools for this request
    pub fn tools(&self) -> Vec<Tool> {
        let mut tools = vec![Tool::WebSearch];
        if let Some(index_id) = &self.document_index_id {
            tools.push(Tool::DocumentSearch {
                index_id: index_id.clone(),
            });
        }
        tools
    }
}

/// Generates and stores one section
#[async_trait]
pub trait SectionGenerator: Send + Sync {
    /// Generate the section and record its terminal status.
    ///
    /// Returns an error when the section ended `failed` or its first status
    /// write did not go through.
    async fn generate(&self, request: &SectionRequest) -> Result<()>;
}

/// [`SectionGenerator`] backed by a [`GenerativeClient`]
pub struct LlmSectionGenerator {
    client: Arc<dyn GenerativeClient>,
    sections: Arc<dyn SectionStore>,
    memos: Arc<dyn MemoStore>,
    clock: Arc<dyn Clock>,
}

impl LlmSectionGenerator {
    pub fn new(
        client: Arc<dyn GenerativeClient>,
        sections: Arc<dyn SectionStore>,
        memos: Arc<dyn MemoStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            sections,
            memos,
            clock,
        }
    }

    /// Call the model and store the completed section
    async fn produce(&self, request: &SectionRequest) -> Result<()> {
        let section = request.section;
        let config = section.config();

        let generation = GenerationRequest {
            instructions: config.system_instructions(),
            prompt: config.render_prompt(&request.context),
            tools: request.tools(),
            max_tokens: config.max_tokens,
        };

        let generated = self
            .client
            .generate(&generation)
            .await
            .map_err(|e| MemoError::Generation {
                section: section.key().to_string(),
                message: e.to_string(),
            })?;

        if generated.text.trim().is_empty() {
            return Err(MemoError::Generation {
                section: section.key().to_string(),
                message: "Empty response from generative service".to_string(),
            });
        }

        let content = citations::insert_markers(&generated.text, &generated.citations);

        self.sections
            .upsert(
                request.memo_id,
                section,
                SectionUpdate::completed(content, self.clock.now()),
            )
            .await?;

        info!(
            citations = generated.citations.len(),
            model = self.client.model_name(),
            "Section completed"
        );
        Ok(())
    }

    /// Recount completed sections onto the memo
    async fn refresh_progress(&self, memo_id: Uuid) {
        let count = match self.sections.count_completed(memo_id).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Failed to count completed sections");
                return;
            }
        };

        let count = i32::try_from(count).unwrap_or(i32::MAX);
        if let Err(e) = self.memos.update_sections_completed(memo_id, count).await {
            warn!(error = %e, "Failed to update memo progress");
        }
    }
}

#[async_trait]
impl SectionGenerator for LlmSectionGenerator {
    #[instrument(skip(self, request), fields(memo_id = %request.memo_id, section = %request.section))]
    async fn generate(&self, request: &SectionRequest) -> Result<()> {
        let started = Instant::now();

        self.sections
            .upsert(
                request.memo_id,
                request.section,
                SectionUpdate::generating(self.clock.now()),
            )
            .await?;

        let result = self.produce(request).await;
        let elapsed = started.elapsed().as_secs_f64();
        metrics::record_section_generation(request.section.key(), elapsed, result.is_ok());

        match result {
            Ok(()) => {
                self.refresh_progress(request.memo_id).await;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Section generation failed");

                let update = SectionUpdate::failed(e.to_string(), self.clock.now());
                if let Err(write_err) = self
                    .sections
                    .upsert(request.memo_id, request.section, update)
                    .await
                {
                    error!(error = %write_err, "Failed to record section failure");
                }

                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use chrono::Utc;
    use dealmemo_common::db::models::SectionStatus;
    use dealmemo_common::errors::AppError;
    use dealmemo_common::llm::{GeneratedText, TextCitation};
    use dealmemo_common::ManualClock;
    use serde_json::json;
    use std::sync::Mutex;

    struct ScriptedClient {
        response: std::result::Result<GeneratedText, String>,
        seen: Mutex<Vec<GenerationRequest>>,
    }

    #[async_trait]
    impl GenerativeClient for ScriptedClient {
        async fn generate(
            &self,
            request: &GenerationRequest,
        ) -> dealmemo_common::Result<GeneratedText> {
            self.seen.lock().unwrap().push(request.clone());
            self.response
                .clone()
                .map_err(|message| AppError::LlmError { message })
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn setup(
        response: std::result::Result<GeneratedText, String>,
    ) -> (Arc<ScriptedClient>, Arc<InMemoryStore>, LlmSectionGenerator) {
        let client = Arc::new(ScriptedClient {
            response,
            seen: Mutex::new(Vec::new()),
        });
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let generator =
            LlmSectionGenerator::new(client.clone(), store.clone(), store.clone(), clock);
        (client, store, generator)
    }

    fn request(memo_id: Uuid, index: Option<&str>) -> SectionRequest {
        SectionRequest {
            memo_id,
            section: SectionType::MarketOpportunity,
            context: Arc::new(PromptContext::new(json!({ "company_name": "Acme" }), json!(null))),
            document_index_id: index.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_success_stores_content_with_markers() {
        let (client, store, generator) = setup(Ok(GeneratedText {
            text: "TAM is $40B.".into(),
            citations: vec![TextCitation {
                url: "https://r.example".into(),
                title: "Report".into(),
                start: 0,
                end: 12,
            }],
        }));
        let memo_id = Uuid::new_v4();

        generator.generate(&request(memo_id, Some("vs_1"))).await.unwrap();

        let rows = store.list_by_memo(memo_id).await.unwrap();
        assert_eq!(rows[0].section_status(), SectionStatus::Completed);
        assert_eq!(
            rows[0].content.as_deref(),
            Some("TAM is $40B.[1](https://r.example \"Report\")")
        );
        assert!(rows[0].started_at.is_some());
        assert!(rows[0].error.is_none());

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0].max_tokens, SectionType::MarketOpportunity.config().max_tokens);
        assert_eq!(
            seen[0].tools,
            vec![Tool::WebSearch, Tool::DocumentSearch { index_id: "vs_1".into() }]
        );
    }

    #[tokio::test]
    async fn test_web_search_only_without_index() {
        let (client, _store, generator) = setup(Ok(GeneratedText {
            text: "Body".into(),
            citations: Vec::new(),
        }));

        generator.generate(&request(Uuid::new_v4(), None)).await.unwrap();

        assert_eq!(client.seen.lock().unwrap()[0].tools, vec![Tool::WebSearch]);
    }

    #[tokio::test]
    async fn test_failure_is_recorded_not_left_generating() {
        let (_client, store, generator) = setup(Err("upstream 503".into()));
        let memo_id = Uuid::new_v4();

        let result = generator.generate(&request(memo_id, None)).await;

        assert!(matches!(result, Err(MemoError::Generation { .. })));
        let rows = store.list_by_memo(memo_id).await.unwrap();
        assert_eq!(rows[0].section_status(), SectionStatus::Failed);
        assert!(rows[0].error.as_deref().unwrap_or_default().contains("upstream 503"));
        assert!(rows[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn test_empty_text_is_failure() {
        let (_client, store, generator) = setup(Ok(GeneratedText {
            text: "  \n".into(),
            citations: Vec::new(),
        }));
        let memo_id = Uuid::new_v4();

        assert!(generator.generate(&request(memo_id, None)).await.is_err());
        let rows = store.list_by_memo(memo_id).await.unwrap();
        assert_eq!(rows[0].section_status(), SectionStatus::Failed);
    }
}
