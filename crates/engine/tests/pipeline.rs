//! End-to-end runs of the memo pipeline over the in-memory store

use async_trait::async_trait;
use chrono::Utc;
use dealmemo_common::config::GenerationConfig;
use dealmemo_common::db::models::{
    Deal, GenerationStatus, Memo, MemoSection, SectionStatus,
};
use dealmemo_common::db::SectionUpdate;
use dealmemo_common::errors::AppError;
use dealmemo_common::llm::{GeneratedText, GenerationRequest, GenerativeClient, TextCitation};
use dealmemo_common::{Clock, ManualClock};
use dealmemo_engine::{
    Assembler, GenerationInput, GenerationOutcome, InMemoryStore, LlmSectionGenerator,
    MemoError, MemoStore, Orchestrator, PromptContext, SectionGenerator, SectionRequest,
    SectionStore, SectionType,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

const ALWAYS: usize = usize::MAX;

/// Generative client that fails each section a scripted number of times
#[derive(Default)]
struct ScriptedClient {
    failures: HashMap<SectionType, usize>,
    with_citations: bool,
    calls: Mutex<HashMap<SectionType, usize>>,
}

impl ScriptedClient {
    fn failing(failures: impl IntoIterator<Item = (SectionType, usize)>) -> Self {
        Self {
            failures: failures.into_iter().collect(),
            ..Self::default()
        }
    }

    fn calls(&self, section: SectionType) -> usize {
        self.calls.lock().unwrap().get(&section).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

fn section_of(prompt: &str) -> SectionType {
    let first = prompt.lines().next().unwrap_or_default();
    SectionType::ALL
        .into_iter()
        .find(|s| first.starts_with(&format!("{} for ", s.title())))
        .expect("prompt names its section")
}

#[async_trait]
impl GenerativeClient for ScriptedClient {
    async fn generate(&self, request: &GenerationRequest) -> dealmemo_common::Result<GeneratedText> {
        let section = section_of(&request.prompt);
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(section).or_insert(0);
            *n += 1;
            *n
        };

        if call <= self.failures.get(&section).copied().unwrap_or(0) {
            return Err(AppError::LlmError {
                message: format!("scripted failure #{}", call),
            });
        }

        let text = format!("Section {} body", section.order());
        let citations = if self.with_citations {
            vec![TextCitation {
                url: format!("https://source{}.example", section.order() % 3),
                title: format!("Source {}", section.order() % 3),
                start: 0,
                end: text.chars().count(),
            }]
        } else {
            Vec::new()
        };

        Ok(GeneratedText { text, citations })
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

struct Harness {
    store: Arc<InMemoryStore>,
    clock: Arc<ManualClock>,
    client: Arc<ScriptedClient>,
    orchestrator: Orchestrator,
    memo_id: Uuid,
}

impl Harness {
    fn new(client: ScriptedClient) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let client = Arc::new(client);
        let generator = Arc::new(LlmSectionGenerator::new(
            client.clone(),
            store.clone(),
            store.clone(),
            clock.clone(),
        ));
        let orchestrator = Self::orchestrator(generator, &store, &clock);
        let memo_id = seed_memo(&store, GenerationStatus::Pending);

        Self {
            store,
            clock,
            client,
            orchestrator,
            memo_id,
        }
    }

    fn orchestrator(
        generator: Arc<dyn SectionGenerator>,
        store: &Arc<InMemoryStore>,
        clock: &Arc<ManualClock>,
    ) -> Orchestrator {
        Orchestrator::new(
            generator,
            store.clone(),
            store.clone(),
            clock.clone(),
            GenerationConfig::default(),
        )
    }

    fn input(&self) -> GenerationInput {
        GenerationInput {
            memo_id: self.memo_id,
            context: PromptContext::new(
                json!({ "company_name": "Acme Robotics", "stage": "Seed" }),
                json!({ "overall_score": 7.5 }),
            ),
            document_index_id: Some("vs_acme".into()),
        }
    }

    async fn memo(&self) -> Memo {
        self.store.find_memo(self.memo_id).await.unwrap().unwrap()
    }

    async fn record(&self, section: SectionType) -> MemoSection {
        self.store
            .list_by_memo(self.memo_id)
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.section_type == section.key())
            .unwrap()
    }
}

fn seed_memo(store: &InMemoryStore, status: GenerationStatus) -> Uuid {
    let now = Utc::now();
    let deal_id = Uuid::new_v4();
    store.insert_deal(Deal {
        id: deal_id,
        company_name: "Acme Robotics".into(),
        stage: Some("Seed".into()),
        requested_amount: Some(3_000_000),
        valuation: Some(15_000_000),
        allocation: Some(500_000),
        website: Some("https://acme.example".into()),
        pitch_deck_name: Some("Acme Seed Deck.pdf".into()),
        created_at: now.into(),
        updated_at: now.into(),
    });

    let memo_id = Uuid::new_v4();
    store.insert_memo(Memo {
        id: memo_id,
        deal_id,
        title: "Acme Robotics Seed Memo".into(),
        content: String::new(),
        generation_status: status.into(),
        sections_completed: 0,
        version: 1,
        created_by: Some("analyst@fund.example".into()),
        created_at: now.into(),
        updated_at: now.into(),
    });
    memo_id
}

#[tokio::test]
async fn scenario_a_all_sections_complete() {
    let harness = Harness::new(ScriptedClient::default());

    let report = harness.orchestrator.run_generation(harness.input()).await.unwrap();

    assert_eq!(report.outcome, GenerationOutcome::Completed);
    assert_eq!(report.sections_processed, 10);
    assert_eq!(report.completed_count, 10);

    let memo = harness.memo().await;
    assert_eq!(memo.status(), GenerationStatus::Completed);
    assert_eq!(memo.sections_completed, 10);

    let mut cursor = 0;
    for section in SectionType::ALL {
        let heading = format!("## {}\n\nSection {} body", section.title(), section.order());
        let found = memo.content[cursor..]
            .find(&heading)
            .unwrap_or_else(|| panic!("{} missing or out of order", section.title()));
        cursor += found + heading.len();
    }
    // nine between sections, one before the references
    assert_eq!(memo.content.matches("\n\n---\n\n## ").count(), 10);
    assert!(memo.content.contains("## References"));
}

#[tokio::test]
async fn scenario_b_one_failed_section_still_assembles() {
    let harness = Harness::new(ScriptedClient::failing([(SectionType::Recommendation, ALWAYS)]));

    let report = harness.orchestrator.run_generation(harness.input()).await.unwrap();

    assert_eq!(report.outcome, GenerationOutcome::Completed);
    assert_eq!(report.completed_count, 9);

    let memo = harness.memo().await;
    assert_eq!(memo.status(), GenerationStatus::Completed);
    assert_eq!(memo.sections_completed, 9);
    assert!(!memo.content.contains("Recommendation"));
    assert!(memo.content.contains("## Risks & Mitigations"));

    // first attempt plus three retries
    assert_eq!(harness.client.calls(SectionType::Recommendation), 4);
    let failed = harness.record(SectionType::Recommendation).await;
    assert_eq!(failed.section_status(), SectionStatus::Failed);
    assert!(failed.error.unwrap().contains("Failed after 3 attempts"));
}

#[tokio::test]
async fn scenario_c_two_failed_sections_fail_the_memo() {
    let harness = Harness::new(ScriptedClient::failing([
        (SectionType::TeamAssessment, ALWAYS),
        (SectionType::Recommendation, ALWAYS),
    ]));

    let report = harness.orchestrator.run_generation(harness.input()).await.unwrap();

    assert_eq!(report.outcome, GenerationOutcome::Failed);
    assert_eq!(report.completed_count, 8);

    let memo = harness.memo().await;
    assert_eq!(memo.status(), GenerationStatus::Failed);
    assert_eq!(memo.sections_completed, 8);
    assert!(memo.content.is_empty());
}

#[tokio::test]
async fn scenario_d_stuck_section_is_reset_and_completed() {
    let harness = Harness::new(ScriptedClient::default());
    let started = harness.clock.now() - chrono::Duration::minutes(10);
    harness
        .store
        .upsert(
            harness.memo_id,
            SectionType::CompanyOverview,
            SectionUpdate::generating(started),
        )
        .await
        .unwrap();

    let report = harness.orchestrator.run_generation(harness.input()).await.unwrap();

    assert_eq!(report.outcome, GenerationOutcome::Completed);
    assert_eq!(report.completed_count, 10);
    assert_eq!(harness.client.calls(SectionType::CompanyOverview), 1);

    let record = harness.record(SectionType::CompanyOverview).await;
    assert_eq!(record.section_status(), SectionStatus::Completed);
    assert!(record.error.is_none());
    assert!(record.started_at.unwrap().with_timezone(&Utc) > started);
}

#[tokio::test]
async fn fresh_generating_section_is_not_reset() {
    let harness = Harness::new(ScriptedClient::default());
    let started = harness.clock.now() - chrono::Duration::minutes(1);
    harness
        .store
        .upsert(
            harness.memo_id,
            SectionType::CompanyOverview,
            SectionUpdate::generating(started),
        )
        .await
        .unwrap();

    let report = harness.orchestrator.run_generation(harness.input()).await.unwrap();

    // nobody finishes the in-flight section, so the wait budget runs out
    assert_eq!(report.outcome, GenerationOutcome::Failed);
    assert_eq!(report.sections_processed, 9);
    assert_eq!(harness.client.calls(SectionType::CompanyOverview), 0);
    assert!(harness.clock.total_slept() >= Duration::from_secs(120));
}

#[tokio::test]
async fn retry_budget_boundary() {
    let harness = Harness::new(ScriptedClient::failing([
        (SectionType::MarketOpportunity, 3),
        (SectionType::BusinessModel, 4),
    ]));

    let report = harness.orchestrator.run_generation(harness.input()).await.unwrap();

    let recovered = harness.record(SectionType::MarketOpportunity).await;
    assert_eq!(recovered.section_status(), SectionStatus::Completed);
    assert!(recovered.error.is_none());

    let exhausted = harness.record(SectionType::BusinessModel).await;
    assert_eq!(exhausted.section_status(), SectionStatus::Failed);
    assert!(exhausted.error.unwrap().starts_with("Failed after 3 attempts"));

    assert_eq!(harness.client.calls(SectionType::MarketOpportunity), 4);
    assert_eq!(harness.client.calls(SectionType::BusinessModel), 4);
    assert_eq!(report.outcome, GenerationOutcome::Completed);
}

#[tokio::test]
async fn rerun_without_pending_sections_does_not_dispatch() {
    let harness = Harness::new(ScriptedClient::default());
    for section in SectionType::ALL {
        harness
            .store
            .upsert(
                harness.memo_id,
                section,
                SectionUpdate::completed(format!("Prepared {}", section.key()), Utc::now()),
            )
            .await
            .unwrap();
    }
    harness
        .store
        .update_progress(harness.memo_id, GenerationStatus::Generating, 10)
        .await
        .unwrap();
    let before = harness.store.list_by_memo(harness.memo_id).await.unwrap();

    let report = harness.orchestrator.run_generation(harness.input()).await.unwrap();

    assert_eq!(report.outcome, GenerationOutcome::Completed);
    assert_eq!(report.sections_processed, 0);
    assert_eq!(harness.client.total_calls(), 0);
    assert_eq!(harness.store.list_by_memo(harness.memo_id).await.unwrap(), before);

    let again = harness.orchestrator.run_generation(harness.input()).await.unwrap();
    assert_eq!(again.outcome, GenerationOutcome::Completed);
    assert_eq!(harness.client.total_calls(), 0);
}

/// Marks sections `generating` and never finishes them
struct StallingGenerator {
    store: Arc<InMemoryStore>,
}

#[async_trait]
impl SectionGenerator for StallingGenerator {
    async fn generate(&self, request: &SectionRequest) -> dealmemo_engine::Result<()> {
        self.store
            .upsert(request.memo_id, request.section, SectionUpdate::generating(Utc::now()))
            .await?;
        Ok(())
    }
}

#[tokio::test]
async fn poll_timeout_fails_the_memo() {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let generator = Arc::new(StallingGenerator { store: store.clone() });
    let orchestrator = Harness::orchestrator(generator, &store, &clock);
    let memo_id = seed_memo(&store, GenerationStatus::Pending);

    let report = orchestrator
        .run_generation(GenerationInput {
            memo_id,
            context: PromptContext::default(),
            document_index_id: None,
        })
        .await
        .unwrap();

    assert_eq!(report.outcome, GenerationOutcome::Failed);
    assert_eq!(report.completed_count, 0);

    let polls = clock
        .sleeps()
        .iter()
        .filter(|d| **d == Duration::from_millis(5_000))
        .count();
    assert_eq!(polls, 24);

    let memo = store.find_memo(memo_id).await.unwrap().unwrap();
    assert_eq!(memo.status(), GenerationStatus::Failed);
    assert!(memo.content.is_empty());
}

#[tokio::test]
async fn reassembly_is_byte_identical() {
    let harness = Harness::new(ScriptedClient {
        with_citations: true,
        ..ScriptedClient::default()
    });
    harness.orchestrator.run_generation(harness.input()).await.unwrap();

    let assembler = Assembler::new(harness.store.clone(), harness.store.clone(), harness.clock.clone());
    let first = assembler.assemble(harness.memo_id, 10).await.unwrap();
    let second = assembler.assemble(harness.memo_id, 10).await.unwrap();

    assert_eq!(first.content, second.content);
    assert_eq!(first.content, harness.memo().await.content);
    assert_eq!(first.citations, 3);
    assert!(first.content.contains("## Executive Summary\n\nSection 1 body[^1]"));
    assert!(first.content.contains("[^1]: [Source 1](https://source1.example)"));
}

#[tokio::test]
async fn empty_document_leaves_memo_unfinished() {
    let store = Arc::new(InMemoryStore::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let memo_id = seed_memo(&store, GenerationStatus::Generating);
    store.seed(memo_id, &SectionType::ALL).await.unwrap();

    let assembler = Assembler::new(store.clone(), store.clone(), clock);
    let result = assembler.assemble(memo_id, 0).await;

    assert!(matches!(result, Err(MemoError::EmptyDocument(id)) if id == memo_id));
    let memo = store.find_memo(memo_id).await.unwrap().unwrap();
    assert_eq!(memo.status(), GenerationStatus::Generating);
    assert!(memo.content.is_empty());
}
