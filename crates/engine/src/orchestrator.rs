//! Memo generation orchestrator
//!
//! One run of [`Orchestrator::run_generation`]:
//! 1. seed a `pending` record per section and reset stuck ones
//! 2. dispatch pending sections in concurrent batches with per-section retries
//! 3. poll the status store until every record is terminal or the wait runs out
//! 4. assemble when enough sections completed, otherwise fail the memo

use crate::assembler::Assembler;
use crate::errors::{MemoError, Result};
use crate::generator::{SectionGenerator, SectionRequest};
use crate::sections::{PromptContext, SectionType};
use crate::store::{MemoStore, SectionStore};
use dealmemo_common::config::GenerationConfig;
use dealmemo_common::db::models::{GenerationStatus, MemoSection, SectionStatus};
use dealmemo_common::db::SectionUpdate;
use dealmemo_common::{metrics, Clock};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Caller input for one generation run
#[derive(Debug, Clone)]
pub struct GenerationInput {
    pub memo_id: Uuid,
    pub context: PromptContext,
    pub document_index_id: Option<String>,
}

/// Final state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationOutcome {
    Completed,
    Failed,
}

impl GenerationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationOutcome::Completed => "completed",
            GenerationOutcome::Failed => "failed",
        }
    }
}

/// Summary of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub outcome: GenerationOutcome,
    /// Sections dispatched to a generator during this run
    pub sections_processed: usize,
    /// Completed sections when the run ended
    pub completed_count: usize,
}

/// Drives a memo from seeded sections to an assembled document
pub struct Orchestrator {
    generator: Arc<dyn SectionGenerator>,
    sections: Arc<dyn SectionStore>,
    memos: Arc<dyn MemoStore>,
    assembler: Assembler,
    clock: Arc<dyn Clock>,
    config: GenerationConfig,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<dyn SectionGenerator>,
        sections: Arc<dyn SectionStore>,
        memos: Arc<dyn MemoStore>,
        clock: Arc<dyn Clock>,
        config: GenerationConfig,
    ) -> Self {
        let assembler = Assembler::new(sections.clone(), memos.clone(), clock.clone());
        Self {
            generator,
            sections,
            memos,
            assembler,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Run generation for a memo to a terminal outcome
    #[instrument(skip(self, input), fields(memo_id = %input.memo_id))]
    pub async fn run_generation(&self, input: GenerationInput) -> Result<RunReport> {
        let memo_id = input.memo_id;
        let memo = self
            .memos
            .find_memo(memo_id)
            .await?
            .ok_or(MemoError::MemoNotFound(memo_id))?;

        if memo.is_terminal() {
            info!(status = %memo.status(), "Memo already terminal, nothing to do");
            let outcome = match memo.status() {
                GenerationStatus::Completed => GenerationOutcome::Completed,
                _ => GenerationOutcome::Failed,
            };
            return Ok(RunReport {
                outcome,
                sections_processed: 0,
                completed_count: usize::try_from(memo.sections_completed).unwrap_or(0),
            });
        }

        self.sections.seed(memo_id, &SectionType::ALL).await?;
        self.reset_stuck(memo_id).await?;

        let records = self.sections.list_by_memo(memo_id).await?;
        if memo.status() == GenerationStatus::Pending {
            self.mark_generating(memo_id, &records).await?;
        }

        let context = Arc::new(input.context);
        let request_for = |section: SectionType| SectionRequest {
            memo_id,
            section,
            context: context.clone(),
            document_index_id: input.document_index_id.clone(),
        };

        let pending = pending_sections(&records);
        let mut processed = pending.len();

        if pending.is_empty() {
            info!("No pending sections, skipping dispatch");
        } else {
            info!(pending = pending.len(), "Dispatching sections");
            self.dispatch_batches(&pending, &request_for).await;

            // sections that slipped through every batch run one at a time
            let leftovers = pending_sections(&self.sections.list_by_memo(memo_id).await?);
            if !leftovers.is_empty() {
                warn!(count = leftovers.len(), "Sections still pending after dispatch");
                processed += leftovers.len();
                for section in leftovers {
                    self.process_section(&request_for(section)).await;
                }
            }
        }

        let (all_terminal, completed) = self.poll_until_terminal(memo_id).await?;
        let completed_count = i32::try_from(completed).unwrap_or(i32::MAX);

        let outcome = if all_terminal && completed >= self.config.min_required_sections {
            let document = self.assembler.assemble(memo_id, completed_count).await?;
            metrics::record_memo_run(GenerationOutcome::Completed.as_str(), Some(document.content.len()));
            info!(completed, bytes = document.content.len(), "Memo completed");
            GenerationOutcome::Completed
        } else {
            self.memos
                .update_progress(memo_id, GenerationStatus::Failed, completed_count)
                .await?;
            metrics::record_memo_run(GenerationOutcome::Failed.as_str(), None);
            error!(
                completed,
                required = self.config.min_required_sections,
                timed_out = !all_terminal,
                "Memo generation failed"
            );
            GenerationOutcome::Failed
        };

        Ok(RunReport {
            outcome,
            sections_processed: processed,
            completed_count: completed,
        })
    }

    async fn reset_stuck(&self, memo_id: Uuid) -> Result<()> {
        let threshold = chrono::Duration::from_std(self.config.stuck_threshold())
            .unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = self.clock.now() - threshold;

        let reset = self.sections.reset_stuck(memo_id, cutoff).await?;
        if !reset.is_empty() {
            let keys: Vec<&str> = reset.iter().map(|s| s.section_type.as_str()).collect();
            warn!(sections = ?keys, "Reset stuck sections to pending");
            metrics::record_sections_reset(reset.len());
        }
        Ok(())
    }

    async fn mark_generating(&self, memo_id: Uuid, records: &[MemoSection]) -> Result<()> {
        let from = GenerationStatus::Pending;
        let to = GenerationStatus::Generating;
        if !from.can_transition(to) {
            return Err(MemoError::InvalidTransition { from, to });
        }

        let completed = i32::try_from(count_completed(records)).unwrap_or(i32::MAX);
        self.memos.update_progress(memo_id, to, completed).await?;
        Ok(())
    }

    async fn dispatch_batches<F>(&self, pending: &[SectionType], request_for: &F)
    where
        F: Fn(SectionType) -> SectionRequest,
    {
        let batch_size = self.config.max_concurrent.max(1);

        for (index, batch) in pending.chunks(batch_size).enumerate() {
            if index > 0 {
                self.clock.sleep(self.config.inter_batch_delay()).await;
            }

            let requests: Vec<SectionRequest> = batch.iter().map(|s| request_for(*s)).collect();
            let results = join_all(requests.iter().map(|r| self.process_section(r))).await;

            let succeeded = results.iter().filter(|ok| **ok).count();
            info!(batch = index + 1, size = batch.len(), succeeded, "Batch finished");
        }
    }

    /// Run one section with its retry budget. Returns whether it completed.
    async fn process_section(&self, request: &SectionRequest) -> bool {
        let section = request.section;
        let mut attempt: u32 = 0;

        loop {
            match self.generator.generate(request).await {
                Ok(()) => return true,
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        section = %section,
                        attempt,
                        max_retries = self.config.max_retries,
                        error = %e,
                        "Section failed, retrying"
                    );
                    metrics::record_section_retry(section.key());
                    self.clock.sleep(self.config.retry_delay()).await;
                }
                Err(e) => {
                    let message = format!("Failed after {} attempts: {}", self.config.max_retries, e);
                    error!(section = %section, error = %e, "Section retries exhausted");

                    let update = SectionUpdate::failed(message, self.clock.now());
                    if let Err(write_err) =
                        self.sections.upsert(request.memo_id, section, update).await
                    {
                        error!(section = %section, error = %write_err, "Failed to record exhausted section");
                    }
                    return false;
                }
            }
        }
    }

    /// Poll until every record is terminal or the wait budget is spent.
    ///
    /// Returns whether all records were terminal and the completed count.
    async fn poll_until_terminal(&self, memo_id: Uuid) -> Result<(bool, usize)> {
        let started = self.clock.now();
        let max_wait = self.config.max_wait();

        loop {
            let records = self.sections.list_by_memo(memo_id).await?;
            let completed = count_completed(&records);
            let all_terminal = !records.is_empty() && records.iter().all(|r| r.is_terminal());

            if all_terminal {
                return Ok((true, completed));
            }

            let elapsed = (self.clock.now() - started).to_std().unwrap_or_default();
            if elapsed >= max_wait {
                warn!(completed, waited_secs = elapsed.as_secs(), "Timed out waiting for sections");
                return Ok((false, completed));
            }

            self.clock.sleep(self.config.poll_interval()).await;
        }
    }
}

fn pending_sections(records: &[MemoSection]) -> Vec<SectionType> {
    records
        .iter()
        .filter(|r| r.section_status() == SectionStatus::Pending)
        .filter_map(|r| {
            let section = SectionType::from_key(&r.section_type);
            if section.is_none() {
                warn!(section_type = %r.section_type, "Ignoring unknown section type");
            }
            section
        })
        .collect()
}

fn count_completed(records: &[MemoSection]) -> usize {
    records
        .iter()
        .filter(|r| r.section_status() == SectionStatus::Completed)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use dealmemo_common::db::models::{Deal, Memo};
    use dealmemo_common::ManualClock;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fails each section a scripted number of times, then completes it
    struct FlakyGenerator {
        store: Arc<InMemoryStore>,
        failures: HashMap<SectionType, usize>,
        calls: Mutex<HashMap<SectionType, usize>>,
    }

    #[async_trait]
    impl SectionGenerator for FlakyGenerator {
        async fn generate(&self, request: &SectionRequest) -> Result<()> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                let n = calls.entry(request.section).or_insert(0);
                *n += 1;
                *n
            };

            let now = Utc::now();
            if call <= self.failures.get(&request.section).copied().unwrap_or(0) {
                self.store
                    .upsert(request.memo_id, request.section, SectionUpdate::failed("flaky".into(), now))
                    .await?;
                return Err(MemoError::Generation {
                    section: request.section.key().into(),
                    message: "flaky".into(),
                });
            }

            let body = format!("{} body", request.section.title());
            self.store
                .upsert(request.memo_id, request.section, SectionUpdate::completed(body, now))
                .await?;
            Ok(())
        }
    }

    fn seed_memo(store: &InMemoryStore) -> Uuid {
        let now = Utc::now();
        let deal_id = Uuid::new_v4();
        store.insert_deal(Deal {
            id: deal_id,
            company_name: "Acme".into(),
            stage: Some("Seed".into()),
            requested_amount: Some(2_000_000),
            valuation: None,
            allocation: None,
            website: None,
            pitch_deck_name: None,
            created_at: now.into(),
            updated_at: now.into(),
        });
        let memo_id = Uuid::new_v4();
        store.insert_memo(Memo {
            id: memo_id,
            deal_id,
            title: "Acme Memo".into(),
            content: String::new(),
            generation_status: GenerationStatus::Pending.into(),
            sections_completed: 0,
            version: 1,
            created_by: None,
            created_at: now.into(),
            updated_at: now.into(),
        });
        memo_id
    }

    fn build(
        failures: HashMap<SectionType, usize>,
    ) -> (Orchestrator, Arc<FlakyGenerator>, Arc<InMemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let generator = Arc::new(FlakyGenerator {
            store: store.clone(),
            failures,
            calls: Mutex::new(HashMap::new()),
        });
        let orchestrator = Orchestrator::new(
            generator.clone(),
            store.clone(),
            store.clone(),
            clock.clone(),
            GenerationConfig::default(),
        );
        (orchestrator, generator, store, clock)
    }

    fn input(memo_id: Uuid) -> GenerationInput {
        GenerationInput {
            memo_id,
            context: PromptContext::new(json!({ "company_name": "Acme" }), json!({})),
            document_index_id: None,
        }
    }

    #[tokio::test]
    async fn test_retry_budget_is_exact() {
        let failures = HashMap::from([
            (SectionType::BusinessModel, 3),
            (SectionType::TeamAssessment, 4),
        ]);
        let (orchestrator, generator, store, _clock) = build(failures);
        let memo_id = seed_memo(&store);

        let report = orchestrator.run_generation(input(memo_id)).await.unwrap();

        let calls = generator.calls.lock().unwrap().clone();
        assert_eq!(calls[&SectionType::BusinessModel], 4);
        assert_eq!(calls[&SectionType::TeamAssessment], 4);
        assert_eq!(calls[&SectionType::ExecutiveSummary], 1);

        let rows = store.list_by_memo(memo_id).await.unwrap();
        let team = rows.iter().find(|r| r.section_type == "team_assessment").unwrap();
        assert_eq!(team.section_status(), SectionStatus::Failed);
        assert!(team.error.as_deref().unwrap().starts_with("Failed after 3 attempts"));

        let business = rows.iter().find(|r| r.section_type == "business_model").unwrap();
        assert_eq!(business.section_status(), SectionStatus::Completed);

        assert_eq!(report.outcome, GenerationOutcome::Completed);
        assert_eq!(report.completed_count, 9);
        assert_eq!(report.sections_processed, 10);
    }

    #[tokio::test]
    async fn test_sleeps_follow_configured_delays() {
        let failures = HashMap::from([(SectionType::Recommendation, 1)]);
        let (orchestrator, _generator, store, clock) = build(failures);
        let memo_id = seed_memo(&store);

        orchestrator.run_generation(input(memo_id)).await.unwrap();

        let sleeps = clock.sleeps();
        // one inter-batch pause between the two batches of five, one retry delay
        assert_eq!(sleeps.iter().filter(|d| **d == Duration::from_millis(2_000)).count(), 1);
        assert_eq!(sleeps.iter().filter(|d| **d == Duration::from_millis(5_000)).count(), 1);
    }

    #[tokio::test]
    async fn test_terminal_memo_is_not_rerun() {
        let (orchestrator, generator, store, _clock) = build(HashMap::new());
        let memo_id = seed_memo(&store);

        let first = orchestrator.run_generation(input(memo_id)).await.unwrap();
        let content = store.find_memo(memo_id).await.unwrap().unwrap().content;
        let second = orchestrator.run_generation(input(memo_id)).await.unwrap();

        assert_eq!(first.outcome, GenerationOutcome::Completed);
        assert_eq!(second.outcome, GenerationOutcome::Completed);
        assert_eq!(second.sections_processed, 0);
        assert_eq!(second.completed_count, 10);
        assert_eq!(generator.calls.lock().unwrap().values().sum::<usize>(), 10);
        assert_eq!(store.find_memo(memo_id).await.unwrap().unwrap().content, content);
    }

    #[tokio::test]
    async fn test_unknown_memo() {
        let (orchestrator, _generator, _store, _clock) = build(HashMap::new());
        let result = orchestrator.run_generation(input(Uuid::new_v4())).await;
        assert!(matches!(result, Err(MemoError::MemoNotFound(_))));
    }
}
