//! Batch orchestrator
//!
//! Each item kind runs the same cycle until the catalog is exhausted or a
//! stop is requested:
//!
//! 1. Fetch up to `batch_size * max_concurrency` items missing from the ledger
//! 2. Split them into chunks and submit one call per (chunk, task) pair, all at once
//! 3. Wait for every call; a failed call never cancels its siblings
//! 4. Persist parsed records, then mark the fetched keys processed
//! 5. Pause unless the fetch came up short, and go back to 1
//!
//! The stop flag is only consulted before a fetch, so a stop never
//! abandons a batch halfway.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tracing::{debug, error, info, warn};

use crate::catalog::WorkCatalog;
use crate::config::{EnrichConfig, FailurePolicy};
use crate::domain::{ItemKind, ResultKind, WorkItem};
use crate::llm::LlmClient;
use crate::shutdown::ShutdownSignal;
use crate::storage::DurableStore;
use crate::taxonomy::Taxonomy;

use super::prompts::build_prompt;
use super::report::RunReport;
use super::task::parse_task_output;

/// Knobs for one run
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichOptions {
    pub batch_size: usize,
    pub entity_batch_size: usize,
    /// Chunks fetched per cycle
    pub max_concurrency: usize,
    pub patent_pause: Duration,
    pub entity_pause: Duration,
    pub green: bool,
    pub tech: bool,
    pub location: bool,
    pub failure_policy: FailurePolicy,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self::from_config(&EnrichConfig::default())
    }
}

impl EnrichOptions {
    pub fn from_config(config: &EnrichConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            entity_batch_size: config.entity_batch_size.max(1),
            max_concurrency: config.max_concurrent_requests.max(1),
            patent_pause: Duration::from_millis(config.patent_pause_ms),
            entity_pause: Duration::from_millis(config.entity_pause_ms),
            green: config.enable_green_classification,
            tech: config.enable_tech_classification,
            location: config.enable_location_extraction,
            failure_policy: config.failure_policy,
        }
    }

    /// Tasks run for items of `kind`, in dispatch order
    pub fn tasks(&self, kind: ItemKind) -> Vec<ResultKind> {
        let enabled = [
            (ResultKind::Green, self.green),
            (ResultKind::Tech, self.tech),
            (ResultKind::Location, self.location),
        ];
        enabled
            .into_iter()
            .filter(|(task, on)| *on && task.item_kind() == kind)
            .map(|(task, _)| task)
            .collect()
    }

    fn batch_size(&self, kind: ItemKind) -> usize {
        match kind {
            ItemKind::Patent => self.batch_size,
            ItemKind::Entity => self.entity_batch_size,
        }
    }

    fn pause(&self, kind: ItemKind) -> Duration {
        match kind {
            ItemKind::Patent => self.patent_pause,
            ItemKind::Entity => self.entity_pause,
        }
    }
}

/// Outcome of one (chunk, task) call
struct CallOutcome {
    chunk: usize,
    task: ResultKind,
    response: Option<String>,
}

/// Drives enrichment for one session
pub struct Orchestrator {
    client: LlmClient,
    store: Arc<DurableStore>,
    catalog: Arc<WorkCatalog>,
    taxonomy: Arc<Taxonomy>,
    options: EnrichOptions,
    shutdown: ShutdownSignal,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("session_id", &self.store.session_id())
            .field("options", &self.options)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        client: LlmClient,
        store: Arc<DurableStore>,
        catalog: Arc<WorkCatalog>,
        taxonomy: Arc<Taxonomy>,
        options: EnrichOptions,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            client,
            store,
            catalog,
            taxonomy,
            options,
            shutdown,
        }
    }

    /// Run patents, then entities, and report
    pub async fn run(&self) -> RunReport {
        let started = Instant::now();
        let mut report = RunReport::new(self.store.session_id());
        report.total_patents = self.catalog.total_count(ItemKind::Patent);
        report.total_entities = self.catalog.total_count(ItemKind::Entity);

        info!(
            session_id = %self.store.session_id(),
            total_patents = report.total_patents,
            processed_patents = self.store.processed_count(ItemKind::Patent),
            total_entities = report.total_entities,
            processed_entities = self.store.processed_count(ItemKind::Entity),
            max_concurrency = self.options.max_concurrency,
            "Starting enrichment"
        );

        for kind in [ItemKind::Patent, ItemKind::Entity] {
            self.run_phase(kind, &mut report).await;
        }

        if let Err(e) = self.store.flush() {
            error!(error = %e, "Final flush failed; some results exist only in memory");
        }
        report.fully_persisted = !self.store.has_unsaved_changes();
        report.cancelled = self.shutdown.is_stop_requested();
        report.processed_patents = self.store.processed_count(ItemKind::Patent);
        report.processed_entities = self.store.processed_count(ItemKind::Entity);
        report.stats = self.client.stats();
        report.elapsed_secs = started.elapsed().as_secs_f64();

        info!(
            session_id = %report.session_id,
            cancelled = report.cancelled,
            processed_patents = report.processed_patents,
            processed_entities = report.processed_entities,
            records = report.records_persisted.total(),
            requests = report.stats.total_requests,
            failed = report.stats.failed_requests,
            retried = report.stats.retried_requests,
            "Enrichment finished"
        );

        report
    }

    async fn run_phase(&self, kind: ItemKind, report: &mut RunReport) {
        let tasks = self.options.tasks(kind);
        if tasks.is_empty() {
            info!(kind = %kind, "No tasks enabled, skipping");
            return;
        }
        report.phase_mut(kind).enabled = true;

        let batch_size = self.options.batch_size(kind);
        let fetch_limit = batch_size.saturating_mul(self.options.max_concurrency);
        let mut deferred: HashSet<String> = HashSet::new();

        loop {
            if self.shutdown.is_stop_requested() {
                info!(kind = %kind, "Stop requested, leaving loop");
                break;
            }

            let items =
                self.catalog
                    .unprocessed_excluding(kind, fetch_limit, &self.store, &deferred);
            if items.is_empty() {
                info!(kind = %kind, "All items processed");
                break;
            }

            let cycle = {
                let phase = report.phase_mut(kind);
                phase.cycles += 1;
                phase.items_fetched += items.len();
                phase.cycles
            };
            info!(kind = %kind, cycle, fetched = items.len(), "Fetched unprocessed items");

            // A short fetch drained the catalog, so the next one ends the phase
            let drained = items.len() < fetch_limit;
            let chunks: Vec<&[WorkItem]> = items.chunks(batch_size).collect();
            let outcomes = self.dispatch(&chunks, &tasks).await;
            let newly_deferred = self.persist(kind, &chunks, outcomes, report);
            deferred.extend(newly_deferred);

            if !drained {
                self.pause(self.options.pause(kind)).await;
            }
        }
    }

    /// Submit every (chunk, task) call at once and wait for all of them
    async fn dispatch(&self, chunks: &[&[WorkItem]], tasks: &[ResultKind]) -> Vec<CallOutcome> {
        let client = &self.client;
        let mut calls = Vec::with_capacity(chunks.len() * tasks.len());
        for (idx, chunk) in chunks.iter().enumerate() {
            for &task in tasks {
                let prompt = build_prompt(task, chunk, &self.taxonomy);
                let items = chunk.len();
                calls.push(async move {
                    debug!(task = %task, chunk = idx, items, "Dispatching call");
                    CallOutcome {
                        chunk: idx,
                        task,
                        response: client.complete(&prompt).await,
                    }
                });
            }
        }

        join_all(calls).await
    }

    /// Store parsed records and update the ledger; returns keys deferred to the next run
    fn persist(
        &self,
        kind: ItemKind,
        chunks: &[&[WorkItem]],
        outcomes: Vec<CallOutcome>,
        report: &mut RunReport,
    ) -> Vec<String> {
        let mut chunk_ok = vec![false; chunks.len()];

        for outcome in outcomes {
            report.phase_mut(kind).calls_dispatched += 1;

            let Some(text) = outcome.response else {
                report.phase_mut(kind).calls_failed += 1;
                continue;
            };

            let parsed = match parse_task_output(
                outcome.task,
                &text,
                chunks[outcome.chunk],
                &self.taxonomy,
            ) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(task = %outcome.task, chunk = outcome.chunk, error = %e, "Discarding malformed response");
                    report.phase_mut(kind).malformed_responses += 1;
                    continue;
                }
            };

            chunk_ok[outcome.chunk] = true;
            report.phase_mut(kind).records_rejected += parsed.rejected;

            let count = parsed.batch.len();
            match self.store.append(parsed.batch) {
                Ok(_) => {
                    report.records_persisted.add(outcome.task, count);
                    if count > 0 {
                        info!(task = %outcome.task, count, "Saved results");
                    }
                }
                Err(e) => {
                    // Records stay in memory and go out with the next write
                    report.records_persisted.add(outcome.task, count);
                    report.phase_mut(kind).persist_errors += 1;
                    error!(task = %outcome.task, error = %e, "Failed to save results");
                }
            }
        }

        let mut marked = Vec::new();
        let mut deferred = Vec::new();
        for (chunk, ok) in chunks.iter().zip(&chunk_ok) {
            let keys = chunk.iter().map(|item| item.key().to_string());
            match (self.options.failure_policy, ok) {
                (FailurePolicy::RetryNextRun, false) => deferred.extend(keys),
                _ => marked.extend(keys),
            }
        }

        if !deferred.is_empty() {
            warn!(kind = %kind, count = deferred.len(), "No usable output, leaving items for the next run");
        }

        let phase = report.phase_mut(kind);
        phase.items_deferred += deferred.len();
        phase.items_marked += marked.len();

        if !marked.is_empty() {
            if let Err(e) = self.store.mark_processed(kind, marked) {
                phase.persist_errors += 1;
                error!(kind = %kind, error = %e, "Failed to save progress");
            }
        }

        deferred
    }

    /// Inter-cycle pause, cut short by a stop request
    async fn pause(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.shutdown.stopped() => {}
        }
    }
}
