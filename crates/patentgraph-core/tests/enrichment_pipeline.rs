//! End-to-end runs of the orchestrator against an in-memory model

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use patentgraph_core::catalog::{PatentRecord, WorkCatalog};
use patentgraph_core::config::FailurePolicy;
use patentgraph_core::domain::{ItemKind, ResultKind};
use patentgraph_core::enrich::{EnrichOptions, Orchestrator, RunReport};
use patentgraph_core::llm::{ChatRequest, ChatTransport, LlmClient, RetryPolicy};
use patentgraph_core::shutdown::ShutdownSignal;
use patentgraph_core::storage::DurableStore;
use patentgraph_core::taxonomy::Taxonomy;
use patentgraph_core::{Error, Result};
use serde_json::json;
use tempfile::TempDir;

/// Answers every prompt with a well-formed array covering the items it names
#[derive(Default)]
struct ModelStub {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    delay: Option<Duration>,
    /// Prompts mentioning any of these keys fail permanently
    failing: HashSet<String>,
    /// Prompts mentioning any of these keys get prose instead of JSON
    garbled: HashSet<String>,
    /// Request a stop once this many calls have started
    stop_after: Option<(usize, ShutdownSignal)>,
    /// Every key seen in a prompt, with the number of prompts it appeared in
    seen: Mutex<HashMap<String, usize>>,
}

impl ModelStub {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn times_seen(&self, key: &str) -> usize {
        self.seen.lock().unwrap().get(key).copied().unwrap_or(0)
    }

    fn max_times_any_key_seen(&self) -> usize {
        self.seen.lock().unwrap().values().copied().max().unwrap_or(0)
    }
}

fn patent_ids(prompt: &str) -> Vec<String> {
    prompt
        .lines()
        .filter_map(|line| line.strip_prefix("ID: "))
        .map(|id| id.trim().to_string())
        .collect()
}

fn entity_names(prompt: &str) -> Vec<String> {
    prompt
        .lines()
        .filter_map(|line| line.split_once("(标准化名称: "))
        .filter_map(|(_, rest)| rest.split_once(','))
        .map(|(name, _)| name.to_string())
        .collect()
}

#[async_trait]
impl ChatTransport for ModelStub {
    async fn send(&self, request: &ChatRequest) -> Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, signal)) = &self.stop_after {
            if n >= *after {
                signal.request_stop();
            }
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let prompt = request
            .messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let is_location = prompt.contains("\"normalized_name\"");
        let keys = if is_location {
            entity_names(prompt)
        } else {
            patent_ids(prompt)
        };

        {
            let mut seen = self.seen.lock().unwrap();
            for key in &keys {
                *seen.entry(key.clone()).or_default() += 1;
            }
        }

        if keys.iter().any(|k| self.failing.contains(k)) {
            return Err(Error::InvalidInput("rejected by stub".to_string()));
        }
        if keys.iter().any(|k| self.garbled.contains(k)) {
            return Ok("Sorry, I cannot help with that.".to_string());
        }

        let body = if is_location {
            keys.iter()
                .map(|name| {
                    json!({
                        "normalized_name": name,
                        "province": "北京市",
                        "city": "北京市",
                        "district": "海淀区",
                        "confidence": 0.9,
                        "source": "企业信用信息公示系统"
                    })
                })
                .collect::<Vec<_>>()
        } else if prompt.contains("\"tech_domains\"") {
            keys.iter()
                .map(|id| {
                    json!({
                        "patent_id": id,
                        "tech_domains": [
                            {"code": "H1.1.2", "level": 3, "confidence": 0.8, "reasoning": "PEM"}
                        ]
                    })
                })
                .collect()
        } else {
            keys.iter()
                .map(|id| {
                    json!({
                        "patent_id": id,
                        "category_code": "GT1",
                        "category_type": "零碳使能型",
                        "confidence": 0.9,
                        "reasoning": "电解水制氢"
                    })
                })
                .collect()
        };

        Ok(format!("```json\n{}\n```", serde_json::Value::Array(body)))
    }
}

fn records(n: usize, with_applicants: bool) -> Vec<PatentRecord> {
    (1..=n)
        .map(|i| PatentRecord {
            patent_id: format!("CN{:03}", i),
            title: format!("一种制氢装置{}", i),
            abstract_text: "本发明公开了一种质子交换膜电解水制氢装置".to_string(),
            applicants: if with_applicants {
                vec![format!("氢能科技{}有限公司", i % 3)]
            } else {
                Vec::new()
            },
            ..PatentRecord::default()
        })
        .collect()
}

fn options(batch_size: usize, max_concurrency: usize) -> EnrichOptions {
    EnrichOptions {
        batch_size,
        entity_batch_size: batch_size,
        max_concurrency,
        patent_pause: Duration::ZERO,
        entity_pause: Duration::ZERO,
        green: true,
        tech: true,
        location: true,
        failure_policy: FailurePolicy::MarkProcessed,
    }
}

struct Harness {
    stub: Arc<ModelStub>,
    store: Arc<DurableStore>,
    shutdown: ShutdownSignal,
}

impl Harness {
    fn new(dir: &Path, session: &str, stub: ModelStub) -> Self {
        Self::with_signal(dir, session, stub, ShutdownSignal::new())
    }

    fn with_signal(dir: &Path, session: &str, stub: ModelStub, shutdown: ShutdownSignal) -> Self {
        Self {
            stub: Arc::new(stub),
            store: Arc::new(DurableStore::open(dir, session).unwrap()),
            shutdown,
        }
    }

    async fn run(&self, records: Vec<PatentRecord>, options: EnrichOptions) -> RunReport {
        let client = LlmClient::builder()
            .transport(self.stub.clone())
            .max_concurrent(options.max_concurrency)
            .retry_policy(RetryPolicy::new(0, Duration::ZERO))
            .build()
            .unwrap();

        Orchestrator::new(
            client,
            self.store.clone(),
            Arc::new(WorkCatalog::from_records(records)),
            Arc::new(Taxonomy::builtin()),
            options,
            self.shutdown.clone(),
        )
        .run()
        .await
    }
}

#[tokio::test]
async fn test_single_cycle_covers_all_patents() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path(), "s1", ModelStub::default());

    let report = harness.run(records(12, false), options(10, 5)).await;

    // 12 items fit one cycle: chunks of 10 and 2, two tasks each
    assert_eq!(report.patents.cycles, 1);
    assert_eq!(report.patents.calls_dispatched, 4);
    assert_eq!(harness.stub.calls(), 4);
    assert_eq!(report.patents.items_marked, 12);
    assert_eq!(harness.store.processed_count(ItemKind::Patent), 12);
    assert_eq!(harness.store.record_count(ResultKind::Green), 12);
    assert_eq!(harness.store.record_count(ResultKind::Tech), 12);
    assert_eq!(report.records_persisted.green, 12);
    assert_eq!(report.stats.successful_requests, 4);
    assert!(!report.cancelled);
    assert!(report.fully_persisted);
    assert_eq!(report.remaining(), 0);
}

#[tokio::test]
async fn test_entities_follow_patents() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path(), "s1", ModelStub::default());

    let report = harness.run(records(6, true), options(2, 2)).await;

    assert!(report.total_entities > 0);
    assert!(report.entities.enabled);
    assert_eq!(report.processed_entities, report.total_entities);
    assert_eq!(
        harness.store.record_count(ResultKind::Location),
        report.total_entities
    );
    let location = &harness.store.entity_locations()[0];
    assert_eq!(location.province.as_deref(), Some("北京市"));
}

#[tokio::test]
async fn test_disabled_tasks_skip_phase() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path(), "s1", ModelStub::default());
    let mut opts = options(5, 2);
    opts.location = false;

    let report = harness.run(records(4, true), opts).await;

    assert!(!report.entities.enabled);
    assert_eq!(report.entities.calls_dispatched, 0);
    assert_eq!(harness.store.processed_count(ItemKind::Entity), 0);
    assert_eq!(harness.store.processed_count(ItemKind::Patent), 4);
}

#[tokio::test]
async fn test_resumed_session_makes_no_new_calls() {
    let dir = TempDir::new().unwrap();

    let first = Harness::new(dir.path(), "s1", ModelStub::default());
    first.run(records(7, true), options(3, 2)).await;
    let green_before = first.store.record_count(ResultKind::Green);
    let locations_before = first.store.record_count(ResultKind::Location);
    assert!(first.stub.calls() > 0);
    drop(first);

    // Fresh store and client on the same files, as a new process would
    let second = Harness::new(dir.path(), "s1", ModelStub::default());
    let report = second.run(records(7, true), options(3, 2)).await;

    assert_eq!(second.stub.calls(), 0);
    assert_eq!(report.patents.cycles, 0);
    assert_eq!(second.store.record_count(ResultKind::Green), green_before);
    assert_eq!(
        second.store.record_count(ResultKind::Location),
        locations_before
    );
}

#[tokio::test]
async fn test_sessions_do_not_share_progress() {
    let dir = TempDir::new().unwrap();
    let first = Harness::new(dir.path(), "a", ModelStub::default());
    first.run(records(3, false), options(3, 1)).await;

    let other = Harness::new(dir.path(), "b", ModelStub::default());
    other.run(records(3, false), options(3, 1)).await;

    assert_eq!(other.stub.calls(), 2);
    assert_eq!(other.store.processed_count(ItemKind::Patent), 3);
}

#[tokio::test]
async fn test_stop_during_calls_finishes_cycle() {
    let dir = TempDir::new().unwrap();
    let signal = ShutdownSignal::new();
    let stub = ModelStub {
        stop_after: Some((1, signal.clone())),
        ..ModelStub::default()
    };
    let harness = Harness::with_signal(dir.path(), "s1", stub, signal);
    let mut opts = options(1, 3);
    opts.tech = false;

    let report = harness.run(records(5, false), opts).await;

    // The first cycle was already dispatched when the stop arrived
    assert_eq!(harness.stub.calls(), 3);
    assert_eq!(harness.store.processed_count(ItemKind::Patent), 3);
    assert_eq!(harness.store.record_count(ResultKind::Green), 3);
    assert!(report.cancelled);
    assert_eq!(report.remaining(), 2);

    // Durable state matches memory
    let reopened = DurableStore::open(dir.path(), "s1").unwrap();
    assert_eq!(reopened.processed_count(ItemKind::Patent), 3);
    assert_eq!(reopened.record_count(ResultKind::Green), 3);
}

#[tokio::test]
async fn test_stop_before_run_dispatches_nothing() {
    let dir = TempDir::new().unwrap();
    let signal = ShutdownSignal::new();
    signal.request_stop();
    let harness = Harness::with_signal(dir.path(), "s1", ModelStub::default(), signal);

    let report = harness.run(records(5, true), options(2, 2)).await;

    assert_eq!(harness.stub.calls(), 0);
    assert!(report.cancelled);
    assert_eq!(report.processed_patents, 0);
}

#[tokio::test]
async fn test_cancelled_session_resumes_where_it_stopped() {
    let dir = TempDir::new().unwrap();
    let signal = ShutdownSignal::new();
    let stub = ModelStub {
        stop_after: Some((1, signal.clone())),
        ..ModelStub::default()
    };
    let first = Harness::with_signal(dir.path(), "s1", stub, signal);
    let mut opts = options(1, 2);
    opts.tech = false;
    opts.location = false;
    first.run(records(5, false), opts.clone()).await;
    assert_eq!(first.store.processed_count(ItemKind::Patent), 2);
    drop(first);

    let second = Harness::new(dir.path(), "s1", ModelStub::default());
    let report = second.run(records(5, false), opts).await;

    assert_eq!(second.stub.calls(), 3);
    assert_eq!(second.stub.times_seen("CN001"), 0);
    assert_eq!(second.stub.times_seen("CN005"), 1);
    assert_eq!(report.processed_patents, 5);
    assert_eq!(second.store.record_count(ResultKind::Green), 5);
}

#[tokio::test]
async fn test_each_key_submitted_once_per_task() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path(), "s1", ModelStub::default());
    let mut opts = options(2, 3);
    opts.tech = false;

    harness.run(records(11, true), opts).await;

    assert_eq!(harness.stub.max_times_any_key_seen(), 1);
    assert_eq!(harness.stub.times_seen("CN011"), 1);
}

#[tokio::test]
async fn test_failed_chunks_marked_by_default() {
    let dir = TempDir::new().unwrap();
    let stub = ModelStub {
        failing: HashSet::from(["CN002".to_string()]),
        garbled: HashSet::from(["CN003".to_string()]),
        ..ModelStub::default()
    };
    let harness = Harness::new(dir.path(), "s1", stub);
    let mut opts = options(1, 4);
    opts.tech = false;

    let report = harness.run(records(4, false), opts).await;

    assert_eq!(report.patents.calls_failed, 1);
    assert_eq!(report.patents.malformed_responses, 1);
    assert_eq!(report.stats.failed_requests, 1);
    assert_eq!(harness.store.processed_count(ItemKind::Patent), 4);
    assert_eq!(harness.store.record_count(ResultKind::Green), 2);
    assert_eq!(harness.stub.times_seen("CN002"), 1);
}

#[tokio::test]
async fn test_retry_next_run_defers_failed_chunks() {
    let dir = TempDir::new().unwrap();
    let stub = ModelStub {
        failing: HashSet::from(["CN003".to_string()]),
        ..ModelStub::default()
    };
    let first = Harness::new(dir.path(), "s1", stub);
    let mut opts = options(1, 2);
    opts.tech = false;
    opts.failure_policy = FailurePolicy::RetryNextRun;

    let report = first.run(records(4, false), opts.clone()).await;

    // The run still terminates, and the failed key stays out of the ledger
    assert_eq!(report.patents.items_deferred, 1);
    assert_eq!(first.stub.times_seen("CN003"), 1);
    assert!(!first.store.is_processed(ItemKind::Patent, "CN003"));
    assert_eq!(first.store.processed_count(ItemKind::Patent), 3);
    drop(first);

    let second = Harness::new(dir.path(), "s1", ModelStub::default());
    second.run(records(4, false), opts).await;

    assert_eq!(second.stub.calls(), 1);
    assert_eq!(second.stub.times_seen("CN003"), 1);
    assert!(second.store.is_processed(ItemKind::Patent, "CN003"));
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_calls_stay_within_limit() {
    let dir = TempDir::new().unwrap();
    let stub = ModelStub {
        delay: Some(Duration::from_millis(200)),
        ..ModelStub::default()
    };
    let harness = Harness::new(dir.path(), "s1", stub);
    let mut opts = options(1, 3);
    opts.location = false;

    harness.run(records(9, false), opts).await;

    // Three chunks with two tasks each are dispatched per cycle, gated to three
    assert_eq!(harness.stub.peak.load(Ordering::SeqCst), 3);
    assert_eq!(harness.stub.calls(), 18);
    assert_eq!(harness.store.processed_count(ItemKind::Patent), 9);
}

#[tokio::test(start_paused = true)]
async fn test_short_fetch_ends_phase_without_pause() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path(), "s1", ModelStub::default());
    let mut opts = options(10, 1);
    opts.tech = false;
    opts.location = false;
    opts.patent_pause = Duration::from_secs(60);

    let started = tokio::time::Instant::now();
    let report = harness.run(records(3, false), opts).await;

    assert_eq!(report.patents.cycles, 1);
    assert_eq!(report.processed_patents, 3);
    assert!(started.elapsed() < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_full_fetch_pauses_before_next_cycle() {
    let dir = TempDir::new().unwrap();
    let harness = Harness::new(dir.path(), "s1", ModelStub::default());
    let mut opts = options(5, 1);
    opts.tech = false;
    opts.location = false;
    opts.patent_pause = Duration::from_secs(60);

    let started = tokio::time::Instant::now();
    let report = harness.run(records(8, false), opts).await;

    // One pause after the full first cycle, none after the short second one
    assert_eq!(report.patents.cycles, 2);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(60));
    assert!(elapsed < Duration::from_secs(120));
}
