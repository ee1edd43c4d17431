//! Run summary returned by the orchestrator

use serde::Serialize;

use crate::domain::{ItemKind, ResultKind};
use crate::llm::StatsSnapshot;

/// Counters for one item kind
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PhaseReport {
    pub kind: ItemKind,
    /// Whether any task was enabled for this kind
    pub enabled: bool,
    pub cycles: usize,
    pub items_fetched: usize,
    pub items_marked: usize,
    /// Items left out of the ledger for the next run
    pub items_deferred: usize,
    pub calls_dispatched: usize,
    pub calls_failed: usize,
    pub malformed_responses: usize,
    pub records_rejected: usize,
    pub persist_errors: usize,
}

impl PhaseReport {
    pub fn new(kind: ItemKind) -> Self {
        Self {
            kind,
            enabled: false,
            cycles: 0,
            items_fetched: 0,
            items_marked: 0,
            items_deferred: 0,
            calls_dispatched: 0,
            calls_failed: 0,
            malformed_responses: 0,
            records_rejected: 0,
            persist_errors: 0,
        }
    }
}

/// Records appended during the run, per result kind
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct RecordCounts {
    pub green: usize,
    pub tech: usize,
    pub location: usize,
}

impl RecordCounts {
    pub fn add(&mut self, kind: ResultKind, n: usize) {
        match kind {
            ResultKind::Green => self.green += n,
            ResultKind::Tech => self.tech += n,
            ResultKind::Location => self.location += n,
        }
    }

    pub fn get(&self, kind: ResultKind) -> usize {
        match kind {
            ResultKind::Green => self.green,
            ResultKind::Tech => self.tech,
            ResultKind::Location => self.location,
        }
    }

    pub fn total(&self) -> usize {
        self.green + self.tech + self.location
    }
}

/// Everything a caller needs to report on a finished or interrupted run
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunReport {
    pub session_id: String,
    pub patents: PhaseReport,
    pub entities: PhaseReport,
    pub records_persisted: RecordCounts,
    pub cancelled: bool,
    pub total_patents: usize,
    pub total_entities: usize,
    pub processed_patents: usize,
    pub processed_entities: usize,
    pub elapsed_secs: f64,
    pub stats: StatsSnapshot,
    /// False when some data could not be written even by the final flush
    pub fully_persisted: bool,
}

impl RunReport {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            patents: PhaseReport::new(ItemKind::Patent),
            entities: PhaseReport::new(ItemKind::Entity),
            records_persisted: RecordCounts::default(),
            cancelled: false,
            total_patents: 0,
            total_entities: 0,
            processed_patents: 0,
            processed_entities: 0,
            elapsed_secs: 0.0,
            stats: StatsSnapshot::default(),
            fully_persisted: true,
        }
    }

    pub fn phase(&self, kind: ItemKind) -> &PhaseReport {
        match kind {
            ItemKind::Patent => &self.patents,
            ItemKind::Entity => &self.entities,
        }
    }

    pub fn phase_mut(&mut self, kind: ItemKind) -> &mut PhaseReport {
        match kind {
            ItemKind::Patent => &mut self.patents,
            ItemKind::Entity => &mut self.entities,
        }
    }

    /// Command that continues this session
    pub fn resume_hint(&self) -> String {
        format!("patentgraph enrich --session {}", self.session_id)
    }

    /// Items of either kind still waiting for a run
    pub fn remaining(&self) -> usize {
        self.total_patents.saturating_sub(self.processed_patents)
            + self.total_entities.saturating_sub(self.processed_entities)
    }
}
