//! Session manager
//!
//! A session is nothing more than a family of files sharing an id prefix in
//! the output directory. The manager names new sessions and enumerates the
//! existing ones without touching their contents.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::domain::ResultKind;
use crate::error::{Error, Result};
use crate::storage::{PROGRESS_FILE_SUFFIX, ProgressLedger, StoreKind};

/// Summary row for `list_sessions`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: String,
    pub processed_patents: usize,
    pub processed_entities: usize,
    pub last_update: Option<String>,
}

/// Detailed, read-only view of one session
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    pub processed_patents: usize,
    pub processed_entities: usize,
    pub last_update: Option<String>,
    pub green_classifications: usize,
    pub tech_classifications: usize,
    pub entity_locations: usize,
}

impl SessionSummary {
    pub fn record_count(&self, kind: ResultKind) -> usize {
        match kind {
            ResultKind::Green => self.green_classifications,
            ResultKind::Tech => self.tech_classifications,
            ResultKind::Location => self.entity_locations,
        }
    }
}

/// Reject ids that are empty or could escape the output directory
pub fn validate_session_id(id: &str) -> Result<()> {
    let invalid = id.trim().is_empty()
        || id.contains('/')
        || id.contains('\\')
        || id.contains("..")
        || id.chars().any(char::is_control);
    if invalid {
        return Err(Error::InvalidSessionId(id.to_string()));
    }
    Ok(())
}

/// Creates, resumes and lists sessions under one output directory
#[derive(Debug, Clone)]
pub struct SessionManager {
    output_dir: PathBuf,
}

impl SessionManager {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Use `name` verbatim, or generate a fresh timestamp id
    pub fn create_or_resume(&self, name: Option<&str>) -> Result<String> {
        match name {
            Some(id) => {
                validate_session_id(id)?;
                if self.exists(id) {
                    info!(session_id = %id, "Resuming session");
                } else {
                    info!(session_id = %id, "Starting named session");
                }
                Ok(id.to_string())
            }
            None => {
                let id = self.generate_id();
                info!(session_id = %id, "Created new session");
                Ok(id)
            }
        }
    }

    /// Whether any file of session `id` is present
    pub fn exists(&self, id: &str) -> bool {
        std::iter::once(StoreKind::Progress)
            .chain(ResultKind::ALL.iter().copied().map(StoreKind::Results))
            .any(|kind| self.path(id, kind).exists())
    }

    /// All sessions with a readable progress file, most recent first
    pub fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        let entries = match fs::read_dir(&self.output_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut sessions = Vec::new();
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(id) = name.strip_suffix(PROGRESS_FILE_SUFFIX) else {
                continue;
            };
            if id.is_empty() {
                continue;
            }

            match ProgressLedger::read(&entry.path()) {
                Ok(ledger) => sessions.push(SessionInfo {
                    id: id.to_string(),
                    processed_patents: ledger.processed_patents.len(),
                    processed_entities: ledger.processed_entities.len(),
                    last_update: ledger.last_update,
                }),
                Err(e) => debug!(file = %name, error = %e, "Skipping unreadable progress file"),
            }
        }

        sessions.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(sessions)
    }

    /// Most recent session by id order
    pub fn latest(&self) -> Result<Option<String>> {
        Ok(self.list_sessions()?.into_iter().next().map(|s| s.id))
    }

    /// Counts for session `id`, read straight from its files
    pub fn summary(&self, id: &str) -> Result<SessionSummary> {
        validate_session_id(id)?;
        if !self.exists(id) {
            return Err(Error::SessionNotFound(id.to_string()));
        }

        let progress_path = self.path(id, StoreKind::Progress);
        let ledger = if progress_path.exists() {
            ProgressLedger::read(&progress_path)?
        } else {
            ProgressLedger::new(id)
        };

        Ok(SessionSummary {
            id: id.to_string(),
            processed_patents: ledger.processed_patents.len(),
            processed_entities: ledger.processed_entities.len(),
            last_update: ledger.last_update,
            green_classifications: self.count_records(id, ResultKind::Green)?,
            tech_classifications: self.count_records(id, ResultKind::Tech)?,
            entity_locations: self.count_records(id, ResultKind::Location)?,
        })
    }

    fn path(&self, id: &str, kind: StoreKind) -> PathBuf {
        self.output_dir.join(kind.file_name(id))
    }

    fn count_records(&self, id: &str, kind: ResultKind) -> Result<usize> {
        let path = self.path(id, StoreKind::Results(kind));
        if !path.exists() {
            return Ok(0);
        }
        let contents = fs::read_to_string(&path)?;
        match serde_json::from_str::<Value>(&contents)? {
            Value::Array(items) => Ok(items.len()),
            _ => Err(Error::Other(format!(
                "{} does not hold a JSON array",
                path.display()
            ))),
        }
    }

    fn generate_id(&self) -> String {
        let base = Local::now().format("%Y%m%d_%H%M%S").to_string();
        if !self.exists(&base) {
            return base;
        }
        (2..)
            .map(|n| format!("{}_{}", base, n))
            .find(|candidate| !self.exists(candidate))
            .unwrap_or(base)
    }
}
