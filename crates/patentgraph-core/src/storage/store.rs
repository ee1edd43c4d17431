//! JSON-backed durable store for one session
//!
//! Every kind lives in its own file under the output directory:
//!
//! ```text
//! llm_output/
//! ├── {session}_green_classifications.json
//! ├── {session}_tech_classifications.json
//! ├── {session}_entity_locations.json
//! └── {session}_progress.json
//! ```
//!
//! Writes serialize the whole collection to a temporary file in the same
//! directory, fsync it, then rename it over the previous snapshot. A reader
//! sees either the old or the new file, never a partial one.

use std::collections::HashSet;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::domain::{
    EntityLocation, GreenClassification, ItemKind, ResultBatch, ResultKind, TechClassification,
};
use crate::error::{Error, Result};

use super::progress::ProgressLedger;

/// Suffix of the progress file
pub const PROGRESS_FILE_SUFFIX: &str = "_progress.json";

/// A persisted collection within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreKind {
    Results(ResultKind),
    Progress,
}

impl StoreKind {
    /// File name of this collection for `session_id`
    pub fn file_name(&self, session_id: &str) -> String {
        match self {
            Self::Results(kind) => format!("{}_{}.json", session_id, kind.file_stem()),
            Self::Progress => format!("{}{}", session_id, PROGRESS_FILE_SUFFIX),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Results(kind) => kind.file_stem(),
            Self::Progress => "progress",
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    green: Vec<GreenClassification>,
    tech: Vec<TechClassification>,
    locations: Vec<EntityLocation>,
    progress: ProgressLedger,
    /// Kinds whose last write failed
    dirty: HashSet<StoreKind>,
}

/// Session-scoped persistence for result collections and the progress ledger
///
/// All mutation goes through one mutex, so concurrently completing tasks
/// never interleave partial writes.
#[derive(Debug)]
pub struct DurableStore {
    output_dir: PathBuf,
    session_id: String,
    state: Mutex<StoreState>,
}

impl DurableStore {
    /// Open the store for `session_id`, loading any prior state
    ///
    /// Missing or unreadable files start empty.
    pub fn open(output_dir: impl Into<PathBuf>, session_id: impl Into<String>) -> Result<Self> {
        let output_dir = output_dir.into();
        let session_id = session_id.into();
        fs::create_dir_all(&output_dir)?;

        let store = Self {
            output_dir,
            session_id,
            state: Mutex::new(StoreState::default()),
        };

        let mut progress: ProgressLedger = store.load(StoreKind::Progress);
        if progress.session_id.is_empty() {
            progress.session_id = store.session_id.clone();
        }

        let state = StoreState {
            green: store.load(StoreKind::Results(ResultKind::Green)),
            tech: store.load(StoreKind::Results(ResultKind::Tech)),
            locations: store.load(StoreKind::Results(ResultKind::Location)),
            progress,
            dirty: HashSet::new(),
        };

        info!(
            session_id = %store.session_id,
            processed_patents = state.progress.processed_count(ItemKind::Patent),
            processed_entities = state.progress.processed_count(ItemKind::Entity),
            green = state.green.len(),
            tech = state.tech.len(),
            locations = state.locations.len(),
            "Opened durable store"
        );

        *store.lock() = state;
        Ok(store)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path of the file backing `kind`
    pub fn path_for(&self, kind: StoreKind) -> PathBuf {
        self.output_dir.join(kind.file_name(&self.session_id))
    }

    /// Append records and persist the whole collection
    ///
    /// On a write failure the records stay in memory and are written by the
    /// next successful append or [`flush`](Self::flush).
    pub fn append(&self, batch: ResultBatch) -> Result<usize> {
        let kind = batch.kind();
        let added = batch.len();
        if added == 0 {
            return Ok(0);
        }

        let mut state = self.lock();
        match batch {
            ResultBatch::Green(records) => state.green.extend(records),
            ResultBatch::Tech(records) => state.tech.extend(records),
            ResultBatch::Location(records) => state.locations.extend(records),
        }
        self.persist_locked(&mut state, StoreKind::Results(kind))?;

        debug!(kind = %kind, added, "Appended results");
        Ok(added)
    }

    /// Record keys as processed and persist the ledger; returns how many were new
    pub fn mark_processed<I>(&self, kind: ItemKind, keys: I) -> Result<usize>
    where
        I: IntoIterator<Item = String>,
    {
        let mut state = self.lock();
        let added = state.progress.mark(kind, keys);
        self.persist_locked(&mut state, StoreKind::Progress)?;

        debug!(kind = %kind, added, "Marked items processed");
        Ok(added)
    }

    pub fn is_processed(&self, kind: ItemKind, key: &str) -> bool {
        self.lock().progress.is_processed(kind, key)
    }

    pub fn processed_count(&self, kind: ItemKind) -> usize {
        self.lock().progress.processed_count(kind)
    }

    pub fn record_count(&self, kind: ResultKind) -> usize {
        let state = self.lock();
        match kind {
            ResultKind::Green => state.green.len(),
            ResultKind::Tech => state.tech.len(),
            ResultKind::Location => state.locations.len(),
        }
    }

    /// Copy of the ledger as currently held in memory
    pub fn ledger(&self) -> ProgressLedger {
        self.lock().progress.clone()
    }

    pub fn green_classifications(&self) -> Vec<GreenClassification> {
        self.lock().green.clone()
    }

    pub fn tech_classifications(&self) -> Vec<TechClassification> {
        self.lock().tech.clone()
    }

    pub fn entity_locations(&self) -> Vec<EntityLocation> {
        self.lock().locations.clone()
    }

    /// Whether any kind is waiting for a successful write
    pub fn has_unsaved_changes(&self) -> bool {
        !self.lock().dirty.is_empty()
    }

    /// Re-persist every kind whose last write failed
    pub fn flush(&self) -> Result<()> {
        let mut state = self.lock();
        let pending: Vec<StoreKind> = state.dirty.iter().copied().collect();
        let mut first_error = None;

        for kind in pending {
            if let Err(e) = self.persist_locked(&mut state, kind) {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // A panic while holding the lock leaves the collections intact
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist_locked(&self, state: &mut StoreState, kind: StoreKind) -> Result<()> {
        let path = self.path_for(kind);
        let written = match kind {
            StoreKind::Results(ResultKind::Green) => write_json_atomic(&path, &state.green),
            StoreKind::Results(ResultKind::Tech) => write_json_atomic(&path, &state.tech),
            StoreKind::Results(ResultKind::Location) => write_json_atomic(&path, &state.locations),
            StoreKind::Progress => write_json_atomic(&path, &state.progress),
        };

        match written {
            Ok(()) => {
                state.dirty.remove(&kind);
                Ok(())
            }
            Err(source) => {
                error!(
                    kind = kind.label(),
                    path = %path.display(),
                    error = %source,
                    "Failed to persist, keeping data in memory"
                );
                state.dirty.insert(kind);
                Err(Error::PersistFailed {
                    kind: kind.label().to_string(),
                    path,
                    source,
                })
            }
        }
    }

    fn load<T>(&self, kind: StoreKind) -> T
    where
        T: DeserializeOwned + Default,
    {
        let path = self.path_for(kind);
        if !path.exists() {
            return T::default();
        }

        let parsed = fs::read_to_string(&path)
            .map_err(Error::from)
            .and_then(|contents| serde_json::from_str(&contents).map_err(Error::from));

        match parsed {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    kind = kind.label(),
                    path = %path.display(),
                    error = %e,
                    "Could not load prior data, starting empty"
                );
                preserve_unreadable(&path);
                T::default()
            }
        }
    }
}

/// Write `value` as pretty JSON via temp file + fsync + rename
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Keep a copy of an unreadable file next to it before it gets overwritten
fn preserve_unreadable(path: &Path) {
    let mut backup = path.as_os_str().to_owned();
    backup.push(".corrupt");
    if let Err(e) = fs::copy(path, &backup) {
        warn!(path = %path.display(), error = %e, "Could not back up unreadable file");
    }
}
