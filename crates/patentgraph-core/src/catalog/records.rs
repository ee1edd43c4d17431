//! Inbound patent records
//!
//! Records arrive already normalized, either as one JSON array or as JSON
//! Lines (`.jsonl`, one record per line).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// A normalized patent as produced by the extraction step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatentRecord {
    /// Publication number, or application number when unpublished
    pub patent_id: String,
    pub pub_number: Option<String>,
    pub app_number: Option<String>,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub title_en: Option<String>,
    pub abstract_en: Option<String>,
    pub patent_type: Option<String>,
    pub ipc_main_class: Option<String>,
    pub tech_domain_hint: Option<String>,
    pub applicants: Vec<String>,
    pub current_owners: Vec<String>,
}

impl PatentRecord {
    /// Key with surrounding whitespace removed
    pub fn key(&self) -> &str {
        self.patent_id.trim()
    }

    /// Whether the record carries enough text to build a prompt
    pub fn has_text(&self) -> bool {
        !self.title.trim().is_empty() && !self.abstract_text.trim().is_empty()
    }
}

/// Read records from a `.json` array or a `.jsonl` file
pub fn load_records(path: &Path) -> Result<Vec<PatentRecord>> {
    if !path.exists() {
        return Err(Error::RecordsNotFound(path.to_path_buf()));
    }

    let contents = fs::read_to_string(path)?;
    let is_jsonl = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("jsonl") || ext.eq_ignore_ascii_case("ndjson"))
        .unwrap_or(false);

    let records = if is_jsonl {
        parse_json_lines(path, &contents)?
    } else {
        serde_json::from_str(&contents).map_err(|e| Error::RecordsParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?
    };

    debug!(path = %path.display(), count = records.len(), "Loaded patent records");
    Ok(records)
}

fn parse_json_lines(path: &Path, contents: &str) -> Result<Vec<PatentRecord>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|e| Error::RecordsParse {
                path: path.to_path_buf(),
                message: format!("line {}: {}", idx + 1, e),
            })
        })
        .collect()
}
