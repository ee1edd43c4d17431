//! Structured enrichment outputs

use serde::{Deserialize, Serialize};

use super::items::ItemKind;

/// Result collections persisted per session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Green,
    Tech,
    Location,
}

impl ResultKind {
    pub const ALL: [ResultKind; 3] = [Self::Green, Self::Tech, Self::Location];

    /// Suffix of the session file holding this collection
    pub fn file_stem(&self) -> &'static str {
        match self {
            Self::Green => "green_classifications",
            Self::Tech => "tech_classifications",
            Self::Location => "entity_locations",
        }
    }

    /// Kind of item the task consumes
    pub fn item_kind(&self) -> ItemKind {
        match self {
            Self::Green | Self::Tech => ItemKind::Patent,
            Self::Location => ItemKind::Entity,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Tech => "tech",
            Self::Location => "location",
        }
    }
}

impl std::fmt::Display for ResultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Green-technology category assigned to a patent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GreenClassification {
    pub patent_id: String,
    /// One of GT1..GT5
    pub category_code: String,
    pub category_type: String,
    pub confidence: f64,
    pub reasoning: String,
}

/// One technology-domain match for a patent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechClassification {
    pub patent_id: String,
    /// Taxonomy code such as `H1.1.2`
    pub code: String,
    pub level: u8,
    pub confidence: f64,
    pub reasoning: String,
}

/// Registered location of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityLocation {
    pub normalized_name: String,
    pub province: Option<String>,
    pub city: Option<String>,
    pub district: Option<String>,
    pub confidence: f64,
    pub source: String,
}

/// Records of a single kind, appended to the store in one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum ResultBatch {
    Green(Vec<GreenClassification>),
    Tech(Vec<TechClassification>),
    Location(Vec<EntityLocation>),
}

impl ResultBatch {
    pub fn kind(&self) -> ResultKind {
        match self {
            Self::Green(_) => ResultKind::Green,
            Self::Tech(_) => ResultKind::Tech,
            Self::Location(_) => ResultKind::Location,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Green(records) => records.len(),
            Self::Tech(records) => records.len(),
            Self::Location(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Natural keys of the items the records belong to
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Self::Green(records) => records.iter().map(|r| r.patent_id.as_str()).collect(),
            Self::Tech(records) => records.iter().map(|r| r.patent_id.as_str()).collect(),
            Self::Location(records) => records.iter().map(|r| r.normalized_name.as_str()).collect(),
        }
    }
}
